//! Business logic. Handlers stay thin and call into these services.

pub mod admin;
pub mod audit;
pub mod auth;
pub mod authorization;
pub mod dashboard;
pub mod error;
pub mod jwt;
pub mod metrics;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod repository;

pub use admin::{AdminCommand, AdminService};
pub use audit::{AuditEntry, AuditLogger, AuditReceipt};
pub use auth::AuthService;
pub use authorization::{authorize, Action, AuthorizationError};
pub use dashboard::DashboardService;
pub use error::ServiceError;
pub use jwt::{AuthenticationError, JwtService, Principal, TokenResponse};
pub use notifications::Notifier;
pub use orders::OrderService;
pub use payments::{MockPaymentProvider, PaymentProvider, PaymentService, StripeClient};
pub use repository::{MemoryRepository, PgRepository, Repository};
