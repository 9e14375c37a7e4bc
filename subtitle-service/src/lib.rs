pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;
pub mod workers;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Router,
};
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::{make_request_span, request_id_middleware},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::services::{
    AdminService, AuthService, DashboardService, JwtService, Notifier, OrderService,
    PaymentService, Repository,
};
use crate::workers::{JobEvent, JobQueue};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub repo: Arc<dyn Repository>,
    pub jwt: JwtService,
    pub auth: AuthService,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub admin: AdminService,
    pub dashboard: DashboardService,
    pub notifier: Notifier,
    pub jobs: JobQueue,
    pub job_events: mpsc::Sender<JobEvent>,
    pub login_rate_limiter: IpRateLimiter,
    pub register_rate_limiter: IpRateLimiter,
}

pub fn build_router(state: AppState) -> Router {
    let login_route = Router::new()
        .route("/api/auth/login", post(handlers::auth::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let register_route = Router::new()
        .route("/api/auth/register", post(handlers::auth::register))
        .layer(from_fn_with_state(
            state.register_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let admin_routes = Router::new()
        .route("/api/admin/users", get(handlers::admin::list_users))
        .route(
            "/api/admin/users/:id",
            get(handlers::admin::get_user).put(handlers::admin::update_user),
        )
        .route("/api/admin/users/:id/role", put(handlers::admin::change_role))
        .route("/api/admin/orders", get(handlers::admin::list_orders))
        .route(
            "/api/admin/orders/:id",
            get(handlers::admin::get_order).put(handlers::admin::update_order),
        )
        .route(
            "/api/admin/orders/:id/reprocess",
            post(handlers::admin::reprocess_order),
        )
        .route(
            "/api/admin/orders/:id/refund",
            post(handlers::admin::refund_order),
        )
        .route(
            "/api/admin/subtitles/:id/qa",
            put(handlers::admin::update_qa_status),
        )
        .route("/api/admin/logs", get(handlers::admin::list_logs))
        .route("/api/admin/stats", get(handlers::admin::stats))
        .route("/api/admin/settings", get(handlers::admin::list_settings))
        .route(
            "/api/admin/settings/:key",
            put(handlers::admin::update_setting),
        );

    let authenticated = Router::new()
        .route(
            "/api/users/me",
            get(handlers::users::get_me).put(handlers::users::update_me),
        )
        .route(
            "/api/orders",
            post(handlers::orders::create_order).get(handlers::orders::list_orders),
        )
        .route("/api/orders/:id", get(handlers::orders::get_order))
        .route(
            "/api/orders/:id/config",
            put(handlers::orders::update_config),
        )
        .route(
            "/api/orders/:id/subtitles",
            get(handlers::orders::list_subtitles),
        )
        .route(
            "/api/payments/checkout/:order_id",
            post(handlers::payments::create_checkout),
        )
        .route(
            "/api/payments/status/:order_id",
            get(handlers::payments::payment_status),
        )
        .route("/api/dashboard/overview", get(handlers::dashboard::overview))
        .route(
            "/api/dashboard/recent-orders",
            get(handlers::dashboard::recent_orders),
        )
        .route(
            "/api/dashboard/downloads",
            get(handlers::dashboard::downloads),
        )
        .route(
            "/api/notifications",
            get(handlers::notifications::list_notifications),
        )
        .route(
            "/api/notifications/:id/read",
            put(handlers::notifications::mark_read),
        )
        .merge(admin_routes)
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .security
                .allowed_origins
                .iter()
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(v) => Some(v),
                    Err(e) => {
                        tracing::error!(origin = %o, error = %e, "Invalid CORS origin ignored");
                        None
                    }
                })
                .collect::<Vec<HeaderValue>>(),
        )
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-request-id"),
        ]);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::metrics_handler))
        .route("/api/payments/webhook", post(handlers::payments::webhook))
        .route("/api/jobs/callback", post(handlers::jobs::job_callback))
        .merge(login_route)
        .merge(register_route)
        .merge(authenticated)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors)
}
