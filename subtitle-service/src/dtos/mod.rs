pub mod admin;
pub mod auth;
pub mod dashboard;
pub mod jobs;
pub mod notifications;
pub mod orders;
pub mod payments;
