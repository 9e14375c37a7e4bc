//! HTTP handlers. Each one extracts, calls a service and serializes the result.

pub mod admin;
pub mod auth;
pub mod dashboard;
pub mod health;
pub mod jobs;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod users;
