use service_core::error::AppError;
use service_core::observability::init_tracing;
use subtitle_service::{config::AppConfig, services::metrics, startup::Application};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    metrics::init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting subtitle service"
    );

    let application = Application::build(config).await?;
    application.run_until_stopped().await
}
