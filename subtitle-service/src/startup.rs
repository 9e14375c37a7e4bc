//! Application assembly and lifecycle.

use service_core::error::AppError;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::models::SettingKey;
use crate::services::repository::{MemoryRepository, PgRepository, Repository};
use crate::services::{
    AdminService, AuditLogger, AuthService, DashboardService, JwtService, Notifier, OrderService,
    PaymentProvider, PaymentService, ServiceError, StripeClient,
};
use crate::workers::{HttpTranscriber, JobEventConsumer, Transcriber, WorkerPool};
use crate::{build_router, AppState};

/// Everything the HTTP layer and the background tasks need, not yet running.
pub struct Components {
    pub state: AppState,
    pub worker_pool: WorkerPool,
    pub event_consumer: JobEventConsumer,
}

impl Components {
    /// Wires services over the given store and external clients.
    pub fn new(
        config: AppConfig,
        repo: Arc<dyn Repository>,
        payment_provider: Arc<dyn PaymentProvider>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        let jwt = JwtService::new(&config.jwt);
        let notifier = Notifier::new(repo.clone());
        let orders = OrderService::new(repo.clone(), notifier.clone(), config.stripe.currency.clone());

        let (events_tx, events_rx) = mpsc::channel(config.workers.queue_size);
        let (worker_pool, jobs) = WorkerPool::new(
            config.workers.clone(),
            repo.clone(),
            transcriber,
            events_tx.clone(),
        );
        let event_consumer = JobEventConsumer::new(orders.clone(), events_rx);

        let payments = PaymentService::new(
            orders.clone(),
            payment_provider.clone(),
            jobs.clone(),
            notifier.clone(),
            &config.stripe,
        );
        let admin = AdminService::new(
            repo.clone(),
            orders.clone(),
            payment_provider,
            jobs.clone(),
            AuditLogger::new(repo.clone()),
        );
        let auth = AuthService::new(repo.clone(), jwt.clone());
        let dashboard = DashboardService::new(repo.clone());

        let login_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
        );
        let register_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.register_attempts,
            config.rate_limit.register_window_seconds,
        );

        let state = AppState {
            config,
            repo,
            jwt,
            auth,
            orders,
            payments,
            admin,
            dashboard,
            notifier,
            jobs,
            job_events: events_tx,
            login_rate_limiter,
            register_rate_limiter,
        };

        Self {
            state,
            worker_pool,
            event_consumer,
        }
    }

    /// Starts the worker pool and the event consumer. Both stop when the
    /// returned token is cancelled.
    pub async fn spawn_background(self) -> (AppState, CancellationToken) {
        let shutdown = self.worker_pool.shutdown_token();
        self.worker_pool.start().await;
        tokio::spawn(self.event_consumer.run(shutdown.clone()));
        (self.state, shutdown)
    }
}

/// Seeds default settings and the optional bootstrap super admin.
pub async fn prepare_store(state: &AppState) -> Result<(), ServiceError> {
    let defaults: Vec<_> = SettingKey::ALL.iter().map(|k| k.seed()).collect();
    state.repo.seed_settings(&defaults).await?;

    if let (Some(email), Some(password)) = (
        state.config.bootstrap.admin_email.as_deref(),
        state.config.bootstrap.admin_password.as_ref(),
    ) {
        state.auth.bootstrap_super_admin(email, password).await?;
    }

    Ok(())
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    components: Components,
}

impl Application {
    pub async fn build(config: AppConfig) -> Result<Self, AppError> {
        let repo: Arc<dyn Repository> = if config.database.is_memory() {
            tracing::warn!("DATABASE_URL=memory: using the in-process store, data is not persisted");
            Arc::new(MemoryRepository::new())
        } else {
            let pg = PgRepository::connect(&config.database)
                .await
                .map_err(ServiceError::from)?;
            pg.run_migrations().await.map_err(ServiceError::from)?;
            tracing::info!("Database migrations applied");
            Arc::new(pg)
        };

        let stripe = StripeClient::new(config.stripe.clone())?;
        if !stripe.is_configured() {
            tracing::warn!("Stripe API key not configured - checkout and refunds will fail");
        }
        let transcriber = HttpTranscriber::new(&config.workers)?;

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        let components = Components::new(config, repo, Arc::new(stripe), Arc::new(transcriber));
        prepare_store(&components.state).await?;

        tracing::info!(port, "Subtitle service initialized");

        Ok(Self {
            port,
            listener,
            components,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), AppError> {
        let (state, background) = self.components.spawn_background().await;
        let app = build_router(state);

        tracing::info!(port = self.port, "Listening");

        let result = axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        background.cancel();
        tracing::info!("Service shutdown complete");

        result.map_err(AppError::from)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
