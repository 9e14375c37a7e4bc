use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{HistogramOpts, HistogramTimer, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
pub static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();
pub static ORDER_TRANSITIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static ADMIN_ACTIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static WEBHOOK_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static TRANSCRIPTION_JOBS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static DB_QUERY_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Installs the HTTP recorder and registers the domain counters.
///
/// Called once from startup. Until then every `record_*` helper is a no-op,
/// which keeps tests free of global recorder state.
pub fn init_metrics() -> Result<(), anyhow::Error> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {}", e))?;

    if METRICS_HANDLE.set(handle).is_err() {
        anyhow::bail!("metrics already initialized");
    }

    let registry = Registry::new();

    let transitions = IntCounterVec::new(
        Opts::new(
            "subtitle_order_transitions_total",
            "Order status transitions by source and target status",
        ),
        &["from", "to"],
    )?;

    // outcome: succeeded, rejected, failed
    let admin_actions = IntCounterVec::new(
        Opts::new(
            "subtitle_admin_actions_total",
            "Admin actions by action and outcome",
        ),
        &["action", "outcome"],
    )?;

    let webhook_events = IntCounterVec::new(
        Opts::new(
            "subtitle_webhook_events_total",
            "Payment webhook events by type and result",
        ),
        &["event_type", "result"],
    )?;

    let jobs = IntCounterVec::new(
        Opts::new(
            "subtitle_transcription_jobs_total",
            "Transcription jobs by outcome",
        ),
        &["outcome"],
    )?;

    let db_duration = HistogramVec::new(
        HistogramOpts::new(
            "subtitle_db_query_duration_seconds",
            "Database query duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["operation"],
    )?;

    registry.register(Box::new(transitions.clone()))?;
    registry.register(Box::new(admin_actions.clone()))?;
    registry.register(Box::new(webhook_events.clone()))?;
    registry.register(Box::new(jobs.clone()))?;
    registry.register(Box::new(db_duration.clone()))?;

    // The handle was set above, so these cells are still empty.
    let _ = PROMETHEUS_REGISTRY.set(registry);
    let _ = ORDER_TRANSITIONS_TOTAL.set(transitions);
    let _ = ADMIN_ACTIONS_TOTAL.set(admin_actions);
    let _ = WEBHOOK_EVENTS_TOTAL.set(webhook_events);
    let _ = TRANSCRIPTION_JOBS_TOTAL.set(jobs);
    let _ = DB_QUERY_DURATION.set(db_duration);

    Ok(())
}

pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

pub fn record_transition(from: &str, to: &str) {
    if let Some(counter) = ORDER_TRANSITIONS_TOTAL.get() {
        counter.with_label_values(&[from, to]).inc();
    }
}

pub fn record_admin_action(action: &str, outcome: &str) {
    if let Some(counter) = ADMIN_ACTIONS_TOTAL.get() {
        counter.with_label_values(&[action, outcome]).inc();
    }
}

pub fn record_webhook_event(event_type: &str, result: &str) {
    if let Some(counter) = WEBHOOK_EVENTS_TOTAL.get() {
        counter.with_label_values(&[event_type, result]).inc();
    }
}

pub fn record_job(outcome: &str) {
    if let Some(counter) = TRANSCRIPTION_JOBS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Starts a query timer; dropping the returned timer records the duration.
pub fn db_timer(operation: &str) -> Option<HistogramTimer> {
    DB_QUERY_DURATION
        .get()
        .map(|histogram| histogram.with_label_values(&[operation]).start_timer())
}
