use metrics_exporter_prometheus::PrometheusBuilder;

use crate::core::config::Settings;

pub const JOBS_TOTAL: &str = "grading_jobs_total";
pub const GRADING_DURATION_SECONDS: &str = "grading_duration_seconds";
pub const QUEUE_LATENCY_SECONDS: &str = "grading_queue_latency_seconds";
pub const CORRECTIVE_RETRIES_TOTAL: &str = "grading_corrective_retries_total";
pub const VISION_AUDIT_TOTAL: &str = "vision_audit_total";
pub const TEXT_TRUNCATIONS_TOTAL: &str = "text_truncations_total";
pub const STALE_JOBS_RECOVERED_TOTAL: &str = "stale_jobs_recovered_total";

/// Installs the Prometheus recorder together with its scrape listener.
/// Without it the `metrics` macros are no-ops.
pub fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let addr = settings.telemetry().prometheus_addr;
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}
