//! Prometheus metrics recorder and metric name constants.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the metrics text format.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

// Metric name constants to avoid typos across modules.

/// Sessions opened total (counter).
pub const SESSIONS_OPENED_TOTAL: &str = "push_sessions_opened_total";
/// Sessions closed total (counter).
pub const SESSIONS_CLOSED_TOTAL: &str = "push_sessions_closed_total";
/// Active sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "push_sessions_active";
/// Client messages handled total (counter, labels: kind).
pub const MESSAGES_TOTAL: &str = "push_messages_total";
/// Error replies sent total (counter).
pub const ERROR_REPLIES_TOTAL: &str = "push_error_replies_total";
/// Notification frames delivered total (counter).
pub const NOTIFICATIONS_SENT_TOTAL: &str = "push_notifications_sent_total";
/// Flush duration seconds (histogram).
pub const FLUSH_DURATION_SECONDS: &str = "push_flush_duration_seconds";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_renders_without_panicking() {
        // Build a recorder + handle (no global install to avoid test
        // conflicts).
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_names_share_the_push_prefix() {
        for name in [
            SESSIONS_OPENED_TOTAL,
            SESSIONS_CLOSED_TOTAL,
            SESSIONS_ACTIVE,
            MESSAGES_TOTAL,
            ERROR_REPLIES_TOTAL,
            NOTIFICATIONS_SENT_TOTAL,
            FLUSH_DURATION_SECONDS,
        ] {
            assert!(name.starts_with("push_"), "{name}");
        }
    }
}
