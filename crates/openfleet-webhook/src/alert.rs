//! The injected alerting callback (spec §4.8 step 8).

use async_trait::async_trait;
use openfleet_core::metrics::WebhookMetricsSnapshot;

/// Invoked every `alertFailureThreshold`-th consecutive failure.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, snapshot: &WebhookMetricsSnapshot);
}

/// Logs the snapshot at `warn` level; the default sink when no real
/// paging integration is wired up.
pub struct LoggingAlertSink;

#[async_trait]
impl AlertSink for LoggingAlertSink {
    async fn alert(&self, snapshot: &WebhookMetricsSnapshot) {
        tracing::warn!(
            consecutive_failures = snapshot.consecutive_failures,
            last_error = ?snapshot.last_error,
            "webhook sync failure-streak alert"
        );
    }
}
