//! Process-scoped webhook counters (spec §3.1, §4.8, §5).
//!
//! Counters are plain atomics — "WebhookMetrics are incremented by at
//! most one concurrent handler per request; atomic counter semantics are
//! sufficient" (spec §5). Timestamps and the last-error string need
//! interior mutability too but are written far less often, so a `Mutex`
//! is adequate there.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Monotonic counters tracked for the life of the process (spec §3.1).
#[derive(Debug, Default)]
pub struct WebhookMetrics {
    pub received: AtomicU64,
    pub processed: AtomicU64,
    pub ignored: AtomicU64,
    pub failed: AtomicU64,
    pub invalid_signature: AtomicU64,
    pub sync_triggered: AtomicU64,
    pub sync_success: AtomicU64,
    pub sync_failure: AtomicU64,
    pub rate_limit_observed: AtomicU64,
    pub alerts_triggered: AtomicU64,
    pub consecutive_failures: AtomicU64,
    last_event_at: Mutex<Option<DateTime<Utc>>>,
    last_success_at: Mutex<Option<DateTime<Utc>>>,
    last_failure_at: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

/// Point-in-time snapshot of [`WebhookMetrics`], suitable for a status
/// endpoint or a [`crate::collab::SyncEngine::get_status`] response.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WebhookMetricsSnapshot {
    pub received: u64,
    pub processed: u64,
    pub ignored: u64,
    pub failed: u64,
    pub invalid_signature: u64,
    pub sync_triggered: u64,
    pub sync_success: u64,
    pub sync_failure: u64,
    pub rate_limit_observed: u64,
    pub alerts_triggered: u64,
    pub consecutive_failures: u64,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl WebhookMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, now: DateTime<Utc>) {
        self.received.fetch_add(1, Ordering::Relaxed);
        *self.last_event_at.lock().expect("lock poisoned") = Some(now);
    }

    pub fn record_success(&self, now: DateTime<Utc>) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.sync_success.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.last_success_at.lock().expect("lock poisoned") = Some(now);
    }

    pub fn record_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a request-level failure that never reached a sync call
    /// (bad signature excluded — see [`Self::record_invalid_signature`]):
    /// malformed JSON, or no sync engine configured. Counts against
    /// `failed` only, so the counter law `received == processed +
    /// invalidSignature + (failed - syncFailure)` holds for these paths.
    ///
    /// Returns the post-increment consecutive-failure count, so the
    /// caller can test `% alertThreshold == 0` (spec §4.8 step 8).
    pub fn record_failure(&self, now: DateTime<Utc>, error: impl Into<String>) -> u64 {
        self.failed.fetch_add(1, Ordering::Relaxed);
        let streak = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_failure_at.lock().expect("lock poisoned") = Some(now);
        *self.last_error.lock().expect("lock poisoned") = Some(error.into());
        streak
    }

    /// Records a failure of the sync call itself, after `syncTriggered`
    /// has already been incremented. Counts against both `failed` and
    /// `sync_failure`.
    pub fn record_sync_failure(&self, now: DateTime<Utc>, error: impl Into<String>) -> u64 {
        self.sync_failure.fetch_add(1, Ordering::Relaxed);
        self.record_failure(now, error)
    }

    pub fn record_invalid_signature(&self, now: DateTime<Utc>) -> u64 {
        self.invalid_signature.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        let streak = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_failure_at.lock().expect("lock poisoned") = Some(now);
        *self.last_error.lock().expect("lock poisoned") = Some("invalid signature".to_string());
        streak
    }

    pub fn record_alert_triggered(&self) {
        self.alerts_triggered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_triggered(&self) {
        self.sync_triggered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit_observed(&self, count: u64) {
        self.rate_limit_observed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WebhookMetricsSnapshot {
        WebhookMetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            invalid_signature: self.invalid_signature.load(Ordering::Relaxed),
            sync_triggered: self.sync_triggered.load(Ordering::Relaxed),
            sync_success: self.sync_success.load(Ordering::Relaxed),
            sync_failure: self.sync_failure.load(Ordering::Relaxed),
            rate_limit_observed: self.rate_limit_observed.load(Ordering::Relaxed),
            alerts_triggered: self.alerts_triggered.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_event_at: *self.last_event_at.lock().expect("lock poisoned"),
            last_success_at: *self.last_success_at.lock().expect("lock poisoned"),
            last_failure_at: *self.last_failure_at.lock().expect("lock poisoned"),
            last_error: self.last_error.lock().expect("lock poisoned").clone(),
        }
    }

    /// Reset every counter. Only ever invoked explicitly (spec §4.8:
    /// "reset only via an explicit `resetProjectSyncWebhookMetrics()`
    /// operation").
    pub fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
        self.ignored.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.invalid_signature.store(0, Ordering::Relaxed);
        self.sync_triggered.store(0, Ordering::Relaxed);
        self.sync_success.store(0, Ordering::Relaxed);
        self.sync_failure.store(0, Ordering::Relaxed);
        self.rate_limit_observed.store(0, Ordering::Relaxed);
        self.alerts_triggered.store(0, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.last_event_at.lock().expect("lock poisoned") = None;
        *self.last_success_at.lock().expect("lock poisoned") = None;
        *self.last_failure_at.lock().expect("lock poisoned") = None;
        *self.last_error.lock().expect("lock poisoned") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_streak_increments_and_resets_on_success() {
        let metrics = WebhookMetrics::new();
        let now = Utc::now();
        assert_eq!(metrics.record_failure(now, "boom"), 1);
        assert_eq!(metrics.record_failure(now, "boom again"), 2);
        metrics.record_success(now);
        assert_eq!(metrics.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn reset_clears_all_counters_and_timestamps() {
        let metrics = WebhookMetrics::new();
        let now = Utc::now();
        metrics.record_received(now);
        metrics.record_failure(now, "boom");
        metrics.reset();
        let snap = metrics.snapshot();
        assert_eq!(snap.received, 0);
        assert_eq!(snap.failed, 0);
        assert_eq!(snap.last_error, None);
    }

    #[test]
    fn counter_law_holds_received_processed_ignored_failed() {
        let metrics = WebhookMetrics::new();
        let now = Utc::now();
        metrics.record_received(now);
        metrics.record_success(now);
        metrics.record_received(now);
        metrics.record_ignored();
        metrics.record_received(now);
        metrics.record_failure(now, "err");

        let snap = metrics.snapshot();
        assert_eq!(snap.received, 3);
        assert_eq!(snap.processed, 2); // success + ignored
        assert_eq!(snap.failed, 1);
    }

    #[test]
    fn record_failure_does_not_touch_sync_failure() {
        let metrics = WebhookMetrics::new();
        let now = Utc::now();
        metrics.record_failure(now, "malformed json");
        let snap = metrics.snapshot();
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.sync_failure, 0);
    }

    #[test]
    fn record_sync_failure_increments_both_counters() {
        let metrics = WebhookMetrics::new();
        let now = Utc::now();
        metrics.record_sync_failure(now, "vk 500");
        let snap = metrics.snapshot();
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.sync_failure, 1);
    }
}
