//! The webhook intake surface: one POST endpoint, HMAC verification,
//! metrics bookkeeping, and failure-streak alerting (spec §4.8).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use openfleet_core::collab::SyncEngine;
use openfleet_core::metrics::WebhookMetrics;
use tracing::instrument;

use crate::alert::AlertSink;
use crate::config::WebhookConfig;
use crate::payload::extract_issue_number;
use crate::signature::verify_signature;

const MAX_BODY_BYTES: usize = 1_048_576;
const PROCESSED_EVENT: &str = "projects_v2_item";
const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const EVENT_HEADER: &str = "x-github-event";

/// Shared state behind the webhook route: config, process-scoped
/// metrics, and the two collaborators the intake consumes (spec §4.9,
/// §4.8 step 8).
pub struct WebhookState {
    pub config: WebhookConfig,
    pub metrics: WebhookMetrics,
    pub sync_engine: Option<Arc<dyn SyncEngine>>,
    pub alert_sink: Option<Arc<dyn AlertSink>>,
}

impl WebhookState {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            config,
            metrics: WebhookMetrics::new(),
            sync_engine: None,
            alert_sink: None,
        }
    }

    pub fn with_sync_engine(mut self, engine: Arc<dyn SyncEngine>) -> Self {
        self.sync_engine = Some(engine);
        self
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }
}

/// Mounts the configured path accepting `POST`/`OPTIONS`; any other
/// method on that path gets axum's default 405 (spec §4.8, §6.3). Body
/// reads are capped at 1 MB.
pub fn router(state: Arc<WebhookState>) -> Router {
    let path = state.config.path.clone();
    Router::new()
        .route(&path, post(handle_event).options(handle_preflight))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

async fn handle_preflight() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

#[instrument(skip(state, headers, body))]
async fn handle_event(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let now = Utc::now();
    state.metrics.record_received(now);

    if state.config.require_signature {
        let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        let secret = state.config.secret.as_deref();
        let valid = matches!(
            (signature, secret),
            (Some(sig), Some(secret)) if verify_signature(secret, &body, sig)
        );
        if !valid {
            let streak = state.metrics.record_invalid_signature(now);
            maybe_alert(&state, streak).await;
            return StatusCode::UNAUTHORIZED;
        }
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => {
            let streak = state.metrics.record_failure(now, err.to_string());
            maybe_alert(&state, streak).await;
            return StatusCode::BAD_REQUEST;
        }
    };

    let event = headers.get(EVENT_HEADER).and_then(|v| v.to_str().ok());
    if event != Some(PROCESSED_EVENT) {
        state.metrics.record_ignored();
        return StatusCode::ACCEPTED;
    }

    let Some(engine) = state.sync_engine.as_ref() else {
        let streak = state.metrics.record_failure(now, "sync engine unavailable");
        maybe_alert(&state, streak).await;
        return StatusCode::SERVICE_UNAVAILABLE;
    };

    state.metrics.record_sync_triggered();
    let issue_number = extract_issue_number(&payload);
    let before = engine.get_status().await.rate_limit_events;
    let result = match &issue_number {
        Some(id) => engine.sync_task(id).await,
        None => engine.full_sync().await,
    };
    let after = engine.get_status().await.rate_limit_events;
    if after > before {
        state.metrics.record_rate_limit_observed(after - before);
    }

    match result {
        Ok(()) => {
            state.metrics.record_success(Utc::now());
            StatusCode::ACCEPTED
        }
        Err(err) => {
            let streak = state.metrics.record_sync_failure(Utc::now(), err.to_string());
            maybe_alert(&state, streak).await;
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn maybe_alert(state: &WebhookState, streak: u64) {
    if streak % state.config.alert_failure_threshold != 0 {
        return;
    }
    if let Some(sink) = &state.alert_sink {
        sink.alert(&state.metrics.snapshot()).await;
        state.metrics.record_alert_triggered();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use hmac::{Hmac, Mac};
    use openfleet_executor::testdoubles::RecordingSyncEngine;
    use sha2::Sha256;
    use tower::ServiceExt;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn state_with_engine(
        require_signature: bool,
        secret: Option<&str>,
    ) -> (Arc<WebhookState>, Arc<RecordingSyncEngine>) {
        let engine = Arc::new(RecordingSyncEngine::new());
        let config = WebhookConfig {
            path: "/hook".to_string(),
            secret: secret.map(str::to_string),
            require_signature,
            alert_failure_threshold: 1,
            rate_limit_alert_threshold: 1,
        };
        let state = Arc::new(WebhookState::new(config).with_sync_engine(engine.clone()));
        (state, engine)
    }

    #[tokio::test]
    async fn happy_path_with_content_number_syncs_that_task() {
        let (state, engine) = state_with_engine(false, None);
        let app = router(state.clone());
        let body = r#"{"projects_v2_item":{"content_number":7}}"#;
        let request = Request::post("/hook")
            .header("x-github-event", "projects_v2_item")
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(engine.task_syncs.lock().unwrap().as_slice(), ["7"]);
        assert_eq!(state.metrics.snapshot().sync_success, 1);
        assert_eq!(state.metrics.snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_and_never_reaches_the_sync_engine() {
        let (state, engine) = state_with_engine(true, Some("topsecret"));
        let app = router(state.clone());
        let body = r#"{"projects_v2_item":{"content_number":7}}"#;
        let request = Request::post("/hook")
            .header("x-github-event", "projects_v2_item")
            .header("x-hub-signature-256", "sha256=deadbeef")
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(engine.task_syncs.lock().unwrap().is_empty());
        let snap = state.metrics.snapshot();
        assert_eq!(snap.invalid_signature, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn valid_signature_is_accepted() {
        let (state, _engine) = state_with_engine(true, Some("topsecret"));
        let app = router(state);
        let body = r#"{"projects_v2_item":{"content_number":7}}"#;
        let signature = sign("topsecret", body.as_bytes());
        let request = Request::post("/hook")
            .header("x-github-event", "projects_v2_item")
            .header("x-hub-signature-256", signature)
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn non_project_event_is_ignored_without_touching_the_sync_engine() {
        let (state, engine) = state_with_engine(false, None);
        let app = router(state.clone());
        let request = Request::post("/hook")
            .header("x-github-event", "push")
            .body(Body::from("{}"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(engine.task_syncs.lock().unwrap().is_empty());
        assert_eq!(state.metrics.snapshot().ignored, 1);
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let (state, _engine) = state_with_engine(false, None);
        let app = router(state.clone());
        let request = Request::post("/hook")
            .header("x-github-event", "projects_v2_item")
            .body(Body::from("not json"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let snap = state.metrics.snapshot();
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.sync_failure, 0);
    }

    #[tokio::test]
    async fn missing_sync_engine_returns_503() {
        let config = WebhookConfig { path: "/hook".to_string(), ..WebhookConfig::default() };
        let state = Arc::new(WebhookState::new(config));
        let app = router(state.clone());
        let request = Request::post("/hook")
            .header("x-github-event", "projects_v2_item")
            .body(Body::from("{}"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let snap = state.metrics.snapshot();
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.sync_failure, 0);
    }

    #[tokio::test]
    async fn wrong_method_gets_405() {
        let (state, _engine) = state_with_engine(false, None);
        let app = router(state);
        let request = Request::get("/hook").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn sync_failure_increments_failure_streak_and_alerts_every_time() {
        let (state, engine) = state_with_engine(false, None);
        engine.fail_next_call();
        let alerts = Arc::new(CountingAlertSink::default());
        let state = Arc::new(
            Arc::try_unwrap(state)
                .unwrap_or_else(|_| panic!("state still shared"))
                .with_alert_sink(alerts.clone()),
        );
        let app = router(state.clone());
        let body = r#"{"projects_v2_item":{"content_number":7}}"#;
        let request = Request::post("/hook")
            .header("x-github-event", "projects_v2_item")
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(state.metrics.snapshot().sync_failure, 1);
        assert_eq!(alerts.calls.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[derive(Default)]
    struct CountingAlertSink {
        calls: std::sync::atomic::AtomicU64,
    }

    #[async_trait::async_trait]
    impl AlertSink for CountingAlertSink {
        async fn alert(&self, _snapshot: &openfleet_core::metrics::WebhookMetricsSnapshot) {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }
}
