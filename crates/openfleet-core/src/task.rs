//! Canonical [`Task`]/[`Project`] records and the distributed claim
//! record ([`SharedState`]) that rides alongside a task in backend
//! comments or custom fields (spec §3.1, §3.3).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

pub use crate::status::{Backend, CanonicalStatus, Priority};

/// Normalized, backend-independent task record (spec §3.1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: CanonicalStatus,
    pub assignee: Option<String>,
    pub priority: Option<Priority>,
    pub tags: BTreeSet<String>,
    pub draft: bool,
    pub project_id: Option<String>,
    pub base_branch: Option<String>,
    pub branch_name: Option<String>,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
    pub task_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub backend: Backend,
    #[serde(default)]
    pub meta: BTreeMap<String, Value>,
}

impl Task {
    /// Read a shared-state record embedded in `meta.sharedState`, if any.
    pub fn shared_state(&self) -> Option<SharedState> {
        self.meta
            .get("sharedState")
            .cloned()
            .and_then(|v| serde_json::from_value::<RawSharedState>(v).ok())
            .and_then(|raw| raw.validate())
    }

    pub fn with_shared_state(mut self, state: &SharedState) -> Self {
        self.meta.insert(
            "sharedState".to_string(),
            serde_json::to_value(state).expect("SharedState is always serializable"),
        );
        self
    }
}

/// A backend project/board (spec §3.1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub backend: Backend,
    #[serde(default)]
    pub meta: BTreeMap<String, Value>,
}

/// Status of a distributed claim (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharedStateStatus {
    Claimed,
    Working,
    Stale,
}

/// The distributed claim record co-located with a task (spec §3.1).
///
/// Field names use `camelCase` on the wire (sentinel comment JSON, Jira
/// custom fields) to match spec §6.2's literal sentinel shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedState {
    pub owner_id: String,
    pub attempt_token: String,
    pub attempt_started: DateTime<Utc>,
    pub heartbeat: DateTime<Utc>,
    pub status: SharedStateStatus,
    pub retry_count: u32,
}

/// Loosely-typed mirror of [`SharedState`] used while parsing untrusted
/// JSON (comment bodies, custom fields) so a malformed or partial
/// document can be rejected instead of causing a deserialization error
/// (spec §3.3: "A SharedState is valid only if all five required fields
/// are present...; invalid states are treated as absent").
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSharedState {
    owner_id: Option<String>,
    attempt_token: Option<String>,
    attempt_started: Option<DateTime<Utc>>,
    heartbeat: Option<DateTime<Utc>>,
    status: Option<SharedStateStatus>,
    #[serde(default)]
    retry_count: Option<u32>,
}

impl RawSharedState {
    fn validate(self) -> Option<SharedState> {
        Some(SharedState {
            owner_id: self.owner_id?,
            attempt_token: self.attempt_token?,
            attempt_started: self.attempt_started?,
            heartbeat: self.heartbeat?,
            status: self.status?,
            retry_count: self.retry_count.unwrap_or(0),
        })
    }
}

/// Parse shared state from arbitrary JSON text, returning `None` on any
/// malformation rather than propagating an error (spec §8: "A malformed
/// sentinel JSON yields null from `readSharedStateFromIssue`, never
/// throws").
pub fn parse_shared_state_json(text: &str) -> Option<SharedState> {
    let raw: RawSharedState = serde_json::from_str(text).ok()?;
    raw.validate()
}

/// Marker bracketing the structured shared-state JSON embedded in a
/// GitHub/Jira comment body (spec §6.2: "Shared-state sentinel").
pub const SENTINEL_PREFIX: &str = "<!-- openfleet-state";
pub const SENTINEL_SUFFIX: &str = "-->";

/// Render the comment body written by `persistSharedStateToIssue` when
/// an adapter falls back to the sentinel-comment mechanism. Shared by
/// every comment-based adapter so the wire format can't drift between
/// writers.
pub fn render_sentinel(state: &SharedState) -> String {
    let json = serde_json::to_string_pretty(state).expect("SharedState always serializes");
    format!(
        "{SENTINEL_PREFIX}\n{json}\n{SENTINEL_SUFFIX}\nShared-state updated: owner={}, status={:?}",
        state.owner_id, state.status
    )
}

/// Extract and parse the sentinel JSON from a comment body, if present.
pub fn parse_sentinel(body: &str) -> Option<SharedState> {
    let start = body.find(SENTINEL_PREFIX)? + SENTINEL_PREFIX.len();
    let end = body[start..].find(SENTINEL_SUFFIX)? + start;
    parse_shared_state_json(body[start..end].trim())
}

/// Labels that are never surfaced as user-facing tags: the status label
/// itself, priority labels, `codex.*` internal flags, and the
/// upstream-branch marker label (spec §3.3).
pub fn is_system_label(label: &str, scope_label: &str) -> bool {
    let lower = label.trim().to_lowercase();
    if lower == scope_label.to_lowercase() {
        return false; // the scope label is filtered separately by callers that want it
    }
    lower.starts_with("codex.")
        || lower.starts_with("status:")
        || lower.starts_with("priority:")
        || upstream_marker_regex().is_match(&lower)
        || matches!(
            lower.as_str(),
            "draft" | "todo" | "inprogress" | "inreview" | "blocked" | "done" | "cancelled"
        )
}

/// Lowercase, deduplicate, and strip system/scope labels from a raw label
/// set, yielding the public `tags` field (spec §3.3).
pub fn normalize_tags<'a>(
    labels: impl IntoIterator<Item = &'a str>,
    scope_label: &str,
) -> BTreeSet<String> {
    labels
        .into_iter()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .filter(|l| l != &scope_label.to_lowercase())
        .filter(|l| !is_system_label(l, scope_label))
        .collect()
}

/// Whether a task's scope labels include the configured fleet scope
/// label (spec §3.3's "task-scoped for the fleet" predicate).
pub fn has_scope_label<'a>(labels: impl IntoIterator<Item = &'a str>, scope_label: &str) -> bool {
    let wanted = scope_label.trim().to_lowercase();
    labels
        .into_iter()
        .any(|l| l.trim().to_lowercase() == wanted)
}

fn upstream_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(upstream|base|target)[:=].+$").expect("static regex is valid")
    })
}

/// Deterministically derive a base branch from an explicit field, a
/// labelled upstream marker, or an inline description marker, in that
/// order (spec §3.3). An empty resulting string normalizes to `None`.
pub fn derive_base_branch<'a>(
    explicit_field: Option<&str>,
    labels: impl IntoIterator<Item = &'a str>,
    description: Option<&str>,
) -> Option<String> {
    if let Some(explicit) = explicit_field {
        let trimmed = explicit.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    for label in labels {
        if let Some(branch) = extract_marker(label) {
            return non_empty(branch);
        }
    }

    if let Some(desc) = description {
        for line in desc.lines() {
            if let Some(branch) = extract_marker(line.trim()) {
                return non_empty(branch);
            }
        }
    }

    None
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn extract_marker(text: &str) -> Option<String> {
    upstream_marker_regex()
        .is_match(&text.to_lowercase())
        .then(|| {
            let idx = text.find([':', '=']).expect("regex guarantees a separator");
            text[idx + 1..].to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn shared_state() -> SharedState {
        SharedState {
            owner_id: "ws/agent".into(),
            attempt_token: "11111111-1111-1111-1111-111111111111".into(),
            attempt_started: ts(),
            heartbeat: ts(),
            status: SharedStateStatus::Working,
            retry_count: 1,
        }
    }

    #[test]
    fn shared_state_round_trips_through_task_meta() {
        let task = Task {
            id: "1".into(),
            title: "t".into(),
            description: None,
            status: CanonicalStatus::InProgress,
            assignee: None,
            priority: None,
            tags: BTreeSet::new(),
            draft: false,
            project_id: None,
            base_branch: None,
            branch_name: None,
            pr_number: None,
            pr_url: None,
            task_url: None,
            created_at: ts(),
            updated_at: ts(),
            backend: Backend::Internal,
            meta: BTreeMap::new(),
        }
        .with_shared_state(&shared_state());

        assert_eq!(task.shared_state(), Some(shared_state()));
    }

    #[test]
    fn shared_state_missing_field_is_invalid() {
        let json = r#"{"ownerId":"a/b","attemptToken":"x","attemptStarted":"2026-01-01T00:00:00Z"}"#;
        assert_eq!(parse_shared_state_json(json), None);
    }

    #[test]
    fn malformed_sentinel_json_never_panics_and_returns_none() {
        assert_eq!(parse_shared_state_json("not json at all"), None);
        assert_eq!(parse_shared_state_json("{\"status\": \"bogus\"}"), None);
    }

    #[test]
    fn sentinel_round_trips_through_render_and_parse() {
        let state = shared_state();
        let rendered = render_sentinel(&state);
        assert!(rendered.starts_with(SENTINEL_PREFIX));
        let parsed = parse_sentinel(&rendered).expect("sentinel parses");
        assert_eq!(parsed, state);
    }

    #[test]
    fn parse_sentinel_returns_none_when_marker_absent() {
        assert_eq!(parse_sentinel("just a regular comment"), None);
    }

    #[test]
    fn tag_normalization_is_idempotent_lowercase_and_deduped() {
        let once = normalize_tags(["Bug", "bug", " Feature ", "openfleet"], "openfleet");
        let twice = normalize_tags(once.iter().map(|s| s.as_str()), "openfleet");
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
        assert!(once.contains("bug"));
        assert!(once.contains("feature"));
    }

    #[test]
    fn system_labels_never_appear_as_tags() {
        let tags = normalize_tags(
            ["codex.claimed", "status:todo", "priority:high", "upstream:main", "real-tag"],
            "openfleet",
        );
        assert_eq!(tags.len(), 1);
        assert!(tags.contains("real-tag"));
    }

    #[test]
    fn scope_label_presence_is_detected_case_insensitively() {
        assert!(has_scope_label(["Bug", "OpenFleet"], "openfleet"));
        assert!(!has_scope_label(["bug", "feature"], "openfleet"));
    }

    #[test]
    fn base_branch_prefers_explicit_field_over_labels_and_description() {
        let branch = derive_base_branch(
            Some("release/1.0"),
            ["upstream:main"],
            Some("base: develop"),
        );
        assert_eq!(branch.as_deref(), Some("release/1.0"));
    }

    #[test]
    fn base_branch_falls_back_to_labelled_marker() {
        let branch = derive_base_branch(None, ["target=develop"], None);
        assert_eq!(branch.as_deref(), Some("develop"));
    }

    #[test]
    fn base_branch_falls_back_to_inline_description_marker() {
        let branch = derive_base_branch(None, [], Some("notes\nbase: main\nmore notes"));
        assert_eq!(branch.as_deref(), Some("main"));
    }

    #[test]
    fn empty_base_branch_normalizes_to_none() {
        assert_eq!(derive_base_branch(Some("   "), [], None), None);
        assert_eq!(derive_base_branch(None, ["upstream:"], None), None);
    }
}
