//! Canonical status/priority vocabulary and the per-backend mapping
//! tables used to translate between OpenFleet's internal status
//! enum and each backend's native vocabulary (spec §3.2, §4.2).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Tag of the adapter that produced or owns a [`crate::task::Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Internal,
    VibeKanban,
    GitHub,
    Jira,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Internal => "internal",
            Backend::VibeKanban => "vk",
            Backend::GitHub => "github",
            Backend::Jira => "jira",
        }
    }
}

/// The fleet-internal status vocabulary (spec §3.2). Any unknown backend
/// status normalizes to `Todo`; `Done`/`Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalStatus {
    Draft,
    Todo,
    InProgress,
    InReview,
    Blocked,
    Done,
    Cancelled,
}

impl CanonicalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CanonicalStatus::Done | CanonicalStatus::Cancelled)
    }

    pub fn all() -> [CanonicalStatus; 7] {
        [
            CanonicalStatus::Draft,
            CanonicalStatus::Todo,
            CanonicalStatus::InProgress,
            CanonicalStatus::InReview,
            CanonicalStatus::Blocked,
            CanonicalStatus::Done,
            CanonicalStatus::Cancelled,
        ]
    }
}

/// Normalized task priority (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    /// Best-effort parse of a free-form backend priority string.
    pub fn normalize(raw: &str) -> Option<Priority> {
        match raw.trim().to_lowercase().as_str() {
            "critical" | "urgent" | "p0" => Some(Priority::Critical),
            "high" | "p1" => Some(Priority::High),
            "medium" | "normal" | "p2" => Some(Priority::Medium),
            "low" | "p3" | "p4" => Some(Priority::Low),
            _ => None,
        }
    }
}

fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Bidirectional, per-backend mapping between [`CanonicalStatus`] and a
/// backend's native status vocabulary. Built once at process start from
/// built-in defaults plus environment overrides (spec §4.2: "overridable
/// by environment at process start but immutable thereafter").
#[derive(Debug, Clone)]
pub struct StatusTable {
    denormalize: HashMap<(Backend, CanonicalStatus), String>,
    normalize: HashMap<(Backend, String), CanonicalStatus>,
}

impl StatusTable {
    /// Built-in vocabulary, before any environment overrides are applied.
    pub fn defaults() -> Self {
        let mut table = StatusTable {
            denormalize: HashMap::new(),
            normalize: HashMap::new(),
        };

        table.seed(Backend::Internal, &[
            (CanonicalStatus::Draft, "draft"),
            (CanonicalStatus::Todo, "todo"),
            (CanonicalStatus::InProgress, "in_progress"),
            (CanonicalStatus::InReview, "in_review"),
            (CanonicalStatus::Blocked, "blocked"),
            (CanonicalStatus::Done, "done"),
            (CanonicalStatus::Cancelled, "cancelled"),
        ]);

        table.seed(Backend::VibeKanban, &[
            (CanonicalStatus::Draft, "draft"),
            (CanonicalStatus::Todo, "todo"),
            (CanonicalStatus::InProgress, "inprogress"),
            (CanonicalStatus::InReview, "inreview"),
            (CanonicalStatus::Blocked, "blocked"),
            (CanonicalStatus::Done, "done"),
            (CanonicalStatus::Cancelled, "cancelled"),
        ]);

        table.seed(Backend::GitHub, &[
            (CanonicalStatus::Draft, "draft"),
            (CanonicalStatus::Todo, "todo"),
            (CanonicalStatus::InProgress, "inprogress"),
            (CanonicalStatus::InReview, "inreview"),
            (CanonicalStatus::Blocked, "blocked"),
            (CanonicalStatus::Done, "done"),
            (CanonicalStatus::Cancelled, "cancelled"),
        ]);
        // GitHub's terminal "closed" state is a read-side alias, not a
        // label: it never round-trips through denormalize.
        table
            .normalize
            .insert((Backend::GitHub, normalize_key("closed")), CanonicalStatus::Done);

        table.seed(Backend::Jira, &[
            (CanonicalStatus::Draft, "Draft"),
            (CanonicalStatus::Todo, "To Do"),
            (CanonicalStatus::InProgress, "In Progress"),
            (CanonicalStatus::InReview, "In Review"),
            (CanonicalStatus::Blocked, "Blocked"),
            (CanonicalStatus::Done, "Done"),
            (CanonicalStatus::Cancelled, "Cancelled"),
        ]);

        table
    }

    fn seed(&mut self, backend: Backend, pairs: &[(CanonicalStatus, &str)]) {
        for (canonical, native) in pairs {
            self.denormalize
                .insert((backend, *canonical), (*native).to_string());
            self.normalize
                .insert((backend, normalize_key(native)), *canonical);
        }
    }

    /// Apply environment overrides, e.g. `GITHUB_PROJECT_STATUS_TODO` or
    /// `JIRA_STATUS_TODO`. Call once at process start; the resulting table
    /// should then be held behind an `Arc` and never mutated again.
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_env_overrides(Backend::GitHub, "GITHUB_PROJECT_STATUS_");
        self.apply_env_overrides(Backend::Jira, "JIRA_STATUS_");
        self
    }

    fn apply_env_overrides(&mut self, backend: Backend, prefix: &str) {
        for canonical in CanonicalStatus::all() {
            let suffix = match canonical {
                CanonicalStatus::Draft => "DRAFT",
                CanonicalStatus::Todo => "TODO",
                CanonicalStatus::InProgress => "INPROGRESS",
                CanonicalStatus::InReview => "INREVIEW",
                CanonicalStatus::Blocked => "BLOCKED",
                CanonicalStatus::Done => "DONE",
                CanonicalStatus::Cancelled => "CANCELLED",
            };
            if let Ok(value) = std::env::var(format!("{prefix}{suffix}")) {
                if !value.trim().is_empty() {
                    self.seed(backend, &[(canonical, value.trim())]);
                }
            }
        }
    }

    /// Native vocabulary name for `status` on `backend`, or `None` if the
    /// backend has no configured name for that canonical status.
    pub fn denormalize(&self, backend: Backend, status: CanonicalStatus) -> Option<&str> {
        self.denormalize
            .get(&(backend, status))
            .map(|s| s.as_str())
    }

    /// Canonical status for a backend's native vocabulary string. Unknown
    /// strings map to `Todo` (spec §3.2).
    pub fn normalize(&self, backend: Backend, native: &str) -> CanonicalStatus {
        self.normalize
            .get(&(backend, normalize_key(native)))
            .copied()
            .unwrap_or(CanonicalStatus::Todo)
    }
}

impl Default for StatusTable {
    fn default() -> Self {
        StatusTable::defaults()
    }
}

/// Canonical→alias table consulted when resolving a Jira workflow
/// transition by target status name (spec §4.2).
pub fn jira_status_aliases(status: CanonicalStatus) -> &'static [&'static str] {
    match status {
        CanonicalStatus::Todo => &["to do", "todo", "selected for development", "open", "backlog"],
        CanonicalStatus::InProgress => &["in progress", "in development", "doing", "active"],
        CanonicalStatus::InReview => &["in review", "review", "code review", "qa", "testing"],
        CanonicalStatus::Done => &["done", "resolved", "closed", "complete", "completed"],
        CanonicalStatus::Cancelled => {
            &["cancelled", "canceled", "won't do", "wont do", "declined"]
        }
        CanonicalStatus::Draft | CanonicalStatus::Blocked => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bidirectional_idempotent_for_every_configured_status() {
        let table = StatusTable::defaults();
        for backend in [Backend::Internal, Backend::VibeKanban, Backend::GitHub, Backend::Jira] {
            for status in CanonicalStatus::all() {
                if let Some(native) = table.denormalize(backend, status) {
                    assert_eq!(table.normalize(backend, native), status);
                }
            }
        }
    }

    #[test]
    fn unknown_backend_status_normalizes_to_todo() {
        let table = StatusTable::defaults();
        assert_eq!(
            table.normalize(Backend::Jira, "some-made-up-status"),
            CanonicalStatus::Todo
        );
    }

    #[test]
    fn github_closed_maps_to_done_but_never_denormalizes_back_to_closed() {
        let table = StatusTable::defaults();
        assert_eq!(table.normalize(Backend::GitHub, "closed"), CanonicalStatus::Done);
        assert_eq!(table.normalize(Backend::GitHub, "CLOSED"), CanonicalStatus::Done);
        assert_eq!(
            table.denormalize(Backend::GitHub, CanonicalStatus::Done),
            Some("done")
        );
    }

    #[test]
    fn lookup_is_case_insensitive_and_trims_whitespace() {
        let table = StatusTable::defaults();
        assert_eq!(
            table.normalize(Backend::Jira, "  IN PROGRESS  "),
            CanonicalStatus::InProgress
        );
    }

    #[test]
    fn priority_normalizes_common_aliases() {
        assert_eq!(Priority::normalize("Urgent"), Some(Priority::Critical));
        assert_eq!(Priority::normalize("p3"), Some(Priority::Low));
        assert_eq!(Priority::normalize("unknown"), None);
    }
}
