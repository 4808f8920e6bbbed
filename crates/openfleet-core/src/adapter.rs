//! The uniform contract every kanban backend implements (spec §4.1).
//!
//! Optional capabilities (`persist_shared_state_to_issue`,
//! `read_shared_state_from_issue`, `mark_task_ignored`) carry a default
//! implementation that returns [`AdapterError::Unsupported`], so a
//! backend that genuinely cannot support them (Vibe-Kanban has no
//! comments) need not override anything — callers receive a typed
//! sentinel instead of a panic or a silently-ignored no-op (spec §9:
//! "consumers receive a typed unsupported sentinel rather than an
//! exception").

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AdapterError;
use crate::status::{CanonicalStatus, Priority};
use crate::task::{Project, SharedState, Task};

/// Filters accepted by [`KanbanAdapter::list_tasks`] (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct ListFilters {
    pub status: Option<CanonicalStatus>,
    pub limit: Option<usize>,
    pub project_field: Option<String>,
    pub jql: Option<String>,
    pub assignee: Option<String>,
}

/// Optional side effects accepted by [`KanbanAdapter::update_task_status`].
#[derive(Debug, Clone, Default)]
pub struct UpdateStatusOptions {
    pub shared_state: Option<SharedState>,
    pub project_fields: Option<BTreeMap<String, Value>>,
}

/// A partial update to an existing task (spec §4.1's `updateTask`).
///
/// Tag mutation is expressed as set differences rather than a replacement
/// list so adapters can "preserve system/scope labels; merge `tags` by
/// computing set differences" without needing to know the task's current
/// full label set up front.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub assignee: Option<Option<String>>,
    pub priority: Option<Option<Priority>>,
    pub tags_add: BTreeSet<String>,
    pub tags_remove: BTreeSet<String>,
    pub draft: Option<bool>,
    pub meta_patch: BTreeMap<String, Value>,
}

/// Data required to create a new task (spec §4.1's `createTask`).
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: CanonicalStatus,
    pub assignee: Option<String>,
    pub priority: Option<Priority>,
    pub tags: BTreeSet<String>,
    pub draft: bool,
    pub base_branch: Option<String>,
}

/// Uniform contract every kanban backend implements (spec §4.1).
#[async_trait]
pub trait KanbanAdapter: Send + Sync + std::fmt::Debug {
    /// Backend tag, used for logging and for [`Task::backend`].
    fn backend(&self) -> crate::status::Backend;

    async fn list_projects(&self) -> Result<Vec<Project>, AdapterError>;

    async fn list_tasks(
        &self,
        project_id: &str,
        filters: &ListFilters,
    ) -> Result<Vec<Task>, AdapterError>;

    async fn get_task(&self, id: &str) -> Result<Task, AdapterError>;

    async fn update_task_status(
        &self,
        id: &str,
        status: CanonicalStatus,
        options: &UpdateStatusOptions,
    ) -> Result<Task, AdapterError>;

    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task, AdapterError>;

    async fn create_task(&self, project_id: &str, data: NewTask) -> Result<Task, AdapterError>;

    /// Hard delete for internal/VK, soft (close/transition) for
    /// GitHub/Jira (spec §3.4).
    async fn delete_task(&self, id: &str) -> Result<bool, AdapterError>;

    /// Best-effort: implementations MUST catch their own internal
    /// failures, log a warning, and return `Ok(false)` rather than
    /// propagate (spec §4.1: "failure is non-fatal and logged").
    async fn add_comment(&self, id: &str, body: &str) -> Result<bool, AdapterError>;

    /// Persist a [`SharedState`] to the backend (comment sentinel or
    /// custom fields). Optional capability.
    async fn persist_shared_state_to_issue(
        &self,
        id: &str,
        state: &SharedState,
    ) -> Result<bool, AdapterError> {
        let _ = (id, state);
        Err(AdapterError::Unsupported(
            "persist_shared_state_to_issue".into(),
        ))
    }

    /// Read a previously persisted [`SharedState`], or `Ok(None)` if none
    /// is present or it failed validation. Optional capability.
    async fn read_shared_state_from_issue(
        &self,
        id: &str,
    ) -> Result<Option<SharedState>, AdapterError> {
        let _ = id;
        Err(AdapterError::Unsupported(
            "read_shared_state_from_issue".into(),
        ))
    }

    /// Mark a task ignored by the fleet (ignore label/field + comment).
    /// Optional capability.
    async fn mark_task_ignored(&self, id: &str, reason: &str) -> Result<bool, AdapterError> {
        let _ = (id, reason);
        Err(AdapterError::Unsupported("mark_task_ignored".into()))
    }
}
