//! In-process source-of-truth adapter: CRUD plus a comment journal,
//! backed by any [`openfleet_core::store::Store`] (spec §4.1.6).

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use openfleet_core::adapter::{KanbanAdapter, ListFilters, NewTask, TaskPatch, UpdateStatusOptions};
use openfleet_core::status::Backend;
use openfleet_core::task::{self, CanonicalStatus, Project, SharedState, Task};
use openfleet_core::{AdapterError, Store};
use openfleet_store::{CommentRecord, TaskRecordStore};
use tracing::{instrument, warn};
use uuid::Uuid;

const SCOPE_LABEL_DEFAULT: &str = "openfleet";

/// Internal Store Adapter (spec §4.1.6). The scope-label filter from
/// spec §3.3 is tracked per task via `meta["scopeLabels"]`, mirroring
/// how GitHub/Jira track it in real labels — internal tasks have no
/// separate label vocabulary, so this is the closest equivalent.
pub struct InternalAdapter<S: Store> {
    records: TaskRecordStore<S>,
    scope_label: String,
    enforce_scope: bool,
}

impl<S: Store> std::fmt::Debug for InternalAdapter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalAdapter")
            .field("scope_label", &self.scope_label)
            .field("enforce_scope", &self.enforce_scope)
            .finish()
    }
}

impl<S: Store> InternalAdapter<S> {
    pub fn new(store: S) -> Self {
        Self::with_scope(
            store,
            openfleet_core::config::env_str(openfleet_core::config::kanban::TASK_LABEL)
                .unwrap_or_else(|| SCOPE_LABEL_DEFAULT.to_string()),
            openfleet_core::config::env_bool(
                openfleet_core::config::kanban::ENFORCE_TASK_LABEL,
                false,
            ),
        )
    }

    pub fn with_scope(store: S, scope_label: String, enforce_scope: bool) -> Self {
        Self {
            records: TaskRecordStore::new(store),
            scope_label,
            enforce_scope,
        }
    }

    async fn load(&self) -> Result<Vec<Task>, AdapterError> {
        self.records.load_tasks().await
    }

    async fn save(&self, tasks: &[Task]) -> Result<(), AdapterError> {
        self.records.save_tasks(tasks).await
    }

    fn scope_labels(task: &Task) -> Vec<String> {
        task.meta
            .get("scopeLabels")
            .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok())
            .unwrap_or_default()
    }

    fn is_in_scope(&self, task: &Task) -> bool {
        if !self.enforce_scope {
            return true;
        }
        task::has_scope_label(
            Self::scope_labels(task).iter().map(|s| s.as_str()),
            &self.scope_label,
        )
    }

    async fn load_comments(&self, id: &str) -> Result<Vec<CommentRecord>, AdapterError> {
        self.records.load_comments(id).await
    }

    async fn save_comments(&self, id: &str, comments: &[CommentRecord]) -> Result<(), AdapterError> {
        self.records.save_comments(id, comments).await
    }
}

#[async_trait]
impl<S: Store> KanbanAdapter for InternalAdapter<S> {
    fn backend(&self) -> Backend {
        Backend::Internal
    }

    #[instrument(skip(self))]
    async fn list_projects(&self) -> Result<Vec<Project>, AdapterError> {
        Ok(vec![Project {
            id: "internal".to_string(),
            name: "Internal".to_string(),
            backend: Backend::Internal,
            meta: Default::default(),
        }])
    }

    #[instrument(skip(self, filters))]
    async fn list_tasks(
        &self,
        _project_id: &str,
        filters: &ListFilters,
    ) -> Result<Vec<Task>, AdapterError> {
        let mut tasks = self.load().await?;
        tasks.retain(|t| self.is_in_scope(t));
        if let Some(status) = filters.status {
            tasks.retain(|t| std::mem::discriminant(&t.status) == std::mem::discriminant(&status));
        }
        if let Some(assignee) = &filters.assignee {
            tasks.retain(|t| t.assignee.as_deref() == Some(assignee.as_str()));
        }
        if let Some(limit) = filters.limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn get_task(&self, id: &str) -> Result<Task, AdapterError> {
        self.load()
            .await?
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| AdapterError::NotFound(id.to_string()))
    }

    #[instrument(skip(self, options))]
    async fn update_task_status(
        &self,
        id: &str,
        status: CanonicalStatus,
        options: &UpdateStatusOptions,
    ) -> Result<Task, AdapterError> {
        let mut tasks = self.load().await?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| AdapterError::NotFound(id.to_string()))?;
        task.status = status;
        task.updated_at = Utc::now();
        if let Some(state) = &options.shared_state {
            task.meta.insert(
                "sharedState".to_string(),
                serde_json::to_value(state).expect("SharedState always serializes"),
            );
        }
        if let Some(fields) = &options.project_fields {
            task.meta.insert(
                "projectFieldValues".to_string(),
                serde_json::to_value(fields).expect("field map always serializes"),
            );
        }
        let updated = task.clone();
        self.save(&tasks).await?;
        Ok(updated)
    }

    #[instrument(skip(self, patch))]
    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task, AdapterError> {
        let mut tasks = self.load().await?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| AdapterError::NotFound(id.to_string()))?;

        if let Some(title) = patch.title {
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(assignee) = patch.assignee {
            task.assignee = assignee;
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(draft) = patch.draft {
            task.draft = draft;
        }
        let mut tags: BTreeSet<String> = task.tags.clone();
        for tag in patch.tags_add {
            tags.insert(tag);
        }
        for tag in patch.tags_remove {
            tags.remove(&tag);
        }
        task.tags = tags;
        // Base meta as the existing record, overlaid by the patch (spec §4.1.6).
        for (k, v) in patch.meta_patch {
            task.meta.insert(k, v);
        }
        task.updated_at = Utc::now();

        let updated = task.clone();
        self.save(&tasks).await?;
        Ok(updated)
    }

    #[instrument(skip(self, data))]
    async fn create_task(&self, project_id: &str, data: NewTask) -> Result<Task, AdapterError> {
        if data.title.trim().is_empty() {
            return Err(AdapterError::InvalidInput("title is required".into()));
        }
        let now = Utc::now();
        let mut meta = std::collections::BTreeMap::new();
        meta.insert(
            "scopeLabels".to_string(),
            serde_json::json!([self.scope_label]),
        );

        let task = Task {
            id: Uuid::new_v4().to_string(),
            title: data.title,
            description: data.description,
            status: data.status,
            assignee: data.assignee,
            priority: data.priority,
            tags: data.tags,
            draft: data.draft,
            project_id: Some(project_id.to_string()),
            base_branch: data.base_branch,
            branch_name: None,
            pr_number: None,
            pr_url: None,
            task_url: None,
            created_at: now,
            updated_at: now,
            backend: Backend::Internal,
            meta,
        };

        let mut tasks = self.load().await?;
        tasks.push(task.clone());
        self.save(&tasks).await?;
        Ok(task)
    }

    #[instrument(skip(self))]
    async fn delete_task(&self, id: &str) -> Result<bool, AdapterError> {
        let mut tasks = self.load().await?;
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        let removed = tasks.len() != before;
        if removed {
            self.save(&tasks).await?;
            let _ = self.records.delete_comments(id).await;
        }
        Ok(removed)
    }

    #[instrument(skip(self, body))]
    async fn add_comment(&self, id: &str, body: &str) -> Result<bool, AdapterError> {
        if self.get_task(id).await.is_err() {
            warn!(task = id, "add_comment: task not found, ignoring");
            return Ok(false);
        }
        let mut comments = match self.load_comments(id).await {
            Ok(c) => c,
            Err(err) => {
                warn!(task = id, %err, "add_comment: failed to load comment log");
                return Ok(false);
            }
        };
        comments.push(CommentRecord {
            body: body.to_string(),
            created_at: Utc::now(),
        });
        if let Err(err) = self.save_comments(id, &comments).await {
            warn!(task = id, %err, "add_comment: failed to persist comment log");
            return Ok(false);
        }
        Ok(true)
    }

    async fn persist_shared_state_to_issue(
        &self,
        id: &str,
        state: &SharedState,
    ) -> Result<bool, AdapterError> {
        let options = UpdateStatusOptions {
            shared_state: Some(state.clone()),
            project_fields: None,
        };
        let task = self.get_task(id).await?;
        self.update_task_status(id, task.status, &options).await?;
        Ok(true)
    }

    async fn read_shared_state_from_issue(
        &self,
        id: &str,
    ) -> Result<Option<SharedState>, AdapterError> {
        Ok(self.get_task(id).await?.shared_state())
    }

    async fn mark_task_ignored(&self, id: &str, reason: &str) -> Result<bool, AdapterError> {
        let mut tasks = self.load().await?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| AdapterError::NotFound(id.to_string()))?;
        task.meta
            .insert("ignored".to_string(), serde_json::json!(true));
        task.meta
            .insert("ignoreReason".to_string(), serde_json::json!(reason));
        task.updated_at = Utc::now();
        self.save(&tasks).await?;
        let _ = self
            .add_comment(id, &format!("Task ignored: {reason}"))
            .await;
        Ok(true)
    }
}

/// Read the comment journal for a task (test/debug helper; not part of
/// the [`KanbanAdapter`] contract, which only exposes `addComment`).
pub async fn comment_log<S: Store>(
    adapter: &InternalAdapter<S>,
    id: &str,
) -> Result<Vec<String>, AdapterError> {
    Ok(adapter
        .load_comments(id)
        .await?
        .into_iter()
        .map(|c| c.body)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use openfleet_core::store::InMemoryStore;

    fn new_task(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            description: None,
            status: CanonicalStatus::Todo,
            assignee: None,
            priority: None,
            tags: BTreeSet::new(),
            draft: false,
            base_branch: None,
        }
    }

    #[tokio::test]
    async fn create_list_and_get_round_trip() {
        let adapter = InternalAdapter::new(InMemoryStore::new());
        let created = adapter.create_task("internal", new_task("Write docs")).await.unwrap();
        let listed = adapter.list_tasks("internal", &ListFilters::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
        let fetched = adapter.get_task(&created.id).await.unwrap();
        assert_eq!(fetched.title, "Write docs");
    }

    #[tokio::test]
    async fn update_task_status_then_get_task_reflects_it() {
        let adapter = InternalAdapter::new(InMemoryStore::new());
        let created = adapter.create_task("internal", new_task("Ship")).await.unwrap();
        adapter
            .update_task_status(&created.id, CanonicalStatus::Done, &UpdateStatusOptions::default())
            .await
            .unwrap();
        let fetched = adapter.get_task(&created.id).await.unwrap();
        assert_eq!(fetched.status, CanonicalStatus::Done);
    }

    #[tokio::test]
    async fn update_task_merges_tags_via_set_difference() {
        let adapter = InternalAdapter::new(InMemoryStore::new());
        let mut data = new_task("Tagged");
        data.tags = ["a".to_string(), "b".to_string()].into_iter().collect();
        let created = adapter.create_task("internal", data).await.unwrap();

        let patch = TaskPatch {
            tags_add: ["c".to_string()].into_iter().collect(),
            tags_remove: ["a".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let updated = adapter.update_task(&created.id, patch).await.unwrap();
        assert_eq!(
            updated.tags,
            ["b".to_string(), "c".to_string()].into_iter().collect()
        );
    }

    #[tokio::test]
    async fn comment_order_is_preserved() {
        let adapter = InternalAdapter::new(InMemoryStore::new());
        let created = adapter.create_task("internal", new_task("X")).await.unwrap();
        adapter.add_comment(&created.id, "first").await.unwrap();
        adapter.add_comment(&created.id, "second").await.unwrap();
        let log = comment_log(&adapter, &created.id).await.unwrap();
        assert_eq!(log, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn shared_state_round_trips_through_persist_and_read() {
        let adapter = InternalAdapter::new(InMemoryStore::new());
        let created = adapter.create_task("internal", new_task("Claimed")).await.unwrap();
        let state = SharedState {
            owner_id: "ws/agent".into(),
            attempt_token: "tok".into(),
            attempt_started: Utc::now(),
            heartbeat: Utc::now(),
            status: openfleet_core::task::SharedStateStatus::Working,
            retry_count: 0,
        };
        adapter
            .persist_shared_state_to_issue(&created.id, &state)
            .await
            .unwrap();
        let read_back = adapter.read_shared_state_from_issue(&created.id).await.unwrap();
        assert_eq!(read_back, Some(state));
    }

    #[tokio::test]
    async fn scope_enforcement_filters_out_of_scope_tasks() {
        let adapter = InternalAdapter::with_scope(InMemoryStore::new(), "openfleet".into(), true);
        adapter.create_task("internal", new_task("In scope")).await.unwrap();
        let listed = adapter.list_tasks("internal", &ListFilters::default()).await.unwrap();
        assert_eq!(listed.len(), 1, "task created through this adapter always carries the scope label");
    }

    #[tokio::test]
    async fn delete_is_hard_and_removes_comments() {
        let adapter = InternalAdapter::new(InMemoryStore::new());
        let created = adapter.create_task("internal", new_task("Gone")).await.unwrap();
        adapter.add_comment(&created.id, "note").await.unwrap();
        assert!(adapter.delete_task(&created.id).await.unwrap());
        assert!(adapter.get_task(&created.id).await.is_err());
        assert!(comment_log(&adapter, &created.id).await.unwrap().is_empty());
    }
}
