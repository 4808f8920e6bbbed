//! Persistence shaped around the Internal Store Adapter's needs (spec
//! §4.1.6): the full task table plus one append-only comment journal
//! per task (spec §3.5), both carried over the generic [`Store`]
//! contract so they share a single backing directory and encryption
//! key.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use openfleet_core::store::{Store, StoreError};
use openfleet_core::{AdapterError, Task};
use serde::{Deserialize, Serialize};

const TASKS_KEY: &str = "internal/tasks";

fn comments_key(id: &str) -> String {
    format!("internal/comments/{id}")
}

/// One entry in a task's comment journal, in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentRecord {
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Domain-shaped wrapper over a [`Store`]: the Internal Adapter talks
/// to this in terms of `Task`s and comment journals, never raw keys.
pub struct TaskRecordStore<S: Store> {
    store: Arc<S>,
}

impl<S: Store> TaskRecordStore<S> {
    pub fn new(store: S) -> Self {
        Self { store: Arc::new(store) }
    }

    pub async fn load_tasks(&self) -> Result<Vec<Task>, AdapterError> {
        match self.store.get(TASKS_KEY).await {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| AdapterError::Fatal(format!("corrupt task store: {e}")))
            }
            Err(StoreError::NotFound { .. }) => Ok(Vec::new()),
            Err(err) => Err(AdapterError::Transient(err.to_string())),
        }
    }

    pub async fn save_tasks(&self, tasks: &[Task]) -> Result<(), AdapterError> {
        let bytes = serde_json::to_vec(tasks).map_err(|e| AdapterError::Fatal(format!("serialize tasks: {e}")))?;
        self.store.put(TASKS_KEY, &bytes).await.map_err(|e| AdapterError::Transient(e.to_string()))
    }

    pub async fn load_comments(&self, id: &str) -> Result<Vec<CommentRecord>, AdapterError> {
        match self.store.get(&comments_key(id)).await {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| AdapterError::Fatal(format!("corrupt comment log: {e}")))
            }
            Err(StoreError::NotFound { .. }) => Ok(Vec::new()),
            Err(err) => Err(AdapterError::Transient(err.to_string())),
        }
    }

    pub async fn save_comments(&self, id: &str, comments: &[CommentRecord]) -> Result<(), AdapterError> {
        let bytes =
            serde_json::to_vec(comments).map_err(|e| AdapterError::Fatal(format!("serialize comments: {e}")))?;
        self.store.put(&comments_key(id), &bytes).await.map_err(|e| AdapterError::Transient(e.to_string()))
    }

    pub async fn delete_comments(&self, id: &str) -> Result<(), AdapterError> {
        self.store.delete(&comments_key(id)).await.map_err(|e| AdapterError::Transient(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openfleet_core::store::InMemoryStore;

    fn sample_task(id: &str) -> Task {
        use openfleet_core::status::{Backend, CanonicalStatus};
        Task {
            id: id.to_string(),
            title: "t".to_string(),
            description: None,
            status: CanonicalStatus::Todo,
            assignee: None,
            priority: None,
            tags: Default::default(),
            draft: false,
            project_id: None,
            base_branch: None,
            branch_name: None,
            pr_number: None,
            pr_url: None,
            task_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            backend: Backend::Internal,
            meta: Default::default(),
        }
    }

    #[tokio::test]
    async fn tasks_round_trip() {
        let records = TaskRecordStore::new(InMemoryStore::new());
        assert!(records.load_tasks().await.unwrap().is_empty());
        records.save_tasks(&[sample_task("a"), sample_task("b")]).await.unwrap();
        let loaded = records.load_tasks().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "a");
    }

    #[tokio::test]
    async fn comments_are_namespaced_per_task() {
        let records = TaskRecordStore::new(InMemoryStore::new());
        let now = Utc::now();
        records
            .save_comments("task-1", &[CommentRecord { body: "hi".into(), created_at: now }])
            .await
            .unwrap();
        assert!(records.load_comments("task-2").await.unwrap().is_empty());
        let loaded = records.load_comments("task-1").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].body, "hi");
    }

    #[tokio::test]
    async fn delete_comments_is_idempotent() {
        let records = TaskRecordStore::new(InMemoryStore::new());
        records.delete_comments("missing").await.unwrap();
    }
}
