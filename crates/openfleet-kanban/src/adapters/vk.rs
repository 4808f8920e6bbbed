//! Vibe-Kanban REST adapter (spec §4.1.7). Vibe-Kanban has no comment
//! thread, so `addComment` and the shared-state/ignore capabilities are
//! left at their [`KanbanAdapter`] defaults (`Unsupported`).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use openfleet_core::adapter::{KanbanAdapter, ListFilters, NewTask, TaskPatch, UpdateStatusOptions};
use openfleet_core::status::{Backend, CanonicalStatus, StatusTable};
use openfleet_core::task::Project;
use openfleet_core::{AdapterError, Task};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use tracing::instrument;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct VkConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl VkConfig {
    pub fn from_env() -> Option<Self> {
        let base_url = openfleet_core::config::env_str(openfleet_core::config::vk::BASE_URL)?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: openfleet_core::config::env_str(openfleet_core::config::vk::API_KEY),
        })
    }
}

pub struct VkAdapter {
    cfg: VkConfig,
    client: reqwest::Client,
    statuses: StatusTable,
}

impl std::fmt::Debug for VkAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VkAdapter").field("cfg", &self.cfg).finish()
    }
}

impl VkAdapter {
    pub fn new(cfg: VkConfig) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AdapterError::Fatal(format!("building http client: {e}")))?;
        Ok(Self {
            cfg,
            client,
            statuses: StatusTable::defaults().with_env_overrides(),
        })
    }

    fn headers(&self) -> Result<HeaderMap, AdapterError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.cfg.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|e| AdapterError::Fatal(format!("invalid api key header: {e}")))?,
            );
        }
        Ok(headers)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url, path)
    }

    fn map_transport_err(err: reqwest::Error) -> AdapterError {
        if err.is_timeout() || err.is_connect() {
            AdapterError::Transient(err.to_string())
        } else if let Some(status) = err.status() {
            if status.as_u16() == 404 {
                AdapterError::NotFound(err.to_string())
            } else if status.is_server_error() || status.as_u16() == 429 {
                AdapterError::Transient(err.to_string())
            } else {
                AdapterError::InvalidInput(err.to_string())
            }
        } else {
            AdapterError::Transient(err.to_string())
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct VkProject {
    id: String,
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct VkTask {
    id: String,
    project_id: String,
    title: String,
    description: Option<String>,
    status: String,
    assignee: Option<String>,
    priority: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    draft: bool,
    base_branch: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl VkTask {
    fn into_task(self, statuses: &StatusTable) -> Task {
        Task {
            id: self.id,
            title: self.title,
            description: self.description,
            status: statuses.normalize(Backend::VibeKanban, &self.status),
            assignee: self.assignee,
            priority: self.priority.as_deref().and_then(openfleet_core::status::Priority::normalize),
            tags: openfleet_core::task::normalize_tags(self.tags.iter().map(|s| s.as_str()), "openfleet"),
            draft: self.draft,
            project_id: Some(self.project_id),
            base_branch: self.base_branch,
            branch_name: None,
            pr_number: None,
            pr_url: None,
            task_url: None,
            created_at: self.created_at,
            updated_at: self.updated_at,
            backend: Backend::VibeKanban,
            meta: Default::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct VkTaskPatchBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assignee: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<Option<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    draft: Option<bool>,
}

#[async_trait]
impl KanbanAdapter for VkAdapter {
    fn backend(&self) -> Backend {
        Backend::VibeKanban
    }

    #[instrument(skip(self))]
    async fn list_projects(&self) -> Result<Vec<Project>, AdapterError> {
        let projects: Vec<VkProject> = self
            .client
            .get(self.url("/api/projects"))
            .headers(self.headers()?)
            .send()
            .await
            .map_err(Self::map_transport_err)?
            .error_for_status()
            .map_err(Self::map_transport_err)?
            .json()
            .await
            .map_err(Self::map_transport_err)?;
        Ok(projects
            .into_iter()
            .map(|p| Project {
                id: p.id,
                name: p.name,
                backend: Backend::VibeKanban,
                meta: Default::default(),
            })
            .collect())
    }

    #[instrument(skip(self, filters))]
    async fn list_tasks(
        &self,
        project_id: &str,
        filters: &ListFilters,
    ) -> Result<Vec<Task>, AdapterError> {
        let mut request = self
            .client
            .get(self.url(&format!("/api/projects/{project_id}/tasks")))
            .headers(self.headers()?);
        if let Some(limit) = filters.limit {
            request = request.query(&[("limit", limit.to_string())]);
        }
        let tasks: Vec<VkTask> = request
            .send()
            .await
            .map_err(Self::map_transport_err)?
            .error_for_status()
            .map_err(Self::map_transport_err)?
            .json()
            .await
            .map_err(Self::map_transport_err)?;
        let mut tasks: Vec<Task> = tasks.into_iter().map(|t| t.into_task(&self.statuses)).collect();
        if let Some(status) = filters.status {
            tasks.retain(|t| t.status == status);
        }
        if let Some(assignee) = &filters.assignee {
            tasks.retain(|t| t.assignee.as_deref() == Some(assignee.as_str()));
        }
        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn get_task(&self, id: &str) -> Result<Task, AdapterError> {
        let task: VkTask = self
            .client
            .get(self.url(&format!("/api/tasks/{id}")))
            .headers(self.headers()?)
            .send()
            .await
            .map_err(Self::map_transport_err)?
            .error_for_status()
            .map_err(Self::map_transport_err)?
            .json()
            .await
            .map_err(Self::map_transport_err)?;
        Ok(task.into_task(&self.statuses))
    }

    #[instrument(skip(self, options))]
    async fn update_task_status(
        &self,
        id: &str,
        status: CanonicalStatus,
        options: &UpdateStatusOptions,
    ) -> Result<Task, AdapterError> {
        if options.shared_state.is_some() {
            return Err(AdapterError::Unsupported(
                "vibe-kanban has no shared-state storage".into(),
            ));
        }
        let native = self
            .statuses
            .denormalize(Backend::VibeKanban, status)
            .ok_or_else(|| AdapterError::Fatal(format!("no vibe-kanban status for {status:?}")))?
            .to_string();
        let body = VkTaskPatchBody {
            title: None,
            description: None,
            status: Some(native),
            assignee: None,
            priority: None,
            tags: Vec::new(),
            draft: None,
        };
        self.patch_task(id, &body).await
    }

    #[instrument(skip(self, patch))]
    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task, AdapterError> {
        let current = self.get_task(id).await?;
        let mut tags = current.tags.clone();
        for tag in patch.tags_add {
            tags.insert(tag);
        }
        for tag in patch.tags_remove {
            tags.remove(&tag);
        }
        let body = VkTaskPatchBody {
            title: patch.title,
            description: patch.description,
            status: None,
            assignee: patch.assignee,
            priority: patch
                .priority
                .map(|p| p.map(|p| self.priority_to_string(p))),
            tags: tags.into_iter().collect(),
            draft: patch.draft,
        };
        self.patch_task(id, &body).await
    }

    #[instrument(skip(self, data))]
    async fn create_task(&self, project_id: &str, data: NewTask) -> Result<Task, AdapterError> {
        if data.title.trim().is_empty() {
            return Err(AdapterError::InvalidInput("title is required".into()));
        }
        let body = serde_json::json!({
            "title": data.title,
            "description": data.description,
            "status": self.statuses.denormalize(Backend::VibeKanban, data.status),
            "assignee": data.assignee,
            "priority": data.priority.map(|p| self.priority_to_string(p)),
            "tags": data.tags.into_iter().collect::<Vec<_>>(),
            "draft": data.draft,
            "baseBranch": data.base_branch,
        });
        let task: VkTask = self
            .client
            .post(self.url(&format!("/api/projects/{project_id}/tasks")))
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_err)?
            .error_for_status()
            .map_err(Self::map_transport_err)?
            .json()
            .await
            .map_err(Self::map_transport_err)?;
        Ok(task.into_task(&self.statuses))
    }

    #[instrument(skip(self))]
    async fn delete_task(&self, id: &str) -> Result<bool, AdapterError> {
        let resp = self
            .client
            .delete(self.url(&format!("/api/tasks/{id}")))
            .headers(self.headers()?)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        if resp.status().as_u16() == 404 {
            return Ok(false);
        }
        resp.error_for_status().map_err(Self::map_transport_err)?;
        Ok(true)
    }

    #[instrument(skip(self, body))]
    async fn add_comment(&self, id: &str, body: &str) -> Result<bool, AdapterError> {
        let _ = (id, body);
        tracing::warn!(task = id, "vibe-kanban has no comment thread; dropping comment");
        Ok(false)
    }
}

impl VkAdapter {
    async fn patch_task(&self, id: &str, body: &VkTaskPatchBody) -> Result<Task, AdapterError> {
        let task: VkTask = self
            .client
            .patch(self.url(&format!("/api/tasks/{id}")))
            .headers(self.headers()?)
            .json(body)
            .send()
            .await
            .map_err(Self::map_transport_err)?
            .error_for_status()
            .map_err(Self::map_transport_err)?
            .json()
            .await
            .map_err(Self::map_transport_err)?;
        Ok(task.into_task(&self.statuses))
    }

    fn priority_to_string(&self, priority: openfleet_core::status::Priority) -> String {
        match priority {
            openfleet_core::status::Priority::Critical => "urgent".into(),
            openfleet_core::status::Priority::High => "high".into(),
            openfleet_core::status::Priority::Medium => "normal".into(),
            openfleet_core::status::Priority::Low => "low".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_requires_base_url() {
        std::env::remove_var("VK_BASE_URL");
        assert!(VkConfig::from_env().is_none());
    }

    #[test]
    fn shared_state_capabilities_are_unsupported_by_default() {
        let cfg = VkConfig {
            base_url: "http://localhost:1".into(),
            api_key: None,
        };
        let adapter = VkAdapter::new(cfg).unwrap();
        assert_eq!(adapter.backend(), Backend::VibeKanban);
    }

    #[tokio::test]
    async fn add_comment_is_a_non_fatal_no_op() {
        let cfg = VkConfig {
            base_url: "http://localhost:1".into(),
            api_key: None,
        };
        let adapter = VkAdapter::new(cfg).unwrap();
        assert_eq!(adapter.add_comment("t1", "hello").await.unwrap(), false);
    }
}
