//! GitHub Issues/Projects-v2 adapter (spec §4.1.1–§4.1.4), driven through
//! the `gh` CLI rather than a native GraphQL/REST client — the adapter
//! contract is CLI-agnostic, and shelling out matches how the rest of
//! this codebase reaches for external tooling.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use openfleet_core::adapter::{KanbanAdapter, ListFilters, NewTask, TaskPatch, UpdateStatusOptions};
use openfleet_core::status::{Backend, CanonicalStatus, StatusTable};
use openfleet_core::task::{self, Project, SharedState};
use openfleet_core::{AdapterError, Task};
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{instrument, warn};

const FIELDS_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_RATE_LIMIT_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub repository: String,
    pub project_mode: bool,
    pub project_number: Option<u64>,
    pub project_owner: Option<String>,
    pub default_assignee: Option<String>,
    pub rate_limit_retry_delay: Duration,
}

impl GitHubConfig {
    pub fn from_env() -> Result<Self, AdapterError> {
        let repository = openfleet_core::config::env_str(openfleet_core::config::github::REPOSITORY)
            .ok_or_else(|| AdapterError::Fatal("GITHUB_REPOSITORY is required".into()))?;
        Ok(Self {
            repository,
            project_mode: openfleet_core::config::env_bool(
                openfleet_core::config::github::PROJECT_MODE,
                false,
            ),
            project_number: openfleet_core::config::env_str(
                openfleet_core::config::github::PROJECT_NUMBER,
            )
            .and_then(|v| v.parse().ok()),
            project_owner: openfleet_core::config::env_str(openfleet_core::config::github::PROJECT_OWNER),
            default_assignee: openfleet_core::config::env_str(
                openfleet_core::config::github::DEFAULT_ASSIGNEE,
            ),
            rate_limit_retry_delay: Duration::from_millis(openfleet_core::config::env_u64(
                openfleet_core::config::github::RATE_LIMIT_RETRY_MS,
                DEFAULT_RATE_LIMIT_RETRY_DELAY.as_millis() as u64,
            )),
        })
    }
}

#[derive(Debug, Clone)]
struct ProjectFields {
    raw: Value,
    status_field_id: Option<String>,
    status_options: Vec<(String, String)>,
}

/// The three Projects-v2 caches from spec §4.1.3, each with its own TTL
/// semantics (session-lifetime for node/item ids, 5 minutes for fields).
#[derive(Default)]
struct ProjectCaches {
    node_ids: RwLock<HashMap<u64, String>>,
    item_ids: RwLock<HashMap<(u64, u64), String>>,
    fields: RwLock<HashMap<u64, (ProjectFields, Instant)>>,
}

pub struct GitHubAdapter {
    cfg: GitHubConfig,
    statuses: Arc<StatusTable>,
    caches: ProjectCaches,
    scope_label: String,
}

impl std::fmt::Debug for GitHubAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubAdapter")
            .field("cfg", &self.cfg)
            .field("scope_label", &self.scope_label)
            .finish()
    }
}

impl GitHubAdapter {
    pub fn new(cfg: GitHubConfig, statuses: Arc<StatusTable>, scope_label: String) -> Self {
        Self {
            cfg,
            statuses,
            caches: ProjectCaches::default(),
            scope_label,
        }
    }

    /// Run `gh` with spec §4.1.4's "exactly one retry" rate-limit policy.
    async fn run_gh(&self, args: &[&str]) -> Result<String, AdapterError> {
        for attempt in 0..2 {
            let output = Command::new("gh")
                .args(args)
                .output()
                .await
                .map_err(|e| AdapterError::Transient(format!("spawning gh: {e}")))?;

            if output.status.success() {
                return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
            }

            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if !is_rate_limited(&stderr) {
                return Err(AdapterError::Transient(format!("gh {args:?} failed: {stderr}")));
            }
            if attempt == 0 {
                warn!(args = ?args, "gh rate-limited, retrying once");
                tokio::time::sleep(self.cfg.rate_limit_retry_delay).await;
            } else {
                return Err(AdapterError::Fatal(format!("gh rate-limited twice: {stderr}")));
            }
        }
        unreachable!("loop always returns within two attempts")
    }

    async fn run_graphql(&self, query: &str, vars: &[(&str, String)]) -> Result<Value, AdapterError> {
        let mut args: Vec<String> = vec!["api".into(), "graphql".into(), "-f".into(), format!("query={query}")];
        for (name, value) in vars {
            args.push("-f".into());
            args.push(format!("{name}={value}"));
        }
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let raw = self.run_gh(&arg_refs).await?;
        serde_json::from_str(&raw)
            .map_err(|e| AdapterError::Fatal(format!("malformed graphql response: {e}")))
    }

    fn issue_number(id: &str) -> Result<&str, AdapterError> {
        if id.trim().is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(AdapterError::Fatal(format!("invalid GitHub issue id: {id}")));
        }
        Ok(id)
    }

    async fn project_node_id(&self, number: u64) -> Result<String, AdapterError> {
        if let Some(id) = self.caches.node_ids.read().await.get(&number) {
            return Ok(id.clone());
        }
        let owner = self
            .cfg
            .project_owner
            .as_deref()
            .ok_or_else(|| AdapterError::Fatal("GITHUB_PROJECT_OWNER is required in project mode".into()))?;
        let out = self
            .run_gh(&[
                "project",
                "view",
                &number.to_string(),
                "--owner",
                owner,
                "--format",
                "json",
            ])
            .await?;
        let parsed: Value = serde_json::from_str(&out)
            .map_err(|e| AdapterError::Fatal(format!("malformed project view: {e}")))?;
        let node_id = parsed["id"]
            .as_str()
            .ok_or_else(|| AdapterError::Fatal("project view missing id".into()))?
            .to_string();
        self.caches.node_ids.write().await.insert(number, node_id.clone());
        Ok(node_id)
    }

    async fn project_fields(&self, number: u64) -> Result<ProjectFields, AdapterError> {
        if let Some((fields, fetched_at)) = self.caches.fields.read().await.get(&number) {
            if fetched_at.elapsed() < FIELDS_CACHE_TTL {
                return Ok(fields.clone());
            }
        }
        let owner = self
            .cfg
            .project_owner
            .as_deref()
            .ok_or_else(|| AdapterError::Fatal("GITHUB_PROJECT_OWNER is required in project mode".into()))?;
        let out = self
            .run_gh(&[
                "project",
                "field-list",
                &number.to_string(),
                "--owner",
                owner,
                "--format",
                "json",
            ])
            .await?;
        let raw: Value = serde_json::from_str(&out)
            .map_err(|e| AdapterError::Fatal(format!("malformed field-list: {e}")))?;

        let mut status_field_id = None;
        let mut status_options = Vec::new();
        if let Some(items) = raw["fields"].as_array() {
            for field in items {
                if field["name"].as_str() == Some("Status") {
                    status_field_id = field["id"].as_str().map(|s| s.to_string());
                    if let Some(options) = field["options"].as_array() {
                        for opt in options {
                            if let (Some(id), Some(name)) = (opt["id"].as_str(), opt["name"].as_str()) {
                                status_options.push((id.to_string(), name.to_string()));
                            }
                        }
                    }
                }
            }
        }

        let fields = ProjectFields {
            raw,
            status_field_id,
            status_options,
        };
        self.caches
            .fields
            .write()
            .await
            .insert(number, (fields.clone(), Instant::now()));
        Ok(fields)
    }

    async fn project_item_id(&self, number: u64, issue_number: u64) -> Result<Option<String>, AdapterError> {
        if let Some(id) = self.caches.item_ids.read().await.get(&(number, issue_number)) {
            return Ok(Some(id.clone()));
        }
        let owner = self
            .cfg
            .project_owner
            .as_deref()
            .ok_or_else(|| AdapterError::Fatal("GITHUB_PROJECT_OWNER is required in project mode".into()))?;
        let out = self
            .run_gh(&[
                "project",
                "item-list",
                &number.to_string(),
                "--owner",
                owner,
                "--format",
                "json",
            ])
            .await?;
        let raw: Value = serde_json::from_str(&out)
            .map_err(|e| AdapterError::Fatal(format!("malformed item-list: {e}")))?;
        let Some(items) = raw["items"].as_array() else {
            return Ok(None);
        };
        for item in items {
            if item["content"]["number"].as_u64() == Some(issue_number) {
                if let Some(id) = item["id"].as_str() {
                    self.caches
                        .item_ids
                        .write()
                        .await
                        .insert((number, issue_number), id.to_string());
                    return Ok(Some(id.to_string()));
                }
            }
        }
        Ok(None)
    }

    /// Encode a project field value per spec §4.1.3's field-type table.
    fn encode_field_value(field_type: &str, value: &Value, options: &[(String, String)]) -> Option<Value> {
        match field_type {
            "SINGLE_SELECT" => {
                let name = value.as_str()?;
                let id = options
                    .iter()
                    .find(|(_, opt_name)| opt_name.eq_ignore_ascii_case(name))
                    .map(|(id, _)| id.clone())?;
                Some(serde_json::json!({ "singleSelectOptionId": id }))
            }
            "ITERATION" => {
                let text = value.as_str()?;
                let id = options
                    .iter()
                    .find(|(id, name)| id == text || name.eq_ignore_ascii_case(text))
                    .map(|(id, _)| id.clone())?;
                Some(serde_json::json!({ "iterationId": id }))
            }
            "NUMBER" => value.as_f64().map(|n| serde_json::json!({ "number": n })),
            "DATE" => value.as_str().map(|d| serde_json::json!({ "date": d })),
            _ => value.as_str().map(|t| serde_json::json!({ "text": t })),
        }
    }

    async fn sync_project_fields(
        &self,
        issue_number: u64,
        fields: &BTreeMap<String, Value>,
    ) -> Result<(), AdapterError> {
        if !self.cfg.project_mode {
            return Ok(());
        }
        let Some(number) = self.cfg.project_number else {
            return Ok(());
        };
        let project_id = self.project_node_id(number).await?;
        let Some(item_id) = self.project_item_id(number, issue_number).await? else {
            warn!(issue_number, "issue has no project item; skipping field sync");
            return Ok(());
        };
        let project_fields = self.project_fields(number).await?;

        let mut mutations = Vec::new();
        let mut vars = Vec::new();
        for (idx, (name, value)) in fields.iter().enumerate() {
            let field_id = project_fields
                .raw["fields"]
                .as_array()
                .into_iter()
                .flatten()
                .find(|f| f["name"].as_str() == Some(name.as_str()));
            let Some(field) = field_id else {
                warn!(field = name, "unknown project field; skipping");
                continue;
            };
            let field_type = field["dataType"].as_str().unwrap_or("TEXT");
            let Some(encoded) = Self::encode_field_value(field_type, value, &project_fields.status_options)
            else {
                warn!(field = name, "could not resolve field value; skipping");
                continue;
            };
            let alias = format!("f{idx}");
            mutations.push(format!(
                "{alias}: updateProjectV2ItemFieldValue(input: {{projectId: \"{project_id}\", itemId: \"{item_id}\", fieldId: \"{}\", value: {}}}) {{ clientMutationId }}",
                field["id"].as_str().unwrap_or_default(),
                encoded
            ));
            vars.push((name.as_str(), value.to_string()));
        }
        if mutations.is_empty() {
            return Ok(());
        }
        let query = format!("mutation {{ {} }}", mutations.join(" "));
        self.run_graphql(&query, &[]).await?;
        Ok(())
    }

    /// Status label maintenance (spec §4.1.1): compute the set difference
    /// between the desired status label and all configured status
    /// labels, issuing one add plus one remove per stale label.
    async fn apply_status_label(&self, issue_number: &str, status: CanonicalStatus) -> Result<(), AdapterError> {
        let desired = self
            .statuses
            .denormalize(Backend::GitHub, status)
            .ok_or_else(|| AdapterError::Fatal(format!("no GitHub label for {status:?}")))?
            .to_string();
        let stale: Vec<String> = CanonicalStatus::all()
            .into_iter()
            .filter(|s| *s != status)
            .filter_map(|s| self.statuses.denormalize(Backend::GitHub, s).map(|l| l.to_string()))
            .collect();

        let mut args = vec![
            "issue".to_string(),
            "edit".to_string(),
            issue_number.to_string(),
            "--repo".to_string(),
            self.cfg.repository.clone(),
            "--add-label".to_string(),
            desired.clone(),
        ];
        for label in &stale {
            args.push("--remove-label".to_string());
            args.push(label.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        if let Err(err) = self.run_gh(&arg_refs).await {
            warn!(label = %desired, %err, "status label missing; attempting to create it");
            self.create_label(&desired, status).await?;
            self.run_gh(&arg_refs).await?;
        }
        Ok(())
    }

    async fn create_label(&self, name: &str, status: CanonicalStatus) -> Result<(), AdapterError> {
        let colour = label_colour(status);
        self.run_gh(&[
            "label",
            "create",
            name,
            "--repo",
            &self.cfg.repository,
            "--color",
            colour,
            "--force",
        ])
        .await?;
        Ok(())
    }

    /// Persist the sentinel comment (spec §4.1.2): find the most recent
    /// sentinel comment if present and edit it, else post a new one.
    async fn find_sentinel_comment(&self, issue_number: &str) -> Result<Option<(String, String)>, AdapterError> {
        let out = self
            .run_gh(&[
                "api",
                &format!("repos/{}/issues/{issue_number}/comments", self.cfg.repository),
            ])
            .await?;
        let comments: Vec<Value> = serde_json::from_str(&out)
            .map_err(|e| AdapterError::Fatal(format!("malformed comments response: {e}")))?;
        for comment in comments.into_iter().rev() {
            let body = comment["body"].as_str().unwrap_or_default();
            if body.trim_start().starts_with(task::SENTINEL_PREFIX) {
                let id = comment["id"].as_u64().map(|n| n.to_string()).unwrap_or_default();
                return Ok(Some((id, body.to_string())));
            }
        }
        Ok(None)
    }
}

fn is_rate_limited(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("rate limit") || lower.contains("api rate limit exceeded") || lower.contains("403 limit")
}

fn priority_label(priority: openfleet_core::status::Priority) -> &'static str {
    match priority {
        openfleet_core::status::Priority::Critical => "critical",
        openfleet_core::status::Priority::High => "high",
        openfleet_core::status::Priority::Medium => "medium",
        openfleet_core::status::Priority::Low => "low",
    }
}

fn label_colour(status: CanonicalStatus) -> &'static str {
    match status {
        CanonicalStatus::Draft => "d4d4d4",
        CanonicalStatus::Todo => "c2e0c6",
        CanonicalStatus::InProgress => "fef2c0",
        CanonicalStatus::InReview => "bfd4f2",
        CanonicalStatus::Blocked => "f9c2c2",
        CanonicalStatus::Done => "0e8a16",
        CanonicalStatus::Cancelled => "cccccc",
    }
}

#[derive(Debug, Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    body: Option<String>,
    state: String,
    #[serde(default)]
    labels: Vec<GhLabel>,
    assignees: Vec<GhUser>,
    #[serde(rename = "createdAt")]
    created_at: chrono::DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    updated_at: chrono::DateTime<Utc>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhUser {
    login: String,
}

impl GitHubAdapter {
    fn task_from_issue(&self, issue: GhIssue) -> Task {
        let label_names: Vec<&str> = issue.labels.iter().map(|l| l.name.as_str()).collect();
        let status = if issue.state.eq_ignore_ascii_case("closed") {
            CanonicalStatus::Done
        } else {
            label_names
                .iter()
                .find_map(|l| {
                    let s = self.statuses.normalize(Backend::GitHub, l);
                    (self.statuses.denormalize(Backend::GitHub, s) == Some(*l)).then_some(s)
                })
                .unwrap_or(CanonicalStatus::Todo)
        };
        let priority = label_names
            .iter()
            .find_map(|l| l.strip_prefix("priority:"))
            .and_then(openfleet_core::status::Priority::normalize);
        let tags = task::normalize_tags(label_names.iter().copied(), &self.scope_label);
        let base_branch = task::derive_base_branch(None, label_names.iter().copied(), issue.body.as_deref());
        let draft = label_names.iter().any(|l| l.eq_ignore_ascii_case("draft"));

        Task {
            id: issue.number.to_string(),
            title: issue.title,
            description: issue.body,
            status,
            assignee: issue.assignees.into_iter().next().map(|u| u.login),
            priority,
            tags,
            draft,
            project_id: Some(self.cfg.repository.clone()),
            base_branch,
            branch_name: None,
            pr_number: None,
            pr_url: None,
            task_url: Some(issue.url),
            created_at: issue.created_at,
            updated_at: issue.updated_at,
            backend: Backend::GitHub,
            meta: Default::default(),
        }
    }
}

#[async_trait]
impl KanbanAdapter for GitHubAdapter {
    fn backend(&self) -> Backend {
        Backend::GitHub
    }

    #[instrument(skip(self))]
    async fn list_projects(&self) -> Result<Vec<Project>, AdapterError> {
        Ok(vec![Project {
            id: self.cfg.repository.clone(),
            name: self.cfg.repository.clone(),
            backend: Backend::GitHub,
            meta: Default::default(),
        }])
    }

    #[instrument(skip(self, filters))]
    async fn list_tasks(&self, _project_id: &str, filters: &ListFilters) -> Result<Vec<Task>, AdapterError> {
        let state_flag = match filters.status {
            Some(CanonicalStatus::Done) | Some(CanonicalStatus::Cancelled) => "closed",
            Some(_) => "open",
            None => "all",
        };
        let limit = filters.limit.unwrap_or(200).to_string();
        let out = self
            .run_gh(&[
                "issue",
                "list",
                "--repo",
                &self.cfg.repository,
                "--state",
                state_flag,
                "--limit",
                &limit,
                "--json",
                "number,title,body,state,labels,assignees,createdAt,updatedAt,url",
            ])
            .await?;
        let issues: Vec<GhIssue> = serde_json::from_str(&out)
            .map_err(|e| AdapterError::Fatal(format!("malformed issue list: {e}")))?;
        let mut tasks: Vec<Task> = issues.into_iter().map(|i| self.task_from_issue(i)).collect();
        if let Some(assignee) = &filters.assignee {
            tasks.retain(|t| t.assignee.as_deref() == Some(assignee.as_str()));
        }
        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn get_task(&self, id: &str) -> Result<Task, AdapterError> {
        let issue_number = Self::issue_number(id)?;
        let out = self
            .run_gh(&[
                "issue",
                "view",
                issue_number,
                "--repo",
                &self.cfg.repository,
                "--json",
                "number,title,body,state,labels,assignees,createdAt,updatedAt,url",
            ])
            .await
            .map_err(|e| match e {
                AdapterError::Transient(msg) if msg.contains("could not find") => AdapterError::NotFound(id.to_string()),
                other => other,
            })?;
        let issue: GhIssue = serde_json::from_str(&out)
            .map_err(|e| AdapterError::Fatal(format!("malformed issue view: {e}")))?;
        let mut task = self.task_from_issue(issue);
        if let Ok(Some(state)) = self.read_shared_state_from_issue(id).await {
            task = task.with_shared_state(&state);
        }
        Ok(task)
    }

    #[instrument(skip(self, options))]
    async fn update_task_status(
        &self,
        id: &str,
        status: CanonicalStatus,
        options: &UpdateStatusOptions,
    ) -> Result<Task, AdapterError> {
        let issue_number = Self::issue_number(id)?;
        if status.is_terminal() {
            let state_reason = if status == CanonicalStatus::Cancelled {
                "not planned"
            } else {
                "completed"
            };
            self.run_gh(&[
                "issue",
                "close",
                issue_number,
                "--repo",
                &self.cfg.repository,
                "--reason",
                state_reason,
            ])
            .await?;
        } else {
            self.apply_status_label(issue_number, status).await?;
        }
        if let Some(state) = &options.shared_state {
            self.persist_shared_state_to_issue(id, state).await?;
        }
        if let Some(fields) = &options.project_fields {
            let issue_num: u64 = issue_number
                .parse()
                .map_err(|_| AdapterError::Fatal("issue number not numeric".into()))?;
            self.sync_project_fields(issue_num, fields).await?;
        }
        self.get_task(id).await
    }

    #[instrument(skip(self, patch))]
    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task, AdapterError> {
        let issue_number = Self::issue_number(id)?;
        let mut args = vec![
            "issue".to_string(),
            "edit".to_string(),
            issue_number.to_string(),
            "--repo".to_string(),
            self.cfg.repository.clone(),
        ];
        if let Some(title) = &patch.title {
            args.push("--title".into());
            args.push(title.clone());
        }
        if let Some(Some(description)) = &patch.description {
            args.push("--body".into());
            args.push(description.clone());
        }
        if let Some(Some(assignee)) = &patch.assignee {
            args.push("--add-assignee".into());
            args.push(assignee.clone());
        }
        for tag in &patch.tags_add {
            args.push("--add-label".into());
            args.push(tag.clone());
        }
        for tag in &patch.tags_remove {
            args.push("--remove-label".into());
            args.push(tag.clone());
        }
        if args.len() > 5 {
            let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
            self.run_gh(&arg_refs).await?;
        }
        self.get_task(id).await
    }

    #[instrument(skip(self, data))]
    async fn create_task(&self, _project_id: &str, data: NewTask) -> Result<Task, AdapterError> {
        if data.title.trim().is_empty() {
            return Err(AdapterError::InvalidInput("title is required".into()));
        }
        let mut args = vec![
            "issue".to_string(),
            "create".to_string(),
            "--repo".to_string(),
            self.cfg.repository.clone(),
            "--title".to_string(),
            data.title.clone(),
            "--body".to_string(),
            data.description.clone().unwrap_or_default(),
        ];
        args.push("--label".into());
        args.push(self.scope_label.clone());
        if let Some(status_label) = self.statuses.denormalize(Backend::GitHub, data.status) {
            args.push("--label".into());
            args.push(status_label.to_string());
        }
        if data.draft {
            args.push("--label".into());
            args.push("draft".into());
        }
        if let Some(priority) = data.priority {
            args.push("--label".into());
            args.push(format!("priority:{}", priority_label(priority)));
        }
        if let Some(branch) = &data.base_branch {
            args.push("--label".into());
            args.push(format!("upstream:{branch}"));
        }
        for tag in &data.tags {
            args.push("--label".into());
            args.push(tag.clone());
        }
        let assignee = data.assignee.clone().or_else(|| self.cfg.default_assignee.clone());
        if let Some(assignee) = assignee {
            args.push("--assignee".into());
            args.push(assignee);
        }
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let out = self.run_gh(&arg_refs).await?;
        let url = out.trim();
        let issue_number = url
            .rsplit('/')
            .next()
            .ok_or_else(|| AdapterError::Fatal("could not parse created issue url".into()))?;
        self.get_task(issue_number).await
    }

    #[instrument(skip(self))]
    async fn delete_task(&self, id: &str) -> Result<bool, AdapterError> {
        let issue_number = Self::issue_number(id)?;
        self.run_gh(&[
            "issue",
            "close",
            issue_number,
            "--repo",
            &self.cfg.repository,
            "--reason",
            "not planned",
        ])
        .await?;
        Ok(true)
    }

    #[instrument(skip(self, body))]
    async fn add_comment(&self, id: &str, body: &str) -> Result<bool, AdapterError> {
        let Ok(issue_number) = Self::issue_number(id) else {
            warn!(task = id, "add_comment: invalid issue id, ignoring");
            return Ok(false);
        };
        match self
            .run_gh(&["issue", "comment", issue_number, "--repo", &self.cfg.repository, "--body", body])
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                warn!(task = id, %err, "add_comment failed");
                Ok(false)
            }
        }
    }

    #[instrument(skip(self, state))]
    async fn persist_shared_state_to_issue(&self, id: &str, state: &SharedState) -> Result<bool, AdapterError> {
        let issue_number = Self::issue_number(id)?;
        let status_label = match state.status {
            openfleet_core::task::SharedStateStatus::Claimed => "codex.claimed",
            openfleet_core::task::SharedStateStatus::Working => "codex.working",
            openfleet_core::task::SharedStateStatus::Stale => "codex.stale",
        };
        let others = ["codex.claimed", "codex.working", "codex.stale"]
            .into_iter()
            .filter(|l| *l != status_label);
        let mut args = vec![
            "issue".to_string(),
            "edit".to_string(),
            issue_number.to_string(),
            "--repo".to_string(),
            self.cfg.repository.clone(),
            "--add-label".to_string(),
            status_label.to_string(),
        ];
        for label in others {
            args.push("--remove-label".to_string());
            args.push(label.to_string());
        }
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        self.run_gh(&arg_refs).await?;

        let body = task::render_sentinel(state);
        match self.find_sentinel_comment(issue_number).await? {
            Some((comment_id, _)) => {
                self.run_gh(&[
                    "api",
                    "-X",
                    "PATCH",
                    &format!("repos/{}/issues/comments/{comment_id}", self.cfg.repository),
                    "-f",
                    &format!("body={body}"),
                ])
                .await?;
            }
            None => {
                self.run_gh(&["issue", "comment", issue_number, "--repo", &self.cfg.repository, "--body", &body])
                    .await?;
            }
        }
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn read_shared_state_from_issue(&self, id: &str) -> Result<Option<SharedState>, AdapterError> {
        let issue_number = Self::issue_number(id)?;
        Ok(self
            .find_sentinel_comment(issue_number)
            .await?
            .and_then(|(_, body)| task::parse_sentinel(&body)))
    }

    #[instrument(skip(self))]
    async fn mark_task_ignored(&self, id: &str, reason: &str) -> Result<bool, AdapterError> {
        let issue_number = Self::issue_number(id)?;
        self.run_gh(&[
            "issue",
            "edit",
            issue_number,
            "--repo",
            &self.cfg.repository,
            "--add-label",
            "codex.ignored",
        ])
        .await?;
        let _ = self.add_comment(id, &format!("Task ignored: {reason}")).await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_number_rejects_non_numeric_ids() {
        assert!(GitHubAdapter::issue_number("abc").is_err());
        assert!(GitHubAdapter::issue_number("42").is_ok());
    }

    #[test]
    fn rate_limit_detection_matches_known_phrasings() {
        assert!(is_rate_limited("API rate limit exceeded for user"));
        assert!(is_rate_limited("You have been rate limited"));
        assert!(is_rate_limited("403 limit reached"));
        assert!(!is_rate_limited("not found"));
    }

    #[test]
    fn single_select_field_resolves_option_id_case_insensitively() {
        let options = vec![("OPT_1".to_string(), "In Progress".to_string())];
        let encoded = GitHubAdapter::encode_field_value("SINGLE_SELECT", &Value::String("in progress".into()), &options);
        assert_eq!(encoded, Some(serde_json::json!({ "singleSelectOptionId": "OPT_1" })));
    }

    #[test]
    fn unresolvable_field_value_is_skipped_not_guessed() {
        let options = vec![("OPT_1".to_string(), "In Progress".to_string())];
        let encoded = GitHubAdapter::encode_field_value("SINGLE_SELECT", &Value::String("nonexistent".into()), &options);
        assert_eq!(encoded, None);
    }
}
