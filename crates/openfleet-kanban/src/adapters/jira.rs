//! Jira REST v3 adapter (spec §4.1.5). Grounded on the teacher's
//! `JiraSync` (Basic auth header construction, JQL search body) and
//! extended with ADF comments, ADF-to-plain-text fallback, the
//! `/search/jql` → `/search` endpoint fallback, and transition
//! resolution.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use openfleet_core::adapter::{KanbanAdapter, ListFilters, NewTask, TaskPatch, UpdateStatusOptions};
use openfleet_core::status::{jira_status_aliases, Backend, CanonicalStatus};
use openfleet_core::task::{self, Project, SharedState, SharedStateStatus};
use openfleet_core::{AdapterError, Task};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{instrument, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct JiraConfig {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
    pub project_key: String,
    pub issue_type: String,
    pub use_adf_comments: bool,
    pub label_claimed: String,
    pub label_working: String,
    pub label_stale: String,
    pub label_ignore: String,
    pub custom_fields: JiraCustomFields,
}

#[derive(Debug, Clone, Default)]
pub struct JiraCustomFields {
    pub owner_id: Option<String>,
    pub attempt_token: Option<String>,
    pub attempt_started: Option<String>,
    pub heartbeat: Option<String>,
    pub retry_count: Option<String>,
    pub ignore_reason: Option<String>,
    pub shared_state: Option<String>,
    pub base_branch: Option<String>,
}

impl JiraConfig {
    pub fn from_env() -> Result<Self, AdapterError> {
        use openfleet_core::config::jira as cfg;
        let base_url = openfleet_core::config::env_str(cfg::BASE_URL)
            .ok_or_else(|| AdapterError::Fatal("JIRA_BASE_URL is required".into()))?;
        let email = openfleet_core::config::env_str(cfg::EMAIL)
            .ok_or_else(|| AdapterError::Fatal("JIRA_EMAIL is required".into()))?;
        let api_token = openfleet_core::config::env_str(cfg::API_TOKEN)
            .ok_or_else(|| AdapterError::Fatal("JIRA_API_TOKEN is required".into()))?;
        let project_key = openfleet_core::config::env_str(cfg::PROJECT_KEY)
            .ok_or_else(|| AdapterError::Fatal("JIRA_PROJECT_KEY is required".into()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            email,
            api_token,
            project_key,
            issue_type: openfleet_core::config::env_str(cfg::ISSUE_TYPE).unwrap_or_else(|| "Task".into()),
            use_adf_comments: openfleet_core::config::env_bool(cfg::USE_ADF_COMMENTS, true),
            label_claimed: openfleet_core::config::env_str(cfg::LABEL_CLAIMED).unwrap_or_else(|| "codex.claimed".into()),
            label_working: openfleet_core::config::env_str(cfg::LABEL_WORKING).unwrap_or_else(|| "codex.working".into()),
            label_stale: openfleet_core::config::env_str(cfg::LABEL_STALE).unwrap_or_else(|| "codex.stale".into()),
            label_ignore: openfleet_core::config::env_str(cfg::LABEL_IGNORE).unwrap_or_else(|| "codex.ignored".into()),
            custom_fields: JiraCustomFields {
                owner_id: openfleet_core::config::env_str(cfg::CUSTOM_FIELD_OWNER_ID),
                attempt_token: openfleet_core::config::env_str(cfg::CUSTOM_FIELD_ATTEMPT_TOKEN),
                attempt_started: openfleet_core::config::env_str(cfg::CUSTOM_FIELD_ATTEMPT_STARTED),
                heartbeat: openfleet_core::config::env_str(cfg::CUSTOM_FIELD_HEARTBEAT),
                retry_count: openfleet_core::config::env_str(cfg::CUSTOM_FIELD_RETRY_COUNT),
                ignore_reason: openfleet_core::config::env_str(cfg::CUSTOM_FIELD_IGNORE_REASON),
                shared_state: openfleet_core::config::env_str(cfg::CUSTOM_FIELD_SHARED_STATE),
                base_branch: openfleet_core::config::env_str(cfg::CUSTOM_FIELD_BASE_BRANCH),
            },
        })
    }
}

fn issue_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z][A-Z0-9]+-\d+$").expect("static regex is valid"))
}

pub struct JiraAdapter {
    cfg: JiraConfig,
    client: reqwest::Client,
    scope_label: String,
}

impl std::fmt::Debug for JiraAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JiraAdapter")
            .field("cfg", &self.cfg)
            .field("scope_label", &self.scope_label)
            .finish()
    }
}

impl JiraAdapter {
    pub fn new(cfg: JiraConfig, scope_label: String) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AdapterError::Fatal(format!("building http client: {e}")))?;
        Ok(Self { cfg, client, scope_label })
    }

    fn headers(&self) -> Result<HeaderMap, AdapterError> {
        let mut headers = HeaderMap::new();
        let basic = BASE64.encode(format!("{}:{}", self.cfg.email, self.cfg.api_token));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {basic}"))
                .map_err(|e| AdapterError::Fatal(format!("invalid auth header: {e}")))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url, path)
    }

    fn validate_key(id: &str) -> Result<(), AdapterError> {
        if issue_key_regex().is_match(id) {
            Ok(())
        } else {
            Err(AdapterError::Fatal(format!("invalid Jira issue key: {id}")))
        }
    }

    fn map_transport_err(err: reqwest::Error) -> AdapterError {
        if err.is_timeout() || err.is_connect() {
            AdapterError::Transient(err.to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                404 => AdapterError::NotFound(err.to_string()),
                s if s >= 500 || s == 429 => AdapterError::Transient(err.to_string()),
                _ => AdapterError::InvalidInput(err.to_string()),
            }
        } else {
            AdapterError::Transient(err.to_string())
        }
    }

    /// ADF document with one paragraph per non-empty source line.
    fn to_adf(text: &str) -> Value {
        let paragraphs: Vec<Value> = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                json!({
                    "type": "paragraph",
                    "content": [{ "type": "text", "text": line }]
                })
            })
            .collect();
        json!({
            "type": "doc",
            "version": 1,
            "content": if paragraphs.is_empty() {
                vec![json!({ "type": "paragraph", "content": [] })]
            } else {
                paragraphs
            }
        })
    }

    /// Plain text from a comment `body`, which Jira returns either as a
    /// bare string (plain-text mode) or an ADF doc (the shape
    /// [`Self::to_adf`] produces: one paragraph per source line).
    fn extract_comment_text(body: &Value) -> String {
        if let Some(text) = body.as_str() {
            return text.to_string();
        }
        body["content"]
            .as_array()
            .map(|paragraphs| {
                paragraphs
                    .iter()
                    .map(|p| {
                        p["content"]
                            .as_array()
                            .map(|runs| runs.iter().filter_map(|r| r["text"].as_str()).collect::<Vec<_>>().join(""))
                            .unwrap_or_default()
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }

    /// Find the most recent sentinel comment on an issue, newest first
    /// (spec §4.1.2, mirrored for Jira: edit-one-or-post-new).
    #[instrument(skip(self))]
    async fn find_sentinel_comment(&self, key: &str) -> Result<Option<(String, String)>, AdapterError> {
        let resp: Value = self
            .client
            .get(self.url(&format!("/rest/api/3/issue/{key}/comment")))
            .headers(self.headers()?)
            .send()
            .await
            .map_err(Self::map_transport_err)?
            .error_for_status()
            .map_err(Self::map_transport_err)?
            .json()
            .await
            .map_err(Self::map_transport_err)?;
        let comments = resp["comments"].as_array().cloned().unwrap_or_default();
        for comment in comments.into_iter().rev() {
            let text = Self::extract_comment_text(&comment["body"]);
            if text.trim_start().starts_with(task::SENTINEL_PREFIX) {
                let id = comment["id"].as_str().unwrap_or_default().to_string();
                return Ok(Some((id, text)));
            }
        }
        Ok(None)
    }

    #[instrument(skip(self, body))]
    async fn edit_comment(&self, key: &str, comment_id: &str, body: &str) -> Result<(), AdapterError> {
        let url = self.url(&format!("/rest/api/3/issue/{key}/comment/{comment_id}"));
        let payload = if self.cfg.use_adf_comments {
            json!({ "body": Self::to_adf(body) })
        } else {
            json!({ "body": body })
        };
        self.client
            .put(&url)
            .headers(self.headers()?)
            .json(&payload)
            .send()
            .await
            .map_err(Self::map_transport_err)?
            .error_for_status()
            .map_err(Self::map_transport_err)?;
        Ok(())
    }

    #[instrument(skip(self, body))]
    async fn post_comment(&self, key: &str, body: &str) -> Result<(), AdapterError> {
        let url = self.url(&format!("/rest/api/3/issue/{key}/comment"));
        if self.cfg.use_adf_comments {
            let payload = json!({ "body": Self::to_adf(body) });
            let resp = self
                .client
                .post(&url)
                .headers(self.headers()?)
                .json(&payload)
                .send()
                .await
                .map_err(Self::map_transport_err)?;
            if resp.status().as_u16() == 400 {
                warn!(key, "ADF comment rejected, retrying as plain text");
                self.client
                    .post(&url)
                    .headers(self.headers()?)
                    .json(&json!({ "body": body }))
                    .send()
                    .await
                    .map_err(Self::map_transport_err)?
                    .error_for_status()
                    .map_err(Self::map_transport_err)?;
                return Ok(());
            }
            resp.error_for_status().map_err(Self::map_transport_err)?;
        } else {
            self.client
                .post(&url)
                .headers(self.headers()?)
                .json(&json!({ "body": body }))
                .send()
                .await
                .map_err(Self::map_transport_err)?
                .error_for_status()
                .map_err(Self::map_transport_err)?;
        }
        Ok(())
    }

    /// JQL search with the `/search/jql` → `/search` fallback (spec §4.1.5).
    async fn search(&self, jql: &str, max_results: usize) -> Result<Vec<JiraIssue>, AdapterError> {
        let mut fields = vec![
            "summary".to_string(),
            "description".to_string(),
            "status".to_string(),
            "labels".to_string(),
            "assignee".to_string(),
            "created".to_string(),
            "updated".to_string(),
        ];
        fields.extend(self_field_names(&self.cfg));
        let body = json!({
            "jql": jql,
            "maxResults": max_results,
            "fields": fields,
        });

        let primary = self.url("/rest/api/3/search/jql");
        let resp = self
            .client
            .post(&primary)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_err)?;

        let resp = if matches!(resp.status().as_u16(), 404 | 410) {
            let fallback = self.url("/rest/api/3/search");
            self.client
                .post(&fallback)
                .headers(self.headers()?)
                .json(&body)
                .send()
                .await
                .map_err(Self::map_transport_err)?
        } else {
            resp
        };

        let resp = resp.error_for_status().map_err(Self::map_transport_err)?;
        let parsed: JiraSearchResponse = resp.json().await.map_err(Self::map_transport_err)?;
        Ok(parsed.issues)
    }

    async fn get_issue(&self, key: &str) -> Result<JiraIssue, AdapterError> {
        let resp = self
            .client
            .get(self.url(&format!("/rest/api/3/issue/{key}")))
            .headers(self.headers()?)
            .send()
            .await
            .map_err(Self::map_transport_err)?
            .error_for_status()
            .map_err(Self::map_transport_err)?;
        resp.json().await.map_err(Self::map_transport_err)
    }

    /// Resolve a transition id for `status` (spec §4.1.5): exact name
    /// match, then matching `statusCategory.key` for terminal states,
    /// then a fixed alias whitelist.
    async fn resolve_transition(&self, key: &str, status: CanonicalStatus) -> Result<String, AdapterError> {
        let resp: Value = self
            .client
            .get(self.url(&format!("/rest/api/3/issue/{key}/transitions")))
            .headers(self.headers()?)
            .send()
            .await
            .map_err(Self::map_transport_err)?
            .error_for_status()
            .map_err(Self::map_transport_err)?
            .json()
            .await
            .map_err(Self::map_transport_err)?;

        let transitions = resp["transitions"].as_array().cloned().unwrap_or_default();
        let target_name = canonical_to_native_name(status);

        if let Some(t) = transitions.iter().find(|t| {
            t["to"]["name"].as_str().map(|n| n.eq_ignore_ascii_case(target_name)).unwrap_or(false)
        }) {
            return extract_transition_id(t);
        }

        if status.is_terminal() {
            if let Some(t) = transitions
                .iter()
                .find(|t| t["to"]["statusCategory"]["key"].as_str() == Some("done"))
            {
                return extract_transition_id(t);
            }
        }

        for alias in jira_status_aliases(status) {
            if let Some(t) = transitions
                .iter()
                .find(|t| t["to"]["name"].as_str().map(|n| n.eq_ignore_ascii_case(alias)).unwrap_or(false))
            {
                return extract_transition_id(t);
            }
        }

        Err(AdapterError::Fatal(format!(
            "no transition to {status:?} available for {key}"
        )))
    }

    fn shared_state_from_fields(&self, fields: &Value) -> Option<SharedState> {
        let custom = &self.cfg.custom_fields;
        if let Some(field_id) = &custom.shared_state {
            if let Some(text) = fields[field_id].as_str() {
                if let Some(state) = task::parse_shared_state_json(text) {
                    return Some(state);
                }
            }
        }
        let owner_id = custom.owner_id.as_ref().and_then(|f| fields[f].as_str())?.to_string();
        let attempt_token = custom.attempt_token.as_ref().and_then(|f| fields[f].as_str())?.to_string();
        let attempt_started = custom
            .attempt_started
            .as_ref()
            .and_then(|f| fields[f].as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?
            .with_timezone(&Utc);
        let heartbeat = custom
            .heartbeat
            .as_ref()
            .and_then(|f| fields[f].as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?
            .with_timezone(&Utc);
        let retry_count = custom
            .retry_count
            .as_ref()
            .and_then(|f| fields[f].as_u64())
            .unwrap_or(0) as u32;
        let label_names = extract_label_names(fields);
        let status = if label_names.iter().any(|l| l == &self.cfg.label_working) {
            SharedStateStatus::Working
        } else if label_names.iter().any(|l| l == &self.cfg.label_stale) {
            SharedStateStatus::Stale
        } else if label_names.iter().any(|l| l == &self.cfg.label_claimed) {
            SharedStateStatus::Claimed
        } else {
            return None;
        };
        Some(SharedState {
            owner_id,
            attempt_token,
            attempt_started,
            heartbeat,
            status,
            retry_count,
        })
    }

    fn task_from_issue(&self, issue: JiraIssue) -> Task {
        let label_names: Vec<&str> = issue.fields.labels.iter().map(|s| s.as_str()).collect();
        let status = match issue.fields.status.name.to_lowercase().as_str() {
            s if jira_status_aliases(CanonicalStatus::Done).contains(&s) => CanonicalStatus::Done,
            s if jira_status_aliases(CanonicalStatus::Cancelled).contains(&s) => CanonicalStatus::Cancelled,
            s if jira_status_aliases(CanonicalStatus::InReview).contains(&s) => CanonicalStatus::InReview,
            s if jira_status_aliases(CanonicalStatus::InProgress).contains(&s) => CanonicalStatus::InProgress,
            _ => CanonicalStatus::Todo,
        };
        let tags = task::normalize_tags(label_names.iter().copied(), &self.scope_label);
        let base_branch = self
            .cfg
            .custom_fields
            .base_branch
            .as_ref()
            .and_then(|f| issue.fields.extra.get(f))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .or_else(|| task::derive_base_branch(None, label_names.iter().copied(), issue.fields.description.as_deref()));

        let mut meta = BTreeMap::new();
        if let Some(state) = self.shared_state_from_fields(&issue.fields.extra_as_value()) {
            meta.insert("sharedState".to_string(), serde_json::to_value(&state).unwrap());
        }

        Task {
            id: issue.key.clone(),
            title: issue.fields.summary,
            description: issue.fields.description,
            status,
            assignee: issue.fields.assignee.map(|a| a.display_name),
            priority: None,
            tags,
            draft: false,
            project_id: Some(self.cfg.project_key.clone()),
            base_branch,
            branch_name: None,
            pr_number: None,
            pr_url: None,
            task_url: Some(self.url(&format!("/browse/{}", issue.key))),
            created_at: issue.fields.created,
            updated_at: issue.fields.updated,
            backend: Backend::Jira,
            meta,
        }
    }
}

fn self_field_names(cfg: &JiraConfig) -> Vec<String> {
    [
        &cfg.custom_fields.owner_id,
        &cfg.custom_fields.attempt_token,
        &cfg.custom_fields.attempt_started,
        &cfg.custom_fields.heartbeat,
        &cfg.custom_fields.retry_count,
        &cfg.custom_fields.shared_state,
        &cfg.custom_fields.base_branch,
    ]
    .into_iter()
    .flatten()
    .cloned()
    .collect()
}

fn canonical_to_native_name(status: CanonicalStatus) -> &'static str {
    match status {
        CanonicalStatus::Draft => "Draft",
        CanonicalStatus::Todo => "To Do",
        CanonicalStatus::InProgress => "In Progress",
        CanonicalStatus::InReview => "In Review",
        CanonicalStatus::Blocked => "Blocked",
        CanonicalStatus::Done => "Done",
        CanonicalStatus::Cancelled => "Cancelled",
    }
}

fn extract_transition_id(transition: &Value) -> Result<String, AdapterError> {
    transition["id"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| AdapterError::Fatal("transition missing id".into()))
}

fn extract_label_names(fields: &Value) -> Vec<String> {
    fields["labels"]
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct JiraSearchResponse {
    issues: Vec<JiraIssue>,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    key: String,
    fields: JiraFields,
}

#[derive(Debug, Deserialize)]
struct JiraFields {
    summary: String,
    description: Option<String>,
    status: JiraStatus,
    #[serde(default)]
    labels: Vec<String>,
    assignee: Option<JiraUser>,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl JiraFields {
    /// Custom fields plus `labels`, as a `Value` map — the shape
    /// [`JiraAdapter::shared_state_from_fields`] and
    /// [`extract_label_names`] expect to index into.
    fn extra_as_value(&self) -> Value {
        let mut map = self.extra.clone();
        map.insert(
            "labels".to_string(),
            serde_json::to_value(&self.labels).unwrap_or(Value::Null),
        );
        serde_json::to_value(&map).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Deserialize)]
struct JiraStatus {
    name: String,
}

#[derive(Debug, Deserialize)]
struct JiraUser {
    #[serde(rename = "displayName")]
    display_name: String,
}

#[async_trait]
impl KanbanAdapter for JiraAdapter {
    fn backend(&self) -> Backend {
        Backend::Jira
    }

    #[instrument(skip(self))]
    async fn list_projects(&self) -> Result<Vec<Project>, AdapterError> {
        Ok(vec![Project {
            id: self.cfg.project_key.clone(),
            name: self.cfg.project_key.clone(),
            backend: Backend::Jira,
            meta: Default::default(),
        }])
    }

    #[instrument(skip(self, filters))]
    async fn list_tasks(&self, project_id: &str, filters: &ListFilters) -> Result<Vec<Task>, AdapterError> {
        let jql = filters
            .jql
            .clone()
            .unwrap_or_else(|| format!("project = {project_id} ORDER BY updated DESC"));
        let issues = self.search(&jql, filters.limit.unwrap_or(100)).await?;
        let mut tasks: Vec<Task> = issues.into_iter().map(|i| self.task_from_issue(i)).collect();
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
        Self::validate_key(id)?;
        let issue = self.get_issue(id).await?;
        Ok(self.task_from_issue(issue))
    }

    #[instrument(skip(self, options))]
    async fn update_task_status(
        &self,
        id: &str,
        status: CanonicalStatus,
        options: &UpdateStatusOptions,
    ) -> Result<Task, AdapterError> {
        Self::validate_key(id)?;
        let transition_id = self.resolve_transition(id, status).await?;
        self.client
            .post(self.url(&format!("/rest/api/3/issue/{id}/transitions")))
            .headers(self.headers()?)
            .json(&json!({ "transition": { "id": transition_id } }))
            .send()
            .await
            .map_err(Self::map_transport_err)?
            .error_for_status()
            .map_err(Self::map_transport_err)?;

        if let Some(state) = &options.shared_state {
            self.persist_shared_state_to_issue(id, state).await?;
        }
        if let Some(fields) = &options.project_fields {
            if !fields.is_empty() {
                self.client
                    .put(self.url(&format!("/rest/api/3/issue/{id}")))
                    .headers(self.headers()?)
                    .json(&json!({ "fields": fields }))
                    .send()
                    .await
                    .map_err(Self::map_transport_err)?
                    .error_for_status()
                    .map_err(Self::map_transport_err)?;
            }
        }
        self.get_task(id).await
    }

    #[instrument(skip(self, patch))]
    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task, AdapterError> {
        Self::validate_key(id)?;
        let current = self.get_task(id).await?;
        let mut tags = current.tags.clone();
        for tag in &patch.tags_add {
            tags.insert(tag.clone());
        }
        for tag in &patch.tags_remove {
            tags.remove(tag);
        }

        let mut fields = serde_json::Map::new();
        if let Some(title) = &patch.title {
            fields.insert("summary".into(), json!(title));
        }
        if let Some(Some(description)) = &patch.description {
            fields.insert("description".into(), Self::to_adf(description));
        }
        fields.insert("labels".into(), json!(tags.into_iter().collect::<Vec<_>>()));
        if let Some(Some(assignee)) = &patch.assignee {
            fields.insert("assignee".into(), json!({ "displayName": assignee }));
        }

        self.client
            .put(self.url(&format!("/rest/api/3/issue/{id}")))
            .headers(self.headers()?)
            .json(&json!({ "fields": Value::Object(fields) }))
            .send()
            .await
            .map_err(Self::map_transport_err)?
            .error_for_status()
            .map_err(Self::map_transport_err)?;

        self.get_task(id).await
    }

    #[instrument(skip(self, data))]
    async fn create_task(&self, project_id: &str, data: NewTask) -> Result<Task, AdapterError> {
        if data.title.trim().is_empty() {
            return Err(AdapterError::InvalidInput("title is required".into()));
        }
        let mut labels: Vec<String> = vec![self.scope_label.clone()];
        labels.extend(data.tags.iter().cloned());
        if data.draft {
            labels.push("draft".into());
        }
        if let Some(branch) = &data.base_branch {
            labels.push(format!("upstream:{branch}"));
        }

        let mut fields = json!({
            "project": { "key": project_id },
            "summary": data.title,
            "issuetype": { "name": self.cfg.issue_type },
            "labels": labels,
        });
        if let Some(description) = &data.description {
            fields["description"] = Self::to_adf(description);
        }

        let resp: Value = self
            .client
            .post(self.url("/rest/api/3/issue"))
            .headers(self.headers()?)
            .json(&json!({ "fields": fields }))
            .send()
            .await
            .map_err(Self::map_transport_err)?
            .error_for_status()
            .map_err(Self::map_transport_err)?
            .json()
            .await
            .map_err(Self::map_transport_err)?;

        let key = resp["key"]
            .as_str()
            .ok_or_else(|| AdapterError::Fatal("create issue response missing key".into()))?;
        self.get_task(key).await
    }

    #[instrument(skip(self))]
    async fn delete_task(&self, id: &str) -> Result<bool, AdapterError> {
        Self::validate_key(id)?;
        self.update_task_status(id, CanonicalStatus::Cancelled, &UpdateStatusOptions::default())
            .await?;
        Ok(true)
    }

    #[instrument(skip(self, body))]
    async fn add_comment(&self, id: &str, body: &str) -> Result<bool, AdapterError> {
        if Self::validate_key(id).is_err() {
            warn!(task = id, "add_comment: invalid issue key, ignoring");
            return Ok(false);
        }
        match self.post_comment(id, body).await {
            Ok(()) => Ok(true),
            Err(err) => {
                warn!(task = id, %err, "add_comment failed");
                Ok(false)
            }
        }
    }

    #[instrument(skip(self, state))]
    async fn persist_shared_state_to_issue(&self, id: &str, state: &SharedState) -> Result<bool, AdapterError> {
        Self::validate_key(id)?;
        let custom = &self.cfg.custom_fields;
        let mut fields = serde_json::Map::new();
        if let Some(f) = &custom.owner_id {
            fields.insert(f.clone(), json!(state.owner_id));
        }
        if let Some(f) = &custom.attempt_token {
            fields.insert(f.clone(), json!(state.attempt_token));
        }
        if let Some(f) = &custom.attempt_started {
            fields.insert(f.clone(), json!(state.attempt_started.to_rfc3339()));
        }
        if let Some(f) = &custom.heartbeat {
            fields.insert(f.clone(), json!(state.heartbeat.to_rfc3339()));
        }
        if let Some(f) = &custom.retry_count {
            fields.insert(f.clone(), json!(state.retry_count));
        }
        if let Some(f) = &custom.shared_state {
            fields.insert(
                f.clone(),
                json!(serde_json::to_string(state).expect("SharedState always serializes")),
            );
        }

        let status_label = match state.status {
            SharedStateStatus::Claimed => &self.cfg.label_claimed,
            SharedStateStatus::Working => &self.cfg.label_working,
            SharedStateStatus::Stale => &self.cfg.label_stale,
        };
        let others: Vec<&String> = [&self.cfg.label_claimed, &self.cfg.label_working, &self.cfg.label_stale]
            .into_iter()
            .filter(|l| *l != status_label)
            .collect();

        let current = self.get_issue(id).await?;
        let mut labels = extract_label_names(&current.fields.extra_as_value());
        labels.retain(|l| !others.iter().any(|o| *o == l));
        if !labels.iter().any(|l| l == status_label) {
            labels.push(status_label.clone());
        }
        fields.insert("labels".into(), json!(labels));

        if !fields.is_empty() {
            self.client
                .put(self.url(&format!("/rest/api/3/issue/{id}")))
                .headers(self.headers()?)
                .json(&json!({ "fields": Value::Object(fields) }))
                .send()
                .await
                .map_err(Self::map_transport_err)?
                .error_for_status()
                .map_err(Self::map_transport_err)?;
        }

        let body = task::render_sentinel(state);
        match self.find_sentinel_comment(id).await? {
            Some((comment_id, _)) => self.edit_comment(id, &comment_id, &body).await?,
            None => self.post_comment(id, &body).await?,
        }
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn read_shared_state_from_issue(&self, id: &str) -> Result<Option<SharedState>, AdapterError> {
        Self::validate_key(id)?;
        let issue = self.get_issue(id).await?;
        if let Some(state) = self.shared_state_from_fields(&issue.fields.extra_as_value()) {
            return Ok(Some(state));
        }
        Ok(self
            .find_sentinel_comment(id)
            .await?
            .and_then(|(_, body)| task::parse_sentinel(&body)))
    }

    #[instrument(skip(self))]
    async fn mark_task_ignored(&self, id: &str, reason: &str) -> Result<bool, AdapterError> {
        Self::validate_key(id)?;
        let current = self.get_issue(id).await?;
        let mut labels = extract_label_names(&current.fields.extra_as_value());
        if !labels.iter().any(|l| l == &self.cfg.label_ignore) {
            labels.push(self.cfg.label_ignore.clone());
        }
        let mut fields = serde_json::Map::new();
        fields.insert("labels".into(), json!(labels));
        if let Some(f) = &self.cfg.custom_fields.ignore_reason {
            fields.insert(f.clone(), json!(reason));
        }
        self.client
            .put(self.url(&format!("/rest/api/3/issue/{id}")))
            .headers(self.headers()?)
            .json(&json!({ "fields": Value::Object(fields) }))
            .send()
            .await
            .map_err(Self::map_transport_err)?
            .error_for_status()
            .map_err(Self::map_transport_err)?;
        let _ = self.add_comment(id, &format!("Task ignored: {reason}")).await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_key_regex_matches_spec_pattern() {
        assert!(JiraAdapter::validate_key("ABC-123").is_ok());
        assert!(JiraAdapter::validate_key("abc-123").is_err());
        assert!(JiraAdapter::validate_key("123-ABC").is_err());
        assert!(JiraAdapter::validate_key("ABC123").is_err());
    }

    #[test]
    fn adf_conversion_emits_one_paragraph_per_line() {
        let adf = JiraAdapter::to_adf("first line\n\nsecond line");
        let content = adf["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["content"][0]["text"], "first line");
        assert_eq!(content[1]["content"][0]["text"], "second line");
    }

    #[test]
    fn empty_body_still_produces_a_valid_doc() {
        let adf = JiraAdapter::to_adf("");
        assert_eq!(adf["type"], "doc");
        assert_eq!(adf["content"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn extract_comment_text_handles_plain_string_body() {
        let body = json!("a plain comment");
        assert_eq!(JiraAdapter::extract_comment_text(&body), "a plain comment");
    }

    #[test]
    fn extract_comment_text_round_trips_through_adf() {
        let adf = JiraAdapter::to_adf("first line\nsecond line");
        assert_eq!(JiraAdapter::extract_comment_text(&adf), "first line\nsecond line");
    }
}
