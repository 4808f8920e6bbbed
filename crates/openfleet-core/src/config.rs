//! Environment variable names from the configuration surface (spec
//! §6.4), plus small typed-read helpers. CLI flag parsing and `.env`
//! file I/O are explicitly out of scope (spec §1) — callers read process
//! environment variables directly.

/// Executor configuration env vars.
pub mod executor {
    pub const MODE: &str = "EXECUTOR_MODE";
    pub const PARALLEL: &str = "INTERNAL_EXECUTOR_PARALLEL";
    pub const SDK: &str = "INTERNAL_EXECUTOR_SDK";
    pub const TIMEOUT_MS: &str = "INTERNAL_EXECUTOR_TIMEOUT_MS";
    pub const MAX_RETRIES: &str = "INTERNAL_EXECUTOR_MAX_RETRIES";
    pub const POLL_MS: &str = "INTERNAL_EXECUTOR_POLL_MS";
    pub const REPLENISH_ENABLED: &str = "INTERNAL_EXECUTOR_REPLENISH_ENABLED";
    pub const REVIEW_AGENT_ENABLED: &str = "INTERNAL_EXECUTOR_REVIEW_AGENT_ENABLED";
}

/// Kanban adapter-registry env vars.
pub mod kanban {
    pub const BACKEND: &str = "KANBAN_BACKEND";
    pub const TASK_LABEL: &str = "OPENFLEET_TASK_LABEL";
    pub const ENFORCE_TASK_LABEL: &str = "OPENFLEET_ENFORCE_TASK_LABEL";
}

/// Vibe-Kanban adapter env vars.
pub mod vk {
    pub const BASE_URL: &str = "VK_BASE_URL";
    pub const API_KEY: &str = "VK_API_KEY";
}

/// GitHub adapter env vars.
pub mod github {
    pub const REPOSITORY: &str = "GITHUB_REPOSITORY";
    pub const PROJECT_MODE: &str = "GITHUB_PROJECT_MODE";
    pub const PROJECT_NUMBER: &str = "GITHUB_PROJECT_NUMBER";
    pub const PROJECT_OWNER: &str = "GITHUB_PROJECT_OWNER";
    pub const PROJECT_TITLE: &str = "GITHUB_PROJECT_TITLE";
    pub const PROJECT_AUTO_SYNC: &str = "GITHUB_PROJECT_AUTO_SYNC";
    pub const AUTO_ASSIGN_CREATOR: &str = "GITHUB_AUTO_ASSIGN_CREATOR";
    pub const DEFAULT_ASSIGNEE: &str = "GITHUB_DEFAULT_ASSIGNEE";
    pub const RATE_LIMIT_RETRY_MS: &str = "GH_RATE_LIMIT_RETRY_MS";
}

/// Jira adapter env vars.
pub mod jira {
    pub const BASE_URL: &str = "JIRA_BASE_URL";
    pub const EMAIL: &str = "JIRA_EMAIL";
    pub const API_TOKEN: &str = "JIRA_API_TOKEN";
    pub const PROJECT_KEY: &str = "JIRA_PROJECT_KEY";
    pub const ISSUE_TYPE: &str = "JIRA_ISSUE_TYPE";
    pub const LABEL_CLAIMED: &str = "JIRA_LABEL_CLAIMED";
    pub const LABEL_WORKING: &str = "JIRA_LABEL_WORKING";
    pub const LABEL_STALE: &str = "JIRA_LABEL_STALE";
    pub const LABEL_IGNORE: &str = "JIRA_LABEL_IGNORE";
    pub const CUSTOM_FIELD_OWNER_ID: &str = "JIRA_CUSTOM_FIELD_OWNER_ID";
    pub const CUSTOM_FIELD_ATTEMPT_TOKEN: &str = "JIRA_CUSTOM_FIELD_ATTEMPT_TOKEN";
    pub const CUSTOM_FIELD_ATTEMPT_STARTED: &str = "JIRA_CUSTOM_FIELD_ATTEMPT_STARTED";
    pub const CUSTOM_FIELD_HEARTBEAT: &str = "JIRA_CUSTOM_FIELD_HEARTBEAT";
    pub const CUSTOM_FIELD_RETRY_COUNT: &str = "JIRA_CUSTOM_FIELD_RETRY_COUNT";
    pub const CUSTOM_FIELD_IGNORE_REASON: &str = "JIRA_CUSTOM_FIELD_IGNORE_REASON";
    pub const CUSTOM_FIELD_SHARED_STATE: &str = "JIRA_CUSTOM_FIELD_SHARED_STATE";
    pub const CUSTOM_FIELD_BASE_BRANCH: &str = "JIRA_CUSTOM_FIELD_BASE_BRANCH";
    pub const USE_ADF_COMMENTS: &str = "JIRA_USE_ADF_COMMENTS";
    pub const SUBTASK_PARENT_KEY: &str = "JIRA_SUBTASK_PARENT_KEY";
}

/// Webhook intake env vars.
pub mod webhook {
    pub const PATH: &str = "GITHUB_PROJECT_WEBHOOK_PATH";
    pub const SECRET: &str = "GITHUB_PROJECT_WEBHOOK_SECRET";
    pub const REQUIRE_SIGNATURE: &str = "GITHUB_PROJECT_WEBHOOK_REQUIRE_SIGNATURE";
    pub const ALERT_FAILURE_THRESHOLD: &str = "GITHUB_PROJECT_SYNC_ALERT_FAILURE_THRESHOLD";
    pub const RATE_LIMIT_ALERT_THRESHOLD: &str =
        "GITHUB_PROJECT_SYNC_RATE_LIMIT_ALERT_THRESHOLD";
}

/// Read a string env var, trimming, returning `None` if unset or empty.
pub fn env_str(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a boolean env var (`"1"`/`"true"`/`"yes"` case-insensitively).
pub fn env_bool(name: &str, default: bool) -> bool {
    match env_str(name) {
        None => default,
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
    }
}

/// Read an unsigned integer env var, falling back to `default` on
/// absence or parse failure.
pub fn env_u64(name: &str, default: u64) -> u64 {
    env_str(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn env_bool_accepts_common_truthy_spellings() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("OF_TEST_BOOL", "Yes");
        assert!(env_bool("OF_TEST_BOOL", false));
        std::env::set_var("OF_TEST_BOOL", "0");
        assert!(!env_bool("OF_TEST_BOOL", true));
        std::env::remove_var("OF_TEST_BOOL");
        assert!(env_bool("OF_TEST_BOOL", true));
    }

    #[test]
    fn env_u64_falls_back_on_parse_failure() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("OF_TEST_U64", "not-a-number");
        assert_eq!(env_u64("OF_TEST_U64", 42), 42);
        std::env::set_var("OF_TEST_U64", "7");
        assert_eq!(env_u64("OF_TEST_U64", 42), 7);
        std::env::remove_var("OF_TEST_U64");
    }
}
