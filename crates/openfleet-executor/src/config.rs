//! Executor configuration (spec §4.4.1). Loaded from a config file and
//! overlaid with the subset of fields that carry an env override (spec
//! §6.4); the rest are config-file-only and fall back to their default.

use std::time::Duration;

use openfleet_core::config::{env_bool, env_str, env_u64, executor};
use serde::{Deserialize, Serialize};

/// Executor backend policy (spec §4.4.1's `mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorMode {
    Internal,
    Hybrid,
    Vk,
}

impl ExecutorMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "internal" => Some(Self::Internal),
            "hybrid" => Some(Self::Hybrid),
            "vk" => Some(Self::Vk),
            _ => None,
        }
    }
}

impl Default for ExecutorMode {
    fn default() -> Self {
        Self::Internal
    }
}

/// Planner-trigger envelope; disabled by default (spec §4.4.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacklogReplenishment {
    pub enabled: bool,
    pub min_new_tasks: u32,
    pub max_new_tasks: u32,
}

impl Default for BacklogReplenishment {
    fn default() -> Self {
        Self {
            enabled: false,
            min_new_tasks: 1,
            max_new_tasks: 3,
        }
    }
}

/// Prompt-enrichment inputs, config-file only (spec §4.4.1).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectRequirements {
    pub profile: Option<String>,
    pub notes: Option<String>,
}

/// Merged runtime configuration for the [`crate::Executor`] (spec §4.4.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub mode: ExecutorMode,
    pub max_parallel: usize,
    pub poll_interval_ms: u64,
    pub sdk: String,
    pub task_timeout_ms: u64,
    pub max_retries: u32,
    pub workflow_owns_task_lifecycle: bool,
    pub backlog_replenishment: BacklogReplenishment,
    pub project_requirements: ProjectRequirements,
    pub no_commit_block_threshold: u32,
    pub review_agent_enabled: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutorMode::default(),
            max_parallel: 3,
            poll_interval_ms: 30_000,
            sdk: "auto".to_string(),
            task_timeout_ms: Duration::from_secs(6 * 60 * 60).as_millis() as u64,
            max_retries: 2,
            workflow_owns_task_lifecycle: true,
            backlog_replenishment: BacklogReplenishment::default(),
            project_requirements: ProjectRequirements::default(),
            no_commit_block_threshold: 3,
            review_agent_enabled: false,
        }
    }
}

impl ExecutorConfig {
    /// Overlay the env vars spec §6.4 names as overrides onto a
    /// config-file-derived base. Fields with no listed env var
    /// (`workflowOwnsTaskLifecycle`, `backlogReplenishment.{min,max}NewTasks`,
    /// `projectRequirements.*`, `noCommitBlockThreshold`) are untouched here.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(mode) = env_str(executor::MODE).and_then(|v| ExecutorMode::parse(&v)) {
            self.mode = mode;
        }
        if let Some(parallel) = env_str(executor::PARALLEL).and_then(|v| v.parse().ok()) {
            self.max_parallel = parallel;
        }
        if let Some(sdk) = env_str(executor::SDK) {
            self.sdk = sdk;
        }
        self.task_timeout_ms = env_u64(executor::TIMEOUT_MS, self.task_timeout_ms);
        if let Some(retries) = env_str(executor::MAX_RETRIES).and_then(|v| v.parse().ok()) {
            self.max_retries = retries;
        }
        self.poll_interval_ms = env_u64(executor::POLL_MS, self.poll_interval_ms);
        self.backlog_replenishment.enabled =
            env_bool(executor::REPLENISH_ENABLED, self.backlog_replenishment.enabled);
        self.review_agent_enabled =
            env_bool(executor::REVIEW_AGENT_ENABLED, self.review_agent_enabled);
        self
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_spec_table() {
        let cfg = ExecutorConfig::default();
        assert_eq!(cfg.max_parallel, 3);
        assert_eq!(cfg.poll_interval_ms, 30_000);
        assert_eq!(cfg.sdk, "auto");
        assert_eq!(cfg.max_retries, 2);
        assert!(cfg.workflow_owns_task_lifecycle);
        assert_eq!(cfg.no_commit_block_threshold, 3);
        assert!(!cfg.backlog_replenishment.enabled);
    }

    #[test]
    fn env_override_wins_over_file_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(executor::PARALLEL, "7");
        std::env::set_var(executor::MODE, "hybrid");
        let cfg = ExecutorConfig::default().apply_env_overrides();
        assert_eq!(cfg.max_parallel, 7);
        assert_eq!(cfg.mode, ExecutorMode::Hybrid);
        std::env::remove_var(executor::PARALLEL);
        std::env::remove_var(executor::MODE);
    }

    #[test]
    fn unrecognized_mode_string_is_ignored() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(executor::MODE, "teleport");
        let cfg = ExecutorConfig::default().apply_env_overrides();
        assert_eq!(cfg.mode, ExecutorMode::Internal);
        std::env::remove_var(executor::MODE);
    }
}
