//! Interfaces for components the executor and webhook intake consume but
//! do not own: the task-claim registry, the worktree manager, the agent
//! pool, and the sync engine (spec §4.5–4.9). Spec §1 treats these as
//! external collaborators; this module fixes only the contract, not an
//! implementation. Reference in-memory implementations used for testing
//! the executor live in `openfleet-executor::testdoubles`.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::AdapterError;
use crate::task::Task;

/// Result of [`ClaimRegistry::claim_task`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimResult {
    pub success: bool,
    pub token: Option<String>,
}

/// Distributed, cross-fleet exclusive-execution lease over a task id
/// (spec §4.5).
#[async_trait]
pub trait ClaimRegistry: Send + Sync {
    /// Grants exclusive execution rights for `task_id` across the fleet.
    /// A second concurrent claim for the same id succeeds at most once
    /// (spec §8).
    async fn claim_task(&self, task_id: &str) -> Result<ClaimResult, AdapterError>;

    /// Extends the lease backing `token`.
    async fn renew_claim(&self, token: &str) -> Result<bool, AdapterError>;

    /// Idempotent: releasing an already-released or unknown token
    /// succeeds.
    async fn release_task(&self, token: &str) -> Result<bool, AdapterError>;
}

/// An isolated working directory bound to a single task (spec §4.6).
#[derive(Debug, Clone)]
pub struct WorktreeHandle {
    pub path: PathBuf,
    pub created: bool,
}

/// Read-only worktree pool statistics (spec §4.6).
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorktreeStats {
    pub active: usize,
    pub total_created: u64,
    pub total_pruned: u64,
}

/// Allocates and reclaims isolated working directories for tasks
/// (spec §4.6). The executor treats the returned path opaquely — this
/// interface makes no claim about git semantics or on-disk layout
/// (spec §1 Non-goals).
#[async_trait]
pub trait WorktreeManager: Send + Sync {
    async fn acquire_worktree(&self, task: &Task) -> Result<WorktreeHandle, AdapterError>;
    async fn release_worktree(&self, task_key: &str) -> Result<(), AdapterError>;
    async fn release_worktree_by_branch(&self, branch: &str) -> Result<(), AdapterError>;
    async fn prune_stale_worktrees(&self) -> Result<u64, AdapterError>;
    async fn get_stats(&self) -> WorktreeStats;
}

/// Options passed to [`AgentPool::launch_or_resume_thread`].
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub sdk: Option<String>,
    pub recovered_from_in_progress: bool,
}

/// Handle to a running or resumed agent thread (spec §4.7).
#[derive(Debug, Clone)]
pub struct ThreadHandle {
    pub task_key: String,
    pub resumed: bool,
}

/// Outcome of [`AgentPool::exec_with_retry`].
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub success: bool,
    pub output: String,
    pub attempts: u32,
    pub produced_commits: bool,
}

/// A currently-active agent thread, as reported by
/// [`AgentPool::get_active_threads`].
#[derive(Debug, Clone)]
pub struct ActiveThread {
    pub task_key: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// The agent-pool process supervisor, consumed as an opaque interface
/// (spec §1, §4.7). The executor identifies threads only by `task_key`.
#[async_trait]
pub trait AgentPool: Send + Sync {
    async fn launch_or_resume_thread(
        &self,
        task: &Task,
        options: &LaunchOptions,
    ) -> Result<ThreadHandle, AdapterError>;

    async fn exec_with_retry(&self, task_key: &str) -> Result<ExecResult, AdapterError>;

    async fn invalidate_thread(&self, task_key: &str);

    async fn get_active_threads(&self) -> Vec<ActiveThread>;

    fn get_pool_sdk_name(&self) -> String;

    /// Must complete before the executor runs recovery (spec §4.4.2).
    async fn ensure_thread_registry_loaded(&self) -> Result<(), AdapterError>;
}

/// Status payload returned by [`SyncEngine::get_status`] (spec §4.9).
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncEngineStatus {
    pub rate_limit_events: u64,
}

/// The reconciliation engine invoked by the webhook intake (spec §4.9).
/// `sync_task` is not assumed idempotent by the caller but MUST be safe
/// to invoke repeatedly on the same id.
#[async_trait]
pub trait SyncEngine: Send + Sync {
    async fn get_status(&self) -> SyncEngineStatus;
    async fn sync_task(&self, id: &str) -> Result<(), AdapterError>;
    async fn full_sync(&self) -> Result<(), AdapterError>;
}
