//! Reference in-memory implementations of the executor's three
//! collaborator contracts (spec §4.5–§4.7), used by this crate's own
//! tests and available to downstream integration tests that want a
//! working executor without a real claim service, git, or agent runner.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use openfleet_core::collab::{
    ActiveThread, AgentPool, ClaimRegistry, ClaimResult, ExecResult, LaunchOptions, SyncEngine,
    SyncEngineStatus, ThreadHandle, WorktreeHandle, WorktreeManager, WorktreeStats,
};
use openfleet_core::error::AdapterError;
use openfleet_core::task::Task;
use uuid::Uuid;

/// Single-process claim registry: a task id maps to at most one live
/// token at a time (spec §4.5, §8: "a second concurrent claim for the
/// same task id succeeds at most once").
#[derive(Default)]
pub struct InMemoryClaimRegistry {
    claims: Mutex<HashMap<String, String>>,
    tokens: Mutex<HashMap<String, String>>,
}

impl InMemoryClaimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_claimed(&self, task_id: &str) -> bool {
        self.claims.lock().expect("lock poisoned").contains_key(task_id)
    }
}

#[async_trait]
impl ClaimRegistry for InMemoryClaimRegistry {
    async fn claim_task(&self, task_id: &str) -> Result<ClaimResult, AdapterError> {
        let mut claims = self.claims.lock().expect("lock poisoned");
        if claims.contains_key(task_id) {
            return Ok(ClaimResult { success: false, token: None });
        }
        let token = Uuid::new_v4().to_string();
        claims.insert(task_id.to_string(), token.clone());
        self.tokens
            .lock()
            .expect("lock poisoned")
            .insert(token.clone(), task_id.to_string());
        Ok(ClaimResult { success: true, token: Some(token) })
    }

    async fn renew_claim(&self, token: &str) -> Result<bool, AdapterError> {
        Ok(self.tokens.lock().expect("lock poisoned").contains_key(token))
    }

    async fn release_task(&self, token: &str) -> Result<bool, AdapterError> {
        let mut tokens = self.tokens.lock().expect("lock poisoned");
        if let Some(task_id) = tokens.remove(token) {
            self.claims.lock().expect("lock poisoned").remove(&task_id);
        }
        Ok(true)
    }
}

/// Hands out a fresh temp directory per task; tracks them only so
/// `get_stats`/`prune_stale_worktrees` have something real to report.
/// Carries no git semantics (spec §1 Non-goals).
#[derive(Default)]
pub struct EphemeralWorktreeManager {
    by_task: Mutex<HashMap<String, PathBuf>>,
    total_created: AtomicU64,
    total_pruned: AtomicU64,
}

impl EphemeralWorktreeManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorktreeManager for EphemeralWorktreeManager {
    async fn acquire_worktree(&self, task: &Task) -> Result<WorktreeHandle, AdapterError> {
        let mut by_task = self.by_task.lock().expect("lock poisoned");
        if let Some(path) = by_task.get(&task.id) {
            return Ok(WorktreeHandle { path: path.clone(), created: false });
        }
        let path = std::env::temp_dir().join(format!("openfleet-worktree-{}", task.id));
        by_task.insert(task.id.clone(), path.clone());
        self.total_created.fetch_add(1, Ordering::Relaxed);
        Ok(WorktreeHandle { path, created: true })
    }

    async fn release_worktree(&self, task_key: &str) -> Result<(), AdapterError> {
        self.by_task.lock().expect("lock poisoned").remove(task_key);
        Ok(())
    }

    async fn release_worktree_by_branch(&self, branch: &str) -> Result<(), AdapterError> {
        let mut by_task = self.by_task.lock().expect("lock poisoned");
        by_task.retain(|_, path| !path.ends_with(branch));
        Ok(())
    }

    async fn prune_stale_worktrees(&self) -> Result<u64, AdapterError> {
        let mut by_task = self.by_task.lock().expect("lock poisoned");
        let pruned = by_task.len() as u64;
        by_task.clear();
        self.total_pruned.fetch_add(pruned, Ordering::Relaxed);
        Ok(pruned)
    }

    async fn get_stats(&self) -> WorktreeStats {
        WorktreeStats {
            active: self.by_task.lock().expect("lock poisoned").len(),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_pruned: self.total_pruned.load(Ordering::Relaxed),
        }
    }
}

/// Scripted agent pool: every launch/exec call succeeds immediately and
/// reports whatever outcome the test configured via [`Self::set_outcome`].
/// Defaults to success-with-commits so happy-path tests need no setup.
pub struct StubAgentPool {
    threads: Mutex<HashMap<String, chrono::DateTime<Utc>>>,
    outcomes: Mutex<HashMap<String, ExecResult>>,
    default_outcome: ExecResult,
}

impl Default for StubAgentPool {
    fn default() -> Self {
        Self {
            threads: Mutex::new(HashMap::new()),
            outcomes: Mutex::new(HashMap::new()),
            default_outcome: ExecResult {
                success: true,
                output: String::new(),
                attempts: 1,
                produced_commits: true,
            },
        }
    }
}

impl StubAgentPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome `exec_with_retry` returns for a specific task.
    pub fn set_outcome(&self, task_key: &str, outcome: ExecResult) {
        self.outcomes
            .lock()
            .expect("lock poisoned")
            .insert(task_key.to_string(), outcome);
    }

    pub fn has_thread(&self, task_key: &str) -> bool {
        self.threads.lock().expect("lock poisoned").contains_key(task_key)
    }
}

#[async_trait]
impl AgentPool for StubAgentPool {
    async fn launch_or_resume_thread(
        &self,
        task: &Task,
        _options: &LaunchOptions,
    ) -> Result<ThreadHandle, AdapterError> {
        let resumed = self.has_thread(&task.id);
        self.threads
            .lock()
            .expect("lock poisoned")
            .insert(task.id.clone(), Utc::now());
        Ok(ThreadHandle { task_key: task.id.clone(), resumed })
    }

    async fn exec_with_retry(&self, task_key: &str) -> Result<ExecResult, AdapterError> {
        Ok(self
            .outcomes
            .lock()
            .expect("lock poisoned")
            .get(task_key)
            .cloned()
            .unwrap_or_else(|| self.default_outcome.clone()))
    }

    async fn invalidate_thread(&self, task_key: &str) {
        self.threads.lock().expect("lock poisoned").remove(task_key);
    }

    async fn get_active_threads(&self) -> Vec<ActiveThread> {
        self.threads
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|(task_key, started_at)| ActiveThread { task_key: task_key.clone(), started_at: *started_at })
            .collect()
    }

    fn get_pool_sdk_name(&self) -> String {
        "stub".to_string()
    }

    async fn ensure_thread_registry_loaded(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Minimal [`SyncEngine`] double for webhook-intake tests: records every
/// call it receives and returns scripted results.
#[derive(Default)]
pub struct RecordingSyncEngine {
    pub task_syncs: Mutex<Vec<String>>,
    pub full_syncs: AtomicU64,
    pub fail_next: Mutex<bool>,
    pub rate_limit_events: AtomicU64,
}

impl RecordingSyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_call(&self) {
        *self.fail_next.lock().expect("lock poisoned") = true;
    }

    fn take_failure(&self) -> bool {
        let mut fail = self.fail_next.lock().expect("lock poisoned");
        std::mem::replace(&mut *fail, false)
    }
}

#[async_trait]
impl SyncEngine for RecordingSyncEngine {
    async fn get_status(&self) -> SyncEngineStatus {
        SyncEngineStatus { rate_limit_events: self.rate_limit_events.load(Ordering::Relaxed) }
    }

    async fn sync_task(&self, id: &str) -> Result<(), AdapterError> {
        self.task_syncs.lock().expect("lock poisoned").push(id.to_string());
        if self.take_failure() {
            return Err(AdapterError::Transient("scripted failure".into()));
        }
        Ok(())
    }

    async fn full_sync(&self) -> Result<(), AdapterError> {
        self.full_syncs.fetch_add(1, Ordering::Relaxed);
        if self.take_failure() {
            return Err(AdapterError::Transient("scripted failure".into()));
        }
        Ok(())
    }
}
