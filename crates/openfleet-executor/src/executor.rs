//! The slot scheduler: polls (or is driven to claim) `todo` tasks,
//! recovers interrupted `inprogress` tasks on startup, and enforces
//! anti-thrash quarantine (spec §4.4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use openfleet_core::adapter::UpdateStatusOptions;
use openfleet_core::collab::{AgentPool, ClaimRegistry, LaunchOptions, WorktreeManager};
use openfleet_core::{AdapterError, CanonicalStatus, KanbanAdapter, ListFilters, SharedState, SharedStateStatus, Task};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use crate::config::ExecutorConfig;
use crate::slot::SlotState;

const STOP_DRAIN_POLL: Duration = Duration::from_secs(1);

fn recovery_fresh_window() -> ChronoDuration {
    ChronoDuration::hours(24)
}

/// Bounded-concurrency scheduler coordinating a kanban backend, a
/// task-claim registry, a worktree manager, and an agent pool (spec
/// §4.4). Owns all slot state exclusively; no other component mutates
/// `active_slots` or `no_commit_counts` (spec §5).
pub struct Executor {
    config: RwLock<ExecutorConfig>,
    project_id: String,
    owner_id: String,
    kanban: Arc<dyn KanbanAdapter>,
    claims: Arc<dyn ClaimRegistry>,
    worktrees: Arc<dyn WorktreeManager>,
    agents: Arc<dyn AgentPool>,
    running: AtomicBool,
    paused: AtomicBool,
    active_slots: RwLock<HashMap<String, SlotState>>,
    no_commit_counts: Mutex<HashMap<String, u32>>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Executor {
    pub fn new(
        config: ExecutorConfig,
        project_id: impl Into<String>,
        owner_id: impl Into<String>,
        kanban: Arc<dyn KanbanAdapter>,
        claims: Arc<dyn ClaimRegistry>,
        worktrees: Arc<dyn WorktreeManager>,
        agents: Arc<dyn AgentPool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(config),
            project_id: project_id.into(),
            owner_id: owner_id.into(),
            kanban,
            claims,
            worktrees,
            agents,
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            active_slots: RwLock::new(HashMap::new()),
            no_commit_counts: Mutex::new(HashMap::new()),
            poll_handle: Mutex::new(None),
        })
    }

    /// Loads the agent pool's thread registry, runs recovery, then
    /// installs the poll timer unless the caller owns the task lifecycle
    /// itself (spec §4.4.2 step 1).
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> Result<(), AdapterError> {
        self.running.store(true, Ordering::SeqCst);
        self.agents.ensure_thread_registry_loaded().await?;
        self.recover().await;

        let owns_lifecycle = !self.config.read().await.workflow_owns_task_lifecycle;
        if owns_lifecycle {
            let this = Arc::clone(self);
            let handle = tokio::spawn(async move { this.poll_loop().await });
            *self.poll_handle.lock().await = Some(handle);
        }
        Ok(())
    }

    /// Halts new dispatch and drains running slots before returning
    /// (spec §4.4.2 step 4). Does not forcibly cancel running agents
    /// (spec §5).
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.poll_handle.lock().await.take() {
            handle.abort();
        }
        loop {
            if self.active_slots.read().await.is_empty() {
                return;
            }
            tokio::time::sleep(STOP_DRAIN_POLL).await;
        }
    }

    /// Prevents new dispatch without interrupting running slots (spec
    /// §4.4.5).
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// `n == 0` implies pause; growing from 0 implies resume (spec
    /// §4.4.5).
    pub async fn set_max_parallel(&self, n: usize) {
        self.config.write().await.max_parallel = n;
        if n == 0 {
            self.pause();
        } else if self.paused.load(Ordering::SeqCst) {
            self.resume();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub async fn active_slot_count(&self) -> usize {
        self.active_slots.read().await.len()
    }

    pub async fn no_commit_count(&self, task_id: &str) -> u32 {
        self.no_commit_counts
            .lock()
            .await
            .get(task_id)
            .copied()
            .unwrap_or(0)
    }

    /// Operator-triggered reset of a quarantined task's no-commit
    /// counter (spec §4.4.4).
    pub async fn reset_no_commit_count(&self, task_id: &str) {
        self.no_commit_counts.lock().await.remove(task_id);
    }

    async fn poll_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            let interval = self.config.read().await.poll_interval();
            tokio::time::sleep(interval).await;
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            if let Err(err) = self.poll_once().await {
                warn!(error = %err, "poll tick failed");
            }
        }
    }

    /// Fetches `todo` tasks, filters out anti-thrash-blocked ones, and
    /// claims up to `maxParallel − activeSlots` of them (spec §4.4.2
    /// step 2).
    #[instrument(skip(self))]
    pub async fn poll_once(self: &Arc<Self>) -> Result<(), AdapterError> {
        if self.paused.load(Ordering::SeqCst) {
            return Ok(());
        }

        let max_parallel = self.config.read().await.max_parallel;
        let active = self.active_slots.read().await.len();
        if active >= max_parallel {
            return Ok(());
        }
        let capacity = max_parallel - active;

        let filters = ListFilters {
            status: Some(CanonicalStatus::Todo),
            ..Default::default()
        };
        let tasks = self.kanban.list_tasks(&self.project_id, &filters).await?;

        let threshold = self.config.read().await.no_commit_block_threshold;
        let no_commit = self.no_commit_counts.lock().await;
        let mut eligible: Vec<Task> = tasks
            .into_iter()
            .filter(|t| no_commit.get(&t.id).copied().unwrap_or(0) < threshold)
            .collect();
        drop(no_commit);
        eligible.truncate(capacity);

        for task in eligible {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.dispatch(task, false).await });
        }
        Ok(())
    }

    /// Scans `inprogress` tasks and demotes or resumes each per spec
    /// §4.4.2 step 3.
    #[instrument(skip(self))]
    async fn recover(self: &Arc<Self>) {
        let filters = ListFilters {
            status: Some(CanonicalStatus::InProgress),
            ..Default::default()
        };
        let tasks = match self.kanban.list_tasks(&self.project_id, &filters).await {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(error = %err, "recovery: failed to list in-progress tasks");
                return;
            }
        };

        let threshold = self.config.read().await.no_commit_block_threshold;
        let active_threads = self.agents.get_active_threads().await;

        for task in tasks {
            if self.no_commit_count(&task.id).await >= threshold {
                self.demote_to_todo(&task, "no-commit threshold reached, refusing to resume").await;
                continue;
            }

            let has_thread = active_threads.iter().any(|t| t.task_key == task.id);
            let fresh = Utc::now() - task.updated_at < recovery_fresh_window();

            if has_thread && fresh {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.dispatch(task, true).await });
            } else {
                self.release_stale_claim(&task).await;
                self.demote_to_todo(&task, "stale in-progress task with no resumable thread").await;
            }
        }
    }

    /// Best-effort: the claim token isn't held in process memory across
    /// a restart, so recovery recovers it from the task's own shared
    /// state instead (the attempt token doubles as the claim token).
    async fn release_stale_claim(&self, task: &Task) {
        if let Some(state) = task.shared_state() {
            if let Err(err) = self.claims.release_task(&state.attempt_token).await {
                warn!(error = %err, task_id = %task.id, "recovery: failed to release stale claim");
            }
        }
    }

    async fn demote_to_todo(&self, task: &Task, reason: &'static str) {
        warn!(task_id = %task.id, reason, "demoting task to todo");
        self.no_commit_counts.lock().await.remove(&task.id);
        if let Err(err) = self
            .kanban
            .update_task_status(&task.id, CanonicalStatus::Todo, &UpdateStatusOptions::default())
            .await
        {
            warn!(error = %err, task_id = %task.id, "failed to demote task to todo");
        }
    }

    /// Runs a single slot end-to-end: claim → worktree → agent →
    /// status writeback, releasing worktree and claim in LIFO order on
    /// every exit path (spec §4.4.3).
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn dispatch(self: Arc<Self>, task: Task, recovered: bool) {
        let token = match self.claims.claim_task(&task.id).await {
            Ok(result) if result.success => match result.token {
                Some(token) => token,
                None => {
                    warn!("claim reported success without a token");
                    return;
                }
            },
            Ok(_) => return,
            Err(err) => {
                warn!(error = %err, "claim_task failed");
                return;
            }
        };

        let worktree = match self.worktrees.acquire_worktree(&task).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(error = %err, "acquire_worktree failed");
                self.release_claim(&token).await;
                return;
            }
        };

        let sdk = self.config.read().await.sdk.clone();
        let options = LaunchOptions { sdk: Some(sdk), recovered_from_in_progress: recovered };
        let thread = match self.agents.launch_or_resume_thread(&task, &options).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(error = %err, "launch_or_resume_thread failed");
                self.release_worktree(&task.id).await;
                self.release_claim(&token).await;
                return;
            }
        };

        self.active_slots.write().await.insert(
            task.id.clone(),
            SlotState {
                task_id: task.id.clone(),
                claim_token: token.clone(),
                worktree_path: worktree.path.clone(),
                recovered,
                started_at: Utc::now(),
            },
        );

        self.heartbeat(&task, &token).await;

        match self.agents.exec_with_retry(&thread.task_key).await {
            Ok(result) if result.success => {
                if result.produced_commits {
                    self.reset_no_commit_count(&task.id).await;
                } else {
                    self.record_no_commit_attempt(&task).await;
                }
                self.finish(&task, CanonicalStatus::InReview, &token).await;
            }
            Ok(result) => {
                warn!(attempts = result.attempts, "agent attempt did not succeed");
                self.record_no_commit_attempt(&task).await;
                self.finish(&task, CanonicalStatus::Todo, &token).await;
            }
            Err(err) => {
                warn!(error = %err, "exec_with_retry errored");
                self.agents.invalidate_thread(&thread.task_key).await;
                self.finish(&task, CanonicalStatus::Todo, &token).await;
            }
        }
    }

    /// Increments the per-task no-commit counter (spec §4.4.4), keyed by
    /// canonical task id so it survives a backend id reshuffle within a
    /// run.
    async fn record_no_commit_attempt(&self, task: &Task) {
        let threshold = self.config.read().await.no_commit_block_threshold;
        let mut counts = self.no_commit_counts.lock().await;
        let count = counts.entry(task.id.clone()).or_insert(0);
        *count += 1;
        if *count >= threshold {
            warn!(task_id = %task.id, count = *count, "no-commit block threshold reached");
        }
    }

    /// Releases worktree then claim (LIFO relative to acquisition),
    /// writes the final status, and clears the slot. Release failures
    /// are logged, never fatal (spec §4.4.3).
    async fn finish(&self, task: &Task, status: CanonicalStatus, token: &str) {
        self.release_worktree(&task.id).await;
        self.release_claim(token).await;
        if let Err(err) = self
            .kanban
            .update_task_status(&task.id, status, &UpdateStatusOptions::default())
            .await
        {
            warn!(error = %err, task_id = %task.id, "failed to write terminal status");
        }
        self.active_slots.write().await.remove(&task.id);
    }

    async fn release_worktree(&self, task_id: &str) {
        if let Err(err) = self.worktrees.release_worktree(task_id).await {
            warn!(error = %err, task_id, "release_worktree failed");
        }
    }

    async fn release_claim(&self, token: &str) {
        if let Err(err) = self.claims.release_task(token).await {
            warn!(error = %err, "release_task failed");
        }
    }

    async fn heartbeat(&self, task: &Task, token: &str) {
        let _ = self.claims.renew_claim(token).await;
        let state = SharedState {
            owner_id: self.owner_id.clone(),
            attempt_token: token.to_string(),
            attempt_started: Utc::now(),
            heartbeat: Utc::now(),
            status: SharedStateStatus::Working,
            retry_count: 0,
        };
        match self.kanban.persist_shared_state_to_issue(&task.id, &state).await {
            Ok(_) | Err(AdapterError::Unsupported(_)) => {}
            Err(err) => warn!(error = %err, task_id = %task.id, "failed to persist shared state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdoubles::{EphemeralWorktreeManager, InMemoryClaimRegistry, StubAgentPool};
    use openfleet_core::collab::ExecResult;
    use openfleet_kanban::InternalAdapter;
    use openfleet_store::key_provider::InMemoryKeyProvider;
    use openfleet_store::secure_file_store::EncryptedFileStore;

    async fn harness() -> (
        Arc<Executor>,
        Arc<InternalAdapter<EncryptedFileStore<InMemoryKeyProvider>>>,
        Arc<StubAgentPool>,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path().to_path_buf(), InMemoryKeyProvider::default());
        let kanban = Arc::new(InternalAdapter::new(store));
        let claims = Arc::new(InMemoryClaimRegistry::new());
        let worktrees = Arc::new(EphemeralWorktreeManager::new());
        let agents = Arc::new(StubAgentPool::new());

        let config = ExecutorConfig::default();
        let executor = Executor::new(
            config,
            "openfleet",
            "laptop/agent-1",
            kanban.clone(),
            claims,
            worktrees,
            agents.clone(),
        );
        (executor, kanban, agents, dir)
    }

    #[tokio::test]
    async fn poll_once_dispatches_up_to_capacity_and_drains_the_slot() {
        let (executor, kanban, _agents, _dir) = harness().await;
        let project = kanban.list_projects().await.unwrap().remove(0);
        kanban
            .create_task(
                &project.id,
                openfleet_core::adapter::NewTask {
                    title: "do the thing".into(),
                    description: None,
                    status: CanonicalStatus::Todo,
                    assignee: None,
                    priority: None,
                    tags: Default::default(),
                    draft: false,
                    base_branch: None,
                },
            )
            .await
            .unwrap();

        executor.poll_once().await.unwrap();

        // Dispatch is spawned onto its own task; wait for the slot to drain.
        for _ in 0..50 {
            if executor.active_slot_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(executor.active_slot_count().await, 0);

        let tasks = kanban
            .list_tasks(&project.id, &ListFilters::default())
            .await
            .unwrap();
        assert_eq!(tasks[0].status, CanonicalStatus::InReview);
    }

    #[tokio::test]
    async fn no_commit_attempt_increments_counter_and_demotes_to_todo() {
        let (executor, kanban, agents, _dir) = harness().await;
        let project = kanban.list_projects().await.unwrap().remove(0);
        let task = kanban
            .create_task(
                &project.id,
                openfleet_core::adapter::NewTask {
                    title: "flaky".into(),
                    description: None,
                    status: CanonicalStatus::Todo,
                    assignee: None,
                    priority: None,
                    tags: Default::default(),
                    draft: false,
                    base_branch: None,
                },
            )
            .await
            .unwrap();
        agents.set_outcome(
            &task.id,
            ExecResult { success: true, output: String::new(), attempts: 1, produced_commits: false },
        );

        executor.poll_once().await.unwrap();
        for _ in 0..50 {
            if executor.active_slot_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(executor.no_commit_count(&task.id).await, 1);
        let refetched = kanban.get_task(&task.id).await.unwrap();
        assert_eq!(refetched.status, CanonicalStatus::Todo);
    }

    #[tokio::test]
    async fn set_max_parallel_zero_pauses_and_blocks_poll() {
        let (executor, kanban, _agents, _dir) = harness().await;
        let project = kanban.list_projects().await.unwrap().remove(0);
        kanban
            .create_task(
                &project.id,
                openfleet_core::adapter::NewTask {
                    title: "should stay put".into(),
                    description: None,
                    status: CanonicalStatus::Todo,
                    assignee: None,
                    priority: None,
                    tags: Default::default(),
                    draft: false,
                    base_branch: None,
                },
            )
            .await
            .unwrap();

        executor.set_max_parallel(0).await;
        assert!(executor.is_paused());
        executor.poll_once().await.unwrap();
        assert_eq!(executor.active_slot_count().await, 0);

        executor.set_max_parallel(1).await;
        assert!(!executor.is_paused());
    }

    #[tokio::test]
    async fn stale_in_progress_task_is_demoted_without_resuming() {
        let (executor, kanban, agents, _dir) = harness().await;
        let project = kanban.list_projects().await.unwrap().remove(0);
        let task = kanban
            .create_task(
                &project.id,
                openfleet_core::adapter::NewTask {
                    title: "orphaned".into(),
                    description: None,
                    status: CanonicalStatus::InProgress,
                    assignee: None,
                    priority: None,
                    tags: Default::default(),
                    draft: false,
                    base_branch: None,
                },
            )
            .await
            .unwrap();
        assert!(!agents.has_thread(&task.id));

        executor.recover().await;

        let refetched = kanban.get_task(&task.id).await.unwrap();
        assert_eq!(refetched.status, CanonicalStatus::Todo);
        assert!(!agents.has_thread(&task.id));
    }
}
