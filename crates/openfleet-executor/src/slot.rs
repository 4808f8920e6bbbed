//! Per-task executor-owned runtime state (spec §4.4.3, §5: "Slot state
//! is exclusively owned by the executor; no external component mutates
//! it.").

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// One unit of executor concurrency, live for the duration of a single
/// dispatched task (spec glossary: "Slot").
#[derive(Debug, Clone)]
pub struct SlotState {
    pub task_id: String,
    pub claim_token: String,
    pub worktree_path: PathBuf,
    pub recovered: bool,
    pub started_at: DateTime<Utc>,
}
