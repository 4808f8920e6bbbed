//! The bounded-concurrency task scheduler that dispatches claimed
//! kanban tasks to agent slots, recovers interrupted work on startup,
//! and enforces anti-thrash quarantine (spec §4.4).

pub mod config;
pub mod executor;
pub mod slot;
pub mod testdoubles;

pub use config::{BacklogReplenishment, ExecutorConfig, ExecutorMode, ProjectRequirements};
pub use executor::Executor;
pub use slot::SlotState;
