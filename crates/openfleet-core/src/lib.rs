//! Canonical data model, adapter contract, and collaborator interfaces
//! shared by every OpenFleet crate. Kept small and dependency-light so
//! adapters, the executor, and the webhook intake can all depend on it
//! without pulling in HTTP clients or process-execution machinery.

pub mod adapter;
pub mod collab;
pub mod config;
pub mod error;
pub mod metrics;
pub mod status;
pub mod store;
pub mod task;

pub use adapter::{KanbanAdapter, ListFilters};
pub use error::AdapterError;
pub use status::{CanonicalStatus, Priority};
pub use store::{Store, StoreError};
pub use task::{Project, SharedState, SharedStateStatus, Task};
