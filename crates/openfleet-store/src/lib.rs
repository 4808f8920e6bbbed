//! AES-GCM encrypted-at-rest file store implementing
//! [`openfleet_core::store::Store`], plus the task/comment persistence
//! shape the Internal Store Adapter is built around (spec §4.1.6,
//! §3.5).

pub mod key_provider;
pub mod secure_file_store;
pub mod task_records;

pub use task_records::{CommentRecord, TaskRecordStore};
