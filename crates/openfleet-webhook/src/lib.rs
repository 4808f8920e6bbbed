//! The project-sync webhook intake: signature verification, event
//! filtering, and sync-engine dispatch behind a single HTTP endpoint
//! (spec §4.8–§4.9).

pub mod alert;
pub mod config;
pub mod intake;
pub mod payload;
pub mod signature;
pub mod sync;

pub use alert::{AlertSink, LoggingAlertSink};
pub use config::WebhookConfig;
pub use intake::{router, WebhookState};
pub use payload::extract_issue_number;
pub use signature::verify_signature;
pub use sync::KanbanSyncEngine;
