//! Pluggable kanban backends implementing
//! [`openfleet_core::adapter::KanbanAdapter`], plus the registry that
//! resolves which one is active (spec §4.1–§4.3).

pub mod adapters;
pub mod registry;

pub use adapters::github::{GitHubAdapter, GitHubConfig};
pub use adapters::internal::InternalAdapter;
pub use adapters::jira::{JiraAdapter, JiraConfig};
pub use adapters::vk::{VkAdapter, VkConfig};
pub use registry::AdapterRegistry;
