pub mod github;
pub mod internal;
pub mod jira;
pub mod vk;
