use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::config_dir;
use openfleet_executor::ExecutorConfig;
use serde::Deserialize;

fn default_project_id() -> String {
    "default".to_string()
}

fn default_owner_id() -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "workstation".to_string());
    format!("{host}/openfleet")
}

fn default_scope_label() -> String {
    "openfleet".to_string()
}

fn default_webhook_bind() -> String {
    "0.0.0.0:8787".to_string()
}

/// Process-level configuration loaded from `~/.config/openfleet/config.toml`
/// and overlaid with the executor's own env overrides (spec §6.4). CLI
/// flag parsing and `.env` file I/O are explicitly out of scope (spec §1).
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Override for the encrypted store's data directory.
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_project_id")]
    pub project_id: String,
    #[serde(default = "default_owner_id")]
    pub owner_id: String,
    #[serde(default = "default_scope_label")]
    pub scope_label: String,
    /// Config-file default for the kanban backend; `KANBAN_BACKEND` wins
    /// over this at resolution time (spec §4.3).
    pub kanban_backend: Option<String>,
    #[serde(default = "default_webhook_bind")]
    pub webhook_bind: String,
    pub executor: ExecutorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            project_id: default_project_id(),
            owner_id: default_owner_id(),
            scope_label: default_scope_label(),
            kanban_backend: None,
            webhook_bind: default_webhook_bind(),
            executor: ExecutorConfig::default(),
        }
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    load_from_path(default_path()?)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("openfleet").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_default_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_from_path(dir.path().join("config.toml")).expect("load");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn parses_custom_config() {
        let contents = r#"
            data_dir = "/tmp/openfleet-data"
            project_id = "acme-web"
            owner_id = "ci-runner-1/openfleet"
            scope_label = "openfleet"
            kanban_backend = "github"
            webhook_bind = "127.0.0.1:9000"

            [executor]
            max_parallel = 5
        "#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).expect("write temp config");

        let cfg = load_from_path(&path).expect("load");
        assert_eq!(cfg.project_id, "acme-web");
        assert_eq!(cfg.kanban_backend.as_deref(), Some("github"));
        assert_eq!(cfg.webhook_bind, "127.0.0.1:9000");
        assert_eq!(cfg.executor.max_parallel, 5);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "project_id = \"only-this\"\n").expect("write");
        let cfg = load_from_path(&path).expect("load");
        assert_eq!(cfg.project_id, "only-this");
        assert_eq!(cfg.scope_label, default_scope_label());
    }
}
