use std::path::PathBuf;

use color_eyre::Result;
use dirs::data_dir;

use crate::config::Config;

/// Resolve the default data directory for the internal encrypted store.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("openfleet"))
}

/// Resolve the store root for this run: the config override if set,
/// otherwise the platform default.
pub fn resolve_data_dir(config: &Config) -> Result<PathBuf> {
    match &config.data_dir {
        Some(dir) => Ok(dir.clone()),
        None => default_data_dir(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_override_wins_over_default() {
        let mut config = Config::default();
        config.data_dir = Some(PathBuf::from("/tmp/openfleet-test-data"));
        let resolved = resolve_data_dir(&config).expect("resolve");
        assert_eq!(resolved, PathBuf::from("/tmp/openfleet-test-data"));
    }

    #[test]
    fn falls_back_to_platform_default_when_unset() {
        let config = Config::default();
        if let Ok(default) = default_data_dir() {
            assert_eq!(resolve_data_dir(&config).expect("resolve"), default);
        }
    }
}
