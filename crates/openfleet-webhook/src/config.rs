//! Webhook intake configuration (spec §4.8, §6.4).

use openfleet_core::config::{env_bool, env_str, env_u64, webhook};

const DEFAULT_PATH: &str = "/api/webhooks/github/project-sync";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    pub path: String,
    pub secret: Option<String>,
    pub require_signature: bool,
    pub alert_failure_threshold: u64,
    pub rate_limit_alert_threshold: u64,
}

impl WebhookConfig {
    pub fn from_env() -> Self {
        let secret = env_str(webhook::SECRET);
        // Explicit env override wins; otherwise required iff a secret is configured
        // (spec §4.8 step 2: "derived from ...REQUIRE_SIGNATURE or presence of a secret").
        let require_signature = match env_str(webhook::REQUIRE_SIGNATURE) {
            Some(_) => env_bool(webhook::REQUIRE_SIGNATURE, secret.is_some()),
            None => secret.is_some(),
        };
        Self {
            path: env_str(webhook::PATH).unwrap_or_else(|| DEFAULT_PATH.to_string()),
            secret,
            require_signature,
            alert_failure_threshold: env_u64(webhook::ALERT_FAILURE_THRESHOLD, 1).max(1),
            rate_limit_alert_threshold: env_u64(webhook::RATE_LIMIT_ALERT_THRESHOLD, 1).max(1),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_PATH.to_string(),
            secret: None,
            require_signature: false,
            alert_failure_threshold: 1,
            rate_limit_alert_threshold: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_to_no_signature_requirement_without_a_secret() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var(webhook::SECRET);
        std::env::remove_var(webhook::REQUIRE_SIGNATURE);
        let cfg = WebhookConfig::from_env();
        assert!(!cfg.require_signature);
        assert_eq!(cfg.path, DEFAULT_PATH);
    }

    #[test]
    fn secret_presence_implies_signature_required() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(webhook::SECRET, "s3cr3t");
        std::env::remove_var(webhook::REQUIRE_SIGNATURE);
        let cfg = WebhookConfig::from_env();
        assert!(cfg.require_signature);
        std::env::remove_var(webhook::SECRET);
    }

    #[test]
    fn explicit_false_override_wins_even_with_a_secret() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(webhook::SECRET, "s3cr3t");
        std::env::set_var(webhook::REQUIRE_SIGNATURE, "false");
        let cfg = WebhookConfig::from_env();
        assert!(!cfg.require_signature);
        std::env::remove_var(webhook::SECRET);
        std::env::remove_var(webhook::REQUIRE_SIGNATURE);
    }

    #[test]
    fn alert_thresholds_are_floored_at_one() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(webhook::ALERT_FAILURE_THRESHOLD, "0");
        let cfg = WebhookConfig::from_env();
        assert_eq!(cfg.alert_failure_threshold, 1);
        std::env::remove_var(webhook::ALERT_FAILURE_THRESHOLD);
    }
}
