use crate::infrastructure::error::InfraError;
use crate::infrastructure::rule_engine::DEFAULT_MAX_DYNAMIC_RULES;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const CONFIG_JSON: &str = "siteblock.json";
const SUPPORTED_SCHEMA: u64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub schema: u8,
    pub blocked_page_url: String,
    pub rule_priority: u32,
    pub rule_sync_interval_seconds: u64,
    pub popup_refresh_interval_seconds: u64,
    pub blocked_page_refresh_interval_seconds: u64,
    pub max_dynamic_rules: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema: 1,
            blocked_page_url: "chrome-extension://siteblock/index.html".to_string(),
            rule_priority: 1,
            rule_sync_interval_seconds: 60,
            popup_refresh_interval_seconds: 30,
            blocked_page_refresh_interval_seconds: 10,
            max_dynamic_rules: DEFAULT_MAX_DYNAMIC_RULES,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), InfraError> {
        Url::parse(&self.blocked_page_url).map_err(|error| {
            InfraError::InvalidConfig(format!(
                "blockedPageUrl '{}' is not a valid URL: {error}",
                self.blocked_page_url
            ))
        })?;
        if self.rule_priority == 0 {
            return Err(InfraError::InvalidConfig(
                "rulePriority must be >= 1".to_string(),
            ));
        }
        for (name, seconds) in [
            ("ruleSyncIntervalSeconds", self.rule_sync_interval_seconds),
            ("popupRefreshIntervalSeconds", self.popup_refresh_interval_seconds),
            (
                "blockedPageRefreshIntervalSeconds",
                self.blocked_page_refresh_interval_seconds,
            ),
        ] {
            if seconds == 0 {
                return Err(InfraError::InvalidConfig(format!("{name} must be >= 1")));
            }
        }
        if self.max_dynamic_rules == 0 {
            return Err(InfraError::InvalidConfig(
                "maxDynamicRules must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rule_sync_interval(&self) -> Duration {
        Duration::from_secs(self.rule_sync_interval_seconds)
    }

    pub fn popup_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.popup_refresh_interval_seconds)
    }

    pub fn blocked_page_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.blocked_page_refresh_interval_seconds)
    }
}

pub fn ensure_default_config(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(CONFIG_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&EngineConfig::default())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

pub fn load_config(config_dir: &Path) -> Result<EngineConfig, InfraError> {
    let path = config_dir.join(CONFIG_JSON);
    let raw = fs::read_to_string(&path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }

    let config: EngineConfig = serde_json::from_value(parsed)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_written_once_and_loads() {
        let dir = tempfile::tempdir().expect("temp dir");
        ensure_default_config(dir.path()).expect("write defaults");

        let path = dir.path().join(CONFIG_JSON);
        let edited = r#"{"schema": 1, "ruleSyncIntervalSeconds": 15}"#;
        fs::write(&path, edited).expect("edit config");
        ensure_default_config(dir.path()).expect("keep existing");

        let config = load_config(dir.path()).expect("load");
        assert_eq!(config.rule_sync_interval(), Duration::from_secs(15));
        assert_eq!(config.popup_refresh_interval(), Duration::from_secs(30));
        assert_eq!(config.blocked_page_refresh_interval(), Duration::from_secs(10));
    }

    #[test]
    fn load_rejects_unknown_schema() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join(CONFIG_JSON), r#"{"schema": 2}"#).expect("write");
        assert!(matches!(
            load_config(dir.path()),
            Err(InfraError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validate_rejects_zero_interval_and_bad_page_url() {
        let mut config = EngineConfig {
            rule_sync_interval_seconds: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        config.rule_sync_interval_seconds = 60;
        config.blocked_page_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }
}
