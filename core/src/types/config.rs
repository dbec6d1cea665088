//! Engine settings, loaded from YAML.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::convergence::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Fixed,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Tunables for a convergence run. Every key is optional in the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Total `Apply` attempts for a service before the failure is fatal.
    pub max_attempts: u32,
    pub backoff_strategy: BackoffStrategy,
    pub base_delay_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            max_attempts: 3,
            backoff_strategy: BackoffStrategy::Fixed,
            base_delay_ms: 500,
        }
    }
}

impl EngineSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff_strategy, self.base_delay_ms)
    }
}

/// Load settings from a YAML file.
pub fn load(path: &Path) -> Result<EngineSettings, SettingsError> {
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(&content)
}

/// Parse settings from a YAML string. An empty document yields defaults.
pub fn parse(content: &str) -> Result<EngineSettings, SettingsError> {
    if content.trim().is_empty() {
        return Ok(EngineSettings::default());
    }
    let settings: EngineSettings = serde_yaml::from_str(content)?;
    if settings.max_attempts == 0 {
        return Err(SettingsError::Invalid("max_attempts must be at least 1".into()));
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_restart_convention() {
        let s = EngineSettings::default();
        assert_eq!(s.max_attempts, 3);
        assert_eq!(s.backoff_strategy, BackoffStrategy::Fixed);
    }

    #[test]
    fn parse_partial_settings_keeps_defaults() {
        let s = parse("max_attempts: 5\n").unwrap();
        assert_eq!(s.max_attempts, 5);
        assert_eq!(s.base_delay_ms, 500);
    }

    #[test]
    fn parse_empty_is_default() {
        assert_eq!(parse("  \n").unwrap(), EngineSettings::default());
    }

    #[test]
    fn parse_rejects_zero_attempts() {
        let err = parse("max_attempts: 0\n").unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }

    #[test]
    fn parse_rejects_unknown_keys() {
        assert!(matches!(parse("retries: 3\n"), Err(SettingsError::Parse(_))));
    }

    #[test]
    fn backoff_strategy_serde() {
        let json = serde_json::to_string(&BackoffStrategy::Exponential).unwrap();
        assert_eq!(json, "\"exponential\"");
    }

    #[test]
    fn load_reports_missing_file() {
        let err = load(Path::new("/does/not/exist/hcv-settings.yaml")).unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
