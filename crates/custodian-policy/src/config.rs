//! Engine configuration

use custodian_core::{Error, Result, RetryConfig};
use serde::{Deserialize, Serialize};

/// Settings shared by every policy the engine loads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Field holding a resource's unique id
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Ask the provider to validate mutating calls without applying them
    #[serde(default)]
    pub dry_run: bool,

    /// Retry settings for throttled provider calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Defaults for the metric filter
    #[serde(default = "default_metrics")]
    pub metrics: RemoteDataConfig,

    /// Defaults for the log filter
    #[serde(default = "default_logs")]
    pub logs: RemoteDataConfig,
}

/// Batching settings for a remote-data filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDataConfig {
    /// Resources per unit of work
    pub batch_size: usize,

    /// Units of work in flight at once
    pub max_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            id_field: default_id_field(),
            dry_run: false,
            retry: RetryConfig::default(),
            metrics: default_metrics(),
            logs: default_logs(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.id_field.is_empty() {
            return Err(Error::config("id_field must not be empty"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts must be at least 1"));
        }
        for (name, remote) in [("metrics", &self.metrics), ("logs", &self.logs)] {
            if remote.batch_size == 0 || remote.max_workers == 0 {
                return Err(Error::config(format!(
                    "{}: batch_size and max_workers must be at least 1",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_metrics() -> RemoteDataConfig {
    RemoteDataConfig {
        batch_size: 20,
        max_workers: 10,
    }
}

fn default_logs() -> RemoteDataConfig {
    RemoteDataConfig {
        batch_size: 20,
        max_workers: 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.id_field, "id");
        assert_eq!(config.metrics.max_workers, 10);
        assert_eq!(config.logs.max_workers, 3);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let config = EngineConfig::from_yaml(
            r#"
id_field: selfLink
retry:
  max_attempts: 2
logs:
  batch_size: 5
  max_workers: 1
"#,
        )
        .unwrap();

        assert_eq!(config.id_field, "selfLink");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, 250);
        assert_eq!(config.logs.batch_size, 5);
        assert_eq!(config.metrics.batch_size, 20);
    }

    #[test]
    fn test_rejects_zero_workers() {
        let result = EngineConfig::from_yaml("metrics:\n  batch_size: 1\n  max_workers: 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
