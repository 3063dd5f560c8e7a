//! Engine configuration loading
//!
//! Settings come from an optional YAML file, then `CUSTODIAN__*`
//! environment variables (`CUSTODIAN__DRY_RUN=true`,
//! `CUSTODIAN__RETRY__MAX_ATTEMPTS=3`), then command line flags.

use std::path::Path;

use anyhow::Context;
use custodian_policy::EngineConfig;

const ENV_PREFIX: &str = "CUSTODIAN";

/// Load configuration from `path` (if given) and the environment
pub fn load(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let mut builder = ::config::Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            anyhow::bail!("configuration file {} not found", path.display());
        }
        builder = builder.add_source(::config::File::from(path));
    }

    let settings = builder
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to read configuration")?;

    let config: EngineConfig = settings
        .try_deserialize()
        .context("invalid configuration")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_defaults_without_file() {
        let config = load(None).unwrap();
        assert_eq!(config.id_field, "id");
        assert_eq!(config.metrics.batch_size, 20);
        assert_eq!(config.logs.max_workers, 3);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "id_field: selfLink\nretry:\n  max_attempts: 2\nmetrics:\n  batch_size: 5\n  max_workers: 2\n"
        )
        .unwrap();

        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.id_field, "selfLink");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, 250);
        assert_eq!(config.metrics.batch_size, 5);
        assert_eq!(config.logs.batch_size, 20);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "retry:\n  max_attempts: 0\n").unwrap();
        assert!(load(Some(file.path())).is_err());
    }

    #[test]
    fn test_missing_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("absent.yaml"))).is_err());
    }
}
