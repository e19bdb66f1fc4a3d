//! Configuration file loading for sandexec
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use tokio::sync::Semaphore;

use crate::config::{Config, ConfigError, ENV_PREFIX, IsolationMode};

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = read_config_file(path.as_ref())?;
        Self::parse_toml(&content)
    }

    /// Load configuration from a TOML file, then apply `SANDEXEC_*`
    /// environment overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = read_config_file(path.as_ref())?;
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(&content, FileFormat::Toml))
            .add_source(env_source())
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load the embedded defaults, then apply `SANDEXEC_*` environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(super::EXAMPLE_CONFIG, FileFormat::Toml))
            .add_source(env_source())
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.sandbox_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("sandbox_root is empty".to_string()));
        }
        if let Some(ref interpreter) = self.interpreter
            && interpreter.as_os_str().is_empty()
        {
            return Err(ConfigError::Invalid("interpreter is empty".to_string()));
        }
        if self.isolation == IsolationMode::UnprivilegedUser && self.sandbox_user.trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "sandbox_user is required for unprivileged_user isolation".to_string(),
            ));
        }
        if let Some(prefix) = self
            .sensitive_env_prefixes
            .iter()
            .find(|prefix| prefix.is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "sensitive env prefix {prefix:?} is empty"
            )));
        }
        if let Some(timeout) = self.timeout
            && !(timeout.is_finite() && timeout > 0.0)
        {
            return Err(ConfigError::Invalid(format!(
                "timeout must be a positive number of seconds, got {timeout}"
            )));
        }
        if let Some(timeout) = self.timeout
            && Duration::try_from_secs_f64(timeout).is_err()
        {
            return Err(ConfigError::Invalid(format!(
                "timeout of {timeout} seconds is too large"
            )));
        }
        match self.max_concurrency {
            Some(0) => {
                return Err(ConfigError::Invalid(
                    "max_concurrency must be at least 1".to_string(),
                ));
            }
            Some(limit) if limit > Semaphore::MAX_PERMITS => {
                return Err(ConfigError::Invalid(format!(
                    "max_concurrency must be at most {}, got {limit}",
                    Semaphore::MAX_PERMITS
                )));
            }
            _ => {}
        }

        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("sensitive_env_prefixes")
}
