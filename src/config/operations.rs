//! Config loading, validation, and conversion into session options.

use super::model::Config;
use crate::error::{Result, SidelockError};
use crate::fs::{CommandStorage, LocalStorage, Storage};
use crate::locks::Lease;
use crate::session::ProtectOptions;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable naming a config file when `--config` is not given.
pub const CONFIG_ENV: &str = "SIDELOCK_CONFIG";

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully loaded and validated config
    /// * `Err(SidelockError::Config)` - Read error, parse error, or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            SidelockError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Find and load the config: `explicit` first, then `SIDELOCK_CONFIG`,
    /// otherwise defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            tracing::debug!(config = %path.display(), "loading config");
            return Self::load(path);
        }

        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => {
                tracing::debug!(config = ?path, "loading config from {}", CONFIG_ENV);
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Parse config from a YAML string.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document deserializes as null
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| SidelockError::Config(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| SidelockError::Config(format!("failed to serialize config to YAML: {}", e)))
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - `wait_seconds` must be positive
    /// - `lease_seconds` and `max_wait_seconds` must be positive when set
    /// - `hash_chunk_kib` must be positive
    /// - `copy_command` must contain `{src}` and `{dst}`, `remove_command` must
    ///   contain `{path}`, and `remove_command` requires `copy_command`
    pub fn validate(&self) -> Result<()> {
        check_seconds("wait_seconds", self.wait_seconds)?;

        if let Some(lease) = self.lease_seconds {
            check_seconds("lease_seconds", lease)?;
        }

        if let Some(max_wait) = self.max_wait_seconds {
            check_seconds("max_wait_seconds", max_wait)?;
        }

        if self.hash_chunk_kib == 0 {
            return Err(invalid("hash_chunk_kib must be greater than 0".to_string()));
        }

        if self.remove_command.is_some() && self.copy_command.is_none() {
            return Err(invalid(
                "remove_command requires copy_command to be set".to_string(),
            ));
        }

        self.storage()?;
        Ok(())
    }

    /// The storage backend this config asks for.
    pub fn storage(&self) -> Result<Arc<dyn Storage>> {
        match &self.copy_command {
            Some(copy) => {
                let storage = CommandStorage::from_templates(copy, self.remove_command.as_deref())
                    .map_err(|e| match e {
                        SidelockError::Config(message) => invalid(message),
                        other => other,
                    })?;
                Ok(Arc::new(storage))
            }
            None => Ok(Arc::new(LocalStorage)),
        }
    }

    /// Build session options from this config.
    pub fn to_options(&self) -> Result<ProtectOptions> {
        self.validate()?;

        Ok(ProtectOptions {
            wait: Duration::from_secs_f64(self.wait_seconds),
            lease: self.lease_seconds.map(Lease::from_secs_f64),
            max_wait: self.max_wait_seconds.map(Duration::from_secs_f64),
            settle: self.settle_ms.map(Duration::from_millis),
            verify_integrity: self.verify_integrity,
            use_staging: self.use_staging,
            backup: self.backup,
            hash_chunk: self.hash_chunk_kib * 1024,
            empty_lock_polls: self.empty_lock_polls,
            scratch_dir: self.scratch_dir.clone(),
            storage: self.storage()?,
        })
    }
}

fn invalid(message: String) -> SidelockError {
    SidelockError::Config(format!("config validation failed: {}", message))
}

/// Seconds must be finite, positive, and small enough for a `Duration`.
pub(crate) fn check_seconds(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 || Duration::try_from_secs_f64(value).is_err() {
        return Err(invalid(format!(
            "{} must be a positive number of seconds (found {})",
            name, value
        )));
    }
    Ok(())
}
