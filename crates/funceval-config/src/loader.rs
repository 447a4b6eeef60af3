//! Configuration Loader
//!
//! Handles loading configuration and applying environment overrides with proper precedence.

use crate::engine::{is_valid_level, EngineConfig};
use crate::{ConfigError, ConfigResult, CONFIG_FILE_NAME};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader
///
/// Loads configuration and merges sources with proper precedence:
/// 1. Built-in defaults - lowest priority
/// 2. Engine config (funceval.toml) - overrides defaults
/// 3. Environment variables (FUNCEVAL_*) - highest priority
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Skip environment overrides (used by tooling that wants file values only)
    ignore_env: bool,
}

/// Merged configuration result
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Engine configuration
    pub engine: EngineConfig,

    /// File the configuration was read from, if any
    pub source: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { ignore_env: false }
    }

    /// Create a loader that does not consult `FUNCEVAL_*` variables
    pub fn without_env() -> Self {
        Self { ignore_env: true }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find funceval.toml. When none is found
    /// the defaults are used.
    pub fn load_from_directory(&self, start_dir: &Path) -> ConfigResult<Config> {
        let (source, engine) = match Self::find_config_file(start_dir) {
            Some(path) => {
                let engine = EngineConfig::load_from_file(&path)?;
                (Some(path), engine)
            }
            None => (None, EngineConfig::default()),
        };

        let engine = self.apply_env_overrides(engine)?;
        Ok(Config { engine, source })
    }

    /// Load configuration from a specific file
    pub fn load_from_file(&self, config_path: &Path) -> ConfigResult<Config> {
        let engine = EngineConfig::load_from_file(config_path)?;
        let engine = self.apply_env_overrides(engine)?;

        Ok(Config {
            engine,
            source: Some(config_path.to_path_buf()),
        })
    }

    /// Find funceval.toml by walking up the directory tree
    fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
        let mut current = start_dir.to_path_buf();

        loop {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.exists() {
                return Some(candidate);
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return None,
            }
        }
    }

    /// Apply environment variable overrides to the engine config
    ///
    /// Environment variables follow the pattern: FUNCEVAL_<KEY>
    /// Example: FUNCEVAL_MAX_PARAMETERS=16
    fn apply_env_overrides(&self, config: EngineConfig) -> ConfigResult<EngineConfig> {
        if self.ignore_env {
            return Ok(config);
        }
        apply_overrides(config, |key| env::var(key).ok())
    }
}

/// Apply `FUNCEVAL_*` overrides read through `lookup`
pub fn apply_overrides<F>(mut config: EngineConfig, lookup: F) -> ConfigResult<EngineConfig>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("FUNCEVAL_MAX_PARAMETERS") {
        config.limits.max_parameters = parse_count("FUNCEVAL_MAX_PARAMETERS", &value)?;
    }

    if let Some(value) = lookup("FUNCEVAL_MAX_PARAMETER_SIZE") {
        config.limits.max_parameter_size = parse_count("FUNCEVAL_MAX_PARAMETER_SIZE", &value)?;
    }

    if let Some(value) = lookup("FUNCEVAL_MAX_TYPE_REFERENCES") {
        config.limits.max_type_references = parse_count("FUNCEVAL_MAX_TYPE_REFERENCES", &value)?;
    }

    if let Some(value) = lookup("FUNCEVAL_JOURNAL_CAPACITY") {
        config.journal.capacity = parse_count("FUNCEVAL_JOURNAL_CAPACITY", &value)?;
    }

    if let Some(value) = lookup("FUNCEVAL_LOG") {
        if !is_valid_level(&value) {
            return Err(ConfigError::InvalidValue {
                field: "FUNCEVAL_LOG".to_string(),
                reason: format!("invalid level '{}'", value),
            });
        }
        config.logging.level = value.to_ascii_lowercase();
    }

    config.validate()?;
    Ok(config)
}

fn parse_count(field: &str, value: &str) -> ConfigResult<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("'{}' is not a count: {}", value, e),
        })
}

impl Config {
    /// Check whether a funceval.toml was found
    pub fn has_file(&self) -> bool {
        self.source.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        let config_path = dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, content).unwrap();
        config_path
    }

    #[test]
    fn test_load_config_from_directory() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[limits]\nmax_parameters = 4\n");

        let config = ConfigLoader::without_env()
            .load_from_directory(temp_dir.path())
            .unwrap();

        assert_eq!(config.engine.limits.max_parameters, 4);
        assert!(config.has_file());
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[journal]\ncapacity = 3\n");

        let sub_dir = temp_dir.path().join("nested");
        fs::create_dir(&sub_dir).unwrap();

        let config = ConfigLoader::without_env()
            .load_from_directory(&sub_dir)
            .unwrap();

        assert_eq!(config.engine.journal.capacity, 3);
        assert_eq!(
            config.source.as_deref(),
            Some(temp_dir.path().join(CONFIG_FILE_NAME).as_path())
        );
    }

    #[test]
    fn test_overrides_take_precedence() {
        let vars: HashMap<&str, &str> = [
            ("FUNCEVAL_MAX_PARAMETERS", "12"),
            ("FUNCEVAL_LOG", "DEBUG"),
        ]
        .into_iter()
        .collect();

        let config = apply_overrides(EngineConfig::default(), |key| {
            vars.get(key).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.limits.max_parameters, 12);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_override_not_a_number() {
        let result = apply_overrides(EngineConfig::default(), |key| {
            (key == "FUNCEVAL_MAX_TYPE_REFERENCES").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { field, .. }) if field == "FUNCEVAL_MAX_TYPE_REFERENCES"));
    }
}
