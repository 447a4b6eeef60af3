//! Engine Configuration (funceval.toml)
//!
//! Handles the settings the func-eval engine reads once at startup.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine configuration from funceval.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Limits applied to debugger-supplied request buffers
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Evaluation journal settings
    #[serde(default)]
    pub journal: JournalConfig,

    /// Log filter settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Request decoding limits
///
/// The parameter buffer is filled by the debugger, so every declared count is
/// untrusted until checked against these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct LimitsConfig {
    /// Maximum number of parameter blobs in one request
    pub max_parameters: usize,

    /// Maximum size in bytes of a single parameter blob
    pub max_parameter_size: usize,

    /// Maximum number of type references in one request
    pub max_type_references: usize,

    /// Maximum parameter buffer size the engine will allocate
    pub max_parameter_buffer: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_parameters: 256,
            max_parameter_size: 64 * 1024,
            max_type_references: 1024,
            max_parameter_buffer: 1024 * 1024,
        }
    }
}

/// Evaluation journal settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct JournalConfig {
    /// Record evaluations in memory
    pub enabled: bool,

    /// Number of entries kept before the oldest are dropped
    pub capacity: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 128,
        }
    }
}

/// Log filter settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// Default filter directive ("error", "warn", "info", "debug", "trace")
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load engine configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        Self::from_toml_str(&content, path)
    }

    /// Parse engine configuration from TOML text
    ///
    /// `origin` is only used in error messages.
    pub fn from_toml_str(content: &str, origin: &Path) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::TomlParseError {
            file: origin.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the engine configuration
    pub fn validate(&self) -> ConfigResult<()> {
        let limits = &self.limits;
        if limits.max_parameter_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                field: "limits.max_parameter_buffer".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if limits.max_parameter_size > limits.max_parameter_buffer {
            return Err(ConfigError::InvalidValue {
                field: "limits.max_parameter_size".to_string(),
                reason: format!(
                    "{} exceeds limits.max_parameter_buffer ({})",
                    limits.max_parameter_size, limits.max_parameter_buffer
                ),
            });
        }

        if self.journal.enabled && self.journal.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "journal.capacity".to_string(),
                reason: "must be greater than zero when the journal is enabled".to_string(),
            });
        }

        if !is_valid_level(&self.logging.level) {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("invalid level '{}'", self.logging.level),
            });
        }

        Ok(())
    }
}

/// Check a log level name
pub(crate) fn is_valid_level(level: &str) -> bool {
    matches!(
        level.to_ascii_lowercase().as_str(),
        "error" | "warn" | "info" | "debug" | "trace" | "off"
    )
}
