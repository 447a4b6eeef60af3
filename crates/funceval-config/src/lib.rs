//! funceval Configuration System
//!
//! Provides the configuration consumed by the func-eval engine:
//! - Request limits applied while decoding untrusted debugger buffers
//! - Evaluation journal settings
//! - Default log filter
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Engine config (`funceval.toml`, searched upward from a start directory)
//! 3. Environment variables (`FUNCEVAL_*`)
//!
//! # Example
//!
//! ```no_run
//! use funceval_config::ConfigLoader;
//! use std::path::Path;
//!
//! let loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("max parameters: {}", config.engine.limits.max_parameters);
//! ```

pub mod engine;
pub mod loader;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Name of the engine configuration file
pub const CONFIG_FILE_NAME: &str = "funceval.toml";

// Re-export main types
pub use engine::{EngineConfig, JournalConfig, LimitsConfig, LoggingConfig};
pub use loader::{Config, ConfigLoader};
