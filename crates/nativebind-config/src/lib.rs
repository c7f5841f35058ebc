//! Nativebind Configuration System
//!
//! Provides configuration management for native binding runtimes:
//! - Project configuration (nativebind.toml)
//! - Global user configuration (~/.nativebind/config.toml)
//! - Configuration precedence and merging
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Global config (~/.nativebind/config.toml)
//! 2. Project config (./nativebind.toml)
//! 3. Environment variables (NATIVEBIND_*)
//! 4. CLI flags
//!
//! # Example
//!
//! ```no_run
//! use nativebind_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("calling convention: {}", config.calling_convention());
//! ```

pub mod global;
pub mod loader;
pub mod project;

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

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Calling convention names accepted in configuration files.
pub const CALLING_CONVENTIONS: &[&str] = &["cdecl", "stdcall", "fastcall", "thiscall", "winapi"];

/// Text encodings accepted in configuration files.
pub const TEXT_ENCODINGS: &[&str] = &["utf8", "utf16"];

/// Pointer-management mode names accepted in configuration files.
pub const POINTER_MODES: &[&str] = &[
    "do-not-destroy",
    "destroy-after-call",
    "destroy-on-garbage-collect",
];

/// Check a string against a fixed set of accepted names.
pub(crate) fn validate_choice(field: &str, value: &str, accepted: &[&str]) -> ConfigResult<()> {
    if !accepted.contains(&value) {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("must be one of {}, got '{}'", accepted.join(", "), value),
        });
    }
    Ok(())
}

// Re-export main types
pub use global::GlobalConfig;
pub use loader::{Config, ConfigLoader};
pub use project::ProjectConfig;
