//! Global Configuration (~/.nativebind/config.toml)
//!
//! Handles user-level configuration stored in `~/.nativebind/config.toml`.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global user configuration from ~/.nativebind/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Library search settings shared by every project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loader: Option<GlobalLoaderConfig>,

    /// Logging preferences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Library search settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalLoaderConfig {
    /// Directories searched after project paths and before platform defaults
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_paths: Vec<PathBuf>,
}

/// Logging preferences
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log filter directive (e.g., "info" or "nativebind_runtime=debug")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl GlobalConfig {
    /// Read and validate ~/.nativebind/config.toml
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject an empty log filter
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(filter) = self.logging.as_ref().and_then(|l| l.filter.as_deref()) {
            if filter.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "logging.filter".to_string(),
                    reason: "filter cannot be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Get the global config file path (~/.nativebind/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".nativebind").join("config.toml"))
    }

    /// Get the global search paths (empty if none configured)
    pub fn search_paths(&self) -> &[PathBuf] {
        self.loader
            .as_ref()
            .map(|l| l.search_paths.as_slice())
            .unwrap_or(&[])
    }

    /// Get the log filter directive
    pub fn log_filter(&self) -> Option<&str> {
        self.logging.as_ref().and_then(|l| l.filter.as_deref())
    }

    /// Layer `other` over this config
    /// Set values in `other` win
    pub fn merge(&mut self, other: &GlobalConfig) {
        if other.loader.is_some() {
            self.loader = other.loader.clone();
        }
        if other.logging.is_some() {
            self.logging = other.logging.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_global_config() {
        let toml = r#"
[logging]
filter = "debug"
"#;

        let config: GlobalConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.log_filter(), Some("debug"));
        assert!(config.search_paths().is_empty());
    }

    #[test]
    fn test_parse_full_global_config() {
        let toml = r#"
[loader]
search_paths = ["/home/user/.local/lib"]

[logging]
filter = "nativebind_runtime=trace"
"#;

        let config: GlobalConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.search_paths(),
            &[PathBuf::from("/home/user/.local/lib")]
        );
    }

    #[test]
    fn test_empty_log_filter_rejected() {
        let config = GlobalConfig {
            logging: Some(LoggingConfig {
                filter: Some("  ".to_string()),
            }),
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_configs() {
        let mut base = GlobalConfig::default();
        let override_config = GlobalConfig {
            logging: Some(LoggingConfig {
                filter: Some("warn".to_string()),
            }),
            ..Default::default()
        };

        base.merge(&override_config);
        assert_eq!(base.log_filter(), Some("warn"));
    }
}
