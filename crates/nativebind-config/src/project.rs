//! Project Configuration (nativebind.toml)
//!
//! Handles project-level configuration stored in `nativebind.toml` at the project root.

use crate::{
    validate_choice, ConfigError, ConfigResult, CALLING_CONVENTIONS, POINTER_MODES, TEXT_ENCODINGS,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Project configuration from nativebind.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Library loading configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loader: Option<LoaderConfig>,

    /// Call-site defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calls: Option<CallsConfig>,

    /// Unmanaged memory policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryConfig>,
}

/// Library loading configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    /// Extra directories searched before the platform defaults
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_paths: Vec<PathBuf>,

    /// Library name aliases (e.g., `math = "libm.so.6"`)
    #[serde(default)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub aliases: HashMap<String, String>,
}

/// Call-site defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CallsConfig {
    /// Calling convention used when a call site does not override it (default: "cdecl")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calling_convention: Option<String>,

    /// Native string encoding for text arguments and returns (default: "utf8")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_encoding: Option<String>,
}

/// Unmanaged memory policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Mode attached to pointers created for arguments (default: "destroy-after-call")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argument_pointer_mode: Option<String>,

    /// Mode attached to pointers returned by native code (default: "do-not-destroy")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_pointer_mode: Option<String>,
}

impl ProjectConfig {
    /// Read and validate a nativebind.toml
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

    /// Reject unknown enum-like values and empty aliases
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(loader) = &self.loader {
            for (alias, target) in &loader.aliases {
                if alias.is_empty() || target.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "loader.aliases".to_string(),
                        reason: "alias names and targets cannot be empty".to_string(),
                    });
                }
            }
        }

        if let Some(calls) = &self.calls {
            if let Some(convention) = &calls.calling_convention {
                validate_choice("calls.calling_convention", convention, CALLING_CONVENTIONS)?;
            }
            if let Some(encoding) = &calls.text_encoding {
                validate_choice("calls.text_encoding", encoding, TEXT_ENCODINGS)?;
            }
        }

        if let Some(memory) = &self.memory {
            if let Some(mode) = &memory.argument_pointer_mode {
                validate_choice("memory.argument_pointer_mode", mode, POINTER_MODES)?;
            }
            if let Some(mode) = &memory.return_pointer_mode {
                validate_choice("memory.return_pointer_mode", mode, POINTER_MODES)?;
            }
        }

        Ok(())
    }

    /// Get the configured calling convention, if present
    pub fn calling_convention(&self) -> Option<&str> {
        self.calls
            .as_ref()
            .and_then(|c| c.calling_convention.as_deref())
    }

    /// Get the configured text encoding, if present
    pub fn text_encoding(&self) -> Option<&str> {
        self.calls.as_ref().and_then(|c| c.text_encoding.as_deref())
    }

    /// Get the project search paths (empty if none configured)
    pub fn search_paths(&self) -> &[PathBuf] {
        self.loader
            .as_ref()
            .map(|l| l.search_paths.as_slice())
            .unwrap_or(&[])
    }

    /// Look up a library alias
    pub fn alias(&self, name: &str) -> Option<&str> {
        self.loader
            .as_ref()
            .and_then(|l| l.aliases.get(name))
            .map(String::as_str)
    }

    /// Layer `other` over this config
    ///
    /// Search paths are appended and aliases merged; set `calls`/`memory` tables replace ours
    pub fn merge(&mut self, other: &ProjectConfig) {
        if let Some(other_loader) = &other.loader {
            let loader = self.loader.get_or_insert_with(LoaderConfig::default);
            loader
                .search_paths
                .extend(other_loader.search_paths.iter().cloned());
            loader.aliases.extend(other_loader.aliases.clone());
        }
        if other.calls.is_some() {
            self.calls = other.calls.clone();
        }
        if other.memory.is_some() {
            self.memory = other.memory.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_project_config() {
        let toml = r#"
[calls]
calling_convention = "cdecl"
"#;

        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.calling_convention(), Some("cdecl"));
        assert!(config.search_paths().is_empty());
    }

    #[test]
    fn test_parse_full_project_config() {
        let toml = r#"
[loader]
search_paths = ["native", "/opt/vendor/lib"]
aliases = { math = "libm.so.6" }

[calls]
calling_convention = "winapi"
text_encoding = "utf16"

[memory]
argument_pointer_mode = "destroy-on-garbage-collect"
return_pointer_mode = "destroy-after-call"
"#;

        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.search_paths().len(), 2);
        assert_eq!(config.alias("math"), Some("libm.so.6"));
        assert_eq!(config.text_encoding(), Some("utf16"));
    }

    #[test]
    fn test_invalid_calling_convention() {
        let config = ProjectConfig {
            calls: Some(CallsConfig {
                calling_convention: Some("pascal".to_string()),
                text_encoding: None,
            }),
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "calls.calling_convention"
        ));
    }

    #[test]
    fn test_invalid_pointer_mode() {
        let config = ProjectConfig {
            memory: Some(MemoryConfig {
                argument_pointer_mode: Some("destroy-eventually".to_string()),
                return_pointer_mode: None,
            }),
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
[calls]
convention = "cdecl"
"#;

        assert!(toml::from_str::<ProjectConfig>(toml).is_err());
    }

    #[test]
    fn test_merge_configs() {
        let mut base = ProjectConfig {
            loader: Some(LoaderConfig {
                search_paths: vec![PathBuf::from("base")],
                aliases: HashMap::new(),
            }),
            ..Default::default()
        };
        let override_config = ProjectConfig {
            loader: Some(LoaderConfig {
                search_paths: vec![PathBuf::from("extra")],
                aliases: HashMap::from([("c".to_string(), "libc.so.6".to_string())]),
            }),
            calls: Some(CallsConfig {
                calling_convention: Some("stdcall".to_string()),
                text_encoding: None,
            }),
            ..Default::default()
        };

        base.merge(&override_config);
        assert_eq!(
            base.search_paths(),
            &[PathBuf::from("base"), PathBuf::from("extra")]
        );
        assert_eq!(base.alias("c"), Some("libc.so.6"));
        assert_eq!(base.calling_convention(), Some("stdcall"));
    }
}
