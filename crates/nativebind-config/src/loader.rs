//! Locating, reading and layering configuration sources

use crate::global::GlobalConfig;
use crate::project::{CallsConfig, LoaderConfig, ProjectConfig};
use crate::{validate_choice, ConfigResult, CALLING_CONVENTIONS, TEXT_ENCODINGS};
use std::env;
use std::path::{Path, PathBuf};

/// File name of the project configuration
pub const PROJECT_CONFIG_FILE: &str = "nativebind.toml";

/// Reads and layers configuration, later sources winning:
/// 1. Global config (~/.nativebind/config.toml) - lowest priority
/// 2. Project config (./nativebind.toml) - overrides global
/// 3. Environment variables (NATIVEBIND_*) - overrides project
/// 4. CLI flags, applied by the binary
pub struct ConfigLoader {
    global_config_path: Option<PathBuf>,
}

/// Effective configuration for one run
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Global configuration
    pub global: GlobalConfig,

    /// Project root directory (where nativebind.toml was found)
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use an explicit global config file instead of ~/.nativebind/config.toml
    pub fn with_global_config_path(path: impl Into<PathBuf>) -> Self {
        Self {
            global_config_path: Some(path.into()),
        }
    }

    /// Search `start_dir` and its ancestors for nativebind.toml
    ///
    /// Without a project file the project layer is empty; env overrides still apply.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;

        let global_config = self.load_global_config().unwrap_or_default();

        let project_config = self.apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Use `config_path` as the project layer
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config().unwrap_or_default();

        let project_config = self.apply_env_overrides(project_config)?;
        let project_root = config_path.parent().map(|p| p.to_path_buf());

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_CONFIG_FILE);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => {
                let path = GlobalConfig::global_config_path()?;
                self.global_config_path = Some(path.clone());
                path
            }
        };

        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        GlobalConfig::load_from_file(&path)
    }

    /// `NATIVEBIND_*` variables, validated like file values
    fn apply_env_overrides(&self, mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
        if let Ok(convention) = env::var("NATIVEBIND_CALLING_CONVENTION") {
            let convention = convention.to_lowercase();
            validate_choice(
                "NATIVEBIND_CALLING_CONVENTION",
                &convention,
                CALLING_CONVENTIONS,
            )?;
            config
                .calls
                .get_or_insert_with(CallsConfig::default)
                .calling_convention = Some(convention);
        }

        if let Ok(encoding) = env::var("NATIVEBIND_TEXT_ENCODING") {
            let encoding = encoding.to_lowercase();
            validate_choice("NATIVEBIND_TEXT_ENCODING", &encoding, TEXT_ENCODINGS)?;
            config
                .calls
                .get_or_insert_with(CallsConfig::default)
                .text_encoding = Some(encoding);
        }

        // Environment paths are searched before anything from the file
        if let Some(paths) = env::var_os("NATIVEBIND_SEARCH_PATH") {
            let loader = config.loader.get_or_insert_with(LoaderConfig::default);
            let mut merged: Vec<PathBuf> = env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            merged.append(&mut loader.search_paths);
            loader.search_paths = merged;
        }

        Ok(config)
    }

    /// Get the global configuration directory (~/.nativebind)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(crate::ConfigError::HomeNotFound)?;
        Ok(home.join(".nativebind"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Get the effective calling convention (project > default)
    pub fn calling_convention(&self) -> &str {
        self.project.calling_convention().unwrap_or("cdecl")
    }

    /// Get the effective text encoding (project > default)
    pub fn text_encoding(&self) -> &str {
        self.project.text_encoding().unwrap_or("utf8")
    }

    /// Get the mode attached to pointers created for arguments
    pub fn argument_pointer_mode(&self) -> &str {
        self.project
            .memory
            .as_ref()
            .and_then(|m| m.argument_pointer_mode.as_deref())
            .unwrap_or("destroy-after-call")
    }

    /// Get the mode attached to pointers returned by native code
    pub fn return_pointer_mode(&self) -> &str {
        self.project
            .memory
            .as_ref()
            .and_then(|m| m.return_pointer_mode.as_deref())
            .unwrap_or("do-not-destroy")
    }

    /// Get all search paths in priority order
    ///
    /// Relative project paths are resolved against the project root.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .project
            .search_paths()
            .iter()
            .map(|p| match &self.project_root {
                Some(root) if p.is_relative() => root.join(p),
                _ => p.clone(),
            })
            .collect();
        paths.extend(self.global.search_paths().iter().cloned());
        paths
    }

    /// Look up a library alias
    pub fn alias(&self, name: &str) -> Option<&str> {
        self.project.alias(name)
    }

    /// Get the log filter directive from the global config
    pub fn log_filter(&self) -> Option<&str> {
        self.global.log_filter()
    }

    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Whether a nativebind.toml was found
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }
}
