//! Dynamic library loading
//!
//! `LibraryLoader` is the capability the resolver depends on. The default
//! `DynamicLibraryLoader` uses `libloading` and handles platform-specific
//! library naming conventions, configured aliases and search paths.

use crate::value::Address;
use libloading::Library;
use nativebind_config::Config;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, trace};

/// Library loading errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    /// Library file not found in search paths or by the OS loader
    #[error("library not found: {0}")]
    LibraryNotFound(String),

    /// Library was found but could not be loaded
    #[error("failed to load library '{library}': {reason}")]
    LoadFailed { library: String, reason: String },

    /// Library is open but does not export the symbol
    #[error("symbol '{symbol}' not found in library '{library}'")]
    SymbolNotFound { library: String, symbol: String },

    /// Handle was not issued by this loader or was already unloaded
    #[error("unknown library handle {0}")]
    UnknownLibrary(LibraryHandle),
}

/// Opaque loader-issued library identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LibraryHandle(u64);

impl LibraryHandle {
    pub const fn new(raw: u64) -> Self {
        LibraryHandle(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LibraryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Opens libraries, finds symbols, closes libraries
pub trait LibraryLoader: Send + Sync {
    fn load(&self, name: &str) -> Result<LibraryHandle, LoadError>;

    fn lookup_symbol(&self, handle: LibraryHandle, name: &str) -> Result<Address, LoadError>;

    fn unload(&self, handle: LibraryHandle);
}

struct LoadedLibrary {
    name: String,
    library: Library,
}

#[derive(Default)]
struct LoadedLibraries {
    libraries: HashMap<LibraryHandle, LoadedLibrary>,
    next_handle: u64,
}

/// Dynamic library loader with platform-specific path resolution
///
/// Lookup order for a name:
/// 1. Configured alias (`math` → `libm.so.6`)
/// 2. Absolute path as given
/// 3. Configured search paths, then platform defaults, trying `lib{name}.{ext}`
///    and `{name}.{ext}`
/// 4. The OS loader's own search for the name as given
///
/// # Safety
///
/// Opening a library runs its initializers in this process.
pub struct DynamicLibraryLoader {
    search_paths: Vec<PathBuf>,
    aliases: HashMap<String, String>,
    state: Mutex<LoadedLibraries>,
}

impl DynamicLibraryLoader {
    /// Loader over the platform default search paths
    pub fn new() -> Self {
        Self {
            search_paths: Self::default_search_paths(),
            aliases: HashMap::new(),
            state: Mutex::new(LoadedLibraries::default()),
        }
    }

    /// Create a loader from merged configuration
    ///
    /// Configured search paths come before the platform defaults.
    pub fn from_config(config: &Config) -> Self {
        let mut loader = Self::new();
        for path in config.search_paths().into_iter().rev() {
            loader.add_search_path(path);
        }
        if let Some(loader_config) = &config.project.loader {
            for (alias, target) in &loader_config.aliases {
                loader.add_alias(alias.clone(), target.clone());
            }
        }
        loader
    }

    /// Platform default search paths, current directory first
    ///
    /// - Linux: /usr/lib, /usr/local/lib, /lib (+ lib64 variants)
    /// - macOS: /usr/lib, /usr/local/lib, /opt/homebrew/lib
    /// - Windows: %SystemRoot%\System32
    /// - All platforms: current working directory first
    fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        #[cfg(target_os = "linux")]
        {
            paths.push(PathBuf::from("/usr/lib"));
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/lib"));

            if cfg!(target_pointer_width = "64") {
                paths.push(PathBuf::from("/usr/lib64"));
                paths.push(PathBuf::from("/lib64"));
            }
        }

        #[cfg(target_os = "macos")]
        {
            paths.push(PathBuf::from("/usr/lib"));
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/opt/homebrew/lib"));
        }

        #[cfg(target_os = "windows")]
        {
            match std::env::var("SystemRoot") {
                Ok(system_root) => paths.push(PathBuf::from(system_root).join("System32")),
                Err(_) => paths.push(PathBuf::from("C:\\Windows\\System32")),
            }
        }

        if let Ok(cwd) = std::env::current_dir() {
            paths.insert(0, cwd);
        }

        paths
    }

    /// Resolve a library name to an existing file
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        let name = self.resolve_alias(name);

        let path = Path::new(name);
        if path.is_absolute() {
            return path.exists().then(|| path.to_path_buf());
        }

        let extensions: &[&str] = if cfg!(target_os = "windows") {
            &["dll"]
        } else if cfg!(target_os = "macos") {
            &["dylib", "so"]
        } else {
            &["so"]
        };

        // Unix prefers the "lib" prefix, Windows rarely uses it
        let prefixes: &[&str] = if cfg!(target_os = "windows") {
            &["", "lib"]
        } else {
            &["lib", ""]
        };

        for search_path in &self.search_paths {
            let exact = search_path.join(name);
            if exact.is_file() {
                return Some(exact);
            }
            for prefix in prefixes {
                for ext in extensions {
                    let full_path = search_path.join(format!("{}{}.{}", prefix, name, ext));
                    if full_path.is_file() {
                        return Some(full_path);
                    }
                }
            }
        }

        None
    }

    fn resolve_alias<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Search `path` before every current search path
    pub fn add_search_path(&mut self, path: PathBuf) {
        self.search_paths.insert(0, path);
    }

    /// Map a short name onto a library file name or path
    pub fn add_alias(&mut self, alias: impl Into<String>, target: impl Into<String>) {
        self.aliases.insert(alias.into(), target.into());
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Number of libraries currently open
    pub fn loaded_count(&self) -> usize {
        self.lock().libraries.len()
    }

    fn lock(&self) -> MutexGuard<'_, LoadedLibraries> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, name: &str) -> Result<Library, LoadError> {
        // A located file can still be unloadable, e.g. a linker script named libm.so
        let mut located_failure = None;
        if let Some(path) = self.locate(name) {
            debug!(library = name, path = %path.display(), "loading library");
            match unsafe { Library::new(&path) } {
                Ok(library) => return Ok(library),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "located library failed to load");
                    located_failure = Some(e.to_string());
                }
            }
        }

        // Let the OS loader search its own paths (ld.so cache, PATH, ...)
        let target = self.resolve_alias(name);
        let candidates = [
            target.to_string(),
            libloading::library_filename(target)
                .to_string_lossy()
                .into_owned(),
        ];
        for candidate in &candidates {
            match unsafe { Library::new(candidate) } {
                Ok(library) => {
                    debug!(library = name, candidate = %candidate, "loaded library via system search");
                    return Ok(library);
                }
                Err(e) => trace!(candidate = %candidate, error = %e, "system search miss"),
            }
        }

        Err(match located_failure {
            Some(reason) => LoadError::LoadFailed {
                library: name.to_string(),
                reason,
            },
            None => LoadError::LibraryNotFound(name.to_string()),
        })
    }
}

impl Default for DynamicLibraryLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl LibraryLoader for DynamicLibraryLoader {
    fn load(&self, name: &str) -> Result<LibraryHandle, LoadError> {
        let library = self.open(name)?;

        let mut state = self.lock();
        state.next_handle += 1;
        let handle = LibraryHandle(state.next_handle);
        state.libraries.insert(
            handle,
            LoadedLibrary {
                name: name.to_string(),
                library,
            },
        );
        Ok(handle)
    }

    fn lookup_symbol(&self, handle: LibraryHandle, name: &str) -> Result<Address, LoadError> {
        let state = self.lock();
        let loaded = state
            .libraries
            .get(&handle)
            .ok_or(LoadError::UnknownLibrary(handle))?;

        let symbol_error = || LoadError::SymbolNotFound {
            library: loaded.name.clone(),
            symbol: name.to_string(),
        };

        let function: unsafe extern "C" fn() = unsafe {
            *loaded
                .library
                .get::<unsafe extern "C" fn()>(name.as_bytes())
                .map_err(|_| symbol_error())?
        };

        let address = Address::new(function as usize);
        trace!(library = %loaded.name, symbol = name, %address, "symbol resolved");
        Ok(address)
    }

    fn unload(&self, handle: LibraryHandle) {
        let removed = self.lock().libraries.remove(&handle);
        match removed {
            Some(loaded) => {
                debug!(library = %loaded.name, %handle, "unloading library");
                drop(loaded.library);
            }
            None => trace!(%handle, "unload of unknown handle ignored"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_search_paths_not_empty() {
        let paths = DynamicLibraryLoader::default_search_paths();
        assert!(!paths.is_empty());

        if let Ok(cwd) = std::env::current_dir() {
            assert_eq!(paths[0], cwd);
        }
    }

    #[test]
    fn test_add_search_path_prepends() {
        let mut loader = DynamicLibraryLoader::new();
        loader.add_search_path(PathBuf::from("/custom/path"));
        assert_eq!(loader.search_paths()[0], PathBuf::from("/custom/path"));
    }

    #[test]
    fn test_locate_uses_platform_naming() {
        let temp_dir = TempDir::new().unwrap();
        let file_name = libloading::library_filename("widget");
        let expected = temp_dir.path().join(&file_name);
        fs::write(&expected, b"").unwrap();

        let mut loader = DynamicLibraryLoader::new();
        loader.add_search_path(temp_dir.path().to_path_buf());

        assert_eq!(loader.locate("widget"), Some(expected));
    }

    #[test]
    fn test_locate_resolves_alias() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("vendor-widget.bin");
        fs::write(&target, b"").unwrap();

        let mut loader = DynamicLibraryLoader::new();
        loader.add_alias("widget", target.to_string_lossy());

        assert_eq!(loader.locate("widget"), Some(target));
    }

    #[test]
    fn test_load_nonexistent_library() {
        let loader = DynamicLibraryLoader::new();
        let result = loader.load("nonexistent_library_xyz_123");
        assert!(matches!(result, Err(LoadError::LibraryNotFound(_))));
        assert_eq!(loader.loaded_count(), 0);
    }

    #[test]
    fn test_located_file_that_is_not_a_library() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(libloading::library_filename("notalib_xyz")),
            b"not a library",
        )
        .unwrap();

        let mut loader = DynamicLibraryLoader::new();
        loader.add_search_path(temp_dir.path().to_path_buf());

        assert!(matches!(
            loader.load("notalib_xyz"),
            Err(LoadError::LoadFailed { .. })
        ));
    }

    #[test]
    fn test_lookup_on_unknown_handle() {
        let loader = DynamicLibraryLoader::new();
        let result = loader.lookup_symbol(LibraryHandle::new(99), "cos");
        assert_eq!(result, Err(LoadError::UnknownLibrary(LibraryHandle::new(99))));
    }

    #[test]
    fn test_load_error_display() {
        let err = LoadError::SymbolNotFound {
            library: "libm".to_string(),
            symbol: "nope".to_string(),
        };
        assert_eq!(err.to_string(), "symbol 'nope' not found in library 'libm'");
    }
}
