//! Runtime facade owning one resolver and one memory manager

use crate::loader::{DynamicLibraryLoader, LibraryLoader};
use crate::memory::{PointerManagementMode, PointerMemoryManager};
use crate::pipeline::TextEncoding;
use crate::resolver::{DelegateHandle, DelegateResolver, ResolveError};
use crate::router::CallRouter;
use crate::types::{CallingConvention, DelegateSignature, NativeDelegateDefinition};
use nativebind_config::Config;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Runtime construction errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid value for {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}

fn parse_setting<T>(field: &'static str, value: &str) -> Result<T, RuntimeError>
where
    T: FromStr,
    T::Err: ToString,
{
    value.parse::<T>().map_err(|e| RuntimeError::InvalidConfig {
        field,
        reason: e.to_string(),
    })
}

/// Owns the resolver and memory manager shared by every router it creates
pub struct NativeRuntime {
    resolver: Arc<DelegateResolver>,
    memory: Arc<PointerMemoryManager>,
    convention: CallingConvention,
    encoding: TextEncoding,
    argument_mode: PointerManagementMode,
    return_mode: PointerManagementMode,
}

impl NativeRuntime {
    /// Create a runtime with default call settings
    pub fn new(loader: Arc<dyn LibraryLoader>) -> Self {
        Self {
            resolver: Arc::new(DelegateResolver::with_loader(loader)),
            memory: Arc::new(PointerMemoryManager::new()),
            convention: CallingConvention::default(),
            encoding: TextEncoding::default(),
            argument_mode: PointerManagementMode::DestroyAfterCall,
            return_mode: PointerManagementMode::DoNotDestroy,
        }
    }

    /// Build loader, resolver and call defaults from merged configuration
    pub fn from_config(config: &Config) -> Result<Self, RuntimeError> {
        let loader = DynamicLibraryLoader::from_config(config);
        debug!(search_paths = loader.search_paths().len(), "runtime loader configured");

        let mut runtime = Self::new(Arc::new(loader));
        runtime.convention =
            parse_setting("calls.calling_convention", config.calling_convention())?;
        runtime.encoding = parse_setting("calls.text_encoding", config.text_encoding())?;
        runtime.argument_mode =
            parse_setting("memory.argument_pointer_mode", config.argument_pointer_mode())?;
        runtime.return_mode =
            parse_setting("memory.return_pointer_mode", config.return_pointer_mode())?;
        Ok(runtime)
    }

    pub fn resolver(&self) -> &Arc<DelegateResolver> {
        &self.resolver
    }

    pub fn memory(&self) -> &Arc<PointerMemoryManager> {
        &self.memory
    }

    pub fn calling_convention(&self) -> CallingConvention {
        self.convention
    }

    pub fn text_encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// A router for `library_name` with this runtime's defaults
    pub fn router(&self, library_name: impl Into<String>) -> CallRouter {
        CallRouter::new(
            Arc::clone(&self.resolver),
            Arc::clone(&self.memory),
            library_name,
            self.convention,
        )
        .with_builtin_chains(self.argument_mode, self.return_mode, self.encoding)
    }

    /// Resolve a function directly
    pub fn resolve(
        &self,
        library_name: &str,
        function_name: &str,
        signature: DelegateSignature,
    ) -> Result<DelegateHandle, ResolveError> {
        self.resolver.resolve(&NativeDelegateDefinition::new(
            library_name,
            function_name,
            signature,
        ))
    }
}

impl std::fmt::Debug for NativeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRuntime")
            .field("resolver", &self.resolver)
            .field("memory", &self.memory)
            .field("convention", &self.convention)
            .field("encoding", &self.encoding)
            .finish()
    }
}
