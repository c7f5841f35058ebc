//! Nativebind Runtime - call native functions from a signature
//!
//! Given a library name, an exported symbol and a type signature, this crate
//! produces an invocable handle without hand-written bindings, and manages the
//! lifecycle around it:
//! - `DelegateResolver`: cached handle construction and reference-counted library loads
//! - `pipeline`: argument preprocessors and return postprocessors
//! - `PointerMemoryManager`: tracking and sweeping of unmanaged allocations
//! - `CallRouter`: per-call-site definition, pipeline and invocation
//!
//! # Example
//!
//! ```no_run
//! use nativebind_runtime::{DynamicLibraryLoader, NativeRuntime, Value};
//! use std::sync::Arc;
//!
//! let runtime = NativeRuntime::new(Arc::new(DynamicLibraryLoader::new()));
//! let cos = runtime
//!     .resolve("m", "cos", "(double) -> double".parse().unwrap())
//!     .unwrap();
//! assert_eq!(cos.invoke(&[Value::Double(0.0)]).unwrap(), Value::Double(1.0));
//! ```
//!
//! # Safety
//!
//! Native calls run arbitrary foreign code. A signature that does not match
//! the real symbol is undefined behavior; nothing here can detect it.

/// Nativebind runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod caller;
pub mod loader;
mod marshal;
pub mod memory;
pub mod pipeline;
pub mod resolver;
pub mod router;
pub mod runtime;
pub mod types;
pub mod value;

pub use caller::{CallError, FfiSignatureMapper, Invoker, MappingError, SignatureMapper};
pub use loader::{DynamicLibraryLoader, LibraryHandle, LibraryLoader, LoadError};
pub use memory::{FreeAction, PointerManagementMode, PointerMemoryManager, ScopeState};
pub use pipeline::{
    ArgumentPreprocessor, PipelineError, PostprocessorChain, PreprocessorChain,
    ReturnPostprocessor, TextEncoding,
};
pub use resolver::{DelegateHandle, DelegateId, DelegateResolver, ResolveError};
pub use router::{ArgumentOverride, CallRouter, CallSite, CallSiteOverrides, ReturnOverride};
pub use runtime::{NativeRuntime, RuntimeError};
pub use types::{
    CallingConvention, DelegateSignature, NativeDelegateDefinition, RecordLayout, SemanticType,
    SignatureParseError,
};
pub use value::{Address, Record, Value};
