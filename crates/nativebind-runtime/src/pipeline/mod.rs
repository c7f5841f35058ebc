//! Value-transformation pipeline
//!
//! Argument preprocessors turn managed values into native-compatible ones
//! before a call (text and records become addresses of unmanaged copies).
//! Return postprocessors turn the native return value back into a managed
//! one after the call.
//!
//! Selection is first-applicable-wins over an ordered chain; values no
//! processor accepts pass through unmodified.

mod postprocess;
mod preprocess;

pub use postprocess::{PointerToRecordPostprocessor, PointerToTextPostprocessor};
pub use preprocess::{RecordToPointerPreprocessor, TextToPointerPreprocessor};

use crate::memory::{PointerManagementMode, PointerMemoryManager};
use crate::types::SemanticType;
use crate::value::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Pipeline errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("failed to allocate {size} bytes of unmanaged memory")]
    AllocationFailed { size: usize },

    /// Position is a char index, whatever the target encoding
    #[error("text contains an interior NUL at char {0}")]
    InteriorNul(usize),

    #[error("native code returned a null pointer where {0} was expected")]
    NullPointer(SemanticType),

    #[error("native text is not valid {0}")]
    InvalidText(TextEncoding),

    #[error("{processor} cannot process a {got} value")]
    Unsupported {
        processor: &'static str,
        got: &'static str,
    },
}

/// Native string encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextEncoding {
    /// NUL-terminated UTF-8 bytes
    #[default]
    Utf8,
    /// NUL-terminated UTF-16 code units in native byte order
    Utf16,
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextEncoding::Utf8 => f.write_str("utf8"),
            TextEncoding::Utf16 => f.write_str("utf16"),
        }
    }
}

impl FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "utf8" => Ok(TextEncoding::Utf8),
            "utf16" => Ok(TextEncoding::Utf16),
            other => Err(format!("unknown text encoding '{}'", other)),
        }
    }
}

/// Transforms one argument before the native call
pub trait ArgumentPreprocessor: Send + Sync {
    fn can_process(&self, value: &Value) -> bool;

    fn process(&self, value: Value) -> Result<Value, PipelineError>;

    /// Called once the call that consumed `processed` has completed
    fn release_processed_input(&self, processed: &Value);
}

/// Transforms the native return value after the call
pub trait ReturnPostprocessor: Send + Sync {
    fn can_process(&self, output: &Value, required: &SemanticType) -> bool;

    fn process(&self, output: Value, required: &SemanticType) -> Result<Value, PipelineError>;
}

/// Ordered argument preprocessor candidates
#[derive(Clone, Default)]
pub struct PreprocessorChain {
    candidates: Vec<Arc<dyn ArgumentPreprocessor>>,
}

impl PreprocessorChain {
    pub fn new(candidates: Vec<Arc<dyn ArgumentPreprocessor>>) -> Self {
        Self { candidates }
    }

    /// `[record-to-pointer, text-to-pointer]` with the given mode
    pub fn builtin(
        memory: &Arc<PointerMemoryManager>,
        mode: PointerManagementMode,
        encoding: TextEncoding,
    ) -> Self {
        let candidates: Vec<Arc<dyn ArgumentPreprocessor>> = vec![
            Arc::new(RecordToPointerPreprocessor::new(Arc::clone(memory), mode)),
            Arc::new(TextToPointerPreprocessor::new(
                Arc::clone(memory),
                mode,
                encoding,
            )),
        ];
        Self::new(candidates)
    }

    /// First candidate that accepts `value`
    pub fn select(&self, value: &Value) -> Option<&Arc<dyn ArgumentPreprocessor>> {
        let selected = self.candidates.iter().find(|p| p.can_process(value));
        trace!(
            value = value.type_name(),
            matched = selected.is_some(),
            "preprocessor selection"
        );
        selected
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Ordered return postprocessor candidates
#[derive(Clone, Default)]
pub struct PostprocessorChain {
    candidates: Vec<Arc<dyn ReturnPostprocessor>>,
}

impl PostprocessorChain {
    pub fn new(candidates: Vec<Arc<dyn ReturnPostprocessor>>) -> Self {
        Self { candidates }
    }

    /// `[pointer-to-record, pointer-to-text]` with the given mode
    pub fn builtin(
        memory: &Arc<PointerMemoryManager>,
        mode: PointerManagementMode,
        encoding: TextEncoding,
    ) -> Self {
        let candidates: Vec<Arc<dyn ReturnPostprocessor>> = vec![
            Arc::new(PointerToRecordPostprocessor::new(Arc::clone(memory), mode)),
            Arc::new(PointerToTextPostprocessor::new(
                Arc::clone(memory),
                mode,
                encoding,
            )),
        ];
        Self::new(candidates)
    }

    /// First candidate that accepts `output` for `required`
    pub fn select(
        &self,
        output: &Value,
        required: &SemanticType,
    ) -> Option<&Arc<dyn ReturnPostprocessor>> {
        let selected = self
            .candidates
            .iter()
            .find(|p| p.can_process(output, required));
        trace!(
            output = output.type_name(),
            %required,
            matched = selected.is_some(),
            "postprocessor selection"
        );
        selected
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl fmt::Debug for PreprocessorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PreprocessorChain({} candidates)", self.candidates.len())
    }
}

impl fmt::Debug for PostprocessorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PostprocessorChain({} candidates)", self.candidates.len())
    }
}
