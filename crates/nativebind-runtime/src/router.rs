//! Call routing: call-site definition → resolve → preprocess → invoke → postprocess
//!
//! A `CallSite` describes one callable operation the way the caller sees it
//! (name, managed input types, managed output type). `CallSiteOverrides` is
//! the per-site configuration: replacement library/function/signature and
//! per-argument or return pipeline bindings.

use crate::caller::CallError;
use crate::memory::{PointerManagementMode, PointerMemoryManager};
use crate::pipeline::{
    ArgumentPreprocessor, PostprocessorChain, PreprocessorChain, ReturnPostprocessor, TextEncoding,
};
use crate::resolver::DelegateResolver;
use crate::types::{CallingConvention, DelegateSignature, NativeDelegateDefinition, SemanticType};
use crate::value::{Address, Value};
use std::sync::Arc;
use tracing::{debug, trace};

/// Pipeline binding for one argument position
#[derive(Clone, Default)]
pub struct ArgumentOverride {
    /// Used unconditionally when set
    pub preprocessor: Option<Arc<dyn ArgumentPreprocessor>>,
    /// Selects the built-in chain configured with this mode
    pub mode: Option<PointerManagementMode>,
}

impl ArgumentOverride {
    pub fn with_preprocessor(preprocessor: Arc<dyn ArgumentPreprocessor>) -> Self {
        Self {
            preprocessor: Some(preprocessor),
            mode: None,
        }
    }

    pub fn with_mode(mode: PointerManagementMode) -> Self {
        Self {
            preprocessor: None,
            mode: Some(mode),
        }
    }
}

/// Pipeline binding for the return value
#[derive(Clone, Default)]
pub struct ReturnOverride {
    /// Used unconditionally when set
    pub postprocessor: Option<Arc<dyn ReturnPostprocessor>>,
    /// Selects the built-in chain configured with this mode
    pub mode: Option<PointerManagementMode>,
}

impl ReturnOverride {
    pub fn with_postprocessor(postprocessor: Arc<dyn ReturnPostprocessor>) -> Self {
        Self {
            postprocessor: Some(postprocessor),
            mode: None,
        }
    }

    pub fn with_mode(mode: PointerManagementMode) -> Self {
        Self {
            postprocessor: None,
            mode: Some(mode),
        }
    }
}

/// Per-call-site configuration
#[derive(Clone, Default)]
pub struct CallSiteOverrides {
    pub library_name: Option<String>,
    pub function_name: Option<String>,
    pub signature: Option<DelegateSignature>,
    /// Indexed by argument position; missing positions use the router defaults
    pub arguments: Vec<ArgumentOverride>,
    pub returns: ReturnOverride,
}

impl CallSiteOverrides {
    pub fn library(mut self, name: impl Into<String>) -> Self {
        self.library_name = Some(name.into());
        self
    }

    pub fn function(mut self, name: impl Into<String>) -> Self {
        self.function_name = Some(name.into());
        self
    }

    pub fn signature(mut self, signature: DelegateSignature) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn argument(mut self, index: usize, binding: ArgumentOverride) -> Self {
        if self.arguments.len() <= index {
            self.arguments.resize_with(index + 1, ArgumentOverride::default);
        }
        self.arguments[index] = binding;
        self
    }

    pub fn returns(mut self, binding: ReturnOverride) -> Self {
        self.returns = binding;
        self
    }
}

/// One callable operation as the caller sees it
#[derive(Clone)]
pub struct CallSite {
    pub name: String,
    pub inputs: Vec<SemanticType>,
    pub output: SemanticType,
    pub overrides: CallSiteOverrides,
}

impl CallSite {
    pub fn new(name: impl Into<String>, inputs: Vec<SemanticType>, output: SemanticType) -> Self {
        Self {
            name: name.into(),
            inputs,
            output,
            overrides: CallSiteOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: CallSiteOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Routes call-site invocations into resolved native functions
pub struct CallRouter {
    resolver: Arc<DelegateResolver>,
    memory: Arc<PointerMemoryManager>,
    library_name: String,
    convention: CallingConvention,
    encoding: TextEncoding,
    preprocessors: PreprocessorChain,
    postprocessors: PostprocessorChain,
}

impl CallRouter {
    /// Create a router using the built-in chains
    ///
    /// Arguments default to `DestroyAfterCall`, returns to `DoNotDestroy`,
    /// text to UTF-8.
    pub fn new(
        resolver: Arc<DelegateResolver>,
        memory: Arc<PointerMemoryManager>,
        library_name: impl Into<String>,
        convention: CallingConvention,
    ) -> Self {
        let encoding = TextEncoding::default();
        Self {
            preprocessors: PreprocessorChain::builtin(
                &memory,
                PointerManagementMode::DestroyAfterCall,
                encoding,
            ),
            postprocessors: PostprocessorChain::builtin(
                &memory,
                PointerManagementMode::DoNotDestroy,
                encoding,
            ),
            resolver,
            memory,
            library_name: library_name.into(),
            convention,
            encoding,
        }
    }

    /// Rebuild the built-in chains with new modes and encoding
    pub fn with_builtin_chains(
        mut self,
        argument_mode: PointerManagementMode,
        return_mode: PointerManagementMode,
        encoding: TextEncoding,
    ) -> Self {
        self.encoding = encoding;
        self.preprocessors = PreprocessorChain::builtin(&self.memory, argument_mode, encoding);
        self.postprocessors = PostprocessorChain::builtin(&self.memory, return_mode, encoding);
        self
    }

    /// Replace the argument candidates
    pub fn with_preprocessors(mut self, chain: PreprocessorChain) -> Self {
        self.preprocessors = chain;
        self
    }

    /// Replace the return candidates
    pub fn with_postprocessors(mut self, chain: PostprocessorChain) -> Self {
        self.postprocessors = chain;
        self
    }

    pub fn library_name(&self) -> &str {
        &self.library_name
    }

    pub fn memory(&self) -> &Arc<PointerMemoryManager> {
        &self.memory
    }

    pub fn resolver(&self) -> &Arc<DelegateResolver> {
        &self.resolver
    }

    /// The definition a call site resolves to; overrides win
    pub fn definition_for(&self, site: &CallSite) -> NativeDelegateDefinition {
        let overrides = &site.overrides;
        NativeDelegateDefinition::new(
            overrides
                .library_name
                .clone()
                .unwrap_or_else(|| self.library_name.clone()),
            overrides
                .function_name
                .clone()
                .unwrap_or_else(|| site.name.clone()),
            overrides.signature.clone().unwrap_or_else(|| {
                DelegateSignature::new(site.inputs.clone(), site.output, self.convention)
            }),
        )
    }

    fn preprocessor_for(
        &self,
        site: &CallSite,
        index: usize,
        value: &Value,
    ) -> Option<Arc<dyn ArgumentPreprocessor>> {
        match site.overrides.arguments.get(index) {
            Some(ArgumentOverride {
                preprocessor: Some(explicit),
                ..
            }) => Some(Arc::clone(explicit)),
            Some(ArgumentOverride {
                mode: Some(mode), ..
            }) => PreprocessorChain::builtin(&self.memory, *mode, self.encoding)
                .select(value)
                .cloned(),
            _ => self.preprocessors.select(value).cloned(),
        }
    }

    fn postprocessor_for(
        &self,
        site: &CallSite,
        output: &Value,
    ) -> Option<Arc<dyn ReturnPostprocessor>> {
        match &site.overrides.returns {
            ReturnOverride {
                postprocessor: Some(explicit),
                ..
            } => Some(Arc::clone(explicit)),
            ReturnOverride {
                mode: Some(mode), ..
            } => PostprocessorChain::builtin(&self.memory, *mode, self.encoding)
                .select(output, &site.output)
                .cloned(),
            _ => self.postprocessors.select(output, &site.output).cloned(),
        }
    }

    /// Invoke a call site with managed arguments
    ///
    /// Record arguments must match their declared layout. Every preprocessed
    /// argument is reported complete after the call, also when the native call
    /// or postprocessing failed.
    pub fn call(&self, site: &CallSite, args: Vec<Value>) -> Result<Value, CallError> {
        if args.len() != site.inputs.len() {
            return Err(CallError::ArityMismatch {
                expected: site.inputs.len(),
                got: args.len(),
            });
        }

        let definition = self.definition_for(site);
        let declared = definition.signature.inputs();
        let conflict = args.iter().enumerate().find(|(index, value)| {
            declared
                .get(*index)
                .is_some_and(|ty| value.conflicts_with(ty))
        });
        if let Some((index, value)) = conflict {
            return Err(CallError::TypeMismatch {
                index,
                expected: declared[index].display_name(),
                got: value.type_name(),
            });
        }
        let handle = self.resolver.resolve(&definition)?;
        trace!(site = %site.name, %definition, "routing call");

        let mut processed = Vec::with_capacity(args.len());
        let mut used: Vec<(usize, Arc<dyn ArgumentPreprocessor>)> = Vec::new();
        for (index, value) in args.into_iter().enumerate() {
            let Some(preprocessor) = self.preprocessor_for(site, index, &value) else {
                processed.push(value);
                continue;
            };
            match preprocessor.process(value) {
                Ok(native) => {
                    processed.push(native);
                    used.push((index, preprocessor));
                }
                Err(err) => {
                    debug!(site = %site.name, index, error = %err, "argument preprocessing failed");
                    Self::release_inputs(&used, &processed, None);
                    return Err(err.into());
                }
            }
        }

        // A returned address already reported by its postprocessor
        let mut returned = None;
        let result = handle
            .invoke(&processed)
            .and_then(|output| match self.postprocessor_for(site, &output) {
                Some(postprocessor) => {
                    returned = output.as_address().filter(|address| !address.is_null());
                    Ok(postprocessor.process(output, &site.output)?)
                }
                None => Ok(output),
            });

        Self::release_inputs(&used, &processed, returned);
        result
    }

    /// Report completion of every preprocessed argument
    ///
    /// An argument the native function handed back as its return value is
    /// skipped: the return mode already decided its fate.
    fn release_inputs(
        used: &[(usize, Arc<dyn ArgumentPreprocessor>)],
        processed: &[Value],
        returned: Option<Address>,
    ) {
        for (index, preprocessor) in used {
            let Some(value) = processed.get(*index) else {
                continue;
            };
            if returned.is_some() && value.as_address() == returned {
                trace!(index, "argument returned by the call; return mode applies");
                continue;
            }
            preprocessor.release_processed_input(value);
        }
    }
}
