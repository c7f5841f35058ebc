//! Native function calling through libffi
//!
//! Signatures are only known at runtime, so each mapping prepares a libffi
//! call interface (`Cif`) once and reuses it for every invocation.

use crate::marshal::{self, NativeSlot};
use crate::pipeline::PipelineError;
use crate::resolver::{DelegateId, ResolveError};
use crate::types::{CallingConvention, DelegateSignature, SemanticType};
use crate::value::{Address, Value};
use libffi::middle::{Arg, Cif, CodePtr};
use std::sync::Arc;
use thiserror::Error;

/// Signature mapping errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MappingError {
    #[error("calling convention '{0}' is not supported on this platform")]
    UnsupportedConvention(CallingConvention),

    #[error("parameter {index} cannot have type {ty}")]
    InvalidParameter { index: usize, ty: SemanticType },

    #[error("cannot bind a signature to a null address")]
    NullAddress,
}

/// Native call errors
#[derive(Debug, Error)]
pub enum CallError {
    #[error("expected {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    #[error("argument {index}: expected {expected}, got {got}")]
    TypeMismatch {
        index: usize,
        expected: String,
        got: &'static str,
    },

    #[error("delegate {0} has been released")]
    Released(DelegateId),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Something that can be called with managed values
pub trait Invoker: Send + Sync {
    fn invoke(&self, args: &[Value]) -> Result<Value, CallError>;
}

/// Turns a signature and a code address into an invoker
pub trait SignatureMapper: Send + Sync {
    fn map(
        &self,
        signature: &DelegateSignature,
        address: Address,
    ) -> Result<Arc<dyn Invoker>, MappingError>;
}

/// Default mapper backed by libffi
///
/// The address is trusted to point at a function with the given signature;
/// a wrong signature is undefined behavior at call time.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfiSignatureMapper;

impl FfiSignatureMapper {
    pub fn new() -> Self {
        Self
    }
}

impl SignatureMapper for FfiSignatureMapper {
    fn map(
        &self,
        signature: &DelegateSignature,
        address: Address,
    ) -> Result<Arc<dyn Invoker>, MappingError> {
        if address.is_null() {
            return Err(MappingError::NullAddress);
        }
        for (index, ty) in signature.inputs().iter().enumerate() {
            if *ty == SemanticType::Void {
                return Err(MappingError::InvalidParameter { index, ty: *ty });
            }
        }

        let mut cif = Cif::new(
            signature.inputs().iter().map(marshal::ffi_type),
            marshal::ffi_type(&signature.output()),
        );
        apply_convention(&mut cif, signature.convention())?;

        Ok(Arc::new(FfiInvoker {
            cif,
            code: CodePtr(address.as_ptr()),
            signature: signature.clone(),
        }))
    }
}

#[cfg(not(all(target_os = "windows", target_arch = "x86")))]
fn apply_convention(_cif: &mut Cif, convention: CallingConvention) -> Result<(), MappingError> {
    match convention {
        CallingConvention::Cdecl | CallingConvention::Winapi => Ok(()),
        other => Err(MappingError::UnsupportedConvention(other)),
    }
}

#[cfg(all(target_os = "windows", target_arch = "x86"))]
fn apply_convention(cif: &mut Cif, convention: CallingConvention) -> Result<(), MappingError> {
    use libffi::raw;

    let abi = match convention {
        CallingConvention::Cdecl => return Ok(()),
        CallingConvention::StdCall | CallingConvention::Winapi => raw::ffi_abi_FFI_STDCALL,
        CallingConvention::FastCall => raw::ffi_abi_FFI_FASTCALL,
        CallingConvention::ThisCall => raw::ffi_abi_FFI_THISCALL,
    };
    cif.set_abi(abi);
    Ok(())
}

/// A prepared call to one native function
pub struct FfiInvoker {
    cif: Cif,
    code: CodePtr,
    signature: DelegateSignature,
}

// Safety: the invoker only holds an immutable call interface and a code
// pointer; neither is mutated after construction.
unsafe impl Send for FfiInvoker {}
unsafe impl Sync for FfiInvoker {}

impl FfiInvoker {
    pub fn signature(&self) -> &DelegateSignature {
        &self.signature
    }

    unsafe fn call_with_signature(&self, args: &[Arg]) -> Value {
        match self.signature.output() {
            SemanticType::Void => {
                self.cif.call::<()>(self.code, args);
                Value::Void
            }
            SemanticType::Bool => Value::Bool(self.cif.call::<u8>(self.code, args) != 0),
            SemanticType::Int => Value::Int(self.cif.call::<i32>(self.code, args)),
            SemanticType::Long => Value::Long(self.cif.call::<i64>(self.code, args)),
            SemanticType::Float => Value::Float(self.cif.call::<f32>(self.code, args)),
            SemanticType::Double => Value::Double(self.cif.call::<f64>(self.code, args)),
            SemanticType::Pointer | SemanticType::Text | SemanticType::Record(_) => {
                Value::Pointer(Address::new(self.cif.call::<usize>(self.code, args)))
            }
        }
    }
}

impl Invoker for FfiInvoker {
    fn invoke(&self, args: &[Value]) -> Result<Value, CallError> {
        let params = self.signature.inputs();
        if args.len() != params.len() {
            return Err(CallError::ArityMismatch {
                expected: params.len(),
                got: args.len(),
            });
        }

        let slots = args
            .iter()
            .zip(params)
            .enumerate()
            .map(|(index, (value, ty))| marshal::to_native(index, value, ty))
            .collect::<Result<Vec<NativeSlot>, _>>()?;
        let ffi_args: Vec<Arg> = slots.iter().map(NativeSlot::as_arg).collect();

        Ok(unsafe { self.call_with_signature(&ffi_args) })
    }
}

impl std::fmt::Debug for FfiInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfiInvoker")
            .field("code", &self.code.0)
            .field("signature", &self.signature)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::raw::{c_double, c_int};

    extern "C" fn test_add(a: c_int, b: c_int) -> c_int {
        a + b
    }

    extern "C" fn test_scale(x: c_double, factor: i64) -> c_double {
        x * factor as c_double
    }

    extern "C" fn test_no_args() -> c_int {
        42
    }

    extern "C" fn test_is_positive(x: f32) -> bool {
        x > 0.0
    }

    fn map(
        f: *const (),
        inputs: Vec<SemanticType>,
        output: SemanticType,
    ) -> Result<Arc<dyn Invoker>, MappingError> {
        let sig = DelegateSignature::new(inputs, output, CallingConvention::Cdecl);
        FfiSignatureMapper.map(&sig, Address::from_ptr(f))
    }

    #[test]
    fn test_call_add() {
        let func = map(
            test_add as *const (),
            vec![SemanticType::Int, SemanticType::Int],
            SemanticType::Int,
        )
        .unwrap();

        let result = func.invoke(&[Value::Int(10), Value::Int(20)]).unwrap();
        assert_eq!(result, Value::Int(30));
    }

    #[test]
    fn test_call_with_widened_argument() {
        let func = map(
            test_scale as *const (),
            vec![SemanticType::Double, SemanticType::Long],
            SemanticType::Double,
        )
        .unwrap();

        let result = func.invoke(&[Value::Float(1.5), Value::Int(4)]).unwrap();
        assert_eq!(result, Value::Double(6.0));
    }

    #[test]
    fn test_call_no_args() {
        let func = map(test_no_args as *const (), vec![], SemanticType::Int).unwrap();
        assert_eq!(func.invoke(&[]).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_bool_return() {
        let func = map(
            test_is_positive as *const (),
            vec![SemanticType::Float],
            SemanticType::Bool,
        )
        .unwrap();

        assert_eq!(func.invoke(&[Value::Float(2.0)]).unwrap(), Value::Bool(true));
        assert_eq!(func.invoke(&[Value::Float(-2.0)]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_arity_mismatch() {
        let func = map(
            test_add as *const (),
            vec![SemanticType::Int, SemanticType::Int],
            SemanticType::Int,
        )
        .unwrap();

        let result = func.invoke(&[Value::Int(10)]);
        assert!(matches!(
            result,
            Err(CallError::ArityMismatch {
                expected: 2,
                got: 1
            })
        ));
    }

    #[test]
    fn test_null_address_rejected() {
        let sig = DelegateSignature::new(vec![], SemanticType::Void, CallingConvention::Cdecl);
        let result = FfiSignatureMapper.map(&sig, Address::NULL);
        assert!(matches!(result, Err(MappingError::NullAddress)));
    }

    #[test]
    fn test_void_parameter_rejected() {
        let result = map(
            test_no_args as *const (),
            vec![SemanticType::Int, SemanticType::Void],
            SemanticType::Int,
        );
        assert!(matches!(
            result,
            Err(MappingError::InvalidParameter { index: 1, .. })
        ));
    }

    #[cfg(not(all(target_os = "windows", target_arch = "x86")))]
    #[test]
    fn test_fastcall_unsupported_off_win32() {
        let sig = DelegateSignature::new(vec![], SemanticType::Int, CallingConvention::FastCall);
        let result = FfiSignatureMapper.map(&sig, Address::from_ptr(test_no_args as *const ()));
        assert!(matches!(
            result,
            Err(MappingError::UnsupportedConvention(CallingConvention::FastCall))
        ));
    }
}
