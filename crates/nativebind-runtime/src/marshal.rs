//! Type marshaling - managed values ↔ libffi argument slots
//!
//! - `to_native()`: convert a `Value` into the slot libffi reads for a `SemanticType`
//! - `ffi_type()`: the libffi type descriptor of a `SemanticType`
//!
//! Text and records never reach this layer as such: the pipeline turns them
//! into addresses first. Seeing one here is a type mismatch.

use crate::caller::CallError;
use crate::types::SemanticType;
use crate::value::Value;
use libffi::middle::{Arg, Type};
use std::os::raw::c_void;

/// Storage for one marshaled argument
///
/// libffi reads arguments through pointers, so the slots must outlive the call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum NativeSlot {
    U8(u8),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Pointer(*mut c_void),
}

impl NativeSlot {
    pub(crate) fn as_arg(&self) -> Arg {
        match self {
            NativeSlot::U8(v) => Arg::new(v),
            NativeSlot::Int(v) => Arg::new(v),
            NativeSlot::Long(v) => Arg::new(v),
            NativeSlot::Float(v) => Arg::new(v),
            NativeSlot::Double(v) => Arg::new(v),
            NativeSlot::Pointer(v) => Arg::new(v),
        }
    }
}

/// libffi type descriptor for a semantic type
pub(crate) fn ffi_type(ty: &SemanticType) -> Type {
    match ty {
        SemanticType::Void => Type::void(),
        SemanticType::Bool => Type::u8(),
        SemanticType::Int => Type::i32(),
        SemanticType::Long => Type::i64(),
        SemanticType::Float => Type::f32(),
        SemanticType::Double => Type::f64(),
        SemanticType::Pointer | SemanticType::Text | SemanticType::Record(_) => Type::pointer(),
    }
}

/// Marshal the argument at `index` to its declared type
///
/// Widening is allowed (int → long, float → double); narrowing is not.
pub(crate) fn to_native(
    index: usize,
    value: &Value,
    target: &SemanticType,
) -> Result<NativeSlot, CallError> {
    match (value, target) {
        (Value::Bool(b), SemanticType::Bool) => Ok(NativeSlot::U8(u8::from(*b))),
        (Value::Int(n), SemanticType::Int) => Ok(NativeSlot::Int(*n)),
        (Value::Int(n), SemanticType::Long) => Ok(NativeSlot::Long(i64::from(*n))),
        (Value::Long(n), SemanticType::Long) => Ok(NativeSlot::Long(*n)),
        (Value::Float(n), SemanticType::Float) => Ok(NativeSlot::Float(*n)),
        (Value::Float(n), SemanticType::Double) => Ok(NativeSlot::Double(f64::from(*n))),
        (Value::Double(n), SemanticType::Double) => Ok(NativeSlot::Double(*n)),
        (
            Value::Pointer(addr),
            SemanticType::Pointer | SemanticType::Text | SemanticType::Record(_),
        ) => Ok(NativeSlot::Pointer(addr.as_ptr())),
        (value, target) => Err(CallError::TypeMismatch {
            index,
            expected: target.display_name(),
            got: value.type_name(),
        }),
    }
}
