//! Managed values carried through the pipeline and into native calls

use crate::types::{RecordLayout, SemanticType};
use std::fmt;

/// Pointer-sized native address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(usize);

impl Address {
    pub const NULL: Address = Address(0);

    pub const fn new(raw: usize) -> Self {
        Address(raw)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Address(ptr as usize)
    }

    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    pub fn as_usize(self) -> usize {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for Address {
    fn from(raw: usize) -> Self {
        Address(raw)
    }
}

/// Raw bytes of a fixed-layout aggregate
///
/// Records are built from and read back into plain `#[repr(C)]` data. The
/// byte length always equals `layout.size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    layout: RecordLayout,
    bytes: Vec<u8>,
}

impl Record {
    /// Copy the bit representation of a plain-data value
    ///
    /// `T` should not contain padding; padding bytes have no defined value.
    pub fn from_value<T: Copy>(value: &T) -> Self {
        let layout = RecordLayout::of::<T>();
        let bytes = unsafe {
            std::slice::from_raw_parts(value as *const T as *const u8, layout.size).to_vec()
        };
        Self { layout, bytes }
    }

    /// Build a record from raw bytes, returning `None` if the length does not
    /// match the layout
    pub fn from_bytes(layout: RecordLayout, bytes: Vec<u8>) -> Option<Self> {
        (bytes.len() == layout.size).then_some(Self { layout, bytes })
    }

    /// Read the record back as `T`
    ///
    /// Returns `None` when the sizes differ.
    ///
    /// # Safety
    ///
    /// Every bit pattern the record may hold must be a valid `T`.
    pub unsafe fn read<T: Copy>(&self) -> Option<T> {
        if self.bytes.len() != std::mem::size_of::<T>() {
            return None;
        }
        Some(std::ptr::read_unaligned(self.bytes.as_ptr() as *const T))
    }

    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// A managed value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Text(String),
    Record(Record),
    Pointer(Address),
}

impl Value {
    /// Get the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
            Value::Record(_) => "record",
            Value::Pointer(_) => "pointer",
        }
    }

    /// The address carried by a pointer value
    pub fn as_address(&self) -> Option<Address> {
        match self {
            Value::Pointer(addr) => Some(*addr),
            _ => None,
        }
    }

    /// Whether this value's native representation is an address
    pub fn is_address_shaped(&self) -> bool {
        matches!(self, Value::Pointer(_))
    }

    /// Whether this value contradicts a declared parameter type
    ///
    /// Only records carry enough shape to check: a record whose layout differs
    /// from the declared one would be copied into a buffer of the wrong size.
    pub fn conflicts_with(&self, ty: &SemanticType) -> bool {
        matches!(
            (self, ty),
            (Value::Record(record), SemanticType::Record(layout)) if record.layout() != *layout
        )
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Long(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Double(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Record(r) => write!(f, "record[{} bytes]", r.layout().size),
            Value::Pointer(addr) => write!(f, "{}", addr),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Long(n)
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Value::Float(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Double(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

impl From<Address> for Value {
    fn from(addr: Address) -> Self {
        Value::Pointer(addr)
    }
}
