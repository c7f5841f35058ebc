//! Shared fakes and native test functions for the integration tests

#![allow(dead_code)]

use nativebind_runtime::memory::allocate_unmanaged;
use nativebind_runtime::{
    Address, CallError, DelegateSignature, Invoker, LibraryHandle, LibraryLoader, LoadError,
    MappingError, SignatureMapper, Value,
};
use std::collections::HashMap;
use std::ffi::{c_char, CStr};
use std::sync::{Arc, Mutex};

/// Handle every `RecordingLoader` hands out
pub const FAKE_LIBRARY: LibraryHandle = LibraryHandle::new(0xABCD);

/// Loader that records every call and serves a fixed symbol table
pub struct RecordingLoader {
    symbols: HashMap<String, Address>,
    missing_libraries: Vec<String>,
    loads: Mutex<Vec<String>>,
    lookups: Mutex<Vec<String>>,
    unloads: Mutex<Vec<LibraryHandle>>,
}

impl RecordingLoader {
    pub fn new() -> Self {
        Self {
            symbols: HashMap::new(),
            missing_libraries: Vec::new(),
            loads: Mutex::new(Vec::new()),
            lookups: Mutex::new(Vec::new()),
            unloads: Mutex::new(Vec::new()),
        }
    }

    /// Loader exporting the `extern "C"` functions below
    pub fn with_native_functions() -> Self {
        Self::new()
            .with_symbol("native_add", Address::new(native_add as usize))
            .with_symbol("native_text_length", Address::new(native_text_length as usize))
            .with_symbol("native_greeting", Address::new(native_greeting as usize))
            .with_symbol("native_shout", Address::new(native_shout as usize))
            .with_symbol("native_sum_point", Address::new(native_sum_point as usize))
            .with_symbol("native_make_point", Address::new(native_make_point as usize))
            .with_symbol("native_identity", Address::new(native_identity as usize))
    }

    pub fn with_symbol(mut self, name: &str, address: Address) -> Self {
        self.symbols.insert(name.to_string(), address);
        self
    }

    pub fn with_missing_library(mut self, name: &str) -> Self {
        self.missing_libraries.push(name.to_string());
        self
    }

    pub fn loads(&self) -> Vec<String> {
        self.loads.lock().unwrap().clone()
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }

    pub fn unloads(&self) -> Vec<LibraryHandle> {
        self.unloads.lock().unwrap().clone()
    }
}

impl LibraryLoader for RecordingLoader {
    fn load(&self, name: &str) -> Result<LibraryHandle, LoadError> {
        if self.missing_libraries.iter().any(|missing| missing == name) {
            return Err(LoadError::LibraryNotFound(name.to_string()));
        }
        self.loads.lock().unwrap().push(name.to_string());
        Ok(FAKE_LIBRARY)
    }

    fn lookup_symbol(&self, handle: LibraryHandle, name: &str) -> Result<Address, LoadError> {
        self.lookups.lock().unwrap().push(name.to_string());
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| LoadError::SymbolNotFound {
                library: handle.to_string(),
                symbol: name.to_string(),
            })
    }

    fn unload(&self, handle: LibraryHandle) {
        self.unloads.lock().unwrap().push(handle);
    }
}

/// Invoker that records its arguments and returns their sum
pub struct SummingInvoker {
    calls: Arc<Mutex<Vec<Vec<Value>>>>,
}

impl Invoker for SummingInvoker {
    fn invoke(&self, args: &[Value]) -> Result<Value, CallError> {
        self.calls.lock().unwrap().push(args.to_vec());
        let sum = args.iter().fold(Value::Int(0), |acc, value| match (acc, value) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a + b),
            (Value::Int(a), Value::Double(b)) => Value::Double(f64::from(a) + b),
            (Value::Double(a), Value::Double(b)) => Value::Double(a + b),
            (acc, _) => acc,
        });
        Ok(sum)
    }
}

/// Mapper handing out `SummingInvoker`s; fails for signatures it is told to refuse
pub struct RecordingMapper {
    calls: Arc<Mutex<Vec<Vec<Value>>>>,
    mapped: Mutex<Vec<(DelegateSignature, Address)>>,
    refuse: Option<MappingError>,
}

impl RecordingMapper {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            mapped: Mutex::new(Vec::new()),
            refuse: None,
        }
    }

    pub fn refusing(error: MappingError) -> Self {
        Self {
            refuse: Some(error),
            ..Self::new()
        }
    }

    /// Arguments of every invocation made through mapped invokers
    pub fn calls(&self) -> Vec<Vec<Value>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mapped(&self) -> Vec<(DelegateSignature, Address)> {
        self.mapped.lock().unwrap().clone()
    }
}

impl SignatureMapper for RecordingMapper {
    fn map(
        &self,
        signature: &DelegateSignature,
        address: Address,
    ) -> Result<Arc<dyn Invoker>, MappingError> {
        if let Some(error) = &self.refuse {
            return Err(error.clone());
        }
        self.mapped
            .lock()
            .unwrap()
            .push((signature.clone(), address));
        Ok(Arc::new(SummingInvoker {
            calls: Arc::clone(&self.calls),
        }))
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

pub extern "C" fn native_add(a: i32, b: i32) -> i32 {
    a + b
}

pub extern "C" fn native_text_length(text: *const c_char) -> i32 {
    if text.is_null() {
        return -1;
    }
    unsafe { CStr::from_ptr(text) }.to_bytes().len() as i32
}

/// Returns static memory; callers must not free it
/// Hands its argument straight back, like `strcpy` returning `dest`
pub extern "C" fn native_identity(text: *mut c_char) -> *mut c_char {
    text
}

pub extern "C" fn native_greeting() -> *const c_char {
    b"hello from native\0".as_ptr().cast()
}

/// Returns a fresh unmanaged uppercase copy of `text`
pub extern "C" fn native_shout(text: *const c_char) -> *mut c_char {
    let upper = unsafe { CStr::from_ptr(text) }
        .to_string_lossy()
        .to_uppercase();
    let address = allocate_unmanaged(upper.len() + 1);
    let out = address.as_ptr::<u8>();
    unsafe {
        std::ptr::copy_nonoverlapping(upper.as_ptr(), out, upper.len());
        *out.add(upper.len()) = 0;
    }
    out.cast()
}

pub extern "C" fn native_sum_point(point: *const Point) -> i32 {
    let point = unsafe { &*point };
    point.x + point.y + point.z
}

/// Returns a fresh unmanaged point
pub extern "C" fn native_make_point(x: i32) -> *mut Point {
    let address = allocate_unmanaged(std::mem::size_of::<Point>());
    let point = address.as_ptr::<Point>();
    unsafe {
        point.write(Point {
            x,
            y: x * 2,
            z: x * 3,
        })
    };
    point
}
