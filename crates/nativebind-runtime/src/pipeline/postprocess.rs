//! Built-in return postprocessors: native address → managed value

use super::{PipelineError, ReturnPostprocessor, TextEncoding};
use crate::memory::{PointerManagementMode, PointerMemoryManager};
use crate::types::SemanticType;
use crate::value::{Address, Record, Value};
use std::ffi::CStr;
use std::sync::Arc;
use tracing::trace;
use widestring::U16CStr;

fn non_null_address(output: &Value, required: &SemanticType) -> Result<Address, PipelineError> {
    match output.as_address() {
        Some(address) if !address.is_null() => Ok(address),
        Some(_) => Err(PipelineError::NullPointer(*required)),
        None => Err(PipelineError::Unsupported {
            processor: "pointer postprocessor",
            got: output.type_name(),
        }),
    }
}

/// Reads a record back from a returned address
pub struct PointerToRecordPostprocessor {
    memory: Arc<PointerMemoryManager>,
    mode: PointerManagementMode,
}

impl PointerToRecordPostprocessor {
    pub fn new(memory: Arc<PointerMemoryManager>, mode: PointerManagementMode) -> Self {
        Self { memory, mode }
    }
}

impl ReturnPostprocessor for PointerToRecordPostprocessor {
    fn can_process(&self, output: &Value, required: &SemanticType) -> bool {
        output.is_address_shaped() && matches!(required, SemanticType::Record(_))
    }

    fn process(&self, output: Value, required: &SemanticType) -> Result<Value, PipelineError> {
        let SemanticType::Record(layout) = required else {
            return Err(PipelineError::Unsupported {
                processor: "pointer-to-record",
                got: output.type_name(),
            });
        };
        let address = non_null_address(&output, required)?;

        let bytes =
            unsafe { std::slice::from_raw_parts(address.as_ptr::<u8>(), layout.size) }.to_vec();
        trace!(%address, size = layout.size, mode = %self.mode, "record read from native memory");
        self.memory
            .report_pointer_call_completed(address, self.mode, self.memory.default_free_action());

        // Length always equals the layout size here
        Record::from_bytes(*layout, bytes)
            .map(Value::Record)
            .ok_or(PipelineError::NullPointer(*required))
    }
}

/// Decodes native text from a returned address
pub struct PointerToTextPostprocessor {
    memory: Arc<PointerMemoryManager>,
    mode: PointerManagementMode,
    encoding: TextEncoding,
}

impl PointerToTextPostprocessor {
    pub fn new(
        memory: Arc<PointerMemoryManager>,
        mode: PointerManagementMode,
        encoding: TextEncoding,
    ) -> Self {
        Self {
            memory,
            mode,
            encoding,
        }
    }
}

impl ReturnPostprocessor for PointerToTextPostprocessor {
    fn can_process(&self, output: &Value, required: &SemanticType) -> bool {
        output.is_address_shaped() && *required == SemanticType::Text
    }

    fn process(&self, output: Value, required: &SemanticType) -> Result<Value, PipelineError> {
        let address = non_null_address(&output, required)?;

        let decoded = match self.encoding {
            TextEncoding::Utf8 => unsafe { CStr::from_ptr(address.as_ptr()) }
                .to_str()
                .map(str::to_owned)
                .map_err(|_| PipelineError::InvalidText(self.encoding)),
            TextEncoding::Utf16 => unsafe { U16CStr::from_ptr_str(address.as_ptr::<u16>()) }
                .to_string()
                .map_err(|_| PipelineError::InvalidText(self.encoding)),
        };
        trace!(%address, encoding = %self.encoding, mode = %self.mode, "text read from native memory");

        // Report even when decoding failed so the buffer follows its mode
        self.memory
            .report_pointer_call_completed(address, self.mode, self.memory.default_free_action());

        decoded.map(Value::Text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{allocate_unmanaged, free_unmanaged, FreeAction};
    use crate::pipeline::preprocess::encode_text;
    use crate::types::RecordLayout;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct TestStruct {
        x: i32,
        y: i32,
        z: i32,
    }

    fn counting_memory() -> (Arc<PointerMemoryManager>, Arc<AtomicUsize>) {
        let frees = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&frees);
        let free: FreeAction = Arc::new(move |address| {
            counter.fetch_add(1, Ordering::SeqCst);
            free_unmanaged(address);
        });
        let memory = PointerMemoryManager::with_allocator(Arc::new(allocate_unmanaged), free);
        (Arc::new(memory), frees)
    }

    fn native_copy(bytes: &[u8]) -> Address {
        let address = allocate_unmanaged(bytes.len());
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), address.as_ptr::<u8>(), bytes.len())
        };
        address
    }

    #[test]
    fn test_pointer_to_record() {
        let (memory, frees) = counting_memory();
        let post = PointerToRecordPostprocessor::new(
            Arc::clone(&memory),
            PointerManagementMode::DestroyAfterCall,
        );
        let value = TestStruct { x: 4, y: 5, z: 6 };
        let address = native_copy(Record::from_value(&value).bytes());
        let required = SemanticType::Record(RecordLayout::of::<TestStruct>());

        assert!(post.can_process(&Value::Pointer(address), &required));
        let result = post.process(Value::Pointer(address), &required).unwrap();

        let record = match result {
            Value::Record(record) => record,
            other => panic!("expected a record, got {:?}", other),
        };
        assert_eq!(unsafe { record.read::<TestStruct>() }, Some(value));
        assert_eq!(frees.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pointer_to_record_requires_record_type() {
        let (memory, _) = counting_memory();
        let post = PointerToRecordPostprocessor::new(memory, PointerManagementMode::DoNotDestroy);

        assert!(!post.can_process(&Value::Pointer(Address::new(8)), &SemanticType::Pointer));
        assert!(!post.can_process(&Value::Int(8), &SemanticType::Record(RecordLayout::of::<u64>())));
    }

    #[test]
    fn test_null_return_is_an_error() {
        let (memory, _) = counting_memory();
        let post = PointerToTextPostprocessor::new(
            memory,
            PointerManagementMode::DoNotDestroy,
            TextEncoding::Utf8,
        );

        assert_eq!(
            post.process(Value::Pointer(Address::NULL), &SemanticType::Text),
            Err(PipelineError::NullPointer(SemanticType::Text))
        );
    }

    #[test]
    fn test_pointer_to_text_utf8() {
        let (memory, frees) = counting_memory();
        let post = PointerToTextPostprocessor::new(
            Arc::clone(&memory),
            PointerManagementMode::DestroyOnGarbageCollect,
            TextEncoding::Utf8,
        );
        let address = native_copy(&encode_text("native", TextEncoding::Utf8).unwrap());

        let result = post.process(Value::Pointer(address), &SemanticType::Text);
        assert_eq!(result, Ok(Value::Text("native".to_string())));

        assert!(memory.is_tracked(address));
        assert_eq!(frees.load(Ordering::SeqCst), 0);
        memory.garbage_collect_all();
        assert_eq!(frees.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pointer_to_text_utf16() {
        let (memory, _) = counting_memory();
        let post = PointerToTextPostprocessor::new(
            memory,
            PointerManagementMode::DestroyAfterCall,
            TextEncoding::Utf16,
        );
        let address = native_copy(&encode_text("wide ✓", TextEncoding::Utf16).unwrap());

        let result = post.process(Value::Pointer(address), &SemanticType::Text);
        assert_eq!(result, Ok(Value::Text("wide ✓".to_string())));
    }
}
