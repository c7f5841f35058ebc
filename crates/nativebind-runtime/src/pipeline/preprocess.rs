//! Built-in argument preprocessors: managed value → unmanaged copy

use super::{ArgumentPreprocessor, PipelineError, TextEncoding};
use crate::memory::{PointerManagementMode, PointerMemoryManager};
use crate::value::{Address, Value};
use std::sync::Arc;
use tracing::trace;
use widestring::U16CString;

/// Copy `bytes` into a fresh unmanaged allocation
fn copy_to_unmanaged(
    memory: &PointerMemoryManager,
    bytes: &[u8],
) -> Result<Address, PipelineError> {
    let address = memory
        .allocate(bytes.len())
        .ok_or(PipelineError::AllocationFailed { size: bytes.len() })?;
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), address.as_ptr::<u8>(), bytes.len());
    }
    Ok(address)
}

/// Track a new allocation per `mode` and hand back its pointer value
fn register(
    memory: &PointerMemoryManager,
    mode: PointerManagementMode,
    address: Address,
) -> Value {
    if mode == PointerManagementMode::DestroyOnGarbageCollect {
        memory.register_with(address, memory.default_free_action());
    }
    Value::Pointer(address)
}

/// Report completion of a call that consumed a processed pointer
fn report_completed(
    memory: &PointerMemoryManager,
    mode: PointerManagementMode,
    processed: &Value,
) {
    if let Some(address) = processed.as_address() {
        memory.report_pointer_call_completed(address, mode, memory.default_free_action());
    }
}

/// Encode text as a NUL-terminated native string
pub(crate) fn encode_text(text: &str, encoding: TextEncoding) -> Result<Vec<u8>, PipelineError> {
    if let Some(position) = text.chars().position(|c| c == '\0') {
        return Err(PipelineError::InteriorNul(position));
    }
    match encoding {
        TextEncoding::Utf8 => {
            let mut bytes = Vec::with_capacity(text.len() + 1);
            bytes.extend_from_slice(text.as_bytes());
            bytes.push(0);
            Ok(bytes)
        }
        TextEncoding::Utf16 => {
            let wide = U16CString::from_str_truncate(text);
            Ok(wide
                .as_slice_with_nul()
                .iter()
                .flat_map(|unit| unit.to_ne_bytes())
                .collect())
        }
    }
}

/// Copies a record's bytes into unmanaged memory and passes the address
pub struct RecordToPointerPreprocessor {
    memory: Arc<PointerMemoryManager>,
    mode: PointerManagementMode,
}

impl RecordToPointerPreprocessor {
    pub fn new(memory: Arc<PointerMemoryManager>, mode: PointerManagementMode) -> Self {
        Self { memory, mode }
    }

    pub fn mode(&self) -> PointerManagementMode {
        self.mode
    }
}

impl ArgumentPreprocessor for RecordToPointerPreprocessor {
    fn can_process(&self, value: &Value) -> bool {
        matches!(value, Value::Record(_))
    }

    fn process(&self, value: Value) -> Result<Value, PipelineError> {
        let record = match value {
            Value::Record(record) => record,
            other => {
                return Err(PipelineError::Unsupported {
                    processor: "record-to-pointer",
                    got: other.type_name(),
                })
            }
        };

        let address = copy_to_unmanaged(&self.memory, record.bytes())?;
        trace!(%address, size = record.layout().size, mode = %self.mode, "record copied to unmanaged memory");
        Ok(register(&self.memory, self.mode, address))
    }

    fn release_processed_input(&self, processed: &Value) {
        report_completed(&self.memory, self.mode, processed);
    }
}

/// Encodes text into unmanaged memory and passes the address
pub struct TextToPointerPreprocessor {
    memory: Arc<PointerMemoryManager>,
    mode: PointerManagementMode,
    encoding: TextEncoding,
}

impl TextToPointerPreprocessor {
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

    pub fn mode(&self) -> PointerManagementMode {
        self.mode
    }
}

impl ArgumentPreprocessor for TextToPointerPreprocessor {
    fn can_process(&self, value: &Value) -> bool {
        matches!(value, Value::Text(_))
    }

    fn process(&self, value: Value) -> Result<Value, PipelineError> {
        let text = match value {
            Value::Text(text) => text,
            other => {
                return Err(PipelineError::Unsupported {
                    processor: "text-to-pointer",
                    got: other.type_name(),
                })
            }
        };

        let bytes = encode_text(&text, self.encoding)?;
        let address = copy_to_unmanaged(&self.memory, &bytes)?;
        trace!(%address, encoding = %self.encoding, mode = %self.mode, "text copied to unmanaged memory");
        Ok(register(&self.memory, self.mode, address))
    }

    fn release_processed_input(&self, processed: &Value) {
        report_completed(&self.memory, self.mode, processed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{allocate_unmanaged, free_unmanaged, FreeAction};
    use crate::value::Record;
    use std::ffi::CStr;
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

    #[test]
    fn test_record_copied_bit_for_bit() {
        let (memory, frees) = counting_memory();
        let pre = RecordToPointerPreprocessor::new(
            Arc::clone(&memory),
            PointerManagementMode::DestroyAfterCall,
        );
        let value = TestStruct { x: 1, y: 2, z: 3 };

        let processed = pre.process(Value::Record(Record::from_value(&value))).unwrap();
        let address = processed.as_address().unwrap();
        let copied = unsafe { std::ptr::read(address.as_ptr::<TestStruct>()) };
        assert_eq!(copied, value);
        assert!(!memory.has_garbage_collectible_memory());

        pre.release_processed_input(&processed);
        assert_eq!(frees.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_record_preprocessor_rejects_scalars() {
        let (memory, _) = counting_memory();
        let pre = RecordToPointerPreprocessor::new(memory, PointerManagementMode::DoNotDestroy);

        assert!(!pre.can_process(&Value::Int(3)));
        assert!(!pre.can_process(&Value::Text("t".into())));
        assert!(matches!(
            pre.process(Value::Int(3)),
            Err(PipelineError::Unsupported { got: "int", .. })
        ));
    }

    #[test]
    fn test_text_destroy_on_garbage_collect_is_tracked() {
        let (memory, frees) = counting_memory();
        let pre = TextToPointerPreprocessor::new(
            Arc::clone(&memory),
            PointerManagementMode::DestroyOnGarbageCollect,
            TextEncoding::Utf8,
        );

        let processed = pre.process(Value::Text("hello".into())).unwrap();
        let address = processed.as_address().unwrap();
        let text = unsafe { CStr::from_ptr(address.as_ptr()) };
        assert_eq!(text.to_str().unwrap(), "hello");

        pre.release_processed_input(&processed);
        assert!(memory.has_garbage_collectible_memory());
        assert_eq!(frees.load(Ordering::SeqCst), 0);

        assert_eq!(memory.garbage_collect_all(), 1);
        assert_eq!(frees.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_text_do_not_destroy_is_left_alone() {
        let (memory, frees) = counting_memory();
        let pre = TextToPointerPreprocessor::new(
            Arc::clone(&memory),
            PointerManagementMode::DoNotDestroy,
            TextEncoding::Utf8,
        );

        let processed = pre.process(Value::Text("keep".into())).unwrap();
        pre.release_processed_input(&processed);

        assert!(!memory.has_garbage_collectible_memory());
        assert_eq!(frees.load(Ordering::SeqCst), 0);
        free_unmanaged(processed.as_address().unwrap());
    }

    #[test]
    fn test_interior_nul_rejected() {
        assert_eq!(
            encode_text("ab\0c", TextEncoding::Utf8),
            Err(PipelineError::InteriorNul(2))
        );
        assert_eq!(
            encode_text("ab\0c", TextEncoding::Utf16),
            Err(PipelineError::InteriorNul(2))
        );
    }

    #[test]
    fn test_interior_nul_position_counts_chars() {
        // 'é' is two UTF-8 bytes, '𝄞' is two UTF-16 units
        for encoding in [TextEncoding::Utf8, TextEncoding::Utf16] {
            assert_eq!(
                encode_text("é𝄞\0x", encoding),
                Err(PipelineError::InteriorNul(2))
            );
        }
    }

    #[test]
    fn test_utf16_encoding_is_nul_terminated() {
        let bytes = encode_text("hé", TextEncoding::Utf16).unwrap();
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(units, vec![0x68, 0xE9, 0]);
    }
}
