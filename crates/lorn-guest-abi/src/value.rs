//! Tagged value records in guest linear memory.
//!
//! Every record starts with a tag byte; the remaining 7 header bytes are
//! reserved. Fixed payloads sit at offset 8, pointers at offset 16. The layout
//! is a stable wire format: guests compiled against it read these exact bytes.

use crate::codec::{encode_u64, read_bytes, read_u64, read_u8};
use crate::error::AbiError;
use crate::objects::{HostObject, ObjectTable};

pub const TAG_INT: u8 = 0;
pub const TAG_STRING: u8 = 1;
pub const TAG_NULL: u8 = 2;
pub const TAG_UNDEFINED: u8 = 3;
pub const TAG_ARRAY: u8 = 4;
pub const TAG_OBJECT: u8 = 5;

/// Bytes in a record with a single fixed payload (or none).
const FIXED_RECORD_BYTES: u64 = 16;
/// Bytes in a record carrying a length and a pointer (string, array).
const VAR_RECORD_BYTES: u64 = 24;

/// A host-side value that can cross the guest boundary.
///
/// `Float` exists only on the encode side: the source marshaller collapses
/// non-integral numbers and "no value" into the same undefined tag, and decode
/// can never tell them apart again. That conflation is part of the contract
/// and is preserved here rather than fixed.
#[derive(Debug, Clone)]
pub enum Value {
    Int(u64),
    Float(f64),
    Str(String),
    Null,
    Undefined,
    List(Vec<Value>),
    Opaque(HostObject),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Undefined, Value::Undefined) => true,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// The guest-memory surface `encode_value` writes through.
///
/// The runner implements this over a live wasm instance (allocator export plus
/// exported memory); tests implement it over a plain byte vector.
pub trait EncodeContext {
    /// Requests `size` bytes from the guest allocator, returning the record
    /// pointer. Failures must surface as [`AbiError::AllocationFailure`].
    fn alloc(&mut self, size: u64) -> Result<u64, AbiError>;

    /// Writes `bytes` into guest memory at `offset`, bounds-checked.
    fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<(), AbiError>;

    /// Registers an opaque host object, returning its fresh handle.
    fn register(&mut self, object: HostObject) -> u64;
}

/// Decodes the value record at `offset` from a snapshot of guest memory.
///
/// Arrays decode recursively in index order. Object-ref records resolve
/// through `objects` and hand back the stored host object itself, not a copy.
pub fn decode_value(mem: &[u8], objects: &ObjectTable, offset: u64) -> Result<Value, AbiError> {
    match read_u8(mem, offset)? {
        TAG_INT => Ok(Value::Int(read_u64(mem, field(offset, 1)?)?)),
        TAG_STRING => {
            let len = read_u64(mem, field(offset, 1)?)?;
            let ptr = read_u64(mem, field(offset, 2)?)?;
            let bytes = read_bytes(mem, ptr, len)?;
            match std::str::from_utf8(bytes) {
                Ok(text) => Ok(Value::Str(text.to_string())),
                Err(_) => Err(AbiError::InvalidUtf8 { offset: ptr, len }),
            }
        }
        TAG_NULL => Ok(Value::Null),
        TAG_UNDEFINED => Ok(Value::Undefined),
        TAG_ARRAY => {
            let count = read_u64(mem, field(offset, 1)?)?;
            let block = read_u64(mem, field(offset, 2)?)?;
            let mut items = Vec::new();
            for i in 0..count {
                let slot = field(block, i)?;
                let element = read_u64(mem, slot)?;
                items.push(decode_value(mem, objects, element)?);
            }
            Ok(Value::List(items))
        }
        TAG_OBJECT => {
            let handle = read_u64(mem, field(offset, 1)?)?;
            let object = objects.resolve(handle)?;
            Ok(Value::Opaque(object.clone()))
        }
        tag => Err(AbiError::UnknownTag(tag)),
    }
}

/// Encodes `value` into guest memory, returning the record pointer.
///
/// Each record is one allocation: header plus any variable payload (string
/// bytes, array pointer block) directly after it. Array elements get their own
/// records, pointed to from the block. Opaque objects register a fresh handle
/// on every call.
pub fn encode_value(cx: &mut impl EncodeContext, value: &Value) -> Result<u64, AbiError> {
    match value {
        Value::Int(n) => encode_fixed(cx, TAG_INT, *n),
        // Integral floats are indistinguishable from integers on the wire;
        // everything else shares a tag with Undefined.
        Value::Float(x) => {
            if x.fract() == 0.0 {
                encode_fixed(cx, TAG_INT, *x as i64 as u64)
            } else {
                encode_header(cx, TAG_UNDEFINED)
            }
        }
        Value::Str(s) => {
            let len = s.len() as u64;
            let record = cx.alloc(VAR_RECORD_BYTES + len)?;
            let payload = field(record, 3)?;
            let mut header = [0u8; VAR_RECORD_BYTES as usize];
            header[0] = TAG_STRING;
            header[8..16].copy_from_slice(&encode_u64(len));
            header[16..24].copy_from_slice(&encode_u64(payload));
            cx.write(record, &header)?;
            if !s.is_empty() {
                cx.write(payload, s.as_bytes())?;
            }
            Ok(record)
        }
        Value::Null => encode_header(cx, TAG_NULL),
        Value::Undefined => encode_header(cx, TAG_UNDEFINED),
        Value::List(items) => {
            let count = items.len() as u64;
            let block_bytes = count
                .checked_mul(8)
                .ok_or(AbiError::AllocationFailure(u64::MAX))?;
            let record = cx.alloc(VAR_RECORD_BYTES + block_bytes)?;
            let block = field(record, 3)?;
            let mut header = [0u8; VAR_RECORD_BYTES as usize];
            header[0] = TAG_ARRAY;
            header[8..16].copy_from_slice(&encode_u64(count));
            header[16..24].copy_from_slice(&encode_u64(block));
            cx.write(record, &header)?;
            for (i, item) in items.iter().enumerate() {
                let element = encode_value(cx, item)?;
                cx.write(field(block, i as u64)?, &encode_u64(element))?;
            }
            Ok(record)
        }
        Value::Opaque(object) => {
            let handle = cx.register(object.clone());
            encode_fixed(cx, TAG_OBJECT, handle)
        }
    }
}

/// Offset of 8-byte field `index` of the record at `base`.
fn field(base: u64, index: u64) -> Result<u64, AbiError> {
    index
        .checked_mul(8)
        .and_then(|rel| base.checked_add(rel))
        .ok_or(AbiError::MemoryFault {
            offset: base,
            len: 8,
        })
}

fn encode_fixed(cx: &mut impl EncodeContext, tag: u8, payload: u64) -> Result<u64, AbiError> {
    let record = cx.alloc(FIXED_RECORD_BYTES)?;
    let mut bytes = [0u8; FIXED_RECORD_BYTES as usize];
    bytes[0] = tag;
    bytes[8..16].copy_from_slice(&encode_u64(payload));
    cx.write(record, &bytes)?;
    Ok(record)
}

/// Tag-only records still occupy 16 bytes, but only the header is written.
fn encode_header(cx: &mut impl EncodeContext, tag: u8) -> Result<u64, AbiError> {
    let record = cx.alloc(FIXED_RECORD_BYTES)?;
    let mut bytes = [0u8; 8];
    bytes[0] = tag;
    cx.write(record, &bytes)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bump allocator over a byte vector, standing in for guest memory.
    struct FakeGuest {
        mem: Vec<u8>,
        brk: u64,
        objects: ObjectTable,
    }

    impl FakeGuest {
        fn new(size: usize) -> Self {
            FakeGuest {
                mem: vec![0; size],
                brk: 8,
                objects: ObjectTable::new(),
            }
        }

        fn round_trip(&mut self, value: &Value) -> Value {
            let ptr = encode_value(self, value).expect("encode ok");
            decode_value(&self.mem, &self.objects, ptr).expect("decode ok")
        }
    }

    impl EncodeContext for FakeGuest {
        fn alloc(&mut self, size: u64) -> Result<u64, AbiError> {
            let ptr = self.brk;
            let next = ptr.checked_add(size).ok_or(AbiError::AllocationFailure(size))?;
            if next > self.mem.len() as u64 {
                return Err(AbiError::AllocationFailure(size));
            }
            self.brk = next;
            Ok(ptr)
        }

        fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<(), AbiError> {
            crate::codec::write_bytes(&mut self.mem, offset, bytes)
        }

        fn register(&mut self, object: HostObject) -> u64 {
            self.objects.register(object)
        }
    }

    #[test]
    fn scalar_values_round_trip() {
        let mut guest = FakeGuest::new(4096);
        assert_eq!(guest.round_trip(&Value::Int(0)), Value::Int(0));
        assert_eq!(guest.round_trip(&Value::Int(u64::MAX)), Value::Int(u64::MAX));
        assert_eq!(guest.round_trip(&Value::Null), Value::Null);
        assert_eq!(guest.round_trip(&Value::Undefined), Value::Undefined);
    }

    #[test]
    fn strings_round_trip_including_multibyte() {
        let mut guest = FakeGuest::new(4096);
        for s in ["", "hello", "héllo wörld", "línea\ncon\nsaltos"] {
            assert_eq!(
                guest.round_trip(&Value::Str(s.to_string())),
                Value::Str(s.to_string())
            );
        }
    }

    #[test]
    fn string_records_use_the_documented_layout() {
        let mut guest = FakeGuest::new(4096);
        let ptr = encode_value(&mut guest, &Value::Str("abc".to_string())).expect("encode ok");
        let at = |off: u64| read_u64(&guest.mem, off).expect("in range");
        assert_eq!(read_u8(&guest.mem, ptr), Ok(TAG_STRING));
        assert_eq!(at(ptr + 8), 3, "length field");
        assert_eq!(at(ptr + 16), ptr + 24, "payload directly after the header");
        assert_eq!(&guest.mem[(ptr + 24) as usize..(ptr + 27) as usize], b"abc");
    }

    #[test]
    fn nested_lists_preserve_order() {
        let mut guest = FakeGuest::new(4096);
        let value = Value::List(vec![
            Value::Int(1),
            Value::Str("two".to_string()),
            Value::List(vec![Value::Null, Value::Int(3)]),
        ]);
        assert_eq!(guest.round_trip(&value), value);
        assert_eq!(guest.round_trip(&Value::List(vec![])), Value::List(vec![]));
    }

    #[test]
    fn integral_floats_collapse_to_integers() {
        let mut guest = FakeGuest::new(4096);
        assert_eq!(guest.round_trip(&Value::Float(7.0)), Value::Int(7));
        assert_eq!(
            guest.round_trip(&Value::Float(-2.0)),
            Value::Int((-2i64) as u64)
        );
    }

    #[test]
    fn fractional_floats_collapse_to_undefined() {
        let mut guest = FakeGuest::new(4096);
        assert_eq!(guest.round_trip(&Value::Float(2.5)), Value::Undefined);
        assert_eq!(guest.round_trip(&Value::Float(f64::NAN)), Value::Undefined);
        assert_eq!(
            guest.round_trip(&Value::Float(f64::INFINITY)),
            Value::Undefined
        );
    }

    #[test]
    fn opaque_objects_decode_to_the_same_host_value() {
        let mut guest = FakeGuest::new(4096);
        let object = HostObject::new(String::from("host side"));
        let decoded = guest.round_trip(&Value::Opaque(object.clone()));
        match decoded {
            Value::Opaque(back) => assert!(back.ptr_eq(&object)),
            other => panic!("expected opaque value, got {other:?}"),
        }
    }

    #[test]
    fn reencoding_an_object_burns_a_new_handle() {
        let mut guest = FakeGuest::new(4096);
        let object = HostObject::new(41u32);
        let first = encode_value(&mut guest, &Value::Opaque(object.clone())).expect("encode ok");
        let second = encode_value(&mut guest, &Value::Opaque(object)).expect("encode ok");
        assert_eq!(read_u64(&guest.mem, first + 8), Ok(0));
        assert_eq!(read_u64(&guest.mem, second + 8), Ok(1));
        assert_eq!(guest.objects.len(), 2);
    }

    #[test]
    fn unknown_tags_are_rejected() {
        let objects = ObjectTable::new();
        for tag in [6u8, 7, 100, 255] {
            let mut mem = vec![0u8; 32];
            mem[0] = tag;
            assert_eq!(
                decode_value(&mem, &objects, 0),
                Err(AbiError::UnknownTag(tag))
            );
        }
    }

    #[test]
    fn unbound_handles_are_rejected() {
        let objects = ObjectTable::new();
        let mut mem = vec![0u8; 32];
        mem[0] = TAG_OBJECT;
        mem[8..16].copy_from_slice(&encode_u64(3));
        assert_eq!(
            decode_value(&mem, &objects, 0),
            Err(AbiError::UnboundHandle(3))
        );
    }

    #[test]
    fn truncated_records_fault() {
        let objects = ObjectTable::new();
        let mem = [TAG_INT, 0, 0, 0, 0, 0, 0, 0, 1, 2];
        assert_eq!(
            decode_value(&mem, &objects, 0),
            Err(AbiError::MemoryFault { offset: 8, len: 8 })
        );
        assert_eq!(
            decode_value(&mem, &objects, 64),
            Err(AbiError::MemoryFault { offset: 64, len: 1 })
        );
    }

    #[test]
    fn out_of_range_string_pointers_fault() {
        let objects = ObjectTable::new();
        let mut mem = vec![0u8; 32];
        mem[0] = TAG_STRING;
        mem[8..16].copy_from_slice(&encode_u64(10));
        mem[16..24].copy_from_slice(&encode_u64(1000));
        assert_eq!(
            decode_value(&mem, &objects, 0),
            Err(AbiError::MemoryFault {
                offset: 1000,
                len: 10
            })
        );
    }

    #[test]
    fn invalid_utf8_payloads_are_a_decode_failure() {
        let objects = ObjectTable::new();
        let mut mem = vec![0u8; 32];
        mem[0] = TAG_STRING;
        mem[8..16].copy_from_slice(&encode_u64(2));
        mem[16..24].copy_from_slice(&encode_u64(24));
        mem[24] = 0xff;
        mem[25] = 0xfe;
        assert_eq!(
            decode_value(&mem, &objects, 0),
            Err(AbiError::InvalidUtf8 { offset: 24, len: 2 })
        );
    }

    #[test]
    fn allocation_failures_propagate() {
        let mut guest = FakeGuest::new(16);
        let err = encode_value(&mut guest, &Value::Str("does not fit".to_string()))
            .expect_err("allocator must refuse");
        assert_eq!(err, AbiError::AllocationFailure(24 + 12));
    }
}
