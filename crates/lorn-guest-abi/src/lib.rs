//! Host side of the lorn guest value protocol.
//!
//! The guest is a compiled 64-bit WebAssembly module; every value that crosses
//! the boundary does so as a tagged record in the guest's linear memory. This
//! crate owns that wire format: the fixed-width integer codec, the tagged value
//! records, and the table of opaque host objects referenced by handle. It knows
//! nothing about the embedding runtime; the runner adapts it to live guest
//! memory through [`EncodeContext`].

mod codec;
mod error;
mod objects;
mod value;

pub use codec::{decode_u64, encode_u64, read_bytes, read_u64, read_u8, write_bytes};
pub use error::AbiError;
pub use objects::{HostObject, ObjectTable};
pub use value::{
    decode_value, encode_value, EncodeContext, Value, TAG_ARRAY, TAG_INT, TAG_NULL, TAG_OBJECT,
    TAG_STRING, TAG_UNDEFINED,
};
