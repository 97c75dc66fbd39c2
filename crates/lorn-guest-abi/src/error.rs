#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiError {
    /// A record's tag byte was outside the known value universe.
    UnknownTag(u8),
    /// An offset/length pair referenced bytes outside guest memory.
    MemoryFault { offset: u64, len: u64 },
    /// An object-ref record named a handle the table has never issued.
    UnboundHandle(u64),
    /// The guest allocator could not satisfy a request of this many bytes.
    AllocationFailure(u64),
    /// A string payload was not valid UTF-8.
    InvalidUtf8 { offset: u64, len: u64 },
}

impl std::fmt::Display for AbiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbiError::UnknownTag(tag) => write!(f, "unknown value tag: {tag}"),
            AbiError::MemoryFault { offset, len } => {
                write!(f, "memory fault: {len} bytes at offset {offset} are out of range")
            }
            AbiError::UnboundHandle(handle) => write!(f, "unbound object handle: {handle}"),
            AbiError::AllocationFailure(size) => {
                write!(f, "guest allocator failed for {size} bytes")
            }
            AbiError::InvalidUtf8 { offset, len } => {
                write!(f, "invalid UTF-8 in {len} string bytes at offset {offset}")
            }
        }
    }
}

impl std::error::Error for AbiError {}
