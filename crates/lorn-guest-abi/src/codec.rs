use crate::error::AbiError;

/// Encodes `n` as exactly 8 little-endian bytes.
#[inline]
pub fn encode_u64(n: u64) -> [u8; 8] {
    n.to_le_bytes()
}

/// Inverse of [`encode_u64`].
#[inline]
pub fn decode_u64(bytes: [u8; 8]) -> u64 {
    u64::from_le_bytes(bytes)
}

/// Borrows `len` bytes of guest memory starting at `offset`, bounds-checked.
pub fn read_bytes(mem: &[u8], offset: u64, len: u64) -> Result<&[u8], AbiError> {
    let fault = AbiError::MemoryFault { offset, len };
    let start = usize::try_from(offset).map_err(|_| fault)?;
    let count = usize::try_from(len).map_err(|_| fault)?;
    let end = start.checked_add(count).ok_or(fault)?;
    mem.get(start..end).ok_or(fault)
}

/// Copies `bytes` into guest memory at `offset`, bounds-checked.
pub fn write_bytes(mem: &mut [u8], offset: u64, bytes: &[u8]) -> Result<(), AbiError> {
    let fault = AbiError::MemoryFault {
        offset,
        len: bytes.len() as u64,
    };
    let start = usize::try_from(offset).map_err(|_| fault)?;
    let end = start.checked_add(bytes.len()).ok_or(fault)?;
    mem.get_mut(start..end).ok_or(fault)?.copy_from_slice(bytes);
    Ok(())
}

pub fn read_u8(mem: &[u8], offset: u64) -> Result<u8, AbiError> {
    Ok(read_bytes(mem, offset, 1)?[0])
}

pub fn read_u64(mem: &[u8], offset: u64) -> Result<u64, AbiError> {
    let bytes = read_bytes(mem, offset, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(decode_u64(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_round_trips_across_the_range() {
        for n in [0, 1, 255, 256, 0x0102_0304_0506_0708, u64::MAX - 1, u64::MAX] {
            assert_eq!(decode_u64(encode_u64(n)), n);
        }
    }

    #[test]
    fn encoding_is_little_endian() {
        assert_eq!(encode_u64(0x0102_0304_0506_0708), [8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(decode_u64([1, 0, 0, 0, 0, 0, 0, 0]), 1);
    }

    #[test]
    fn writes_are_bounds_checked() {
        let mut mem = [0u8; 16];
        assert_eq!(write_bytes(&mut mem, 8, &[1, 2, 3]), Ok(()));
        assert_eq!(&mem[8..11], &[1, 2, 3]);
        assert_eq!(
            write_bytes(&mut mem, 14, &[1, 2, 3]),
            Err(AbiError::MemoryFault { offset: 14, len: 3 })
        );
    }

    #[test]
    fn reads_are_bounds_checked() {
        let mem = [0u8; 16];
        assert_eq!(read_u64(&mem, 8), Ok(0));
        assert_eq!(
            read_u64(&mem, 9),
            Err(AbiError::MemoryFault { offset: 9, len: 8 })
        );
        assert_eq!(
            read_bytes(&mem, u64::MAX, 2),
            Err(AbiError::MemoryFault {
                offset: u64::MAX,
                len: 2
            })
        );
        assert_eq!(
            read_u8(&mem, 16),
            Err(AbiError::MemoryFault { offset: 16, len: 1 })
        );
    }
}
