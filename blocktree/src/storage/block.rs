//! Block identifiers and constants for the storage engine.
//!
//! A block is the fixed-size unit of I/O. Every block holds at most one
//! serialized B-tree node.

use crate::storage::io::StorageError;

/// Default block size in bytes (4KB).
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// A block identifier (0-indexed, assigned by a monotonic counter).
pub type BlockId = u32;

/// Copy a payload into a zeroed buffer of exactly `block_size` bytes.
///
/// Returns `OversizedPayload` if the payload does not fit.
pub fn pad_to_block(data: &[u8], block_size: usize) -> Result<Vec<u8>, StorageError> {
    if data.len() > block_size {
        return Err(StorageError::OversizedPayload {
            len: data.len(),
            block_size,
        });
    }

    let mut block = vec![0u8; block_size];
    block[..data.len()].copy_from_slice(data);
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_short_payload() {
        let block = pad_to_block(b"abc", 8).expect("should pad");
        assert_eq!(block, vec![b'a', b'b', b'c', 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_pad_exact_payload() {
        let block = pad_to_block(&[7u8; 16], 16).expect("should fit");
        assert_eq!(block, vec![7u8; 16]);
    }

    #[test]
    fn test_pad_oversized_payload() {
        let result = pad_to_block(&[0u8; 17], 16);
        assert!(matches!(
            result,
            Err(StorageError::OversizedPayload {
                len: 17,
                block_size: 16
            })
        ));
    }
}
