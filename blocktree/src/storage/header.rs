//! File header structure and serialization.
//!
//! The header occupies the first `HEADER_SIZE` bytes of a block file and
//! records the block size, the allocation counter and the tree root.

use crate::storage::block::BlockId;

/// Magic number identifying a blocktree file: "BTREEBLK"
pub const MAGIC: [u8; 8] = *b"BTREEBLK";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the header in bytes. Block 0 starts right after it.
pub const HEADER_SIZE: usize = 32;

/// Sentinel stored in place of a missing root pointer.
const NO_ROOT: u32 = u32::MAX;

/// Header field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 8;
    pub const BLOCK_SIZE: usize = 12;
    pub const NEXT_BLOCK_ID: usize = 16;
    pub const ROOT_BLOCK: usize = 20;
    pub const CHECKSUM: usize = 24;
    // 28-31: reserved
}

/// Metadata stored at the start of a block file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version number.
    pub format_version: u32,
    /// Block size in bytes.
    pub block_size: u32,
    /// Next block identifier to hand out.
    pub next_block_id: BlockId,
    /// Root block of the tree stored in this file.
    pub root_block: Option<BlockId>,
}

impl FileHeader {
    /// Create a header for a fresh file.
    #[must_use]
    pub const fn new(block_size: u32) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            block_size,
            next_block_id: 0,
            root_block: None,
        }
    }

    /// Serialize the header.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[offsets::MAGIC..offsets::MAGIC + 8].copy_from_slice(&MAGIC);
        write_u32(&mut buf, offsets::FORMAT_VERSION, self.format_version);
        write_u32(&mut buf, offsets::BLOCK_SIZE, self.block_size);
        write_u32(&mut buf, offsets::NEXT_BLOCK_ID, self.next_block_id);
        write_u32(
            &mut buf,
            offsets::ROOT_BLOCK,
            self.root_block.unwrap_or(NO_ROOT),
        );
        let checksum = crc32fast::hash(&buf[..offsets::CHECKSUM]);
        write_u32(&mut buf, offsets::CHECKSUM, checksum);
        buf
    }

    /// Deserialize a header.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Result<Self, HeaderError> {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[offsets::MAGIC..offsets::MAGIC + 8]);
        if magic != MAGIC {
            return Err(HeaderError::InvalidMagic(magic));
        }

        let expected = read_u32(buf, offsets::CHECKSUM);
        let actual = crc32fast::hash(&buf[..offsets::CHECKSUM]);
        if expected != actual {
            return Err(HeaderError::ChecksumMismatch { expected, actual });
        }

        let format_version = read_u32(buf, offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(HeaderError::UnsupportedVersion(format_version));
        }

        let root_block = match read_u32(buf, offsets::ROOT_BLOCK) {
            NO_ROOT => None,
            id => Some(id),
        };

        Ok(Self {
            format_version,
            block_size: read_u32(buf, offsets::BLOCK_SIZE),
            next_block_id: read_u32(buf, offsets::NEXT_BLOCK_ID),
            root_block,
        })
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Errors that can occur when reading a header.
#[derive(Debug)]
pub enum HeaderError {
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Header checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for HeaderError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut header = FileHeader::new(4096);
        header.next_block_id = 42;
        header.root_block = Some(7);

        let bytes = header.to_bytes();
        let restored = FileHeader::from_bytes(&bytes).expect("should parse");

        assert_eq!(restored, header);
    }

    #[test]
    fn test_header_without_root() {
        let header = FileHeader::new(512);
        let restored = FileHeader::from_bytes(&header.to_bytes()).expect("should parse");
        assert_eq!(restored.root_block, None);
        assert_eq!(restored.next_block_id, 0);
    }

    #[test]
    fn test_header_invalid_magic() {
        let mut bytes = FileHeader::new(4096).to_bytes();
        bytes[..8].copy_from_slice(b"BADMAGIC");

        let result = FileHeader::from_bytes(&bytes);
        assert!(matches!(result, Err(HeaderError::InvalidMagic(_))));
    }

    #[test]
    fn test_header_checksum_mismatch() {
        let mut bytes = FileHeader::new(4096).to_bytes();
        bytes[offsets::NEXT_BLOCK_ID] ^= 0x01;

        let result = FileHeader::from_bytes(&bytes);
        assert!(matches!(result, Err(HeaderError::ChecksumMismatch { .. })));
    }
}
