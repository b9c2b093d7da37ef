//! Block device abstraction.
//!
//! This module provides a `BlockStore` trait that abstracts over fixed-size
//! block storage, allowing the B-tree to run against a real file in production
//! and an in-memory store with fault injection in tests.
//!
//! # Design
//!
//! The trait is a minimal abstraction over the operations the tree needs:
//! - Block allocation and deallocation
//! - Whole-block reads and writes
//! - A durable root pointer
//! - Synchronization
//!
//! Block identifiers are handed out by a monotonic counter and are never
//! reused. Deallocation only marks a block as logically dead; the underlying
//! space is not reclaimed.

use std::path::PathBuf;

use crate::storage::block::BlockId;

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// Block was never allocated, was deallocated, or lies beyond the persisted extent.
    BlockNotFound {
        block_id: BlockId,
        next_block_id: BlockId,
    },
    /// Payload does not fit in a block.
    OversizedPayload { len: usize, block_size: usize },
    /// The file was created with a different block size.
    BlockSizeMismatch { stored: usize, requested: usize },
    /// The file header is unreadable.
    CorruptHeader(String),
    /// File already exists.
    AlreadyExists(PathBuf),
    /// All 32-bit block identifiers have been handed out.
    AddressSpaceExhausted,
    /// Injected fault for simulation.
    InjectedFault(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::BlockNotFound {
                block_id,
                next_block_id,
            } => write!(
                f,
                "block {block_id} not found (next block id: {next_block_id})"
            ),
            Self::OversizedPayload { len, block_size } => write!(
                f,
                "payload of {len} bytes exceeds block size of {block_size} bytes"
            ),
            Self::BlockSizeMismatch { stored, requested } => write!(
                f,
                "block size mismatch: file uses {stored} bytes, requested {requested} bytes"
            ),
            Self::CorruptHeader(msg) => write!(f, "corrupt header: {msg}"),
            Self::AlreadyExists(p) => write!(f, "file already exists: {}", p.display()),
            Self::AddressSpaceExhausted => write!(f, "block address space exhausted"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Abstraction over fixed-size block storage.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `allocate` never returns the same identifier twice
/// - `read` returns exactly `block_size()` bytes holding the last written content
/// - `write` rejects payloads larger than `block_size()` and zero-pads shorter ones
/// - `read`, `write` and `deallocate` fail with `BlockNotFound` for identifiers
///   that were never allocated or have been deallocated
pub trait BlockStore {
    /// Size of every block in bytes. Fixed for the lifetime of the store.
    fn block_size(&self) -> usize;

    /// The identifier the next `allocate` call will return.
    fn next_block_id(&self) -> BlockId;

    /// Allocate a fresh block identifier.
    fn allocate(&mut self) -> Result<BlockId, StorageError>;

    /// Read a whole block.
    fn read(&mut self, block_id: BlockId) -> Result<Vec<u8>, StorageError>;

    /// Write a block, zero-padding the payload to `block_size()`.
    fn write(&mut self, block_id: BlockId, data: &[u8]) -> Result<(), StorageError>;

    /// Mark a block as logically dead.
    fn deallocate(&mut self, block_id: BlockId) -> Result<(), StorageError>;

    /// The durable root pointer, if one has been recorded.
    fn root(&self) -> Option<BlockId>;

    /// Record the root pointer.
    fn set_root(&mut self, root: Option<BlockId>) -> Result<(), StorageError>;

    /// Make all previous writes durable.
    fn sync(&mut self) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let e = StorageError::BlockNotFound {
            block_id: 10,
            next_block_id: 5,
        };
        assert!(e.to_string().contains("block 10"));
        assert!(e.to_string().contains("next block id: 5"));

        let e = StorageError::OversizedPayload {
            len: 5000,
            block_size: 4096,
        };
        assert!(e.to_string().contains("5000"));
        assert!(e.to_string().contains("4096"));

        let e = StorageError::InjectedFault("test fault".to_string());
        assert!(e.to_string().contains("test fault"));
    }

    #[test]
    fn test_io_error_has_source() {
        use std::error::Error;

        let e = StorageError::from(std::io::Error::other("disk gone"));
        assert!(e.source().is_some());
        assert!(StorageError::AddressSpaceExhausted.source().is_none());
    }
}
