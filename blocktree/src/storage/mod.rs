//! Block storage layer.
//!
//! Fixed-size blocks addressed by a monotonic `BlockId`, plus an LRU cache of
//! decoded blocks.
//!
//! # File Format
//!
//! A block file is a 32-byte header followed by the blocks:
//!
//! - Header: magic, format version, block size, allocation counter, root
//!   pointer, CRC32 checksum
//! - Block `i`: bytes `[32 + i * block_size, 32 + (i + 1) * block_size)`
//!
//! # Usage
//!
//! ```
//! use blocktree::storage::{BlockStore, MemoryBlockStore};
//!
//! let mut store = MemoryBlockStore::new(64);
//! let block_id = store.allocate().expect("allocate");
//! store.write(block_id, b"hello").expect("write");
//!
//! let data = store.read(block_id).expect("read");
//! assert_eq!(data.len(), 64);
//! assert_eq!(&data[..5], b"hello");
//! ```

mod block;
mod file;
mod header;
mod io;
mod memory;
mod page_cache;

pub use block::{BlockId, DEFAULT_BLOCK_SIZE, pad_to_block};
pub use file::FileBlockStore;
pub use header::{FileHeader, HEADER_SIZE, HeaderError};
pub use io::{BlockStore, StorageError};
pub use memory::{FaultConfig, MemoryBlockStore, MemoryStoreStats};
pub use page_cache::{CacheStats, PageCache};
