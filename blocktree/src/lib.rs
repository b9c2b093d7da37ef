// Life of an operation:
// 1. The tree reads the root through the page cache
// 2. A cache miss reads the block from the block store and decodes it
// 3. Each node on the path is mutated as an owned copy
// 4. Every changed node is encoded, written to the block store, then cached
//
// System components:
//  - Block store (file or in-memory)
//  - Page cache
//  - Node codec
//  - B-tree engine

pub mod btree;
pub mod config;
pub mod storage;
#[cfg(test)]
mod testing;

pub use btree::{BTree, BTreeError, Key};
pub use config::{ConfigError, EngineConfig};
