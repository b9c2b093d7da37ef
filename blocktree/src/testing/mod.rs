use crate::btree::{BTree, max_encoded_size};
use crate::storage::MemoryBlockStore;

/// Keys of the insert/search/delete scenario for a tree of minimum degree 3.
pub const SCENARIO_KEYS: &[i32] = &[
    10, 20, 30, 40, 50, 60, 70, 80, 5, 15, 25, 35, 45, 55, 65, 75, 85,
];

/// Create an empty tree over an in-memory store.
///
/// Blocks are exactly large enough for a full node, so any encoding that
/// grows past `2t-1` keys fails loudly.
pub fn memory_tree(min_degree: usize, cache_capacity: usize) -> BTree<MemoryBlockStore> {
    let store = MemoryBlockStore::new(max_encoded_size(min_degree));
    BTree::new(min_degree, store, cache_capacity).expect("create test tree")
}
