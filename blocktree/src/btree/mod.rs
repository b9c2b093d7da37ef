//! Disk-backed B-tree.
//!
//! # Structure
//!
//! A B-tree of minimum degree `t` over integer keys. Every node is stored in
//! its own block and points at its children by block identifier:
//! - Internal nodes: `k` keys and `k + 1` child pointers
//! - Leaves: `k` keys and no children
//!
//! Every node except the root holds between `t-1` and `2t-1` keys. Inserts
//! split full nodes on the way down; deletes top up minimal nodes on the way
//! down by borrowing from or merging with a sibling.
//!
//! # Usage
//!
//! ```
//! use blocktree::btree::BTree;
//! use blocktree::storage::{DEFAULT_BLOCK_SIZE, MemoryBlockStore};
//!
//! let store = MemoryBlockStore::new(DEFAULT_BLOCK_SIZE);
//! let mut tree = BTree::new(3, store, 16).expect("create tree");
//!
//! for key in [10, 20, 30, 40, 50, 60] {
//!     tree.insert(key).expect("insert");
//! }
//! assert!(tree.search(40).expect("search"));
//!
//! tree.delete(40).expect("delete");
//! assert!(!tree.search(40).expect("search"));
//! assert_eq!(tree.height().expect("height"), 2);
//! ```

mod invariants;
mod node;
mod tree;

pub use invariants::Violation;
pub use node::{Key, Node, NodeError, max_encoded_size};
pub use tree::{BTree, BTreeError};
