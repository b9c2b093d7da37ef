//! Structural invariant checking.
//!
//! Walks every node reachable from the root and reports each place where the
//! persisted tree stops being a valid B-tree. Used after every operation in
//! randomized tests and once at the end of the demo run.

use std::collections::HashSet;

use crate::btree::node::Key;
use crate::btree::tree::{BTree, BTreeError, child_at};
use crate::storage::{BlockId, BlockStore};

/// A broken B-tree invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Key count outside `[min, max]` for the node's position.
    KeyCountOutOfRange {
        block_id: BlockId,
        key_count: usize,
        min: usize,
        max: usize,
    },
    /// Internal node without exactly one more child than keys, or a leaf
    /// with children.
    ChildCountMismatch {
        block_id: BlockId,
        key_count: usize,
        child_count: usize,
    },
    /// Keys not strictly ascending.
    UnsortedKeys { block_id: BlockId },
    /// Key outside the range its ancestors' separators allow.
    KeyOutOfBounds {
        block_id: BlockId,
        key: Key,
        lower: Option<Key>,
        upper: Option<Key>,
    },
    /// Leaf at a different depth from the first leaf found.
    UnevenLeafDepth {
        block_id: BlockId,
        depth: usize,
        expected: usize,
    },
    /// Child pointer to a block already reached from elsewhere, such as an
    /// ancestor. The block is not walked again.
    RevisitedBlock { block_id: BlockId, parent: BlockId },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyCountOutOfRange {
                block_id,
                key_count,
                min,
                max,
            } => write!(
                f,
                "block {block_id}: {key_count} keys, expected {min}..={max}"
            ),
            Self::ChildCountMismatch {
                block_id,
                key_count,
                child_count,
            } => write!(
                f,
                "block {block_id}: {child_count} children for {key_count} keys"
            ),
            Self::UnsortedKeys { block_id } => write!(f, "block {block_id}: keys not sorted"),
            Self::KeyOutOfBounds {
                block_id,
                key,
                lower,
                upper,
            } => write!(
                f,
                "block {block_id}: key {key} outside ({lower:?}, {upper:?})"
            ),
            Self::UnevenLeafDepth {
                block_id,
                depth,
                expected,
            } => write!(
                f,
                "block {block_id}: leaf at depth {depth}, expected {expected}"
            ),
            Self::RevisitedBlock { block_id, parent } => write!(
                f,
                "block {block_id}: reached again through a child pointer of block {parent}"
            ),
        }
    }
}

/// A node still to visit, with the exclusive key bounds set by its ancestors.
struct Pending {
    block_id: BlockId,
    depth: usize,
    lower: Option<Key>,
    upper: Option<Key>,
}

impl<S: BlockStore> BTree<S> {
    /// Check every reachable node and return all violations found.
    ///
    /// An empty result means the tree is valid. Storage and decode failures
    /// abort the walk and are returned as errors.
    pub fn verify(&mut self) -> Result<Vec<Violation>, BTreeError> {
        let t = self.min_degree();
        let max_keys = 2 * t - 1;
        let root = self.root();

        let mut violations = Vec::new();
        let mut leaf_depth = None;
        let mut visited = HashSet::from([root]);
        let mut stack = vec![Pending {
            block_id: root,
            depth: 1,
            lower: None,
            upper: None,
        }];

        while let Some(pending) = stack.pop() {
            let node = self.read_node(pending.block_id)?;
            let block_id = node.self_pointer;
            let key_count = node.keys.len();

            let min_keys = match (block_id == root, node.is_leaf) {
                (true, true) => 0,
                (true, false) => 1,
                (false, _) => t - 1,
            };
            if key_count < min_keys || key_count > max_keys {
                violations.push(Violation::KeyCountOutOfRange {
                    block_id,
                    key_count,
                    min: min_keys,
                    max: max_keys,
                });
            }

            if node.keys.windows(2).any(|pair| pair[0] >= pair[1]) {
                violations.push(Violation::UnsortedKeys { block_id });
            }

            for &key in &node.keys {
                let above = pending.lower.is_none_or(|lower| key > lower);
                let below = pending.upper.is_none_or(|upper| key < upper);
                if !above || !below {
                    violations.push(Violation::KeyOutOfBounds {
                        block_id,
                        key,
                        lower: pending.lower,
                        upper: pending.upper,
                    });
                }
            }

            if node.is_leaf {
                if !node.children.is_empty() {
                    violations.push(Violation::ChildCountMismatch {
                        block_id,
                        key_count,
                        child_count: node.children.len(),
                    });
                }
                match leaf_depth {
                    None => leaf_depth = Some(pending.depth),
                    Some(expected) if expected != pending.depth => {
                        violations.push(Violation::UnevenLeafDepth {
                            block_id,
                            depth: pending.depth,
                            expected,
                        });
                    }
                    Some(_) => {}
                }
                continue;
            }

            if node.children.len() != key_count + 1 {
                violations.push(Violation::ChildCountMismatch {
                    block_id,
                    key_count,
                    child_count: node.children.len(),
                });
                continue;
            }

            // Push in reverse so children are visited left to right.
            for idx in (0..node.children.len()).rev() {
                let child = child_at(&node, idx)?;
                if !visited.insert(child) {
                    violations.push(Violation::RevisitedBlock {
                        block_id: child,
                        parent: block_id,
                    });
                    continue;
                }
                stack.push(Pending {
                    block_id: child,
                    depth: pending.depth + 1,
                    lower: if idx == 0 {
                        pending.lower
                    } else {
                        Some(node.keys[idx - 1])
                    },
                    upper: node.keys.get(idx).copied().or(pending.upper),
                });
            }
        }

        Ok(violations)
    }
}
