//! B-tree engine over a block store.
//!
//! Every node lives in its own block and refers to its children by
//! `BlockId`. Each step of an operation reads a node (through the page
//! cache), mutates an owned copy, and writes it back to the store before
//! refreshing the cache entry.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::num::NonZeroUsize;

use tracing::{debug, info};

use crate::btree::node::{Key, Node, NodeError, max_encoded_size};
use crate::storage::{BlockId, BlockStore, CacheStats, PageCache, StorageError};

/// A B-tree of minimum degree `t` stored in a block store.
///
/// Every node except the root holds between `t-1` and `2t-1` keys.
#[derive(Debug)]
pub struct BTree<S: BlockStore> {
    store: S,
    cache: PageCache<Node>,
    min_degree: usize,
    root: BlockId,
}

impl<S: BlockStore> BTree<S> {
    /// Create an empty tree, allocating a leaf root in `store`.
    pub fn new(min_degree: usize, store: S, cache_capacity: usize) -> Result<Self, BTreeError> {
        let cache = Self::validate(min_degree, &store, cache_capacity)?;
        let mut tree = Self {
            store,
            cache,
            min_degree,
            root: 0,
        };

        let root = tree.allocate_node(true)?;
        tree.write_node(&root)?;
        tree.set_root(root.self_pointer)?;

        info!(
            min_degree,
            cache_capacity,
            root = root.self_pointer,
            "created b-tree"
        );
        Ok(tree)
    }

    /// Attach to the tree whose root is recorded in `store`.
    ///
    /// Falls back to [`BTree::new`] if the store has no root yet.
    pub fn open(min_degree: usize, store: S, cache_capacity: usize) -> Result<Self, BTreeError> {
        let Some(root) = store.root() else {
            return Self::new(min_degree, store, cache_capacity);
        };

        let cache = Self::validate(min_degree, &store, cache_capacity)?;
        let mut tree = Self {
            store,
            cache,
            min_degree,
            root,
        };

        // Fail now rather than on the first operation if the root is unreadable.
        tree.read_node(root)?;

        info!(min_degree, cache_capacity, root, "opened b-tree");
        Ok(tree)
    }

    fn validate(
        min_degree: usize,
        store: &S,
        cache_capacity: usize,
    ) -> Result<PageCache<Node>, BTreeError> {
        if min_degree < 2 {
            return Err(BTreeError::InvalidMinDegree(min_degree));
        }

        let required = max_encoded_size(min_degree);
        if store.block_size() < required {
            return Err(BTreeError::BlockSizeTooSmall {
                required,
                actual: store.block_size(),
            });
        }

        let capacity = NonZeroUsize::new(cache_capacity).ok_or(BTreeError::InvalidCacheCapacity)?;
        Ok(PageCache::new(capacity))
    }

    /// Block holding the current root.
    #[must_use]
    pub const fn root(&self) -> BlockId {
        self.root
    }

    /// Minimum degree `t`.
    #[must_use]
    pub const fn min_degree(&self) -> usize {
        self.min_degree
    }

    /// Page cache counters.
    #[must_use]
    pub const fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The underlying block store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the underlying block store.
    ///
    /// Writing blocks behind the tree's back leaves stale entries in the page
    /// cache. Intended for fault injection in tests.
    pub const fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Consume the tree, returning its block store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Flush the block store to durable media.
    pub fn sync(&mut self) -> Result<(), BTreeError> {
        self.store.sync()?;
        Ok(())
    }

    /// Check whether `key` is in the tree.
    pub fn search(&mut self, key: Key) -> Result<bool, BTreeError> {
        let mut node = self.read_node(self.root)?;
        let mut depth = 0;
        loop {
            let idx = node.find_key_index(key);
            if node.keys.get(idx) == Some(&key) {
                return Ok(true);
            }
            if node.is_leaf {
                return Ok(false);
            }
            let child = child_at(&node, idx)?;
            depth += 1;
            self.check_depth(child, depth)?;
            node = self.read_node(child)?;
        }
    }

    /// Insert `key`.
    ///
    /// Fails with [`BTreeError::DuplicateKey`] without touching the tree if
    /// the key is already present.
    pub fn insert(&mut self, key: Key) -> Result<(), BTreeError> {
        if self.search(key)? {
            return Err(BTreeError::DuplicateKey(key));
        }

        let mut root = self.read_node(self.root)?;
        if self.is_full(&root) {
            let mut new_root = self.allocate_node(false)?;
            new_root.children.push(root.self_pointer);
            self.split_child(&mut new_root, 0, &mut root)?;
            self.set_root(new_root.self_pointer)?;
            root = new_root;
        }

        self.insert_non_full(root, key)
    }

    /// Remove `key`.
    ///
    /// Fails with [`BTreeError::KeyNotFound`] if the key is absent. The tree
    /// may still have been rebalanced on the way down in that case.
    pub fn delete(&mut self, key: Key) -> Result<(), BTreeError> {
        let root = self.read_node(self.root)?;
        let result = self.delete_from(root, key);

        if matches!(result, Ok(()) | Err(BTreeError::KeyNotFound(_))) {
            self.collapse_root()?;
        }
        result
    }

    /// Number of levels. A tree whose root is a leaf has height 1.
    pub fn height(&mut self) -> Result<usize, BTreeError> {
        let mut node = self.read_node(self.root)?;
        let mut height = 1;
        while !node.is_leaf {
            let child = child_at(&node, 0)?;
            self.check_depth(child, height)?;
            node = self.read_node(child)?;
            height += 1;
        }
        Ok(height)
    }

    /// All keys in ascending order.
    pub fn keys(&mut self) -> Result<Vec<Key>, BTreeError> {
        let mut keys = Vec::new();
        let mut visited = HashSet::new();
        self.collect_keys(self.root, &mut keys, &mut visited)?;
        Ok(keys)
    }

    fn collect_keys(
        &mut self,
        block_id: BlockId,
        keys: &mut Vec<Key>,
        visited: &mut HashSet<BlockId>,
    ) -> Result<(), BTreeError> {
        let node = self.read_unvisited(block_id, visited)?;
        if node.is_leaf {
            keys.extend_from_slice(&node.keys);
            return Ok(());
        }

        for (i, &child) in node.children.iter().enumerate() {
            self.collect_keys(child, keys, visited)?;
            if let Some(&key) = node.keys.get(i) {
                keys.push(key);
            }
        }
        Ok(())
    }

    /// One line per node, children indented four spaces below their parent.
    pub fn dump(&mut self) -> Result<String, BTreeError> {
        let mut out = String::new();
        let mut visited = HashSet::new();
        self.dump_node(self.root, 0, &mut out, &mut visited)?;
        Ok(out)
    }

    fn dump_node(
        &mut self,
        block_id: BlockId,
        depth: usize,
        out: &mut String,
        visited: &mut HashSet<BlockId>,
    ) -> Result<(), BTreeError> {
        let node = self.read_unvisited(block_id, visited)?;
        let _ = writeln!(out, "{:indent$}{node}", "", indent = depth * 4);
        for &child in &node.children {
            self.dump_node(child, depth + 1, out, visited)?;
        }
        Ok(())
    }

    // Node I/O

    /// Read a node through the page cache.
    pub(crate) fn read_node(&mut self, block_id: BlockId) -> Result<Node, BTreeError> {
        if let Some(node) = self.cache.get(block_id) {
            return Ok(node);
        }

        let bytes = self.store.read(block_id)?;
        let node = Node::decode_block(&bytes, block_id)
            .map_err(|source| BTreeError::CorruptNode { block_id, source })?;
        self.cache.put(block_id, node.clone());
        Ok(node)
    }

    /// Read a node during a full traversal, failing if it was reached before.
    fn read_unvisited(
        &mut self,
        block_id: BlockId,
        visited: &mut HashSet<BlockId>,
    ) -> Result<Node, BTreeError> {
        if !visited.insert(block_id) {
            return Err(BTreeError::Inconsistent {
                block_id,
                reason: "block reachable along more than one path",
            });
        }
        self.read_node(block_id)
    }

    /// Fail if a root-to-leaf walk reaching `block_id` at `depth` must have
    /// passed through some block twice.
    fn check_depth(&self, block_id: BlockId, depth: usize) -> Result<(), BTreeError> {
        if depth >= self.store.next_block_id() as usize {
            return Err(BTreeError::Inconsistent {
                block_id,
                reason: "path from the root revisits a block",
            });
        }
        Ok(())
    }

    /// Write a node to the store, then refresh its cache entry.
    fn write_node(&mut self, node: &Node) -> Result<(), BTreeError> {
        self.store.write(node.self_pointer, &node.encode())?;
        self.cache.put(node.self_pointer, node.clone());
        Ok(())
    }

    /// Allocate a block for a new, empty node. The node is not written.
    fn allocate_node(&mut self, is_leaf: bool) -> Result<Node, BTreeError> {
        let block_id = self.store.allocate()?;
        Ok(Node::new(is_leaf, block_id))
    }

    fn free_node(&mut self, block_id: BlockId) -> Result<(), BTreeError> {
        self.cache.invalidate(block_id);
        self.store.deallocate(block_id)?;
        Ok(())
    }

    fn set_root(&mut self, block_id: BlockId) -> Result<(), BTreeError> {
        self.store.set_root(Some(block_id))?;
        debug!(old = self.root, new = block_id, "root changed");
        self.root = block_id;
        Ok(())
    }

    const fn is_full(&self, node: &Node) -> bool {
        node.keys.len() >= 2 * self.min_degree - 1
    }

    // Insert

    /// Insert into the subtree rooted at `node`, which must not be full.
    fn insert_non_full(&mut self, mut node: Node, key: Key) -> Result<(), BTreeError> {
        let mut depth = 0;
        loop {
            let idx = node.find_key_index(key);
            if node.is_leaf {
                node.keys.insert(idx, key);
                return self.write_node(&node);
            }

            let child_id = child_at(&node, idx)?;
            depth += 1;
            self.check_depth(child_id, depth)?;
            let mut child = self.read_node(child_id)?;
            if self.is_full(&child) {
                let sibling = self.split_child(&mut node, idx, &mut child)?;
                if key > node.keys[idx] {
                    child = sibling;
                }
            }
            node = child;
        }
    }

    /// Split the full `child` at `parent.children[idx]`.
    ///
    /// The upper `t-1` keys move to a new sibling, the median moves up into
    /// the parent. Returns the sibling. Child, sibling and parent are all
    /// written.
    fn split_child(
        &mut self,
        parent: &mut Node,
        idx: usize,
        child: &mut Node,
    ) -> Result<Node, BTreeError> {
        let t = self.min_degree;
        let mut sibling = self.allocate_node(child.is_leaf)?;

        sibling.keys = child.keys.split_off(t);
        let median = child.keys.pop().ok_or(BTreeError::Inconsistent {
            block_id: child.self_pointer,
            reason: "split of a node without a median",
        })?;
        if !child.is_leaf {
            sibling.children = child.children.split_off(t);
        }

        parent.keys.insert(idx, median);
        parent.children.insert(idx + 1, sibling.self_pointer);

        self.write_node(child)?;
        self.write_node(&sibling)?;
        self.write_node(parent)?;

        debug!(
            parent = parent.self_pointer,
            child = child.self_pointer,
            sibling = sibling.self_pointer,
            median,
            "split node"
        );
        Ok(sibling)
    }

    // Delete

    /// Delete `key` from the subtree rooted at `node`.
    ///
    /// Any child entered on the way down is first brought above the minimum
    /// key count, so a leaf can always give up a key.
    fn delete_from(&mut self, mut node: Node, mut key: Key) -> Result<(), BTreeError> {
        let t = self.min_degree;
        let mut depth = 0;

        loop {
            self.check_depth(node.self_pointer, depth)?;
            depth += 1;

            let idx = node.find_key_index(key);
            let found = node.keys.get(idx) == Some(&key);

            if node.is_leaf {
                if !found {
                    return Err(BTreeError::KeyNotFound(key));
                }
                node.keys.remove(idx);
                return self.write_node(&node);
            }

            if found {
                (node, key) = self.replace_internal_key(&mut node, idx, key)?;
                continue;
            }

            let child = self.read_node(child_at(&node, idx)?)?;
            node = if child.keys.len() < t {
                self.fill_child(&mut node, idx, child)?
            } else {
                child
            };
        }
    }

    /// Remove `node.keys[idx]` from an internal node.
    ///
    /// Returns the node to continue in and the key to delete from it: the
    /// predecessor or successor that replaced the key, or the key itself
    /// after merging both of its children.
    fn replace_internal_key(
        &mut self,
        node: &mut Node,
        idx: usize,
        key: Key,
    ) -> Result<(Node, Key), BTreeError> {
        let t = self.min_degree;

        let left = self.read_node(child_at(node, idx)?)?;
        if left.keys.len() >= t {
            let predecessor = self.max_key(left.self_pointer)?;
            node.keys[idx] = predecessor;
            self.write_node(node)?;
            return Ok((left, predecessor));
        }

        let right = self.read_node(child_at(node, idx + 1)?)?;
        if right.keys.len() >= t {
            let successor = self.min_key(right.self_pointer)?;
            node.keys[idx] = successor;
            self.write_node(node)?;
            return Ok((right, successor));
        }

        let merged = self.merge_children(node, idx, left, right)?;
        Ok((merged, key))
    }

    /// Largest key in the subtree rooted at `block_id`.
    fn max_key(&mut self, block_id: BlockId) -> Result<Key, BTreeError> {
        let mut node = self.read_node(block_id)?;
        let mut depth = 0;
        while !node.is_leaf {
            let last = node.children.last().copied().ok_or(BTreeError::Inconsistent {
                block_id: node.self_pointer,
                reason: "internal node without children",
            })?;
            depth += 1;
            self.check_depth(last, depth)?;
            node = self.read_node(last)?;
        }
        node.keys.last().copied().ok_or(BTreeError::Inconsistent {
            block_id: node.self_pointer,
            reason: "empty leaf below a non-empty node",
        })
    }

    /// Smallest key in the subtree rooted at `block_id`.
    fn min_key(&mut self, block_id: BlockId) -> Result<Key, BTreeError> {
        let mut node = self.read_node(block_id)?;
        let mut depth = 0;
        while !node.is_leaf {
            let first = child_at(&node, 0)?;
            depth += 1;
            self.check_depth(first, depth)?;
            node = self.read_node(first)?;
        }
        node.keys.first().copied().ok_or(BTreeError::Inconsistent {
            block_id: node.self_pointer,
            reason: "empty leaf below a non-empty node",
        })
    }

    /// Bring the minimal `child` at `parent.children[idx]` up to at least `t`
    /// keys by borrowing from a sibling or merging with one.
    ///
    /// Returns the node that now covers the child's key range.
    fn fill_child(&mut self, parent: &mut Node, idx: usize, child: Node) -> Result<Node, BTreeError> {
        let t = self.min_degree;

        if idx > 0 {
            let left = self.read_node(child_at(parent, idx - 1)?)?;
            if left.keys.len() >= t {
                return self.borrow_from_left(parent, idx, left, child);
            }
            if idx == parent.keys.len() {
                return self.merge_children(parent, idx - 1, left, child);
            }
        }

        let right = self.read_node(child_at(parent, idx + 1)?)?;
        if right.keys.len() >= t {
            return self.borrow_from_right(parent, idx, child, right);
        }
        self.merge_children(parent, idx, child, right)
    }

    /// Rotate the left sibling's last key up into the parent and the parent
    /// separator down into `child`.
    fn borrow_from_left(
        &mut self,
        parent: &mut Node,
        idx: usize,
        mut left: Node,
        mut child: Node,
    ) -> Result<Node, BTreeError> {
        let borrowed = left.keys.pop().ok_or(BTreeError::Inconsistent {
            block_id: left.self_pointer,
            reason: "left sibling has no key to lend",
        })?;
        let separator = std::mem::replace(&mut parent.keys[idx - 1], borrowed);
        child.keys.insert(0, separator);

        if !child.is_leaf {
            let moved = left.children.pop().ok_or(BTreeError::Inconsistent {
                block_id: left.self_pointer,
                reason: "left sibling has no child to lend",
            })?;
            child.children.insert(0, moved);
        }

        self.write_node(&left)?;
        self.write_node(&child)?;
        self.write_node(parent)?;

        debug!(
            from = left.self_pointer,
            to = child.self_pointer,
            "borrowed key from left sibling"
        );
        Ok(child)
    }

    /// Rotate the right sibling's first key up into the parent and the parent
    /// separator down into `child`.
    fn borrow_from_right(
        &mut self,
        parent: &mut Node,
        idx: usize,
        mut child: Node,
        mut right: Node,
    ) -> Result<Node, BTreeError> {
        if right.keys.is_empty() {
            return Err(BTreeError::Inconsistent {
                block_id: right.self_pointer,
                reason: "right sibling has no key to lend",
            });
        }
        let borrowed = right.keys.remove(0);
        let separator = std::mem::replace(&mut parent.keys[idx], borrowed);
        child.keys.push(separator);

        if !child.is_leaf {
            if right.children.is_empty() {
                return Err(BTreeError::Inconsistent {
                    block_id: right.self_pointer,
                    reason: "right sibling has no child to lend",
                });
            }
            child.children.push(right.children.remove(0));
        }

        self.write_node(&right)?;
        self.write_node(&child)?;
        self.write_node(parent)?;

        debug!(
            from = right.self_pointer,
            to = child.self_pointer,
            "borrowed key from right sibling"
        );
        Ok(child)
    }

    /// Merge `parent.children[idx + 1]` into `parent.children[idx]` around
    /// the separator `parent.keys[idx]`, freeing the right block.
    ///
    /// Returns the merged node.
    fn merge_children(
        &mut self,
        parent: &mut Node,
        idx: usize,
        mut left: Node,
        right: Node,
    ) -> Result<Node, BTreeError> {
        let separator = parent.keys.remove(idx);
        parent.children.remove(idx + 1);

        let right_id = right.self_pointer;
        left.keys.push(separator);
        left.keys.extend(right.keys);
        left.children.extend(right.children);

        self.write_node(&left)?;
        self.write_node(parent)?;
        self.free_node(right_id)?;

        debug!(
            parent = parent.self_pointer,
            left = left.self_pointer,
            right = right_id,
            separator,
            "merged nodes"
        );
        Ok(left)
    }

    /// Replace an internal root with no keys by its only child.
    fn collapse_root(&mut self) -> Result<(), BTreeError> {
        let root = self.read_node(self.root)?;
        if root.is_leaf || !root.keys.is_empty() {
            return Ok(());
        }

        let child = child_at(&root, 0)?;
        self.set_root(child)?;
        self.free_node(root.self_pointer)?;
        Ok(())
    }
}

/// Child pointer `idx` of an internal node.
pub(crate) fn child_at(node: &Node, idx: usize) -> Result<BlockId, BTreeError> {
    node.children
        .get(idx)
        .copied()
        .ok_or(BTreeError::Inconsistent {
            block_id: node.self_pointer,
            reason: "missing child pointer",
        })
}

/// Errors that can occur during B-tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// Minimum degree below 2.
    InvalidMinDegree(usize),
    /// Blocks cannot hold a full node.
    BlockSizeTooSmall { required: usize, actual: usize },
    /// Page cache capacity of zero.
    InvalidCacheCapacity,
    /// Deleted key is not in the tree.
    KeyNotFound(Key),
    /// Inserted key is already in the tree.
    DuplicateKey(Key),
    /// A block could not be decoded as a node.
    CorruptNode { block_id: BlockId, source: NodeError },
    /// Persisted nodes do not form a valid tree.
    Inconsistent {
        block_id: BlockId,
        reason: &'static str,
    },
    /// Block store error.
    Storage(StorageError),
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMinDegree(t) => write!(f, "minimum degree must be at least 2, got {t}"),
            Self::BlockSizeTooSmall { required, actual } => write!(
                f,
                "block size of {actual} bytes cannot hold a full node ({required} bytes needed)"
            ),
            Self::InvalidCacheCapacity => write!(f, "cache capacity must be at least 1"),
            Self::KeyNotFound(key) => write!(f, "key {key} not found"),
            Self::DuplicateKey(key) => write!(f, "key {key} already exists"),
            Self::CorruptNode { block_id, source } => {
                write!(f, "corrupt node in block {block_id}: {source}")
            }
            Self::Inconsistent { block_id, reason } => {
                write!(f, "inconsistent tree at block {block_id}: {reason}")
            }
            Self::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CorruptNode { source, .. } => Some(source),
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for BTreeError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}
