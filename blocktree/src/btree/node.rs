//! B-tree node type and block serialization.
//!
//! Block layout (all integers little-endian):
//! - `is_leaf`: 1 byte (0 = internal, 1 = leaf)
//! - `self_pointer`: 4 bytes
//! - `key_count`: 4 bytes
//! - keys: `key_count` x 4 bytes
//! - `child_count`: 4 bytes
//! - children: `child_count` x 4 bytes
//!
//! Anything after the children is block padding and is ignored.

// Key and child counts are bounded by the block size, which fits in u32.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::BlockId;

/// A fixed-width integer key.
pub type Key = i32;

/// Size of the leaf flag in bytes.
const FLAG_SIZE: usize = 1;

/// Size of every integer field in bytes.
const INT_SIZE: usize = 4;

/// Size of the fixed part of an encoded node: flag, self pointer and both counts.
const FIXED_SIZE: usize = FLAG_SIZE + 3 * INT_SIZE;

/// Bytes needed to encode a full node (`2t-1` keys, `2t` children).
#[must_use]
pub const fn max_encoded_size(min_degree: usize) -> usize {
    let max_keys = (2 * min_degree).saturating_sub(1);
    let max_children = 2 * min_degree;
    FIXED_SIZE + INT_SIZE * max_keys + INT_SIZE * max_children
}

/// One B-tree page.
///
/// `children[i]` holds keys `< keys[i]`; `children[keys.len()]` holds keys
/// greater than the last key. Leaves have no children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub is_leaf: bool,
    /// The block this node is stored in. Never changes.
    pub self_pointer: BlockId,
    /// Keys in strictly ascending order.
    pub keys: Vec<Key>,
    /// Child block pointers. `children.len()` == `keys.len()` + 1 for internal nodes.
    pub children: Vec<BlockId>,
}

impl Node {
    /// Create an empty node stored at `self_pointer`.
    #[must_use]
    pub const fn new(is_leaf: bool, self_pointer: BlockId) -> Self {
        Self {
            is_leaf,
            self_pointer,
            keys: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Number of keys in the node.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Index of the first key `>= key`, or `key_count()` if there is none.
    ///
    /// For an internal node this is also the child to descend into.
    #[must_use]
    pub fn find_key_index(&self, key: Key) -> usize {
        self.keys.partition_point(|&k| k < key)
    }

    /// Size of the encoded node in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FIXED_SIZE + INT_SIZE * (self.keys.len() + self.children.len())
    }

    /// Serialize the node.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(u8::from(self.is_leaf));
        buf.extend_from_slice(&self.self_pointer.to_le_bytes());

        buf.extend_from_slice(&(self.keys.len() as u32).to_le_bytes());
        for key in &self.keys {
            buf.extend_from_slice(&key.to_le_bytes());
        }

        buf.extend_from_slice(&(self.children.len() as u32).to_le_bytes());
        for child in &self.children {
            buf.extend_from_slice(&child.to_le_bytes());
        }

        buf
    }

    /// Deserialize a node from a (possibly zero-padded) block.
    pub fn decode(bytes: &[u8]) -> Result<Self, NodeError> {
        let mut reader = Reader::new(bytes);

        let is_leaf = match reader.read_u8()? {
            0 => false,
            1 => true,
            flag => return Err(NodeError::InvalidLeafFlag(flag)),
        };
        let self_pointer = reader.read_u32()?;

        let key_count = reader.read_u32()? as usize;
        reader.ensure_ints(key_count)?;
        let mut keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            keys.push(reader.read_i32()?);
        }

        let child_count = reader.read_u32()? as usize;
        let expected_children = if is_leaf { 0 } else { key_count + 1 };
        if child_count != expected_children {
            return Err(NodeError::ChildCountMismatch {
                is_leaf,
                key_count,
                child_count,
            });
        }
        reader.ensure_ints(child_count)?;
        let mut children = Vec::with_capacity(child_count);
        for _ in 0..child_count {
            children.push(reader.read_u32()?);
        }

        Ok(Self {
            is_leaf,
            self_pointer,
            keys,
            children,
        })
    }

    /// Deserialize the node stored in `block_id`, checking that it names
    /// itself as that block.
    pub fn decode_block(bytes: &[u8], block_id: BlockId) -> Result<Self, NodeError> {
        let node = Self::decode(bytes)?;
        if node.self_pointer != block_id {
            return Err(NodeError::SelfPointerMismatch {
                expected: block_id,
                found: node.self_pointer,
            });
        }
        Ok(node)
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.keys.iter().map(ToString::to_string).collect();
        let children: Vec<String> = self.children.iter().map(ToString::to_string).collect();
        write!(
            f,
            "Node[{}]: keys={{{}}}, children={{{}}}, leaf={}",
            self.self_pointer,
            keys.join(","),
            children.join(","),
            self.is_leaf
        )
    }
}

/// Bounds-checked little-endian reader over a block.
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Fail early if `count` more integers cannot fit in the remaining bytes.
    fn ensure_ints(&self, count: usize) -> Result<(), NodeError> {
        let needed = count
            .checked_mul(INT_SIZE)
            .and_then(|len| len.checked_add(self.offset))
            .unwrap_or(usize::MAX);
        if needed > self.bytes.len() {
            return Err(NodeError::Truncated {
                needed,
                available: self.bytes.len(),
            });
        }
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], NodeError> {
        let end = self.offset + len;
        let slice = self.bytes.get(self.offset..end).ok_or(NodeError::Truncated {
            needed: end,
            available: self.bytes.len(),
        })?;
        self.offset = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, NodeError> {
        Ok(self.take(FLAG_SIZE)?[0])
    }

    fn read_array(&mut self) -> Result<[u8; INT_SIZE], NodeError> {
        let bytes = self.take(INT_SIZE)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn read_u32(&mut self) -> Result<u32, NodeError> {
        self.read_array().map(u32::from_le_bytes)
    }

    fn read_i32(&mut self) -> Result<i32, NodeError> {
        self.read_array().map(i32::from_le_bytes)
    }
}

/// Errors that can occur when decoding a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The declared counts need more bytes than the block holds.
    Truncated { needed: usize, available: usize },
    /// Leaf flag is neither 0 nor 1.
    InvalidLeafFlag(u8),
    /// Child count disagrees with the node kind and key count.
    ChildCountMismatch {
        is_leaf: bool,
        key_count: usize,
        child_count: usize,
    },
    /// Node was read from a block other than the one it claims to live in.
    SelfPointerMismatch { expected: BlockId, found: BlockId },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { needed, available } => {
                write!(f, "node truncated: needs {needed} bytes, block has {available}")
            }
            Self::InvalidLeafFlag(v) => write!(f, "invalid leaf flag: 0x{v:02x}"),
            Self::ChildCountMismatch {
                is_leaf,
                key_count,
                child_count,
            } => write!(
                f,
                "{} node with {key_count} keys has {child_count} children",
                if *is_leaf { "leaf" } else { "internal" }
            ),
            Self::SelfPointerMismatch { expected, found } => write!(
                f,
                "node in block {expected} claims to live in block {found}"
            ),
        }
    }
}

impl std::error::Error for NodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_roundtrip() {
        let mut node = Node::new(true, 7);
        node.keys = vec![-5, 0, 3, i32::MAX];

        let restored = Node::decode(&node.encode()).expect("should decode");
        assert_eq!(restored, node);
    }

    #[test]
    fn test_internal_roundtrip() {
        let mut node = Node::new(false, 2);
        node.keys = vec![10, 20, 30];
        node.children = vec![100, 200, 300, 400];

        let restored = Node::decode(&node.encode()).expect("should decode");
        assert_eq!(restored, node);
    }

    #[test]
    fn test_empty_leaf_roundtrip() {
        let node = Node::new(true, 0);
        let restored = Node::decode(&node.encode()).expect("should decode");
        assert_eq!(restored, node);
    }

    #[test]
    fn test_decode_ignores_padding() {
        let mut node = Node::new(false, 9);
        node.keys = vec![42];
        node.children = vec![1, 2];

        let mut block = node.encode();
        block.resize(256, 0);

        let restored = Node::decode(&block).expect("should decode");
        assert_eq!(restored, node);
    }

    #[test]
    fn test_wire_layout() {
        let mut node = Node::new(false, 0x0102_0304);
        node.keys = vec![-1];
        node.children = vec![5, 6];

        let bytes = node.encode();
        assert_eq!(bytes.len(), node.encoded_len());
        assert_eq!(bytes[0], 0);
        assert_eq!(&bytes[1..5], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[5..9], &1u32.to_le_bytes());
        assert_eq!(&bytes[9..13], &[0xFF; 4]);
        assert_eq!(&bytes[13..17], &2u32.to_le_bytes());
        assert_eq!(&bytes[17..21], &5u32.to_le_bytes());
        assert_eq!(&bytes[21..25], &6u32.to_le_bytes());
    }

    #[test]
    fn test_decode_truncated() {
        let mut node = Node::new(true, 1);
        node.keys = vec![1, 2, 3];
        let bytes = node.encode();

        let result = Node::decode(&bytes[..bytes.len() - 2]);
        assert!(matches!(result, Err(NodeError::Truncated { .. })));

        assert!(matches!(
            Node::decode(&[]),
            Err(NodeError::Truncated { needed: 1, .. })
        ));
    }

    #[test]
    fn test_decode_absurd_key_count() {
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.resize(64, 0);

        assert!(matches!(
            Node::decode(&bytes),
            Err(NodeError::Truncated { available: 64, .. })
        ));
    }

    #[test]
    fn test_decode_invalid_leaf_flag() {
        let mut bytes = Node::new(true, 0).encode();
        bytes[0] = 2;
        assert_eq!(Node::decode(&bytes), Err(NodeError::InvalidLeafFlag(2)));
    }

    #[test]
    fn test_decode_child_count_mismatch() {
        let mut leaf = Node::new(true, 0);
        leaf.keys = vec![1];
        leaf.children = vec![4];
        assert!(matches!(
            Node::decode(&leaf.encode()),
            Err(NodeError::ChildCountMismatch { is_leaf: true, .. })
        ));

        let mut internal = Node::new(false, 0);
        internal.keys = vec![1, 2];
        internal.children = vec![4, 5];
        assert!(matches!(
            Node::decode(&internal.encode()),
            Err(NodeError::ChildCountMismatch {
                is_leaf: false,
                key_count: 2,
                child_count: 2
            })
        ));
    }

    #[test]
    fn test_decode_block_checks_self_pointer() {
        let bytes = Node::new(true, 5).encode();

        assert!(Node::decode_block(&bytes, 5).is_ok());
        assert_eq!(
            Node::decode_block(&bytes, 6),
            Err(NodeError::SelfPointerMismatch {
                expected: 6,
                found: 5
            })
        );
    }

    #[test]
    fn test_full_node_fits_max_size() {
        for t in 2..10 {
            let mut node = Node::new(false, 1);
            node.keys = (0..(2 * t - 1) as i32).collect();
            node.children = (0..(2 * t) as u32).collect();
            assert_eq!(node.encoded_len(), max_encoded_size(t));
        }
        assert_eq!(max_encoded_size(3), 57);
    }

    #[test]
    fn test_find_key_index() {
        let mut node = Node::new(true, 0);
        node.keys = vec![10, 20, 30];
        assert_eq!(node.key_count(), 3);

        assert_eq!(node.find_key_index(5), 0);
        assert_eq!(node.find_key_index(10), 0);
        assert_eq!(node.find_key_index(15), 1);
        assert_eq!(node.find_key_index(30), 2);
        assert_eq!(node.find_key_index(35), 3);
    }

    #[test]
    fn test_display() {
        let mut node = Node::new(false, 4);
        node.keys = vec![1, 2];
        node.children = vec![7, 8, 9];
        assert_eq!(
            node.to_string(),
            "Node[4]: keys={1,2}, children={7,8,9}, leaf=false"
        );
    }
}
