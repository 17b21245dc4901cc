//! B+ tree node types and page serialization.
//!
//! A node is either internal or leaf, never both. Nodes refer to each other
//! only by `NodeId`, which is also the page the node is stored on, so the
//! node store is the single owner of every node.
//!
//! Page layout after the common page header:
//! - `count`: 2 bytes (keys for internal nodes, records for leaves)
//! - `next_leaf`: 8 bytes (leaves only, 0 if none)
//! - body, see `InternalNode` and `LeafNode`

#![allow(clippy::cast_possible_truncation)]

use crate::btree::internal::InternalNode;
use crate::btree::leaf::LeafNode;
use crate::btree::store::NodeStore;
use crate::btree::tree::TreeError;
use crate::storage::{Page, PageError, PageHeader, PageId, PageType, Pager};

/// Record keys are scalar integers.
pub type Key = i64;

/// Size of a serialized key in bytes.
pub const KEY_SIZE: usize = 8;

/// Size of a serialized child or sibling pointer in bytes.
pub const POINTER_SIZE: usize = 8;

/// Leaf entry overhead: key (8 bytes) + `value_len` (2 bytes).
pub const LEAF_ENTRY_OVERHEAD: usize = KEY_SIZE + 2;

/// Node header size: `count` (2 bytes) + `next_leaf` (8 bytes).
const NODE_HEADER_SIZE: usize = 2 + POINTER_SIZE;

/// Offset of the node header inside a page.
pub(crate) const NODE_HEADER_OFFSET: usize = PageHeader::SIZE;

/// Offset where node data starts (after page header + node header).
pub(crate) const DATA_OFFSET: usize = PageHeader::SIZE + NODE_HEADER_SIZE;

/// Encoded size of an internal node with `children` children.
#[must_use]
pub const fn internal_node_size(children: usize) -> usize {
    DATA_OFFSET + children * POINTER_SIZE + children.saturating_sub(1) * KEY_SIZE
}

/// Encoded size of a leaf with `records` records of `value_len` bytes each.
#[must_use]
pub const fn leaf_node_size(records: usize, value_len: usize) -> usize {
    DATA_OFFSET + records * (LEAF_ENTRY_OVERHEAD + value_len)
}

/// Opaque node identifier, resolved through the node store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(PageId);

impl NodeId {
    /// The node stored on `page`.
    #[must_use]
    pub const fn from_page(page: PageId) -> Self {
        Self(page)
    }

    /// The page this node is stored on.
    #[must_use]
    pub const fn page(self) -> PageId {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A key-value record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Key,
    pub value: String,
}

impl Record {
    /// Create a record.
    pub fn new(key: Key, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.key, self.value)
    }
}

/// Something the node store can write to a page.
pub trait NodePage {
    /// The node's identifier, which is also its page.
    fn node_id(&self) -> NodeId;

    /// Exact number of bytes `write_to_page` needs.
    fn encoded_len(&self) -> usize;

    /// Serialize into a zeroed page at least `encoded_len()` bytes long.
    ///
    /// The checksum is filled in by the caller.
    fn write_to_page(&self, page: &mut Page);
}

/// Result of splitting a node in two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split {
    /// Separator for the parent: every key in `right` is >= it, every key in `left` is <.
    pub promoted: Key,
    pub left: NodeId,
    pub right: NodeId,
}

/// A B+ tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Internal(InternalNode),
    Leaf(LeafNode),
}

impl Node {
    /// The node's identifier.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        match self {
            Self::Internal(node) => node.id(),
            Self::Leaf(node) => node.id(),
        }
    }

    /// Number of children (internal) or records (leaf).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Internal(node) => node.children().len(),
            Self::Leaf(node) => node.records().len(),
        }
    }

    /// Whether the node holds no records or children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }

    /// A node is full once it holds `order` children or records.
    ///
    /// This is one more than the textbook bound; the tree relies on it.
    #[must_use]
    pub fn is_full(&self, order: usize) -> bool {
        self.len() == order
    }

    /// Whether removing one more element could break the minimum occupancy.
    #[must_use]
    pub fn is_half_empty(&self, order: usize) -> bool {
        self.len() <= order / 2
    }

    /// Read a node from a page.
    pub fn from_page(id: NodeId, page: &Page) -> Result<Self, NodeError> {
        page.verify_checksum().map_err(NodeError::Page)?;
        let header = PageHeader::from_page(page).map_err(NodeError::Page)?;

        match header.page_type {
            PageType::TreeInternal => Ok(Self::Internal(InternalNode::from_page(id, page)?)),
            PageType::TreeLeaf => Ok(Self::Leaf(LeafNode::from_page(id, page)?)),
            other => Err(NodeError::WrongPageType { id, found: other }),
        }
    }

    pub(crate) fn search<P: Pager>(
        &self,
        store: &mut NodeStore<P>,
        key: Key,
    ) -> Result<Option<Record>, TreeError> {
        match self {
            Self::Internal(node) => node.search(store, key),
            Self::Leaf(node) => Ok(node.get(key).cloned()),
        }
    }

    pub(crate) fn insert<P: Pager>(
        &mut self,
        store: &mut NodeStore<P>,
        record: Record,
    ) -> Result<bool, TreeError> {
        match self {
            Self::Internal(node) => node.insert(store, record),
            Self::Leaf(node) => node.insert(store, record),
        }
    }

    pub(crate) fn delete<P: Pager>(
        &mut self,
        store: &mut NodeStore<P>,
        key: Key,
    ) -> Result<bool, TreeError> {
        match self {
            Self::Internal(node) => node.delete(store, key),
            Self::Leaf(node) => node.delete(store, key),
        }
    }

    pub(crate) fn set<P: Pager>(
        &mut self,
        store: &mut NodeStore<P>,
        record: Record,
    ) -> Result<bool, TreeError> {
        match self {
            Self::Internal(node) => node.set(store, record),
            Self::Leaf(node) => node.set(store, record),
        }
    }

    /// Split this node at `split_point`, persisting both halves.
    pub(crate) fn split_self<P: Pager>(
        self,
        store: &mut NodeStore<P>,
        split_point: usize,
    ) -> Result<Split, TreeError> {
        let new_id = store.allocate_id()?;
        let split = match self {
            Self::Internal(mut right) => {
                let halves = right.split_self(split_point, new_id);
                let (promoted, left) = release_on_error(store, new_id, halves)?;
                store.persist(&left)?;
                store.persist(&right)?;
                Split {
                    promoted,
                    left: left.id(),
                    right: right.id(),
                }
            }
            Self::Leaf(mut left) => {
                let halves = left.split_self(split_point, new_id);
                let (promoted, right) = release_on_error(store, new_id, halves)?;
                store.persist(&left)?;
                store.persist(&right)?;
                Split {
                    promoted,
                    left: left.id(),
                    right: right.id(),
                }
            }
        };

        tracing::debug!(
            "split node into {} | {} around key {}",
            split.left,
            split.right,
            split.promoted
        );
        Ok(split)
    }

    /// Move this node's first element to `brother`, its left sibling.
    ///
    /// Returns the separator the parent must adopt.
    pub(crate) fn lend_first_to<P: Pager>(
        &mut self,
        store: &mut NodeStore<P>,
        demoted: Key,
        brother: &mut Self,
    ) -> Result<Key, TreeError> {
        let (from_id, to_id) = (self.id(), brother.id());
        let promoted = match (&mut *self, &mut *brother) {
            (Self::Internal(from), Self::Internal(to)) => from.lend_first_to(demoted, to)?,
            (Self::Leaf(from), Self::Leaf(to)) => from.lend_first_to(demoted, to)?,
            _ => return Err(TreeError::mismatched("lend first", from_id, to_id)),
        };

        store.persist(&*self)?;
        store.persist(&*brother)?;
        tracing::debug!("{from_id} lent its first element to {to_id}, new separator {promoted}");
        Ok(promoted)
    }

    /// Move this node's last element to `brother`, its right sibling.
    ///
    /// Returns the separator the parent must adopt.
    pub(crate) fn lend_last_to<P: Pager>(
        &mut self,
        store: &mut NodeStore<P>,
        demoted: Key,
        brother: &mut Self,
    ) -> Result<Key, TreeError> {
        let (from_id, to_id) = (self.id(), brother.id());
        let promoted = match (&mut *self, &mut *brother) {
            (Self::Internal(from), Self::Internal(to)) => from.lend_last_to(demoted, to)?,
            (Self::Leaf(from), Self::Leaf(to)) => from.lend_last_to(demoted, to)?,
            _ => return Err(TreeError::mismatched("lend last", from_id, to_id)),
        };

        store.persist(&*self)?;
        store.persist(&*brother)?;
        tracing::debug!("{from_id} lent its last element to {to_id}, new separator {promoted}");
        Ok(promoted)
    }

    /// Absorb `right`, the adjacent sibling after this node, and persist the result.
    ///
    /// Returns the id of the absorbed node. The caller unlinks it from the
    /// parent and only then releases it.
    pub(crate) fn merge_with<P: Pager>(
        &mut self,
        store: &mut NodeStore<P>,
        demoted: Key,
        right: Self,
    ) -> Result<NodeId, TreeError> {
        let (left_id, right_id) = (self.id(), right.id());
        match (&mut *self, right) {
            (Self::Internal(left), Self::Internal(right)) => left.merge_with(demoted, right),
            (Self::Leaf(left), Self::Leaf(right)) => left.merge_with(right)?,
            _ => return Err(TreeError::mismatched("merge", left_id, right_id)),
        }

        store.persist(&*self)?;
        tracing::debug!("merged {right_id} into {left_id}");
        Ok(right_id)
    }
}

impl NodePage for Node {
    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn encoded_len(&self) -> usize {
        match self {
            Self::Internal(node) => node.encoded_len(),
            Self::Leaf(node) => node.encoded_len(),
        }
    }

    fn write_to_page(&self, page: &mut Page) {
        match self {
            Self::Internal(node) => node.write_to_page(page),
            Self::Leaf(node) => node.write_to_page(page),
        }
    }
}

/// Hand `id` back to the store if `result` failed.
fn release_on_error<P: Pager, T>(
    store: &mut NodeStore<P>,
    id: NodeId,
    result: Result<T, TreeError>,
) -> Result<T, TreeError> {
    if result.is_err() {
        store.release_id(id)?;
    }
    result
}

/// Write the page header and node header shared by both variants.
pub(crate) fn write_node_header(
    page: &mut Page,
    page_type: PageType,
    count: usize,
    next_leaf: Option<NodeId>,
) {
    let header = PageHeader {
        page_type,
        flags: 0,
        checksum: 0,
    };
    page.write_bytes(0, &header.to_bytes());
    page.write_u16(NODE_HEADER_OFFSET, count as u16);
    page.write_u64(
        NODE_HEADER_OFFSET + 2,
        next_leaf.map_or(0, NodeId::page),
    );
}

/// Read the `(count, next_leaf)` node header.
pub(crate) fn read_node_header(page: &Page) -> (usize, Option<NodeId>) {
    let count = page.read_u16(NODE_HEADER_OFFSET) as usize;
    let next = page.read_u64(NODE_HEADER_OFFSET + 2);
    (count, (next != 0).then_some(NodeId::from_page(next)))
}

/// Check that `len` bytes at `offset` lie inside the page.
pub(crate) fn ensure_fits(id: NodeId, page: &Page, offset: usize, len: usize) -> Result<(), NodeError> {
    if offset + len > page.size() {
        return Err(NodeError::Truncated { id });
    }
    Ok(())
}

/// Errors that can occur when decoding B+ tree nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Invalid page header or checksum.
    Page(PageError),
    /// The page doesn't hold a tree node.
    WrongPageType { id: NodeId, found: PageType },
    /// The node's entries run past the end of the page.
    Truncated { id: NodeId },
    /// A stored value is not valid UTF-8.
    InvalidUtf8 { id: NodeId, key: Key },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Page(e) => write!(f, "page error: {e}"),
            Self::WrongPageType { id, found } => {
                write!(f, "page of node {id} holds {found:?}, not a tree node")
            }
            Self::Truncated { id } => write!(f, "node {id} runs past the end of its page"),
            Self::InvalidUtf8 { id, key } => {
                write!(f, "value of key {key} in node {id} is not valid UTF-8")
            }
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Page(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryPager;

    fn leaf(id: PageId, keys: &[Key]) -> LeafNode {
        let mut node = LeafNode::new(NodeId::from_page(id));
        for &key in keys {
            assert!(node.insert_record(Record::new(key, format!("v{key}"))));
        }
        node
    }

    #[test]
    fn test_failed_split_releases_new_id() {
        let mut store = NodeStore::new(MemoryPager::new(1024, 16), 9);
        let leaf_id = store.allocate_id().expect("allocate");
        let free_before = store.free_ids();

        let node = Node::Leaf(leaf(leaf_id.page(), &[1, 2, 3]));
        let err = node.split_self(&mut store, 5).expect_err("bad split point");
        assert!(matches!(err, TreeError::Structure(_)));
        assert_eq!(store.free_ids(), free_before);

        let node = Node::Internal(InternalNode::with_children(
            leaf_id,
            NodeId::from_page(10),
            20,
            NodeId::from_page(11),
        ));
        let err = node.split_self(&mut store, 0).expect_err("bad split point");
        assert!(matches!(err, TreeError::Structure(_)));
        assert_eq!(store.free_ids(), free_before);
    }

    #[test]
    fn test_capacity_thresholds() {
        let order = 9;

        let node = Node::Leaf(leaf(1, &[1, 2, 3, 4]));
        assert!(node.is_half_empty(order));
        assert!(!node.is_full(order));

        let node = Node::Leaf(leaf(1, &[1, 2, 3, 4, 5]));
        assert!(!node.is_half_empty(order));

        let node = Node::Leaf(leaf(1, &[1, 2, 3, 4, 5, 6, 7, 8, 9]));
        assert!(node.is_full(order));
    }

    #[test]
    fn test_node_roundtrip_through_page() {
        let mut internal = InternalNode::with_children(
            NodeId::from_page(3),
            NodeId::from_page(1),
            10,
            NodeId::from_page(2),
        );
        internal.insert_child(1, 20, NodeId::from_page(4));

        for node in [Node::Internal(internal), Node::Leaf(leaf(5, &[-3, 0, 7]))] {
            let mut page = Page::new(256);
            node.write_to_page(&mut page);
            page.seal();

            let restored = Node::from_page(node.id(), &page).expect("should parse");
            assert_eq!(restored, node);
        }
    }

    #[test]
    fn test_wrong_page_type_rejected() {
        let mut page = Page::new(128);
        write_node_header(&mut page, PageType::Free, 0, None);
        page.seal();

        assert!(matches!(
            Node::from_page(NodeId::from_page(1), &page),
            Err(NodeError::WrongPageType {
                found: PageType::Free,
                ..
            })
        ));
    }

    #[test]
    fn test_corrupted_page_rejected() {
        let node = Node::Leaf(leaf(2, &[1, 2]));
        let mut page = Page::new(128);
        node.write_to_page(&mut page);
        page.seal();
        page.as_bytes_mut()[DATA_OFFSET] ^= 0x80;

        assert!(matches!(
            Node::from_page(node.id(), &page),
            Err(NodeError::Page(PageError::ChecksumMismatch { .. }))
        ));
    }

    #[test]
    fn test_encoded_sizes_match_helpers() {
        let node = leaf(1, &[1, 2, 3]);
        // "v1", "v2", "v3" are two bytes each
        assert_eq!(node.encoded_len(), leaf_node_size(3, 2));

        let internal = InternalNode::with_children(
            NodeId::from_page(3),
            NodeId::from_page(1),
            10,
            NodeId::from_page(2),
        );
        assert_eq!(internal.encoded_len(), internal_node_size(2));
    }
}
