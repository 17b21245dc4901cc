//! Node store: identifier allocation and node (de)serialization over a pager.
//!
//! The store owns the pager and the identifier bitmap. Node ids are page ids;
//! page 0 belongs to the superblock and is never handed out.

use crate::btree::node::{Node, NodeError, NodeId, NodePage};
use crate::storage::{
    IdAllocator, Page, Pager, PagerError, SUPERBLOCK_PAGE, Superblock, SuperblockError,
};

/// Allocates node ids and moves nodes between memory and pages.
pub struct NodeStore<P: Pager> {
    pager: P,
    ids: IdAllocator,
    order: usize,
}

impl<P: Pager> NodeStore<P> {
    /// Create a store over `pager` for a tree of the given order.
    ///
    /// Only the superblock page starts out allocated.
    pub fn new(pager: P, order: usize) -> Self {
        let ids = IdAllocator::new(pager.page_count(), SUPERBLOCK_PAGE + 1);
        Self { pager, ids, order }
    }

    /// Maximum children per internal node and records per leaf.
    #[must_use]
    pub const fn order(&self) -> usize {
        self.order
    }

    #[must_use]
    pub const fn pager(&self) -> &P {
        &self.pager
    }

    pub const fn pager_mut(&mut self) -> &mut P {
        &mut self.pager
    }

    /// Consume the store and return the pager.
    pub fn into_pager(self) -> P {
        self.pager
    }

    /// Number of ids still available.
    #[must_use]
    pub const fn free_ids(&self) -> u64 {
        self.ids.free_count()
    }

    /// Whether `id` is currently allocated to a node.
    #[must_use]
    pub fn is_allocated(&self, id: NodeId) -> bool {
        id.page() != SUPERBLOCK_PAGE && self.ids.is_allocated(id.page())
    }

    /// Hand out the lowest unused id.
    pub fn allocate_id(&mut self) -> Result<NodeId, StoreError> {
        let page = self.ids.allocate().ok_or(StoreError::IdsExhausted {
            capacity: self.ids.total(),
        })?;
        tracing::debug!(page, "allocated node id");
        Ok(NodeId::from_page(page))
    }

    /// Return an id to the pool. Its page keeps its bytes until reused.
    pub fn release_id(&mut self, id: NodeId) -> Result<(), StoreError> {
        if id.page() == SUPERBLOCK_PAGE || !self.ids.free(id.page()) {
            return Err(StoreError::NotAllocated(id));
        }
        tracing::debug!(page = id.page(), "released node id");
        Ok(())
    }

    /// Mark an id found in an existing tree as in use.
    pub(crate) fn claim_id(&mut self, id: NodeId) -> Result<(), StoreError> {
        if id.page() == SUPERBLOCK_PAGE || !self.ids.mark_used(id.page()) {
            return Err(StoreError::AlreadyClaimed(id));
        }
        Ok(())
    }

    /// Serialize a node onto its page.
    ///
    /// Fails without writing if the encoding does not fit in a page.
    pub fn persist<N: NodePage>(&mut self, node: &N) -> Result<(), StoreError> {
        let id = node.node_id();
        if !self.is_allocated(id) {
            return Err(StoreError::NotAllocated(id));
        }

        let page_size = self.pager.page_size();
        let size = node.encoded_len();
        if size > page_size {
            return Err(StoreError::NodeTooLarge {
                id,
                size,
                page_size,
            });
        }

        let mut page = Page::new(page_size);
        node.write_to_page(&mut page);
        page.seal();
        self.pager.write_page(id.page(), &page)?;
        Ok(())
    }

    /// Read and decode the node stored under `id`.
    pub fn load(&mut self, id: NodeId) -> Result<Node, StoreError> {
        if !self.is_allocated(id) {
            return Err(StoreError::NotAllocated(id));
        }

        let page = self.pager.read_page(id.page())?;
        Ok(Node::from_page(id, &page)?)
    }

    /// Read the superblock page.
    pub fn read_superblock(&mut self) -> Result<Superblock, StoreError> {
        let page = self.pager.read_page(SUPERBLOCK_PAGE)?;
        Ok(Superblock::from_page(&page)?)
    }

    /// Overwrite the superblock page.
    pub fn write_superblock(&mut self, superblock: &Superblock) -> Result<(), StoreError> {
        let page = superblock.to_page(self.pager.page_size());
        self.pager.write_page(SUPERBLOCK_PAGE, &page)?;
        Ok(())
    }

    /// Flush the pager.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        self.pager.sync()?;
        Ok(())
    }
}

/// Errors from the node store.
#[derive(Debug)]
pub enum StoreError {
    /// The pager failed.
    Pager(PagerError),
    /// A page did not decode into a node.
    Node(NodeError),
    /// The superblock page is invalid.
    Superblock(SuperblockError),
    /// A node's encoding is larger than a page.
    NodeTooLarge {
        id: NodeId,
        size: usize,
        page_size: usize,
    },
    /// Every node id is in use.
    IdsExhausted { capacity: u64 },
    /// The id is not allocated to a node.
    NotAllocated(NodeId),
    /// The id is already in use (a node reachable twice while reopening).
    AlreadyClaimed(NodeId),
}

impl StoreError {
    /// Whether the error comes from running out of page or id capacity.
    #[must_use]
    pub const fn is_capacity(&self) -> bool {
        matches!(self, Self::NodeTooLarge { .. } | Self::IdsExhausted { .. })
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pager(e) => write!(f, "pager error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::Superblock(e) => write!(f, "superblock error: {e}"),
            Self::NodeTooLarge {
                id,
                size,
                page_size,
            } => write!(
                f,
                "node {id} needs {size} bytes but pages hold {page_size}"
            ),
            Self::IdsExhausted { capacity } => {
                write!(f, "all {capacity} node ids are in use")
            }
            Self::NotAllocated(id) => write!(f, "node {id} is not allocated"),
            Self::AlreadyClaimed(id) => write!(f, "node {id} is referenced more than once"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pager(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::Superblock(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PagerError> for StoreError {
    fn from(e: PagerError) -> Self {
        Self::Pager(e)
    }
}

impl From<NodeError> for StoreError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

impl From<SuperblockError> for StoreError {
    fn from(e: SuperblockError) -> Self {
        Self::Superblock(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::leaf::LeafNode;
    use crate::btree::node::Record;
    use crate::storage::{MemoryPager, PageError};

    fn store(page_count: u64) -> NodeStore<MemoryPager> {
        NodeStore::new(MemoryPager::new(256, page_count), 4)
    }

    fn leaf_with(id: NodeId, values: &[&str]) -> LeafNode {
        let mut leaf = LeafNode::new(id);
        for (key, value) in (0..).zip(values) {
            assert!(leaf.insert_record(Record::new(key, *value)));
        }
        leaf
    }

    #[test]
    fn test_ids_start_after_superblock() {
        let mut store = store(4);
        assert_eq!(store.allocate_id().expect("id").page(), 1);
        assert_eq!(store.allocate_id().expect("id").page(), 2);
        assert_eq!(store.allocate_id().expect("id").page(), 3);
        assert!(matches!(
            store.allocate_id(),
            Err(StoreError::IdsExhausted { capacity: 4 })
        ));
    }

    #[test]
    fn test_released_id_is_reused_first() {
        let mut store = store(8);
        let a = store.allocate_id().expect("id");
        let b = store.allocate_id().expect("id");
        let _c = store.allocate_id().expect("id");

        store.release_id(b).expect("release");
        store.release_id(a).expect("release");

        assert_eq!(store.allocate_id().expect("id"), a);
        assert_eq!(store.allocate_id().expect("id"), b);
    }

    #[test]
    fn test_release_unallocated_fails() {
        let mut store = store(8);
        let id = store.allocate_id().expect("id");
        store.release_id(id).expect("release");

        assert!(matches!(store.release_id(id), Err(StoreError::NotAllocated(_))));
        assert!(matches!(
            store.release_id(NodeId::from_page(SUPERBLOCK_PAGE)),
            Err(StoreError::NotAllocated(_))
        ));
    }

    #[test]
    fn test_persist_then_load() {
        let mut store = store(8);
        let id = store.allocate_id().expect("id");
        let leaf = leaf_with(id, &["a", "bb", "ccc"]);

        store.persist(&leaf).expect("persist");
        let loaded = store.load(id).expect("load");

        assert_eq!(loaded, Node::Leaf(leaf));
    }

    #[test]
    fn test_oversized_node_is_rejected_not_truncated() {
        let mut store = store(8);
        let id = store.allocate_id().expect("id");
        let small = leaf_with(id, &["ok"]);
        store.persist(&small).expect("persist");

        let big_value = "x".repeat(300);
        let big = leaf_with(id, &[big_value.as_str()]);
        let err = store.persist(&big).expect_err("should not fit");
        assert!(matches!(err, StoreError::NodeTooLarge { page_size: 256, .. }));
        assert!(err.is_capacity());

        // The previous version is still on disk
        assert_eq!(store.load(id).expect("load"), Node::Leaf(small));
    }

    #[test]
    fn test_unallocated_ids_are_not_touched() {
        let mut store = store(8);
        let stray = NodeId::from_page(5);

        assert!(matches!(
            store.persist(&LeafNode::new(stray)),
            Err(StoreError::NotAllocated(_))
        ));
        assert!(matches!(store.load(stray), Err(StoreError::NotAllocated(_))));
    }

    #[test]
    fn test_corruption_detected_on_load() {
        let mut store = store(8);
        let id = store.allocate_id().expect("id");
        store.persist(&leaf_with(id, &["value"])).expect("persist");

        store.pager_mut().corrupt(id.page(), 40);

        assert!(matches!(
            store.load(id),
            Err(StoreError::Node(NodeError::Page(PageError::ChecksumMismatch { .. })))
        ));
    }

    #[test]
    fn test_claim_id_rejects_duplicates() {
        let mut store = store(8);
        let id = NodeId::from_page(3);
        store.claim_id(id).expect("claim");
        assert!(matches!(store.claim_id(id), Err(StoreError::AlreadyClaimed(_))));
        assert_eq!(store.allocate_id().expect("id").page(), 1);
    }

    #[test]
    fn test_superblock_roundtrip() {
        let mut store = store(8);
        let superblock = Superblock::new(256, 8, 4, 1);
        store.write_superblock(&superblock).expect("write");
        assert_eq!(store.read_superblock().expect("read"), superblock);
    }
}
