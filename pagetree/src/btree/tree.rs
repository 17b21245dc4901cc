//! B+ tree over a node store.
//!
//! The tree owns the root id and routes every operation through the root.
//! Insertion splits full nodes top-down before descending and deletion tops
//! up half-empty nodes top-down before descending, so no operation ever
//! needs to walk back up.
//!
//! The root id lives in the superblock (page 0) and is rewritten whenever the
//! tree grows a new root, so a file-backed tree can be reopened.

use crate::btree::internal::InternalNode;
use crate::btree::leaf::LeafNode;
use crate::btree::node::{Key, Node, NodeError, NodeId, Record};
use crate::btree::store::{NodeStore, StoreError};
use crate::config::{ConfigError, TreeConfig};
use crate::storage::{Pager, PagerError, Superblock, SuperblockError};

/// A B+ tree of `Record`s keyed by `Key`.
pub struct Tree<P: Pager> {
    store: NodeStore<P>,
    root: NodeId,
    config: TreeConfig,
}

impl<P: Pager> Tree<P> {
    /// Create an empty tree on a fresh pager.
    ///
    /// Writes an empty root leaf and the superblock.
    pub fn create(pager: P, config: TreeConfig) -> Result<Self, TreeError> {
        check_geometry(&pager, &config)?;

        let mut store = NodeStore::new(pager, config.order);
        let root = store.allocate_id()?;
        store.persist(&LeafNode::new(root))?;

        let mut tree = Self {
            store,
            root,
            config,
        };
        tree.write_superblock()?;

        tracing::info!(
            order = config.order,
            page_size = config.page_size,
            page_count = config.page_count,
            "created tree"
        );
        Ok(tree)
    }

    /// Open a tree previously written to `pager`.
    ///
    /// The id bitmap is rebuilt by walking every node reachable from the root.
    pub fn open(pager: P, config: TreeConfig) -> Result<Self, TreeError> {
        check_geometry(&pager, &config)?;

        let mut store = NodeStore::new(pager, config.order);
        let superblock = store.read_superblock()?;
        if superblock.order as usize != config.order {
            return Err(TreeError::Superblock(SuperblockError::OrderMismatch {
                stored: superblock.order,
                configured: u32::try_from(config.order).unwrap_or(u32::MAX),
            }));
        }
        if superblock.page_count != config.page_count {
            return Err(TreeError::Config(ConfigError::InvalidValue {
                name: "page_count".to_string(),
                message: format!(
                    "file was created with {} pages, configured {}",
                    superblock.page_count, config.page_count
                ),
            }));
        }

        let root = NodeId::from_page(superblock.root);
        let mut pending = vec![root];
        let mut nodes = 0u64;
        while let Some(id) = pending.pop() {
            store.claim_id(id)?;
            if let Node::Internal(node) = store.load(id)? {
                pending.extend_from_slice(node.children());
            }
            nodes += 1;
        }

        tracing::info!(root = %root, nodes, "opened tree");
        Ok(Self {
            store,
            root,
            config,
        })
    }

    /// Look up a record by key.
    pub fn search(&mut self, key: Key) -> Result<Option<Record>, TreeError> {
        let root = self.store.load(self.root)?;
        root.search(&mut self.store, key)
    }

    /// Insert a record. Returns `false`, changing nothing, if the key exists.
    pub fn insert(&mut self, record: Record) -> Result<bool, TreeError> {
        self.check_value(&record)?;
        if self.search(record.key)?.is_some() {
            return Ok(false);
        }

        let order = self.config.order;
        let mut root = self.store.load(self.root)?;
        if root.is_full(order) {
            // Both ids are taken before the old root is rewritten.
            let root_id = self.store.allocate_id()?;
            let split = match root.split_self(&mut self.store, order / 2) {
                Ok(split) => split,
                Err(e) => {
                    self.store.release_id(root_id)?;
                    return Err(e);
                }
            };
            let new_root =
                InternalNode::with_children(root_id, split.left, split.promoted, split.right);
            self.store.persist(&new_root)?;
            self.root = new_root.id();
            self.write_superblock()?;

            tracing::debug!(root = %self.root, "tree grew a level");
            root = Node::Internal(new_root);
        }

        root.insert(&mut self.store, record)
    }

    /// Delete a record by key. Returns `false`, changing nothing, if absent.
    pub fn delete(&mut self, key: Key) -> Result<bool, TreeError> {
        if self.search(key)?.is_none() {
            return Ok(false);
        }

        let mut root = self.store.load(self.root)?;
        root.delete(&mut self.store, key)
    }

    /// Replace the value of an existing record. Returns `false` if absent.
    pub fn set(&mut self, record: Record) -> Result<bool, TreeError> {
        self.check_value(&record)?;
        let mut root = self.store.load(self.root)?;
        root.set(&mut self.store, record)
    }

    /// Cursor over every record in key order, following the leaf chain.
    pub fn cursor(&mut self) -> Result<Cursor<'_, P>, TreeError> {
        let leaf = self.leftmost_leaf()?;
        Ok(Cursor {
            store: &mut self.store,
            leaf: Some(leaf),
            index: 0,
        })
    }

    /// All records in key order.
    pub fn scan(&mut self) -> Result<Vec<Record>, TreeError> {
        let mut cursor = self.cursor()?;
        let mut records = Vec::new();
        while let Some(record) = cursor.next_record()? {
            records.push(record);
        }
        Ok(records)
    }

    /// Records grouped by leaf, left to right.
    pub fn snapshot(&mut self) -> Result<Vec<Vec<Record>>, TreeError> {
        let mut leaves = Vec::new();
        let mut next = Some(self.leftmost_leaf()?);
        while let Some(leaf) = next {
            next = match leaf.next_leaf() {
                Some(id) => Some(self.load_leaf(id)?),
                None => None,
            };
            leaves.push(leaf.records().to_vec());
        }
        Ok(leaves)
    }

    /// Number of records.
    pub fn len(&mut self) -> Result<usize, TreeError> {
        Ok(self.snapshot()?.iter().map(Vec::len).sum())
    }

    /// Whether the tree holds no records.
    pub fn is_empty(&mut self) -> Result<bool, TreeError> {
        Ok(self.cursor()?.next_record()?.is_none())
    }

    /// Number of levels; a lone root leaf has height 1.
    pub fn height(&mut self) -> Result<usize, TreeError> {
        let mut height = 1;
        let mut node = self.store.load(self.root)?;
        while let Node::Internal(internal) = node {
            node = self.store.load(internal.children()[0])?;
            height += 1;
        }
        Ok(height)
    }

    /// Whether the root is a leaf.
    pub fn root_is_leaf(&mut self) -> Result<bool, TreeError> {
        Ok(self.store.load(self.root)?.is_leaf())
    }

    /// Current root id.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    #[must_use]
    pub const fn config(&self) -> &TreeConfig {
        &self.config
    }

    #[must_use]
    pub const fn store(&self) -> &NodeStore<P> {
        &self.store
    }

    pub const fn store_mut(&mut self) -> &mut NodeStore<P> {
        &mut self.store
    }

    /// Flush the pager.
    pub fn sync(&mut self) -> Result<(), TreeError> {
        self.store.sync()?;
        Ok(())
    }

    /// Consume the tree and return the pager.
    pub fn into_pager(self) -> P {
        self.store.into_pager()
    }

    fn check_value(&self, record: &Record) -> Result<(), TreeError> {
        if record.value.len() > self.config.max_value_len {
            return Err(TreeError::ValueTooLarge {
                key: record.key,
                len: record.value.len(),
                max: self.config.max_value_len,
            });
        }
        Ok(())
    }

    fn write_superblock(&mut self) -> Result<(), TreeError> {
        let superblock = Superblock::new(
            self.config.page_size,
            self.config.page_count,
            self.config.order,
            self.root.page(),
        );
        self.store.write_superblock(&superblock)?;
        Ok(())
    }

    fn leftmost_leaf(&mut self) -> Result<LeafNode, TreeError> {
        let mut node = self.store.load(self.root)?;
        loop {
            match node {
                Node::Internal(internal) => node = self.store.load(internal.children()[0])?,
                Node::Leaf(leaf) => return Ok(leaf),
            }
        }
    }

    pub(crate) fn load_leaf(&mut self, id: NodeId) -> Result<LeafNode, TreeError> {
        load_leaf(&mut self.store, id)
    }
}

fn load_leaf<P: Pager>(store: &mut NodeStore<P>, id: NodeId) -> Result<LeafNode, TreeError> {
    match store.load(id)? {
        Node::Leaf(leaf) => Ok(leaf),
        Node::Internal(_) => Err(TreeError::Structure(format!(
            "leaf chain points at internal node {id}"
        ))),
    }
}

fn check_geometry<P: Pager>(pager: &P, config: &TreeConfig) -> Result<(), TreeError> {
    config.validate()?;
    if pager.page_size() != config.page_size {
        return Err(TreeError::Config(ConfigError::InvalidValue {
            name: "page_size".to_string(),
            message: format!(
                "pager has {}-byte pages, configured {}",
                pager.page_size(),
                config.page_size
            ),
        }));
    }
    if pager.page_count() != config.page_count {
        return Err(TreeError::Config(ConfigError::InvalidValue {
            name: "page_count".to_string(),
            message: format!(
                "pager has {} pages, configured {}",
                pager.page_count(),
                config.page_count
            ),
        }));
    }
    Ok(())
}

/// Forward cursor over the leaf chain.
pub struct Cursor<'a, P: Pager> {
    store: &'a mut NodeStore<P>,
    leaf: Option<LeafNode>,
    index: usize,
}

impl<P: Pager> Cursor<'_, P> {
    /// The next record in key order, or `None` at the end.
    pub fn next_record(&mut self) -> Result<Option<Record>, TreeError> {
        loop {
            let Some(leaf) = &self.leaf else {
                return Ok(None);
            };

            if let Some(record) = leaf.records().get(self.index) {
                self.index += 1;
                return Ok(Some(record.clone()));
            }

            self.leaf = match leaf.next_leaf() {
                Some(id) => Some(load_leaf(self.store, id)?),
                None => None,
            };
            self.index = 0;
        }
    }
}

/// Errors from tree operations.
#[derive(Debug)]
pub enum TreeError {
    /// Node store failure, including capacity limits.
    Store(StoreError),
    /// The superblock is missing, corrupt or disagrees with the configuration.
    Superblock(SuperblockError),
    /// The configuration is invalid or doesn't match the pager.
    Config(ConfigError),
    /// A value is longer than the configured maximum.
    ValueTooLarge { key: Key, len: usize, max: usize },
    /// The tree's structure is inconsistent.
    Structure(String),
}

impl TreeError {
    pub(crate) fn mismatched(operation: &str, a: NodeId, b: NodeId) -> Self {
        Self::Structure(format!(
            "cannot {operation} between {a} and {b}: one is a leaf, the other is not"
        ))
    }

    /// Whether the error comes from a capacity limit rather than a fault.
    #[must_use]
    pub const fn is_capacity(&self) -> bool {
        match self {
            Self::Store(e) => e.is_capacity(),
            Self::ValueTooLarge { .. } => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Superblock(e) => write!(f, "superblock error: {e}"),
            Self::Config(e) => write!(f, "config error: {e}"),
            Self::ValueTooLarge { key, len, max } => write!(
                f,
                "value for key {key} is {len} bytes, the maximum is {max}"
            ),
            Self::Structure(msg) => write!(f, "corrupt tree structure: {msg}"),
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Superblock(e) => Some(e),
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for TreeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Superblock(e) => Self::Superblock(e),
            e => Self::Store(e),
        }
    }
}

impl From<PagerError> for TreeError {
    fn from(e: PagerError) -> Self {
        Self::Store(StoreError::Pager(e))
    }
}

impl From<NodeError> for TreeError {
    fn from(e: NodeError) -> Self {
        Self::Store(StoreError::Node(e))
    }
}

impl From<ConfigError> for TreeError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
