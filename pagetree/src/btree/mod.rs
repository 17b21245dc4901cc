//! B+ tree engine.
//!
//! Records live only in leaves; internal nodes hold separator keys and child
//! ids. Leaves are chained left to right for ordered scans. Every node is one
//! page, addressed by its `NodeId`, and is only reachable through the
//! `NodeStore`.
//!
//! # Usage
//!
//! ```
//! use pagetree::btree::{Record, Tree};
//! use pagetree::config::TreeConfig;
//! use pagetree::storage::MemoryPager;
//!
//! let config = TreeConfig::default();
//! let pager = MemoryPager::new(config.page_size, config.page_count);
//! let mut tree = Tree::create(pager, config).unwrap();
//!
//! assert!(tree.insert(Record::new(1, "one")).unwrap());
//! assert!(!tree.insert(Record::new(1, "uno")).unwrap());
//! assert_eq!(tree.search(1).unwrap(), Some(Record::new(1, "one")));
//! ```

mod internal;
mod invariants;
mod leaf;
mod node;
mod store;
mod tree;

pub use internal::InternalNode;
pub use leaf::LeafNode;
pub(crate) use node::DATA_OFFSET;
pub use node::{
    KEY_SIZE, Key, LEAF_ENTRY_OVERHEAD, Node, NodeError, NodeId, NodePage, POINTER_SIZE, Record,
    Split, internal_node_size, leaf_node_size,
};
pub use store::{NodeStore, StoreError};
pub use tree::{Cursor, Tree, TreeError};
