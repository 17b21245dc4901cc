// Layers, bottom up:
// 1. storage: fixed-size pages, the Pager contract (file and memory), id bitmap, superblock
// 2. btree: node codec, node store, the tree algorithm and its invariant checker
// 3. record_manager / transaction / database: keyed access, undo log, commit + sync
// 4. script: the command language the binary runs
//
// The tree only talks to pages through the node store, and only the tree
// replaces the root.

pub mod btree;
pub mod config;
pub mod database;
pub mod record_manager;
pub mod script;
pub mod storage;
pub mod transaction;

pub use btree::{Key, Record, Tree, TreeError};
pub use config::TreeConfig;
pub use database::{Database, DatabaseError};
pub use record_manager::RecordManager;
pub use transaction::{LogItem, Transaction, TransactionError};
