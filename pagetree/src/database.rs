//! High-level database interface.
//!
//! A `Database` owns a tree and hands out one transaction at a time through
//! `update`. Committed transactions are flushed to the pager.

use std::path::Path;

use crate::btree::{Key, Record, Tree, TreeError};
use crate::config::TreeConfig;
use crate::record_manager::RecordManager;
use crate::storage::{FileError, FilePager, Pager};
use crate::transaction::{Transaction, TransactionError, TxId};

/// A database instance.
pub struct Database<P: Pager> {
    tree: Tree<P>,
    next_tx_id: TxId,
}

impl<P: Pager> Database<P> {
    /// Create a database with an empty tree on a fresh pager.
    pub fn create(pager: P, config: TreeConfig) -> Result<Self, DatabaseError> {
        Ok(Self::with_tree(Tree::create(pager, config)?))
    }

    /// Open the database stored on `pager`.
    pub fn open(pager: P, config: TreeConfig) -> Result<Self, DatabaseError> {
        Ok(Self::with_tree(Tree::open(pager, config)?))
    }

    const fn with_tree(tree: Tree<P>) -> Self {
        Self {
            tree,
            next_tx_id: 1,
        }
    }

    #[must_use]
    pub const fn tree(&self) -> &Tree<P> {
        &self.tree
    }

    pub const fn tree_mut(&mut self) -> &mut Tree<P> {
        &mut self.tree
    }

    /// Run `f` inside a transaction.
    ///
    /// If `f` returns `Ok(true)` the transaction commits and the pager is
    /// synced. On `Ok(false)` or an error every change `f` made is undone.
    /// Returns whether the transaction committed.
    pub fn update<F>(&mut self, f: F) -> Result<bool, DatabaseError>
    where
        F: FnOnce(&mut Transaction<'_, Tree<P>>) -> Result<bool, TransactionError>,
    {
        let tx_id = self.next_tx_id;
        self.next_tx_id += 1;

        let mut tx = Transaction::begin(&mut self.tree, tx_id);
        match f(&mut tx) {
            Ok(true) => {
                tx.commit();
                self.tree.sync()?;
                Ok(true)
            }
            Ok(false) => {
                tx.roll_back()?;
                Ok(false)
            }
            Err(e) => {
                if let Err(undo) = tx.roll_back() {
                    tracing::error!(tx_id, "roll back after failed transaction also failed: {undo}");
                }
                Err(e.into())
            }
        }
    }

    /// Flush the pager.
    pub fn flush(&mut self) -> Result<(), DatabaseError> {
        self.tree.sync()?;
        Ok(())
    }

    /// Close the database and return the pager.
    pub fn into_pager(self) -> P {
        self.tree.into_pager()
    }
}

impl Database<FilePager> {
    /// Open the database file at `path`, creating it with `config` if it doesn't exist.
    pub fn open_or_create(path: &Path, config: TreeConfig) -> Result<Self, DatabaseError> {
        if path.exists() {
            let pager = FilePager::open(path, config.page_size, config.page_count)?;
            Self::open(pager, config)
        } else {
            let pager = FilePager::create(path, config.page_size, config.page_count)?;
            Self::create(pager, config)
        }
    }
}

impl<P: Pager> RecordManager for Database<P> {
    fn search(&mut self, key: Key) -> Result<Option<Record>, TreeError> {
        self.tree.search(key)
    }

    fn insert(&mut self, record: Record) -> Result<bool, TreeError> {
        self.tree.insert(record)
    }

    fn delete(&mut self, key: Key) -> Result<bool, TreeError> {
        self.tree.delete(key)
    }

    fn set(&mut self, record: Record) -> Result<bool, TreeError> {
        self.tree.set(record)
    }
}

/// Errors that can occur during database operations.
#[derive(Debug)]
pub enum DatabaseError {
    /// Database file error.
    File(FileError),
    /// Tree error.
    Tree(TreeError),
    /// Transaction error.
    Transaction(TransactionError),
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(e) => write!(f, "file error: {e}"),
            Self::Tree(e) => write!(f, "tree error: {e}"),
            Self::Transaction(e) => write!(f, "transaction error: {e}"),
        }
    }
}

impl std::error::Error for DatabaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::File(e) => Some(e),
            Self::Tree(e) => Some(e),
            Self::Transaction(e) => Some(e),
        }
    }
}

impl From<FileError> for DatabaseError {
    fn from(e: FileError) -> Self {
        Self::File(e)
    }
}

impl From<TreeError> for DatabaseError {
    fn from(e: TreeError) -> Self {
        Self::Tree(e)
    }
}

impl From<TransactionError> for DatabaseError {
    fn from(e: TransactionError) -> Self {
        Self::Transaction(e)
    }
}
