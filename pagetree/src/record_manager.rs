//! The record manager contract shared by the tree, the database and transactions.

use crate::btree::{Key, Record, Tree, TreeError};
use crate::storage::Pager;

/// Keyed record storage.
///
/// Absent keys and duplicate inserts are reported through `Option` / `bool`;
/// errors are reserved for I/O, capacity and corruption.
pub trait RecordManager {
    /// Look up a record by key.
    fn search(&mut self, key: Key) -> Result<Option<Record>, TreeError>;

    /// Insert a new record. Returns `false` if the key already exists.
    fn insert(&mut self, record: Record) -> Result<bool, TreeError>;

    /// Delete a record. Returns `false` if the key is absent.
    fn delete(&mut self, key: Key) -> Result<bool, TreeError>;

    /// Overwrite an existing record's value. Returns `false` if the key is absent.
    fn set(&mut self, record: Record) -> Result<bool, TreeError>;
}

impl<P: Pager> RecordManager for Tree<P> {
    fn search(&mut self, key: Key) -> Result<Option<Record>, TreeError> {
        Self::search(self, key)
    }

    fn insert(&mut self, record: Record) -> Result<bool, TreeError> {
        Self::insert(self, record)
    }

    fn delete(&mut self, key: Key) -> Result<bool, TreeError> {
        Self::delete(self, key)
    }

    fn set(&mut self, record: Record) -> Result<bool, TreeError> {
        Self::set(self, record)
    }
}
