//! Single-writer transactions with an in-memory undo log.
//!
//! Changes are applied to the underlying record manager immediately. The log
//! remembers enough to undo each one, and abort replays the inverses newest
//! first. There is no isolation and nothing survives a crash.

use crate::btree::{Key, Record, TreeError};
use crate::record_manager::RecordManager;

/// Transaction identifier.
pub type TxId = u64;

/// One entry of a transaction's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogItem {
    Begin {
        tx_id: TxId,
    },
    Insert {
        tx_id: TxId,
        key: Key,
        value: String,
    },
    Delete {
        tx_id: TxId,
        key: Key,
        value: String,
    },
    Set {
        tx_id: TxId,
        key: Key,
        old_value: String,
        new_value: String,
    },
    Commit {
        tx_id: TxId,
    },
    Abort {
        tx_id: TxId,
    },
}

impl std::fmt::Display for LogItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Begin { tx_id } => write!(f, "begin {tx_id}"),
            Self::Insert { tx_id, key, value } => write!(f, "insert {tx_id} {key} {value}"),
            Self::Delete { tx_id, key, value } => write!(f, "delete {tx_id} {key} {value}"),
            Self::Set {
                tx_id,
                key,
                old_value,
                new_value,
            } => write!(f, "set {tx_id} {key} {old_value} {new_value}"),
            Self::Commit { tx_id } => write!(f, "commit {tx_id}"),
            Self::Abort { tx_id } => write!(f, "abort {tx_id}"),
        }
    }
}

/// A transaction over a record manager.
///
/// Must be finished with `commit` or `roll_back`.
pub struct Transaction<'a, R: RecordManager> {
    manager: &'a mut R,
    tx_id: TxId,
    log: Vec<LogItem>,
    finished: bool,
}

impl<'a, R: RecordManager> Transaction<'a, R> {
    /// Begin a transaction.
    pub fn begin(manager: &'a mut R, tx_id: TxId) -> Self {
        tracing::debug!(tx_id, "begin transaction");
        Self {
            manager,
            tx_id,
            log: vec![LogItem::Begin { tx_id }],
            finished: false,
        }
    }

    #[must_use]
    pub const fn tx_id(&self) -> TxId {
        self.tx_id
    }

    /// Entries logged so far.
    #[must_use]
    pub fn log(&self) -> &[LogItem] {
        &self.log
    }

    pub fn search(&mut self, key: Key) -> Result<Option<Record>, TransactionError> {
        Ok(self.manager.search(key)?)
    }

    /// Insert a record, logging it if it was new.
    pub fn insert(&mut self, record: Record) -> Result<bool, TransactionError> {
        let (key, value) = (record.key, record.value.clone());
        if !self.manager.insert(record)? {
            return Ok(false);
        }
        self.log.push(LogItem::Insert {
            tx_id: self.tx_id,
            key,
            value,
        });
        Ok(true)
    }

    /// Delete a record, logging its last value.
    pub fn delete(&mut self, key: Key) -> Result<bool, TransactionError> {
        let Some(old) = self.manager.search(key)? else {
            return Ok(false);
        };
        if !self.manager.delete(key)? {
            return Ok(false);
        }
        self.log.push(LogItem::Delete {
            tx_id: self.tx_id,
            key,
            value: old.value,
        });
        Ok(true)
    }

    /// Overwrite a record's value, logging both versions.
    pub fn set(&mut self, record: Record) -> Result<bool, TransactionError> {
        let Some(old) = self.manager.search(record.key)? else {
            return Ok(false);
        };
        let (key, new_value) = (record.key, record.value.clone());
        if !self.manager.set(record)? {
            return Ok(false);
        }
        self.log.push(LogItem::Set {
            tx_id: self.tx_id,
            key,
            old_value: old.value,
            new_value,
        });
        Ok(true)
    }

    /// Finish the transaction, keeping its changes.
    ///
    /// Returns the complete log. Durability is the caller's job.
    pub fn commit(mut self) -> Vec<LogItem> {
        self.log.push(LogItem::Commit { tx_id: self.tx_id });
        self.finished = true;
        tracing::debug!(tx_id = self.tx_id, changes = self.log.len() - 2, "commit");
        std::mem::take(&mut self.log)
    }

    /// Undo every logged change, newest first.
    ///
    /// Returns the complete log, ending in `Abort`.
    pub fn roll_back(mut self) -> Result<Vec<LogItem>, TransactionError> {
        // Finished even if an undo fails; a half-undone transaction can't be retried.
        self.finished = true;

        for item in self.log.iter().rev() {
            let undone = match item {
                LogItem::Insert { key, .. } => self.manager.delete(*key)?,
                LogItem::Delete { key, value, .. } => {
                    self.manager.insert(Record::new(*key, value.clone()))?
                }
                LogItem::Set { key, old_value, .. } => {
                    self.manager.set(Record::new(*key, old_value.clone()))?
                }
                LogItem::Begin { .. } | LogItem::Commit { .. } | LogItem::Abort { .. } => true,
            };
            if !undone {
                return Err(TransactionError::UndoFailed(item.to_string()));
            }
        }

        self.log.push(LogItem::Abort { tx_id: self.tx_id });
        tracing::debug!(tx_id = self.tx_id, "rolled back");
        Ok(std::mem::take(&mut self.log))
    }
}

impl<R: RecordManager> Drop for Transaction<'_, R> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                tx_id = self.tx_id,
                "transaction dropped without commit or roll back, its changes stay applied"
            );
        }
    }
}

/// Errors that can occur during transaction operations.
#[derive(Debug)]
pub enum TransactionError {
    /// The underlying tree failed.
    Tree(TreeError),
    /// An undo step found the record in an unexpected state.
    UndoFailed(String),
}

impl std::fmt::Display for TransactionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tree(e) => write!(f, "tree error: {e}"),
            Self::UndoFailed(item) => write!(f, "could not undo '{item}'"),
        }
    }
}

impl std::error::Error for TransactionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tree(e) => Some(e),
            Self::UndoFailed(_) => None,
        }
    }
}

impl From<TreeError> for TransactionError {
    fn from(e: TreeError) -> Self {
        Self::Tree(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::Tree;
    use crate::config::TreeConfig;
    use crate::storage::MemoryPager;

    fn tree() -> Tree<MemoryPager> {
        let mut tree =
            Tree::create(MemoryPager::new(1024, 256), TreeConfig::default()).expect("create");
        for key in 1..=5 {
            tree.insert(Record::new(key, format!("value{key}")))
                .expect("insert");
        }
        tree
    }

    #[test]
    fn test_commit_keeps_changes_and_logs_them() {
        let mut tree = tree();

        let mut tx = Transaction::begin(&mut tree, 999);
        assert!(tx.insert(Record::new(6, "six")).expect("insert"));
        assert!(!tx.insert(Record::new(6, "again")).expect("insert"));
        assert!(tx.delete(2).expect("delete"));
        assert!(!tx.delete(42).expect("delete"));
        assert!(tx.set(Record::new(3, "three")).expect("set"));
        let log = tx.commit();

        let lines: Vec<String> = log.iter().map(ToString::to_string).collect();
        assert_eq!(
            lines,
            vec![
                "begin 999",
                "insert 999 6 six",
                "delete 999 2 value2",
                "set 999 3 value3 three",
                "commit 999",
            ]
        );

        assert_eq!(tree.search(6).expect("search"), Some(Record::new(6, "six")));
        assert_eq!(tree.search(2).expect("search"), None);
        assert_eq!(tree.search(3).expect("search"), Some(Record::new(3, "three")));
    }

    #[test]
    fn test_roll_back_restores_prior_state() {
        let mut tree = tree();
        let before = tree.scan().expect("scan");

        let mut tx = Transaction::begin(&mut tree, 1);
        for key in 10..40 {
            tx.insert(Record::new(key, "new")).expect("insert");
        }
        tx.delete(1).expect("delete");
        tx.set(Record::new(4, "changed")).expect("set");
        tx.set(Record::new(4, "changed twice")).expect("set");
        tx.delete(12).expect("delete");
        let log = tx.roll_back().expect("roll back");

        assert_eq!(log.last(), Some(&LogItem::Abort { tx_id: 1 }));
        assert_eq!(tree.scan().expect("scan"), before);
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn test_undo_of_vanished_record_fails() {
        let mut tree = tree();

        let mut tx = Transaction::begin(&mut tree, 7);
        tx.insert(Record::new(100, "x")).expect("insert");
        // Sneak around the transaction so the undo finds nothing to delete
        tx.manager.delete(100).expect("delete");

        assert!(matches!(tx.roll_back(), Err(TransactionError::UndoFailed(_))));
    }
}
