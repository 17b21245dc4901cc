//! Leaf nodes.
//!
//! Page body: `count` entries of `key` (8 bytes), `value_len` (2 bytes) and
//! the UTF-8 value bytes. The node header's `next_leaf` links the leaf to its
//! right neighbor.

#![allow(clippy::cast_possible_truncation)]

use crate::btree::node::{
    DATA_OFFSET, KEY_SIZE, Key, LEAF_ENTRY_OVERHEAD, NodeError, NodeId, NodePage, Record,
    ensure_fits, read_node_header, write_node_header,
};
use crate::btree::store::NodeStore;
use crate::btree::tree::TreeError;
use crate::storage::{Page, PageType, Pager};

/// A leaf node holding records sorted by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    id: NodeId,
    records: Vec<Record>,
    next_leaf: Option<NodeId>,
}

impl LeafNode {
    /// An empty leaf with no right neighbor.
    #[must_use]
    pub const fn new(id: NodeId) -> Self {
        Self {
            id,
            records: Vec::new(),
            next_leaf: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// The leaf immediately to the right, if any.
    #[must_use]
    pub const fn next_leaf(&self) -> Option<NodeId> {
        self.next_leaf
    }

    /// Look up a record by key.
    #[must_use]
    pub fn get(&self, key: Key) -> Option<&Record> {
        self.records
            .binary_search_by_key(&key, |r| r.key)
            .ok()
            .map(|i| &self.records[i])
    }

    /// Insert keeping key order. Returns `false` if the key is present.
    pub(crate) fn insert_record(&mut self, record: Record) -> bool {
        match self.records.binary_search_by_key(&record.key, |r| r.key) {
            Ok(_) => false,
            Err(index) => {
                self.records.insert(index, record);
                true
            }
        }
    }

    /// Remove a record by key.
    pub(crate) fn remove(&mut self, key: Key) -> Option<Record> {
        let index = self.records.binary_search_by_key(&key, |r| r.key).ok()?;
        Some(self.records.remove(index))
    }

    /// Replace the value of an existing record. Returns `false` if absent.
    pub(crate) fn replace(&mut self, record: Record) -> bool {
        match self.records.binary_search_by_key(&record.key, |r| r.key) {
            Ok(index) => {
                self.records[index].value = record.value;
                true
            }
            Err(_) => false,
        }
    }

    /// Keep the first `split_point + 1` records here and move the rest to a
    /// new leaf `right_id`, linked in right after this one.
    ///
    /// Returns the first key of the new leaf and the leaf itself.
    pub(crate) fn split_self(
        &mut self,
        split_point: usize,
        right_id: NodeId,
    ) -> Result<(Key, Self), TreeError> {
        if split_point + 1 >= self.records.len() {
            return Err(TreeError::Structure(format!(
                "cannot split leaf {} with {} records at {split_point}",
                self.id,
                self.records.len()
            )));
        }

        let right = Self {
            id: right_id,
            records: self.records.split_off(split_point + 1),
            next_leaf: self.next_leaf,
        };
        self.next_leaf = Some(right_id);

        Ok((right.records[0].key, right))
    }

    /// Move the first record to the end of `brother`, the left sibling.
    ///
    /// Returns the new first key here, the parent's new separator.
    pub(crate) fn lend_first_to(&mut self, _demoted: Key, brother: &mut Self) -> Result<Key, TreeError> {
        if self.records.len() < 2 {
            return Err(TreeError::Structure(format!(
                "leaf {} has too few records to lend",
                self.id
            )));
        }

        let record = self.records.remove(0);
        brother.records.push(record);
        Ok(self.records[0].key)
    }

    /// Move the last record to the front of `brother`, the right sibling.
    ///
    /// Returns the moved key, the parent's new separator.
    pub(crate) fn lend_last_to(&mut self, _demoted: Key, brother: &mut Self) -> Result<Key, TreeError> {
        if self.records.len() < 2 {
            return Err(TreeError::Structure(format!(
                "leaf {} has too few records to lend",
                self.id
            )));
        }

        let Some(record) = self.records.pop() else {
            return Err(TreeError::Structure(format!("leaf {} is empty", self.id)));
        };
        let key = record.key;
        brother.records.insert(0, record);
        Ok(key)
    }

    /// Append the records of `right`, which must be the next leaf in the chain.
    pub(crate) fn merge_with(&mut self, right: Self) -> Result<(), TreeError> {
        if self.next_leaf != Some(right.id) {
            return Err(TreeError::Structure(format!(
                "cannot merge leaf {} into {}: not adjacent",
                right.id, self.id
            )));
        }

        self.records.extend(right.records);
        self.next_leaf = right.next_leaf;
        Ok(())
    }

    pub(crate) fn insert<P: Pager>(
        &mut self,
        store: &mut NodeStore<P>,
        record: Record,
    ) -> Result<bool, TreeError> {
        if !self.insert_record(record) {
            return Ok(false);
        }
        store.persist(&*self)?;
        Ok(true)
    }

    pub(crate) fn delete<P: Pager>(
        &mut self,
        store: &mut NodeStore<P>,
        key: Key,
    ) -> Result<bool, TreeError> {
        if self.remove(key).is_none() {
            return Ok(false);
        }
        store.persist(&*self)?;
        Ok(true)
    }

    pub(crate) fn set<P: Pager>(
        &mut self,
        store: &mut NodeStore<P>,
        record: Record,
    ) -> Result<bool, TreeError> {
        if !self.replace(record) {
            return Ok(false);
        }
        store.persist(&*self)?;
        Ok(true)
    }

    /// Read a leaf from a page.
    pub fn from_page(id: NodeId, page: &Page) -> Result<Self, NodeError> {
        let (count, next_leaf) = read_node_header(page);
        let mut records = Vec::with_capacity(count);

        let mut offset = DATA_OFFSET;
        for _ in 0..count {
            ensure_fits(id, page, offset, LEAF_ENTRY_OVERHEAD)?;
            let key = page.read_i64(offset);
            let len = page.read_u16(offset + KEY_SIZE) as usize;
            offset += LEAF_ENTRY_OVERHEAD;

            ensure_fits(id, page, offset, len)?;
            let value = String::from_utf8(page.read_bytes(offset, len).to_vec())
                .map_err(|_| NodeError::InvalidUtf8 { id, key })?;
            offset += len;

            records.push(Record { key, value });
        }

        Ok(Self {
            id,
            records,
            next_leaf,
        })
    }
}

impl NodePage for LeafNode {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn encoded_len(&self) -> usize {
        DATA_OFFSET
            + self
                .records
                .iter()
                .map(|r| LEAF_ENTRY_OVERHEAD + r.value.len())
                .sum::<usize>()
    }

    fn write_to_page(&self, page: &mut Page) {
        write_node_header(page, PageType::TreeLeaf, self.records.len(), self.next_leaf);

        let mut offset = DATA_OFFSET;
        for record in &self.records {
            page.write_i64(offset, record.key);
            page.write_u16(offset + KEY_SIZE, record.value.len() as u16);
            offset += LEAF_ENTRY_OVERHEAD;
            page.write_bytes(offset, record.value.as_bytes());
            offset += record.value.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(page: u64) -> NodeId {
        NodeId::from_page(page)
    }

    fn leaf(page: u64, keys: &[Key]) -> LeafNode {
        let mut node = LeafNode::new(id(page));
        for &key in keys {
            assert!(node.insert_record(Record::new(key, format!("v{key}"))));
        }
        node
    }

    fn keys(node: &LeafNode) -> Vec<Key> {
        node.records().iter().map(|r| r.key).collect()
    }

    #[test]
    fn test_records_stay_sorted() {
        let mut node = leaf(1, &[5, -1, 3, 9, 0]);
        assert_eq!(keys(&node), vec![-1, 0, 3, 5, 9]);

        assert!(!node.insert_record(Record::new(3, "dup")));
        assert_eq!(node.get(3).map(|r| r.value.as_str()), Some("v3"));

        assert_eq!(node.remove(0).map(|r| r.key), Some(0));
        assert!(node.remove(0).is_none());
        assert_eq!(keys(&node), vec![-1, 3, 5, 9]);
    }

    #[test]
    fn test_replace_only_existing() {
        let mut node = leaf(1, &[1, 2]);
        assert!(node.replace(Record::new(2, "two")));
        assert!(!node.replace(Record::new(3, "three")));
        assert_eq!(node.get(2).map(|r| r.value.as_str()), Some("two"));
        assert!(node.get(3).is_none());
    }

    #[test]
    fn test_split_keeps_prefix_and_links_right() {
        let mut left = leaf(1, &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        left.next_leaf = Some(id(40));

        let (promoted, right) = left.split_self(4, id(2)).expect("split");

        assert_eq!(promoted, 6);
        assert_eq!(keys(&left), vec![1, 2, 3, 4, 5]);
        assert_eq!(keys(&right), vec![6, 7, 8, 9]);
        assert_eq!(left.next_leaf(), Some(id(2)));
        assert_eq!(right.next_leaf(), Some(id(40)));
    }

    #[test]
    fn test_split_then_merge_restores_leaf() {
        let mut original = leaf(1, &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        original.next_leaf = Some(id(40));

        let mut left = original.clone();
        let (_, right) = left.split_self(4, id(2)).expect("split");
        left.merge_with(right).expect("merge");

        assert_eq!(left, original);
    }

    #[test]
    fn test_split_needs_nonempty_right() {
        let mut node = leaf(1, &[1, 2, 3]);
        assert!(node.split_self(2, id(2)).is_err());
        assert_eq!(keys(&node), vec![1, 2, 3]);
    }

    #[test]
    fn test_merge_requires_adjacency() {
        let mut left = leaf(1, &[1, 2]);
        let right = leaf(2, &[5, 6]);
        assert!(matches!(left.merge_with(right), Err(TreeError::Structure(_))));
    }

    #[test]
    fn test_lend_between_siblings() {
        let mut left = leaf(1, &[1, 2]);
        let mut right = leaf(2, &[5, 6, 7]);

        let separator = right.lend_first_to(5, &mut left).expect("lend first");
        assert_eq!(separator, 6);
        assert_eq!(keys(&left), vec![1, 2, 5]);
        assert_eq!(keys(&right), vec![6, 7]);

        let separator = left.lend_last_to(6, &mut right).expect("lend last");
        assert_eq!(separator, 5);
        assert_eq!(keys(&left), vec![1, 2]);
        assert_eq!(keys(&right), vec![5, 6, 7]);
    }

    #[test]
    fn test_page_roundtrip_with_utf8_and_empty_values() {
        let mut node = LeafNode::new(id(3));
        node.insert_record(Record::new(1, ""));
        node.insert_record(Record::new(2, "héllo wörld"));
        node.insert_record(Record::new(i64::MIN, "min"));
        node.next_leaf = Some(id(9));

        let mut page = Page::new(256);
        node.write_to_page(&mut page);

        let restored = LeafNode::from_page(id(3), &page).expect("parse");
        assert_eq!(restored, node);
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let node = leaf(1, &[7]);
        let mut page = Page::new(128);
        node.write_to_page(&mut page);
        page.write_bytes(DATA_OFFSET + LEAF_ENTRY_OVERHEAD, &[0xFF, 0xFE]);

        assert!(matches!(
            LeafNode::from_page(id(1), &page),
            Err(NodeError::InvalidUtf8 { key: 7, .. })
        ));
    }

    #[test]
    fn test_value_length_past_page_end_rejected() {
        let node = leaf(1, &[7]);
        let mut page = Page::new(64);
        node.write_to_page(&mut page);
        page.write_u16(DATA_OFFSET + KEY_SIZE, 500);

        assert!(matches!(
            LeafNode::from_page(id(1), &page),
            Err(NodeError::Truncated { .. })
        ));
    }
}
