//! Internal (routing) nodes.
//!
//! Page body: the first child pointer, then `count` (key, child) pairs.
//! `children[i]` holds keys below `keys[i]`; `children[i + 1]` holds keys at
//! or above it.

use crate::btree::node::{
    DATA_OFFSET, KEY_SIZE, Key, Node, NodeError, NodeId, NodePage, POINTER_SIZE, Record,
    ensure_fits, internal_node_size, read_node_header, write_node_header,
};
use crate::btree::store::NodeStore;
use crate::btree::tree::TreeError;
use crate::storage::{Page, PageType, Pager};

/// An internal node: `children.len() == keys.len() + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode {
    id: NodeId,
    keys: Vec<Key>,
    children: Vec<NodeId>,
}

impl InternalNode {
    /// A node routing between two children around `key`.
    #[must_use]
    pub fn with_children(id: NodeId, left: NodeId, key: Key, right: NodeId) -> Self {
        Self {
            id,
            keys: vec![key],
            children: vec![left, right],
        }
    }

    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Index of the child whose range contains `key`.
    ///
    /// This is the first index whose separator is greater than `key`, or the
    /// last child if there is none.
    #[must_use]
    pub fn locate_child_index(&self, key: Key) -> usize {
        self.keys.partition_point(|&k| k <= key)
    }

    /// Insert `key` at `index` with `child` to its right.
    pub(crate) fn insert_child(&mut self, index: usize, key: Key, child: NodeId) {
        self.keys.insert(index, key);
        self.children.insert(index + 1, child);
    }

    /// Move the first `split_point` children into a new left node `left_id`.
    ///
    /// The last key that left with them is promoted, the rest stay here.
    /// Returns the promoted key and the new left node.
    pub(crate) fn split_self(
        &mut self,
        split_point: usize,
        left_id: NodeId,
    ) -> Result<(Key, Self), TreeError> {
        if split_point == 0 || split_point > self.keys.len() {
            return Err(TreeError::Structure(format!(
                "cannot split internal node {} with {} keys at {split_point}",
                self.id,
                self.keys.len()
            )));
        }

        let children: Vec<NodeId> = self.children.drain(..split_point).collect();
        let mut keys: Vec<Key> = self.keys.drain(..split_point).collect();
        let promoted = keys.pop().ok_or_else(|| {
            TreeError::Structure(format!("split of {} left no key to promote", self.id))
        })?;

        let left = Self {
            id: left_id,
            keys,
            children,
        };
        Ok((promoted, left))
    }

    /// Move the first child to the end of `brother`, the left sibling.
    ///
    /// `demoted` is the parent's separator between the two; the first key
    /// here replaces it.
    pub(crate) fn lend_first_to(&mut self, demoted: Key, brother: &mut Self) -> Result<Key, TreeError> {
        if self.keys.is_empty() {
            return Err(TreeError::Structure(format!(
                "internal node {} has no child to lend",
                self.id
            )));
        }

        let child = self.children.remove(0);
        brother.keys.push(demoted);
        brother.children.push(child);
        Ok(self.keys.remove(0))
    }

    /// Move the last child to the front of `brother`, the right sibling.
    pub(crate) fn lend_last_to(&mut self, demoted: Key, brother: &mut Self) -> Result<Key, TreeError> {
        let (Some(promoted), Some(child)) = (self.keys.pop(), self.children.pop()) else {
            return Err(TreeError::Structure(format!(
                "internal node {} has no child to lend",
                self.id
            )));
        };

        brother.keys.insert(0, demoted);
        brother.children.insert(0, child);
        Ok(promoted)
    }

    /// Append `right`'s contents after the parent's separator.
    pub(crate) fn merge_with(&mut self, demoted: Key, right: Self) {
        self.keys.push(demoted);
        self.keys.extend(right.keys);
        self.children.extend(right.children);
    }

    pub(crate) fn search<P: Pager>(
        &self,
        store: &mut NodeStore<P>,
        key: Key,
    ) -> Result<Option<Record>, TreeError> {
        let child = store.load(self.children[self.locate_child_index(key)])?;
        child.search(store, key)
    }

    /// Insert below this node, splitting a full child before descending.
    pub(crate) fn insert<P: Pager>(
        &mut self,
        store: &mut NodeStore<P>,
        record: Record,
    ) -> Result<bool, TreeError> {
        let index = self.locate_child_index(record.key);
        let mut child = store.load(self.children[index])?;
        if !child.is_full(store.order()) {
            return child.insert(store, record);
        }

        self.split_child_at(store, index, child)?;

        let mut child = store.load(self.children[self.locate_child_index(record.key)])?;
        child.insert(store, record)
    }

    fn split_child_at<P: Pager>(
        &mut self,
        store: &mut NodeStore<P>,
        index: usize,
        child: Node,
    ) -> Result<(), TreeError> {
        let split_point = store.order() / 2;
        let split = child.split_self(store, split_point)?;
        self.children[index] = split.left;
        self.insert_child(index, split.promoted, split.right);
        store.persist(&*self)?;
        Ok(())
    }

    /// Delete below this node, topping up a half-empty child before descending.
    pub(crate) fn delete<P: Pager>(
        &mut self,
        store: &mut NodeStore<P>,
        key: Key,
    ) -> Result<bool, TreeError> {
        let order = store.order();
        let index = self.locate_child_index(key);
        let mut child = store.load(self.children[index])?;

        // A root left with one child has no sibling to borrow from.
        if !child.is_half_empty(order) || self.children.len() < 2 {
            return child.delete(store, key);
        }

        if index + 1 < self.children.len() {
            let mut brother = store.load(self.children[index + 1])?;
            if brother.is_half_empty(order) {
                self.merge_children(store, index, child, brother)?;
            } else {
                let promoted = brother.lend_first_to(store, self.keys[index], &mut child)?;
                self.keys[index] = promoted;
                store.persist(&*self)?;
            }
        } else {
            let mut brother = store.load(self.children[index - 1])?;
            if brother.is_half_empty(order) {
                self.merge_children(store, index - 1, brother, child)?;
            } else {
                let promoted = brother.lend_last_to(store, self.keys[index - 1], &mut child)?;
                self.keys[index - 1] = promoted;
                store.persist(&*self)?;
            }
        }

        let mut child = store.load(self.children[self.locate_child_index(key)])?;
        child.delete(store, key)
    }

    /// Merge the children at `left_index` and `left_index + 1`.
    fn merge_children<P: Pager>(
        &mut self,
        store: &mut NodeStore<P>,
        left_index: usize,
        mut left: Node,
        right: Node,
    ) -> Result<(), TreeError> {
        let doomed = left.merge_with(store, self.keys[left_index], right)?;

        self.keys.remove(left_index);
        self.children.remove(left_index + 1);
        store.persist(&*self)?;

        // Only released once nothing points at it any more
        store.release_id(doomed)?;
        Ok(())
    }

    pub(crate) fn set<P: Pager>(
        &self,
        store: &mut NodeStore<P>,
        record: Record,
    ) -> Result<bool, TreeError> {
        let mut child = store.load(self.children[self.locate_child_index(record.key)])?;
        child.set(store, record)
    }

    /// Read an internal node from a page.
    pub fn from_page(id: NodeId, page: &Page) -> Result<Self, NodeError> {
        let (count, _) = read_node_header(page);
        ensure_fits(id, page, DATA_OFFSET, internal_node_size(count + 1) - DATA_OFFSET)?;

        let mut keys = Vec::with_capacity(count);
        let mut children = Vec::with_capacity(count + 1);
        children.push(NodeId::from_page(page.read_u64(DATA_OFFSET)));

        let mut offset = DATA_OFFSET + POINTER_SIZE;
        for _ in 0..count {
            keys.push(page.read_i64(offset));
            children.push(NodeId::from_page(page.read_u64(offset + KEY_SIZE)));
            offset += KEY_SIZE + POINTER_SIZE;
        }

        Ok(Self { id, keys, children })
    }
}

impl NodePage for InternalNode {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn encoded_len(&self) -> usize {
        internal_node_size(self.children.len())
    }

    fn write_to_page(&self, page: &mut Page) {
        write_node_header(page, PageType::TreeInternal, self.keys.len(), None);

        let mut offset = DATA_OFFSET;
        if let Some(first) = self.children.first() {
            page.write_u64(offset, first.page());
            offset += POINTER_SIZE;
        }
        for (key, child) in self.keys.iter().zip(&self.children[1..]) {
            page.write_i64(offset, *key);
            page.write_u64(offset + KEY_SIZE, child.page());
            offset += KEY_SIZE + POINTER_SIZE;
        }
    }
}
