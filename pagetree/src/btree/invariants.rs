//! Structural self-check for a tree.
//!
//! Walks every node from the root and verifies:
//! - internal nodes have one more child than keys, keys non-decreasing
//! - every record lies inside the key range its ancestors route to it
//! - node sizes stay within `order`, and above the minimum below the root
//! - all leaves sit at the same depth
//! - the leaf chain visits exactly the leaves, left to right, in key order
//!
//! A root left with a single child is not collapsed, so the minimum is only
//! enforced once a node has a sibling somewhere on its path from the root.

use crate::btree::node::{Key, Node, NodeId};
use crate::btree::tree::{Tree, TreeError};
use crate::storage::Pager;

/// Key range a subtree may hold: `lower <= key < upper`.
#[derive(Debug, Clone, Copy)]
struct Bounds {
    lower: Option<Key>,
    upper: Option<Key>,
}

impl Bounds {
    const fn contains(self, key: Key) -> bool {
        let above = match self.lower {
            Some(lower) => key >= lower,
            None => true,
        };
        let below = match self.upper {
            Some(upper) => key < upper,
            None => true,
        };
        above && below
    }
}

struct Walk {
    order: usize,
    leaf_depth: Option<usize>,
    leaves: Vec<NodeId>,
    records: usize,
}

impl<P: Pager> Tree<P> {
    /// Verify the tree's structure, returning the first violation found.
    ///
    /// # Errors
    ///
    /// Returns `TreeError::Structure` describing the violation, or the
    /// underlying error if a node cannot be read.
    pub fn check_invariants(&mut self) -> Result<(), TreeError> {
        let mut walk = Walk {
            order: self.config().order,
            leaf_depth: None,
            leaves: Vec::new(),
            records: 0,
        };
        let bounds = Bounds {
            lower: None,
            upper: None,
        };
        self.check_node(self.root(), bounds, 1, true, &mut walk)?;
        self.check_leaf_chain(&walk)?;

        tracing::debug!(
            leaves = walk.leaves.len(),
            records = walk.records,
            "tree invariants hold"
        );
        Ok(())
    }

    fn check_node(
        &mut self,
        id: NodeId,
        bounds: Bounds,
        depth: usize,
        exempt: bool,
        walk: &mut Walk,
    ) -> Result<(), TreeError> {
        let order = walk.order;
        match self.store_mut().load(id)? {
            Node::Internal(node) => {
                let (keys, children) = (node.keys(), node.children());
                if children.len() != keys.len() + 1 {
                    return violation(format!(
                        "internal node {id} has {} children for {} keys",
                        children.len(),
                        keys.len()
                    ));
                }
                if children.len() > order {
                    return violation(format!(
                        "internal node {id} has {} children, order is {order}",
                        children.len()
                    ));
                }
                if !exempt && children.len() < order / 2 {
                    return violation(format!(
                        "internal node {id} has {} children, minimum is {}",
                        children.len(),
                        order / 2
                    ));
                }
                if keys.windows(2).any(|w| w[0] > w[1]) {
                    return violation(format!("internal node {id} keys out of order: {keys:?}"));
                }

                let keys = keys.to_vec();
                let children = children.to_vec();
                let only_child = children.len() == 1;
                for (i, child) in children.into_iter().enumerate() {
                    let child_bounds = Bounds {
                        lower: if i == 0 { bounds.lower } else { Some(keys[i - 1]) },
                        upper: keys.get(i).copied().or(bounds.upper),
                    };
                    self.check_node(child, child_bounds, depth + 1, exempt && only_child, walk)?;
                }
            }
            Node::Leaf(leaf) => {
                let records = leaf.records();
                if records.len() > order {
                    return violation(format!(
                        "leaf {id} has {} records, order is {order}",
                        records.len()
                    ));
                }
                let minimum = min_leaf_records(order);
                if !exempt && records.len() < minimum {
                    return violation(format!(
                        "leaf {id} has {} records, minimum is {minimum}",
                        records.len()
                    ));
                }
                if records.windows(2).any(|w| w[0].key >= w[1].key) {
                    return violation(format!("leaf {id} records out of order"));
                }
                if let Some(record) = records.iter().find(|r| !bounds.contains(r.key)) {
                    return violation(format!(
                        "key {} in leaf {id} is outside {bounds:?}",
                        record.key
                    ));
                }

                match walk.leaf_depth {
                    Some(expected) if expected != depth => {
                        return violation(format!(
                            "leaf {id} at depth {depth}, others at {expected}"
                        ));
                    }
                    _ => walk.leaf_depth = Some(depth),
                }
                walk.leaves.push(id);
                walk.records += records.len();
            }
        }
        Ok(())
    }

    fn check_leaf_chain(&mut self, walk: &Walk) -> Result<(), TreeError> {
        let mut chain = Vec::with_capacity(walk.leaves.len());
        let mut last_key: Option<Key> = None;
        let mut next = walk.leaves.first().copied();

        while let Some(id) = next {
            if chain.len() >= walk.leaves.len() {
                return violation(format!(
                    "leaf chain is longer than the {} leaves in the tree",
                    walk.leaves.len()
                ));
            }
            let leaf = self.load_leaf(id)?;
            for record in leaf.records() {
                if last_key.is_some_and(|last| last >= record.key) {
                    return violation(format!("leaf chain out of key order at {}", record.key));
                }
                last_key = Some(record.key);
            }
            chain.push(id);
            next = leaf.next_leaf();
        }

        if chain != walk.leaves {
            return violation(format!(
                "leaf chain {chain:?} does not match tree order {:?}",
                walk.leaves
            ));
        }
        Ok(())
    }
}

/// Smallest leaf a split or delete can leave behind.
const fn min_leaf_records(order: usize) -> usize {
    let after_split = order - order / 2 - 1;
    if after_split < order / 2 {
        after_split
    } else {
        order / 2
    }
}

fn violation(message: String) -> Result<(), TreeError> {
    Err(TreeError::Structure(message))
}
