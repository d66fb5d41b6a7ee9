//! Removal with borrowing, merging and root collapse.
//!
//! An underflowing child is repaired by its parent, in this order:
//!
//! 1. borrow the last entry (or child) of the left sibling,
//! 2. borrow the first entry (or child) of the right sibling,
//! 3. merge the right sibling into the child,
//! 4. merge the child into the left sibling.
//!
//! Merges always keep the left page of the pair, so the first leaf never
//! moves. Inner borrows and merges rotate through the parent separator.

use crate::btree::codec::Field;
use crate::btree::constants::MAX_TREE_HEIGHT;
use crate::btree::node::{InnerNode, LeafNode, Node};
use crate::btree::tree::{too_deep, BPlusTree};
use arbor_common::{ArborError, PageId, Result};
use tracing::{debug, trace};

/// What a removal from a subtree means for its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome<K> {
    /// The parent needs no change.
    Unchanged,
    /// The subtree's maximum key shrank to this key.
    SeparatorUpdated(K),
    /// The node fell below its minimum fill. Carries the subtree's new
    /// maximum when it changed.
    Underflow(Option<K>),
}

impl<K: Field, V: Field> BPlusTree<K, V> {
    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &K) -> Result<Option<V>> {
        self.ensure_writable()?;
        let (removed, _) = self.remove_from(self.root, key, true, 1)?;
        if removed.is_some() {
            self.size -= 1;
            self.collapse_root()?;
        }
        Ok(removed)
    }

    fn remove_from(
        &mut self,
        page_id: PageId,
        key: &K,
        is_root: bool,
        depth: usize,
    ) -> Result<(Option<V>, RemoveOutcome<K>)> {
        if depth > MAX_TREE_HEIGHT {
            return Err(too_deep(page_id));
        }
        let mut inner = match self.read_node(page_id)? {
            Node::Leaf(leaf) => return self.remove_from_leaf(page_id, leaf, key, is_root),
            Node::Inner(inner) => inner,
        };

        let index = inner.child_index(&*self.comparator, key);
        let is_last_child = index == inner.keys.len();
        let (removed, outcome) = self.remove_from(inner.children[index], key, false, depth + 1)?;
        let (underflow, new_max) = match outcome {
            RemoveOutcome::Unchanged => return Ok((removed, RemoveOutcome::Unchanged)),
            RemoveOutcome::SeparatorUpdated(max) => (false, Some(max)),
            RemoveOutcome::Underflow(max) => (true, max),
        };

        if let (Some(max), false) = (&new_max, is_last_child) {
            inner.keys[index] = max.clone();
        }
        if underflow {
            self.rebalance_child(&mut inner, index)?;
        }
        self.write_inner(page_id, &inner)?;

        // Only the terminal child bounds this subtree's maximum.
        let subtree_max = match (is_last_child, underflow) {
            (false, _) => None,
            (true, true) => match inner.children.last() {
                Some(&last) => self.right_most(last)?,
                None => None,
            },
            (true, false) => new_max,
        };
        let outcome = if !is_root && inner.keys.len() < self.config.inner_order {
            RemoveOutcome::Underflow(subtree_max)
        } else if let Some(max) = subtree_max {
            RemoveOutcome::SeparatorUpdated(max)
        } else {
            RemoveOutcome::Unchanged
        };
        Ok((removed, outcome))
    }

    fn remove_from_leaf(
        &mut self,
        page_id: PageId,
        mut leaf: LeafNode<K, V>,
        key: &K,
        is_root: bool,
    ) -> Result<(Option<V>, RemoveOutcome<K>)> {
        let Ok(position) = leaf.search(&*self.comparator, key) else {
            return Ok((None, RemoveOutcome::Unchanged));
        };
        let was_max = position + 1 == leaf.entries.len();
        let (_, value) = leaf.entries.remove(position);
        self.write_leaf(page_id, &leaf)?;

        let new_max = if was_max { leaf.last_key().cloned() } else { None };
        let outcome = if !is_root && leaf.entries.len() < self.config.leaf_order {
            RemoveOutcome::Underflow(new_max)
        } else if let Some(max) = new_max {
            RemoveOutcome::SeparatorUpdated(max)
        } else {
            RemoveOutcome::Unchanged
        };
        Ok((Some(value), outcome))
    }

    /// Repairs the underflowing child at `index` of `parent`. The caller
    /// writes `parent` afterwards.
    fn rebalance_child(&mut self, parent: &mut InnerNode<K>, index: usize) -> Result<()> {
        match self.read_node(parent.children[index])? {
            Node::Leaf(leaf) => self.rebalance_leaf(parent, index, leaf),
            Node::Inner(node) => self.rebalance_inner(parent, index, node),
        }
    }

    fn rebalance_leaf(
        &mut self,
        parent: &mut InnerNode<K>,
        index: usize,
        mut leaf: LeafNode<K, V>,
    ) -> Result<()> {
        let min = self.config.leaf_order;
        let leaf_id = parent.children[index];

        let mut left = None;
        if index > 0 {
            let left_id = parent.children[index - 1];
            let mut left_leaf = self.read_leaf(left_id)?;
            if left_leaf.len() > min {
                if let Some(moved) = left_leaf.entries.pop() {
                    leaf.entries.insert(0, moved);
                }
                parent.keys[index - 1] = required_max(&left_leaf, left_id)?;
                if index < parent.keys.len() {
                    parent.keys[index] = required_max(&leaf, leaf_id)?;
                }
                self.write_leaf(left_id, &left_leaf)?;
                self.write_leaf(leaf_id, &leaf)?;
                self.stats.borrows += 1;
                trace!(from = %left_id, to = %leaf_id, "leaf borrowed from left sibling");
                return Ok(());
            }
            left = Some((left_id, left_leaf));
        }

        if index < parent.keys.len() {
            let right_id = parent.children[index + 1];
            let mut right = self.read_leaf(right_id)?;
            if right.len() > min {
                leaf.entries.push(right.entries.remove(0));
                parent.keys[index] = required_max(&leaf, leaf_id)?;
                self.write_leaf(right_id, &right)?;
                self.write_leaf(leaf_id, &leaf)?;
                self.stats.borrows += 1;
                trace!(from = %right_id, to = %leaf_id, "leaf borrowed from right sibling");
                return Ok(());
            }

            leaf.entries.append(&mut right.entries);
            leaf.sibling = right.sibling;
            self.write_leaf(leaf_id, &leaf)?;
            self.free_node(right_id)?;
            parent.keys.remove(index);
            parent.children.remove(index + 1);
            self.stats.merges += 1;
            debug!(into = %leaf_id, freed = %right_id, entries = leaf.len(), "leaf merge");
            return Ok(());
        }

        if let Some((left_id, mut left_leaf)) = left {
            left_leaf.entries.append(&mut leaf.entries);
            left_leaf.sibling = leaf.sibling;
            self.write_leaf(left_id, &left_leaf)?;
            self.free_node(leaf_id)?;
            parent.keys.remove(index - 1);
            parent.children.remove(index);
            self.stats.merges += 1;
            debug!(into = %left_id, freed = %leaf_id, entries = left_leaf.len(), "leaf merge");
            return Ok(());
        }

        Err(ArborError::InvariantViolation(format!(
            "underflowing leaf {leaf_id} has no siblings"
        )))
    }

    fn rebalance_inner(
        &mut self,
        parent: &mut InnerNode<K>,
        index: usize,
        mut node: InnerNode<K>,
    ) -> Result<()> {
        let min = self.config.inner_order;
        let node_id = parent.children[index];

        let mut left = None;
        if index > 0 {
            let left_id = parent.children[index - 1];
            let mut left_node = self.read_inner(left_id)?;
            if left_node.len() > min {
                // The left terminal child moves over; its bound is the old
                // left maximum held by the parent.
                let (Some(child), Some(left_max)) = (left_node.children.pop(), left_node.keys.pop())
                else {
                    return Err(ArborError::InvariantViolation(format!(
                        "inner node {left_id} is empty"
                    )));
                };
                let moved_bound = std::mem::replace(&mut parent.keys[index - 1], left_max);
                node.keys.insert(0, moved_bound);
                node.children.insert(0, child);
                self.write_inner(left_id, &left_node)?;
                self.write_inner(node_id, &node)?;
                self.stats.borrows += 1;
                trace!(from = %left_id, to = %node_id, "inner node borrowed from left sibling");
                return Ok(());
            }
            left = Some((left_id, left_node));
        }

        if index < parent.keys.len() {
            let right_id = parent.children[index + 1];
            let mut right = self.read_inner(right_id)?;
            if right.len() > min {
                let child = right.children.remove(0);
                let child_max = right.keys.remove(0);
                let node_max = std::mem::replace(&mut parent.keys[index], child_max);
                node.keys.push(node_max);
                node.children.push(child);
                self.write_inner(right_id, &right)?;
                self.write_inner(node_id, &node)?;
                self.stats.borrows += 1;
                trace!(from = %right_id, to = %node_id, "inner node borrowed from right sibling");
                return Ok(());
            }

            let node_max = parent.keys.remove(index);
            parent.children.remove(index + 1);
            node.keys.push(node_max);
            node.keys.append(&mut right.keys);
            node.children.append(&mut right.children);
            self.write_inner(node_id, &node)?;
            self.free_node(right_id)?;
            self.stats.merges += 1;
            debug!(into = %node_id, freed = %right_id, keys = node.len(), "inner merge");
            return Ok(());
        }

        if let Some((left_id, mut left_node)) = left {
            let left_max = parent.keys.remove(index - 1);
            parent.children.remove(index);
            left_node.keys.push(left_max);
            left_node.keys.append(&mut node.keys);
            left_node.children.append(&mut node.children);
            self.write_inner(left_id, &left_node)?;
            self.free_node(node_id)?;
            self.stats.merges += 1;
            debug!(into = %left_id, freed = %node_id, keys = left_node.len(), "inner merge");
            return Ok(());
        }

        Err(ArborError::InvariantViolation(format!(
            "underflowing inner node {node_id} has no siblings"
        )))
    }

    /// Replaces an inner root that has a single child by that child, for
    /// as many levels as apply.
    fn collapse_root(&mut self) -> Result<()> {
        while self.height > 1 {
            let inner = self.read_inner(self.root)?;
            if !inner.keys.is_empty() {
                return Ok(());
            }
            let old_root = self.root;
            self.root = inner.children[0];
            self.free_node(old_root)?;
            self.height -= 1;
            self.stats.root_collapses += 1;
            debug!(
                old_root = %old_root,
                new_root = %self.root,
                height = self.height,
                "root collapse"
            );
        }
        Ok(())
    }
}

fn required_max<K: Clone, V>(leaf: &LeafNode<K, V>, page_id: PageId) -> Result<K> {
    leaf.last_key()
        .cloned()
        .ok_or_else(|| ArborError::InvariantViolation(format!("leaf {page_id} is empty")))
}
