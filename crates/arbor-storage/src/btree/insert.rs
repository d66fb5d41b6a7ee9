//! Insertion with node splitting.
//!
//! `put` recurses from the root to the target leaf. Each level reports an
//! `InsertOutcome` to its parent: a split hands up the new right sibling
//! and the left half's maximum, and an insert past a leaf's old maximum
//! hands up the new maximum so ancestors can refresh their separators.

use crate::btree::codec::Field;
use crate::btree::constants::MAX_TREE_HEIGHT;
use crate::btree::node::{InnerNode, LeafNode, Node};
use crate::btree::tree::{too_deep, BPlusTree};
use arbor_common::{ArborError, PageId, Result};
use tracing::debug;

/// What an insert into a subtree means for its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome<K> {
    /// The parent needs no change.
    Unchanged,
    /// The subtree's maximum key grew to this key.
    SeparatorUpdated(K),
    /// The node split; `right` follows it and `separator` is the maximum
    /// key left behind.
    SplitUp { separator: K, right: PageId },
}

impl<K: Field, V: Field> BPlusTree<K, V> {
    /// Inserts or replaces `key`, returning the previous value.
    pub fn put(&mut self, key: K, value: V) -> Result<Option<V>> {
        self.ensure_writable()?;
        key.validate()?;
        value.validate()?;
        let (previous, outcome) = self.insert_into(self.root, &key, value, 1)?;
        if let InsertOutcome::SplitUp { separator, right } = outcome {
            self.grow_root(separator, right)?;
        }
        if previous.is_none() {
            self.size += 1;
        }
        Ok(previous)
    }

    fn insert_into(
        &mut self,
        page_id: PageId,
        key: &K,
        value: V,
        depth: usize,
    ) -> Result<(Option<V>, InsertOutcome<K>)> {
        if depth > MAX_TREE_HEIGHT {
            return Err(too_deep(page_id));
        }
        let mut inner = match self.read_node(page_id)? {
            Node::Leaf(leaf) => return self.insert_into_leaf(page_id, leaf, key, value),
            Node::Inner(inner) => inner,
        };

        let index = inner.child_index(&*self.comparator, key);
        let (previous, outcome) = self.insert_into(inner.children[index], key, value, depth + 1)?;
        let outcome = match outcome {
            InsertOutcome::Unchanged => InsertOutcome::Unchanged,
            InsertOutcome::SeparatorUpdated(max) if index < inner.keys.len() => {
                inner.keys[index] = max;
                self.write_inner(page_id, &inner)?;
                InsertOutcome::Unchanged
            }
            // The terminal child grew: so did this subtree.
            InsertOutcome::SeparatorUpdated(max) => InsertOutcome::SeparatorUpdated(max),
            InsertOutcome::SplitUp { separator, right } => {
                inner.keys.insert(index, separator);
                inner.children.insert(index + 1, right);
                self.store_inner(page_id, inner)?
            }
        };
        Ok((previous, outcome))
    }

    fn insert_into_leaf(
        &mut self,
        page_id: PageId,
        mut leaf: LeafNode<K, V>,
        key: &K,
        value: V,
    ) -> Result<(Option<V>, InsertOutcome<K>)> {
        let position = match leaf.search(&*self.comparator, key) {
            Ok(position) => {
                let previous = std::mem::replace(&mut leaf.entries[position].1, value);
                self.write_leaf(page_id, &leaf)?;
                return Ok((Some(previous), InsertOutcome::Unchanged));
            }
            Err(position) => position,
        };

        let new_max = position == leaf.entries.len();
        leaf.entries.insert(position, (key.clone(), value));
        if leaf.entries.len() > self.config.max_leaf_entries() {
            return Ok((None, self.split_leaf(page_id, leaf)?));
        }

        self.write_leaf(page_id, &leaf)?;
        let outcome = if new_max {
            InsertOutcome::SeparatorUpdated(key.clone())
        } else {
            InsertOutcome::Unchanged
        };
        Ok((None, outcome))
    }

    /// Splits an overfull leaf at its midpoint. The left half keeps the
    /// page and the right half takes over the old sibling pointer.
    fn split_leaf(&mut self, page_id: PageId, mut left: LeafNode<K, V>) -> Result<InsertOutcome<K>> {
        let mid = left.entries.len() / 2;
        let right_id = self.store.allocate()?;
        let right = LeafNode {
            entries: left.entries.split_off(mid),
            sibling: left.sibling,
        };
        left.sibling = Some(right_id);
        let separator = left
            .last_key()
            .cloned()
            .ok_or_else(|| ArborError::InvariantViolation(format!("split of leaf {page_id} left it empty")))?;

        self.write_leaf(right_id, &right)?;
        self.write_leaf(page_id, &left)?;
        self.stats.leaf_splits += 1;
        debug!(
            left = %page_id,
            right = %right_id,
            left_entries = left.len(),
            right_entries = right.len(),
            "leaf split"
        );
        Ok(InsertOutcome::SplitUp {
            separator,
            right: right_id,
        })
    }

    /// Writes an inner node that just gained a child, splitting it when it
    /// holds too many separators. The middle separator moves up: it is the
    /// maximum of the left half.
    fn store_inner(&mut self, page_id: PageId, mut left: InnerNode<K>) -> Result<InsertOutcome<K>> {
        if left.keys.len() <= self.config.max_inner_keys() {
            self.write_inner(page_id, &left)?;
            return Ok(InsertOutcome::Unchanged);
        }

        let mid = left.keys.len() / 2;
        let right = InnerNode {
            keys: left.keys.split_off(mid + 1),
            children: left.children.split_off(mid + 1),
        };
        let separator = left
            .keys
            .pop()
            .ok_or_else(|| ArborError::InvariantViolation(format!("split of inner node {page_id} left it empty")))?;

        let right_id = self.store.allocate()?;
        self.write_inner(right_id, &right)?;
        self.write_inner(page_id, &left)?;
        self.stats.inner_splits += 1;
        debug!(
            left = %page_id,
            right = %right_id,
            left_keys = left.len(),
            right_keys = right.len(),
            "inner split"
        );
        Ok(InsertOutcome::SplitUp {
            separator,
            right: right_id,
        })
    }

    fn grow_root(&mut self, separator: K, right: PageId) -> Result<()> {
        let new_root = self.store.allocate()?;
        let node = InnerNode {
            keys: vec![separator],
            children: vec![self.root, right],
        };
        self.write_inner(new_root, &node)?;
        debug!(
            old_root = %self.root,
            new_root = %new_root,
            height = self.height + 1,
            "root split"
        );
        self.root = new_root;
        self.height += 1;
        self.stats.root_splits += 1;
        Ok(())
    }
}
