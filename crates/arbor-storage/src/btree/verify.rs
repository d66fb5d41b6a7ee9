//! Full structural verification.

use crate::btree::codec::Field;
use crate::btree::constants::MAX_TREE_HEIGHT;
use crate::btree::node::Node;
use crate::btree::page::node_pages;
use crate::btree::stats::TreeSummary;
use crate::btree::tree::{too_deep, BPlusTree};
use arbor_common::{ArborError, PageId, Result};
use std::cmp::Ordering;

/// State collected while walking the tree.
struct Walk {
    summary: TreeSummary,
    leaf_depth: Option<usize>,
    /// Leaves in key order as reached from the root.
    leaves: Vec<PageId>,
}

fn violation(message: String) -> ArborError {
    ArborError::InvariantViolation(message)
}

impl<K: Field, V: Field> BPlusTree<K, V> {
    /// Checks every structural invariant of the tree:
    ///
    /// - keys strictly ascend within nodes and across the leaf chain;
    /// - non-root nodes respect their fill bounds;
    /// - each separator equals the maximum key of its child's subtree;
    /// - all leaves sit at the same depth, matching `height()`;
    /// - the leaf chain from `first_leaf()` visits every leaf once, in order;
    /// - `len()` matches the number of entries.
    ///
    /// Returns the measured shape of the tree.
    pub fn verify(&self) -> Result<TreeSummary> {
        let mut walk = Walk {
            summary: TreeSummary::default(),
            leaf_depth: None,
            leaves: Vec::new(),
        };
        self.verify_node(self.root, 1, None, None, &mut walk)?;

        let height = walk.leaf_depth.unwrap_or(1);
        if height != self.height {
            return Err(violation(format!(
                "measured height {height}, tree records {}",
                self.height
            )));
        }
        if walk.summary.entries != self.size {
            return Err(violation(format!(
                "tree holds {} entries, size is {}",
                walk.summary.entries, self.size
            )));
        }
        self.verify_leaf_chain(&walk.leaves)?;

        walk.summary.height = height;
        Ok(walk.summary)
    }

    /// Verifies the subtree at `page_id`, whose keys must lie in
    /// `(lower, upper]`. Returns the subtree's maximum key.
    fn verify_node(
        &self,
        page_id: PageId,
        depth: usize,
        lower: Option<&K>,
        upper: Option<&K>,
        walk: &mut Walk,
    ) -> Result<Option<K>> {
        if depth > MAX_TREE_HEIGHT {
            return Err(too_deep(page_id));
        }
        let is_root = depth == 1;
        walk.summary.pages += node_pages(&*self.store, page_id)?.len();
        let cmp = &*self.comparator;
        let in_range = |key: &K| {
            lower.map_or(true, |lower| cmp.compare(key, lower) == Ordering::Greater)
                && upper.map_or(true, |upper| cmp.compare(key, upper) != Ordering::Greater)
        };

        match self.read_node(page_id)? {
            Node::Leaf(leaf) => {
                match walk.leaf_depth {
                    None => walk.leaf_depth = Some(depth),
                    Some(expected) if expected != depth => {
                        return Err(violation(format!(
                            "leaf {page_id} at depth {depth}, other leaves at {expected}"
                        )))
                    }
                    Some(_) => {}
                }
                let len = leaf.len();
                if !is_root && (len < self.config.leaf_order || len > self.config.max_leaf_entries()) {
                    return Err(violation(format!("leaf {page_id} holds {len} entries")));
                }
                for pair in leaf.entries.windows(2) {
                    if cmp.compare(&pair[0].0, &pair[1].0) != Ordering::Less {
                        return Err(violation(format!("leaf {page_id} keys not ascending")));
                    }
                }
                if !leaf.entries.iter().all(|(key, _)| in_range(key)) {
                    return Err(violation(format!("leaf {page_id} holds keys outside its bounds")));
                }
                walk.summary.leaf_nodes += 1;
                walk.summary.entries += len as u64;
                walk.leaves.push(page_id);
                Ok(leaf.last_key().cloned())
            }
            Node::Inner(inner) => {
                let len = inner.len();
                let too_few = if is_root { len == 0 } else { len < self.config.inner_order };
                if too_few || len > self.config.max_inner_keys() {
                    return Err(violation(format!("inner node {page_id} holds {len} keys")));
                }
                for pair in inner.keys.windows(2) {
                    if cmp.compare(&pair[0], &pair[1]) != Ordering::Less {
                        return Err(violation(format!("inner node {page_id} keys not ascending")));
                    }
                }
                if !inner.keys.iter().all(|key| in_range(key)) {
                    return Err(violation(format!(
                        "inner node {page_id} holds separators outside its bounds"
                    )));
                }
                walk.summary.inner_nodes += 1;

                let mut child_lower = lower;
                for (separator, &child) in inner.keys.iter().zip(&inner.children) {
                    let child_max = self.verify_node(child, depth + 1, child_lower, Some(separator), walk)?;
                    let matches = child_max
                        .as_ref()
                        .is_some_and(|max| cmp.compare(max, separator) == Ordering::Equal);
                    if !matches {
                        return Err(violation(format!(
                            "separator in {page_id} is not the maximum of child {child}"
                        )));
                    }
                    child_lower = Some(separator);
                }
                let terminal = inner.children[len];
                self.verify_node(terminal, depth + 1, child_lower, upper, walk)
            }
        }
    }

    fn verify_leaf_chain(&self, leaves: &[PageId]) -> Result<()> {
        let Some(&first) = leaves.first() else {
            return Err(violation("tree has no leaves".to_string()));
        };
        if first != self.first_leaf {
            return Err(violation(format!(
                "first leaf is {first}, tree records {}",
                self.first_leaf
            )));
        }
        for (index, &page_id) in leaves.iter().enumerate() {
            let leaf = self.read_leaf(page_id)?;
            let expected = leaves.get(index + 1).copied();
            if leaf.sibling != expected {
                return Err(violation(format!(
                    "leaf {page_id} links to {:?}, expected {:?}",
                    leaf.sibling, expected
                )));
            }
        }
        Ok(())
    }
}
