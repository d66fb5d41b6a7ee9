//! Ordered scans along the leaf chain.

use crate::btree::codec::Field;
use crate::btree::frame::{LeafFrame, LeafStep};
use crate::btree::page::NodeReader;
use crate::btree::tree::BPlusTree;
use arbor_common::{ArborError, Result};

/// Iterator over leaf entries in key order, optionally bounded by
/// inclusive `min` and `max` keys.
pub struct LeafScan<'t, K, V> {
    tree: &'t BPlusTree<K, V>,
    leaf: Option<LeafFrame<'t, K, V>>,
    /// Entries below this key are skipped; cleared once passed.
    min: Option<K>,
    max: Option<K>,
    leaves_visited: usize,
}

impl<'t, K: Field, V: Field> LeafScan<'t, K, V> {
    pub(crate) fn new(
        tree: &'t BPlusTree<K, V>,
        leaf: NodeReader<'t>,
        min: Option<K>,
        max: Option<K>,
    ) -> Result<Self> {
        if !leaf.is_leaf() {
            return Err(ArborError::InvariantViolation(format!(
                "scan started at inner node {}",
                leaf.head()
            )));
        }
        Ok(Self {
            tree,
            leaf: Some(LeafFrame::new(leaf)),
            min,
            max,
            leaves_visited: 1,
        })
    }

    /// Number of leaves opened so far.
    pub fn leaves_visited(&self) -> usize {
        self.leaves_visited
    }

    fn advance(&mut self) -> Result<Option<(K, V)>> {
        let tree = self.tree;
        let comparator = tree.comparator();
        while let Some(leaf) = self.leaf.as_mut() {
            match leaf.next_step(&*tree.codec)? {
                LeafStep::Entry(key, value) => {
                    if let Some(min) = &self.min {
                        if comparator.compare(&key, min).is_lt() {
                            continue;
                        }
                        self.min = None;
                    }
                    if let Some(max) = &self.max {
                        if comparator.compare(&key, max).is_gt() {
                            self.leaf = None;
                            return Ok(None);
                        }
                    }
                    return Ok(Some((key, value)));
                }
                LeafStep::End(Some(sibling)) => {
                    let reader = tree.open_node(sibling)?;
                    if !reader.is_leaf() {
                        return Err(ArborError::InvariantViolation(format!(
                            "leaf sibling {sibling} is not a leaf"
                        )));
                    }
                    self.leaf = Some(LeafFrame::new(reader));
                    self.leaves_visited += 1;
                }
                LeafStep::End(None) => self.leaf = None,
            }
        }
        Ok(None)
    }
}

impl<K: Field, V: Field> Iterator for LeafScan<'_, K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(entry) => entry.map(Ok),
            Err(err) => {
                self.leaf = None;
                Some(Err(err))
            }
        }
    }
}
