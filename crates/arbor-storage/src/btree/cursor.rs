//! Prefix search cursors with sideways information passing (SIP).
//!
//! A `SipCursor` keeps one open decode frame per level of the path to its
//! current leaf. A merge join that learns the next key it needs passes it
//! in with `next_probe`. The cursor then moves forward from where it is:
//!
//! - if the current leaf's bound can still hold the probe, it keeps decoding
//!   the leaf;
//! - otherwise it drops to the innermost ancestor whose bound reaches the
//!   probe, decodes that node forward to the first separator that does, and
//!   descends with fresh frames.
//!
//! Subtrees entirely below the probe are never read, so widely spaced
//! probes cost far fewer page reads than independent searches.

use crate::btree::codec::Field;
use crate::btree::comparator::KeyComparator;
use crate::btree::constants::MAX_TREE_HEIGHT;
use crate::btree::frame::{innermost_bound, InnerFrame, LeafFrame, LeafStep};
use crate::btree::tree::{too_deep, BPlusTree};
use arbor_common::{ArborError, PageId, Result};
use std::cmp::Ordering;
use tracing::trace;

/// The position a cursor is seeking: the first key whose prefix reaches
/// the probe and which is not below `min`.
struct Target<'a, K> {
    comparator: &'a dyn KeyComparator<K>,
    probe: &'a K,
    min: Option<&'a K>,
}

impl<K> Target<'_, K> {
    /// Whether `key`, or a subtree bounded by `key`, reaches the target.
    fn reached(&self, key: &K) -> bool {
        self.comparator.compare_prefix(key, self.probe).is_ge()
            && self
                .min
                .map_or(true, |min| self.comparator.compare(key, min).is_ge())
    }
}

/// Forward-only cursor over the entries matching a monotonically growing
/// probe.
///
/// Iteration yields the entries whose key matches the current probe under
/// the tree comparator's `compare_prefix`, then stops. `next_probe` moves
/// the cursor on to a larger probe. Errors, exhaustion and passing the
/// `largest` bound close the cursor, as does dropping it.
pub struct SipCursor<'t, K, V> {
    tree: &'t BPlusTree<K, V>,
    ancestors: Vec<InnerFrame<'t, K>>,
    leaf: Option<LeafFrame<'t, K, V>>,
    /// Decoded entry not yet returned.
    pending: Option<(K, V)>,
    probe: K,
    min: Option<K>,
    largest: Option<K>,
    /// Sibling named by the last fully scanned leaf.
    expected_leaf: Option<PageId>,
    closed: bool,
}

impl<K: Field, V: Field> BPlusTree<K, V> {
    /// Opens a cursor over the entries matching `probe`.
    pub fn prefix_search(&self, probe: K) -> Result<SipCursor<'_, K, V>> {
        SipCursor::open(self, probe, None, None)
    }

    /// Like `prefix_search`, skipping keys below `min`.
    pub fn prefix_search_from(&self, probe: K, min: K) -> Result<SipCursor<'_, K, V>> {
        SipCursor::open(self, probe, Some(min), None)
    }

    /// Like `prefix_search`, closing once a key exceeds `largest`.
    pub fn prefix_search_max(&self, probe: K, largest: K) -> Result<SipCursor<'_, K, V>> {
        SipCursor::open(self, probe, None, Some(largest))
    }

    pub fn prefix_search_with(
        &self,
        probe: K,
        min: Option<K>,
        largest: Option<K>,
    ) -> Result<SipCursor<'_, K, V>> {
        SipCursor::open(self, probe, min, largest)
    }
}

impl<K, V> SipCursor<'_, K, V> {
    /// Releases the open frames and the lookahead entry. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.ancestors.clear();
        self.leaf = None;
        self.pending = None;
        self.expected_leaf = None;
        self.closed = true;
        trace!("SIP cursor closed");
    }
}

impl<'t, K: Field, V: Field> SipCursor<'t, K, V> {
    fn open(tree: &'t BPlusTree<K, V>, probe: K, min: Option<K>, largest: Option<K>) -> Result<Self> {
        let mut cursor = Self {
            tree,
            ancestors: Vec::new(),
            leaf: None,
            pending: None,
            probe,
            min,
            largest,
            expected_leaf: None,
            closed: false,
        };
        let target = Target {
            comparator: &*tree.comparator,
            probe: &cursor.probe,
            min: cursor.min.as_ref(),
        };
        let descended = descend(tree, &mut cursor.ancestors, &mut cursor.leaf, tree.root, &target);
        if let Err(err) = descended.and_then(|()| cursor.position()) {
            cursor.close();
            return Err(err);
        }
        trace!(root = %tree.root, depth = cursor.ancestors.len(), "SIP cursor opened");
        Ok(cursor)
    }

    /// The probe the cursor currently matches.
    pub fn probe(&self) -> &K {
        &self.probe
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Moves on to `probe`, which must not sort before the current probe,
    /// and returns its first match. The remaining matches follow from the
    /// iterator.
    ///
    /// Repeating the current probe starts its matches over, so every probe
    /// sees the same entries as its own `prefix_search`.
    pub fn next_probe(&mut self, probe: K) -> Result<Option<(K, V)>> {
        self.move_to(probe, None)
    }

    /// Like `next_probe`, additionally closing once a key exceeds
    /// `largest`.
    pub fn next_probe_bounded(&mut self, probe: K, largest: K) -> Result<Option<(K, V)>> {
        self.move_to(probe, Some(largest))
    }

    fn move_to(&mut self, probe: K, largest: Option<K>) -> Result<Option<(K, V)>> {
        let order = self.tree.comparator.compare(&probe, &self.probe);
        if order == Ordering::Less {
            return Err(ArborError::InvalidProbeOrder);
        }
        if largest.is_some() {
            self.largest = largest;
        }
        self.probe = probe;
        if order == Ordering::Equal && !self.closed {
            if let Err(err) = self.rewind() {
                self.close();
                return Err(err);
            }
        }
        self.step()
    }

    /// Returns the value of the next match.
    pub fn next_value(&mut self) -> Result<Option<V>> {
        Ok(self.step()?.map(|(_, value)| value))
    }

    /// Drops every frame and descends again from the root to the first
    /// entry reaching the current probe.
    fn rewind(&mut self) -> Result<()> {
        self.ancestors.clear();
        self.leaf = None;
        self.pending = None;
        self.expected_leaf = None;
        let tree = self.tree;
        let target = Target {
            comparator: &*tree.comparator,
            probe: &self.probe,
            min: self.min.as_ref(),
        };
        descend(tree, &mut self.ancestors, &mut self.leaf, tree.root, &target)?;
        trace!(root = %tree.root, "SIP cursor rewound for repeated probe");
        Ok(())
    }

    /// Produces the next match, closing the cursor on error.
    fn step(&mut self) -> Result<Option<(K, V)>> {
        match self.advance() {
            Ok(entry) => Ok(entry),
            Err(err) => {
                self.close();
                Err(err)
            }
        }
    }

    fn advance(&mut self) -> Result<Option<(K, V)>> {
        if self.closed {
            return Ok(None);
        }
        self.position()?;

        let tree = self.tree;
        let comparator = &*tree.comparator;
        let Some((key, _)) = &self.pending else {
            self.close();
            return Ok(None);
        };
        if let Some(largest) = &self.largest {
            if comparator.compare(key, largest) == Ordering::Greater {
                self.close();
                return Ok(None);
            }
        }
        if comparator.compare_prefix(key, &self.probe) != Ordering::Equal {
            // Past this probe; keep the entry for the next one.
            return Ok(None);
        }
        Ok(self.pending.take())
    }

    /// Ensures `pending` holds the first remaining entry that reaches the
    /// target, or leaves it empty once the tree is exhausted.
    fn position(&mut self) -> Result<()> {
        let tree = self.tree;
        let codec = &*tree.codec;
        let target = Target {
            comparator: &*tree.comparator,
            probe: &self.probe,
            min: self.min.as_ref(),
        };

        if let Some((key, _)) = &self.pending {
            if target.reached(key) {
                return Ok(());
            }
            self.pending = None;
        }

        loop {
            if let Some(leaf) = self.leaf.as_mut() {
                let in_bound = innermost_bound(&self.ancestors).map_or(true, |bound| target.reached(bound));
                if in_bound {
                    loop {
                        match leaf.next_step(codec)? {
                            LeafStep::Entry(key, value) => {
                                if target.reached(&key) {
                                    self.pending = Some((key, value));
                                    return Ok(());
                                }
                            }
                            LeafStep::End(None) => {
                                self.leaf = None;
                                self.ancestors.clear();
                                return Ok(());
                            }
                            LeafStep::End(sibling) => {
                                self.expected_leaf = sibling;
                                break;
                            }
                        }
                    }
                } else {
                    self.expected_leaf = None;
                }
                self.leaf = None;
            }

            if !climb(tree, &mut self.ancestors, &mut self.leaf, &target)? {
                return Ok(());
            }
            if let (Some(expected), Some(leaf)) = (self.expected_leaf.take(), &self.leaf) {
                if leaf.page_id() != expected {
                    return Err(ArborError::InvariantViolation(format!(
                        "leaf chain names {} after scanned leaf, tree reached {}",
                        expected,
                        leaf.page_id()
                    )));
                }
            }
        }
    }
}

/// Walks down from `page_id` to a leaf, pushing a frame per inner level
/// positioned at the first child whose bound reaches the target.
fn descend<'t, K: Field, V: Field>(
    tree: &'t BPlusTree<K, V>,
    ancestors: &mut Vec<InnerFrame<'t, K>>,
    leaf: &mut Option<LeafFrame<'t, K, V>>,
    mut page_id: PageId,
    target: &Target<'_, K>,
) -> Result<()> {
    loop {
        if ancestors.len() >= MAX_TREE_HEIGHT {
            return Err(too_deep(page_id));
        }
        let reader = tree.open_node(page_id)?;
        if reader.is_leaf() {
            *leaf = Some(LeafFrame::new(reader));
            return Ok(());
        }
        let mut frame = InnerFrame::new(reader);
        let child = frame
            .seek(&*tree.codec, |separator| target.reached(separator))?
            .ok_or_else(|| ArborError::InvariantViolation(format!("inner node {page_id} has no children")))?;
        ancestors.push(frame);
        page_id = child;
    }
}

/// Finds the next subtree that can reach the target: pops frames whose own
/// bound lies below it and decodes the innermost remaining frame forward.
/// Returns false once every frame is exhausted.
fn climb<'t, K: Field, V: Field>(
    tree: &'t BPlusTree<K, V>,
    ancestors: &mut Vec<InnerFrame<'t, K>>,
    leaf: &mut Option<LeafFrame<'t, K, V>>,
    target: &Target<'_, K>,
) -> Result<bool> {
    while let Some(depth) = ancestors.len().checked_sub(1) {
        let subtree_in_bound = innermost_bound(&ancestors[..depth]).map_or(true, |bound| target.reached(bound));
        if subtree_in_bound {
            if let Some(child) = ancestors[depth].seek(&*tree.codec, |separator| target.reached(separator))? {
                trace!(from = %ancestors[depth].page_id(), child = %child, "SIP cursor skipped ahead");
                descend(tree, ancestors, leaf, child, target)?;
                return Ok(true);
            }
        }
        ancestors.pop();
    }
    Ok(false)
}

impl<K: Field, V: Field> Iterator for SipCursor<'_, K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.step().transpose()
    }
}

impl<K, V> Drop for SipCursor<'_, K, V> {
    fn drop(&mut self) {
        self.close();
    }
}
