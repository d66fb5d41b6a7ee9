//! Open decode positions inside single nodes.
//!
//! Frames wrap a `NodeReader` together with the decode context the codec
//! needs (the previously decoded key or entry). Navigation, scans and SIP
//! cursors keep frames open so they can resume decoding where they stopped
//! instead of re-reading a node.

use crate::btree::codec::{InnerItem, LeafItem, NodeCodec};
use crate::btree::page::NodeReader;
use arbor_common::{ArborError, PageId, Result};

/// Decode position inside an inner node.
pub(crate) struct InnerFrame<'t, K> {
    reader: NodeReader<'t>,
    /// Last separator decoded, which is also the bound of the child most
    /// recently returned by `seek` unless that child was the terminal one.
    last_key: Option<K>,
    /// The terminal child has been returned.
    done: bool,
}

impl<'t, K> InnerFrame<'t, K> {
    pub(crate) fn new(reader: NodeReader<'t>) -> Self {
        Self {
            reader,
            last_key: None,
            done: false,
        }
    }

    pub(crate) fn page_id(&self) -> PageId {
        self.reader.head()
    }

    /// Maximum key of the child most recently returned by `seek`, or `None`
    /// for the terminal child (bounded only by the ancestors).
    pub(crate) fn bound(&self) -> Option<&K> {
        if self.done {
            None
        } else {
            self.last_key.as_ref()
        }
    }

    /// Decodes forward to the first child whose separator satisfies
    /// `reached`, or to the terminal child. Children passed over are
    /// skipped. Returns `None` once the terminal child has been returned.
    pub(crate) fn seek<V>(
        &mut self,
        codec: &dyn NodeCodec<K, V>,
        mut reached: impl FnMut(&K) -> bool,
    ) -> Result<Option<PageId>> {
        if self.done {
            return Ok(None);
        }
        loop {
            match codec.decode_next_inner_entry(&mut self.reader, self.last_key.as_ref())? {
                InnerItem::Entry(key, child) => {
                    let hit = reached(&key);
                    self.last_key = Some(key);
                    if hit {
                        return Ok(Some(child));
                    }
                }
                InnerItem::TerminalChild(child) => {
                    self.done = true;
                    return Ok(Some(child));
                }
                InnerItem::EndOfStream => {
                    return Err(ArborError::CorruptEncoding(format!(
                        "inner node {} ended without a terminal child",
                        self.reader.head()
                    )))
                }
            }
        }
    }
}

/// One decoded leaf step.
pub(crate) enum LeafStep<K, V> {
    Entry(K, V),
    /// End of the leaf with its sibling pointer.
    End(Option<PageId>),
}

/// Decode position inside a leaf.
pub(crate) struct LeafFrame<'t, K, V> {
    reader: NodeReader<'t>,
    last: Option<(K, V)>,
}

impl<'t, K: Clone, V: Clone> LeafFrame<'t, K, V> {
    pub(crate) fn new(reader: NodeReader<'t>) -> Self {
        Self { reader, last: None }
    }

    pub(crate) fn page_id(&self) -> PageId {
        self.reader.head()
    }

    /// Decodes the next entry or the end marker.
    pub(crate) fn next_step(&mut self, codec: &dyn NodeCodec<K, V>) -> Result<LeafStep<K, V>> {
        let last = self.last.as_ref().map(|(key, value)| (key, value));
        match codec.decode_next_leaf_entry(&mut self.reader, last)? {
            LeafItem::Entry(key, value) => {
                self.last = Some((key.clone(), value.clone()));
                Ok(LeafStep::Entry(key, value))
            }
            LeafItem::EndOfLeaf(sibling) => Ok(LeafStep::End(sibling)),
            LeafItem::EndOfStream => Err(ArborError::CorruptEncoding(format!(
                "leaf {} ended without an end marker",
                self.reader.head()
            ))),
        }
    }
}

/// Nearest bound among `frames`, innermost first.
pub(crate) fn innermost_bound<'a, 't, K>(frames: &'a [InnerFrame<'t, K>]) -> Option<&'a K> {
    frames.iter().rev().find_map(|frame| frame.bound())
}
