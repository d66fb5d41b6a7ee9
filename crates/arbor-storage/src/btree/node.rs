//! Decoded in-memory view of tree nodes.

use crate::btree::codec::{InnerItem, LeafItem, NodeCodec};
use crate::btree::comparator::KeyComparator;
use crate::btree::page::{NodeReader, NodeWriter};
use crate::btree::store::PageStore;
use arbor_common::{ArborError, PageId, PageType, Result};

/// A leaf: ascending unique entries and the pointer to the next leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode<K, V> {
    pub entries: Vec<(K, V)>,
    pub sibling: Option<PageId>,
}

/// An inner node: `keys[i]` is the maximum key under `children[i]`; the
/// last child holds every key greater than the last separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerNode<K> {
    pub keys: Vec<K>,
    pub children: Vec<PageId>,
}

/// A decoded node, selected by the head page's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node<K, V> {
    Leaf(LeafNode<K, V>),
    Inner(InnerNode<K>),
}

impl<K, V> Node<K, V> {
    /// Reads and fully decodes the node at `page_id`.
    pub fn read(
        store: &dyn PageStore,
        codec: &dyn NodeCodec<K, V>,
        page_id: PageId,
        verify: bool,
    ) -> Result<Self> {
        let mut reader = NodeReader::open(store, page_id, verify)?;
        if reader.is_leaf() {
            LeafNode::decode(codec, &mut reader).map(Node::Leaf)
        } else {
            InnerNode::decode(codec, &mut reader).map(Node::Inner)
        }
    }
}

impl<K, V> LeafNode<K, V> {
    /// Creates an empty leaf with no sibling.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            sibling: None,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the leaf holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Largest key in the leaf.
    pub fn last_key(&self) -> Option<&K> {
        self.entries.last().map(|(key, _)| key)
    }

    /// Binary search for `key`: `Ok(index)` if present, otherwise the
    /// insertion position.
    pub fn search(&self, cmp: &dyn KeyComparator<K>, key: &K) -> std::result::Result<usize, usize> {
        self.entries
            .binary_search_by(|(probe, _)| cmp.compare(probe, key))
    }

    /// Decodes the remaining entries of an open leaf reader.
    pub fn decode(codec: &dyn NodeCodec<K, V>, reader: &mut NodeReader<'_>) -> Result<Self> {
        let mut entries: Vec<(K, V)> = Vec::new();
        loop {
            let last = entries.last().map(|(key, value)| (key, value));
            match codec.decode_next_leaf_entry(reader, last)? {
                LeafItem::Entry(key, value) => entries.push((key, value)),
                LeafItem::EndOfLeaf(sibling) => {
                    expect_end(reader)?;
                    return Ok(Self { entries, sibling });
                }
                LeafItem::EndOfStream => {
                    return Err(ArborError::CorruptEncoding(format!(
                        "leaf {} ended without an end marker",
                        reader.head()
                    )))
                }
            }
        }
    }

    /// Encodes the leaf and writes it to `page_id`.
    pub fn write(
        &self,
        store: &dyn PageStore,
        codec: &dyn NodeCodec<K, V>,
        page_id: PageId,
    ) -> Result<()> {
        let mut writer = NodeWriter::new(page_id, PageType::BTreeLeaf);
        let mut last: Option<(&K, &V)> = None;
        for (key, value) in &self.entries {
            codec.encode_leaf_entry(key, value, last, &mut writer)?;
            last = Some((key, value));
        }
        codec.encode_end_of_leaf(self.sibling, &mut writer)?;
        writer.finish(store)?;
        Ok(())
    }
}

impl<K> InnerNode<K> {
    /// Number of separator keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if the node has no separators (a single child).
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Index of the child whose subtree may contain `key`: the first
    /// separator `>= key`, or the last child.
    pub fn child_index(&self, cmp: &dyn KeyComparator<K>, key: &K) -> usize {
        self.keys
            .partition_point(|separator| cmp.compare(separator, key).is_lt())
    }

    /// Decodes the remaining entries of an open inner node reader.
    pub fn decode<V>(codec: &dyn NodeCodec<K, V>, reader: &mut NodeReader<'_>) -> Result<Self> {
        let mut keys: Vec<K> = Vec::new();
        let mut children = Vec::new();
        loop {
            match codec.decode_next_inner_entry(reader, keys.last())? {
                InnerItem::Entry(key, child) => {
                    keys.push(key);
                    children.push(child);
                }
                InnerItem::TerminalChild(child) => {
                    children.push(child);
                    expect_end(reader)?;
                    return Ok(Self { keys, children });
                }
                InnerItem::EndOfStream => {
                    return Err(ArborError::CorruptEncoding(format!(
                        "inner node {} ended without a terminal child",
                        reader.head()
                    )))
                }
            }
        }
    }

    /// Encodes the node and writes it to `page_id`.
    pub fn write<V>(
        &self,
        store: &dyn PageStore,
        codec: &dyn NodeCodec<K, V>,
        page_id: PageId,
    ) -> Result<()> {
        if self.children.len() != self.keys.len() + 1 {
            return Err(ArborError::InvariantViolation(format!(
                "inner node {} has {} keys and {} children",
                page_id,
                self.keys.len(),
                self.children.len()
            )));
        }
        let mut writer = NodeWriter::new(page_id, PageType::BTreeInner);
        let mut last: Option<&K> = None;
        for (key, &child) in self.keys.iter().zip(&self.children) {
            codec.encode_inner_entry(child, key, last, &mut writer)?;
            last = Some(key);
        }
        codec.encode_terminal_child(self.children[self.keys.len()], &mut writer)?;
        writer.finish(store)?;
        Ok(())
    }
}

fn expect_end(reader: &mut NodeReader<'_>) -> Result<()> {
    if !reader.is_at_end()? {
        return Err(ArborError::CorruptEncoding(format!(
            "trailing bytes after end of node {}",
            reader.head()
        )));
    }
    Ok(())
}
