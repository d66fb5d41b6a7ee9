//! The B+ tree handle: construction, navigation and lookups.
//!
//! A tree is a set of nodes in a `PageStore`. Every inner separator is the
//! maximum key of its child's subtree, so a search takes the first child
//! whose separator is `>= key`, or the terminal child past the last one:
//!
//! ```text
//!                 [ 4 | 8 | -> ]
//!                /     |      \
//!      [1 2 3 4] -> [5 6 7 8] -> [9 10 11]
//! ```
//!
//! Lookups stream entries through the codec and stop as soon as the answer
//! is known; mutations (see `insert` and `remove`) decode whole nodes.

use crate::btree::codec::{Field, NodeCodec};
use crate::btree::comparator::KeyComparator;
use crate::btree::constants::MAX_TREE_HEIGHT;
use crate::btree::descriptor::TreeDescriptor;
use crate::btree::frame::{InnerFrame, LeafFrame, LeafStep};
use crate::btree::node::{InnerNode, LeafNode, Node};
use crate::btree::page::{free_node, NodeReader};
use crate::btree::scan::LeafScan;
use crate::btree::stats::TreeStats;
use crate::btree::store::PageStore;
use arbor_common::{ArborError, PageId, Result, TreeConfig};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// A paged B+ tree mapping ordered keys to values.
///
/// Reads take `&self` and mutations `&mut self`, so cursors borrowing the
/// tree keep it structurally stable for their lifetime. Wrap the tree in a
/// `SharedTree` to share it between threads.
pub struct BPlusTree<K, V> {
    pub(crate) store: Arc<dyn PageStore>,
    pub(crate) codec: Arc<dyn NodeCodec<K, V>>,
    pub(crate) comparator: Arc<dyn KeyComparator<K>>,
    pub(crate) config: TreeConfig,
    pub(crate) root: PageId,
    pub(crate) first_leaf: PageId,
    /// Levels from the root to the leaves, 1 for a root leaf.
    pub(crate) height: usize,
    pub(crate) size: u64,
    pub(crate) read_only: bool,
    pub(crate) stats: TreeStats,
}

impl<K: Field, V: Field> BPlusTree<K, V> {
    /// Creates an empty tree whose root is a fresh leaf in `store`.
    pub fn create(
        store: Arc<dyn PageStore>,
        config: TreeConfig,
        codec: Arc<dyn NodeCodec<K, V>>,
        comparator: Arc<dyn KeyComparator<K>>,
    ) -> Result<Self> {
        config.validate()?;
        check_pairing(&*codec, &*comparator)?;

        let root = store.allocate()?;
        LeafNode::<K, V>::empty().write(&*store, &*codec, root)?;
        debug!(backing = store.backing_id(), root = %root, "created B+ tree");

        Ok(Self {
            store,
            codec,
            comparator,
            config,
            root,
            first_leaf: root,
            height: 1,
            size: 0,
            read_only: false,
            stats: TreeStats::default(),
        })
    }

    /// Reopens a tree from its persisted descriptor.
    ///
    /// The orders are taken from the descriptor; `config` supplies the
    /// remaining flags.
    pub fn open(
        store: Arc<dyn PageStore>,
        descriptor: &TreeDescriptor,
        config: TreeConfig,
        codec: Arc<dyn NodeCodec<K, V>>,
        comparator: Arc<dyn KeyComparator<K>>,
    ) -> Result<Self> {
        descriptor.check_compatible::<K, V>(store.backing_id(), codec.tag(), comparator.tag())?;
        let config = TreeConfig {
            inner_order: descriptor.inner_order as usize,
            leaf_order: descriptor.leaf_order as usize,
            ..config
        };
        config.validate()?;
        check_pairing(&*codec, &*comparator)?;

        let mut tree = Self {
            store,
            codec,
            comparator,
            config,
            root: descriptor.root,
            first_leaf: descriptor.first_leaf,
            height: 0,
            size: descriptor.size,
            read_only: false,
            stats: TreeStats::default(),
        };
        tree.height = tree.measure_height()?;
        debug!(
            root = %tree.root,
            height = tree.height,
            size = tree.size,
            "opened B+ tree"
        );
        Ok(tree)
    }

    /// Returns a handle over the same pages that rejects mutations.
    pub fn read_only(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            codec: Arc::clone(&self.codec),
            comparator: Arc::clone(&self.comparator),
            config: self.config.clone(),
            root: self.root,
            first_leaf: self.first_leaf,
            height: self.height,
            size: self.size,
            read_only: true,
            stats: TreeStats::default(),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Number of entries.
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn root(&self) -> PageId {
        self.root
    }

    pub fn first_leaf(&self) -> PageId {
        self.first_leaf
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn stats(&self) -> TreeStats {
        self.stats
    }

    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.store
    }

    pub fn comparator(&self) -> &dyn KeyComparator<K> {
        &*self.comparator
    }

    /// Looks up `key`.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let mut leaf = LeafFrame::new(self.descend_to_leaf(key)?);
        loop {
            match leaf.next_step(&*self.codec)? {
                LeafStep::Entry(found, value) => match self.comparator.compare(&found, key) {
                    Ordering::Less => continue,
                    Ordering::Equal => return Ok(Some(value)),
                    Ordering::Greater => return Ok(None),
                },
                LeafStep::End(_) => return Ok(None),
            }
        }
    }

    pub fn contains_key(&self, key: &K) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Iterates every entry in key order along the leaf chain.
    pub fn iter(&self) -> Result<LeafScan<'_, K, V>> {
        LeafScan::new(self, self.open_node(self.first_leaf)?, None, None)
    }

    /// Iterates the entries with `min <= key <= max`. Missing bounds are
    /// open.
    pub fn range(&self, min: Option<K>, max: Option<K>) -> Result<LeafScan<'_, K, V>> {
        let leaf = match &min {
            Some(min) => self.descend_to_leaf(min)?,
            None => self.open_node(self.first_leaf)?,
        };
        LeafScan::new(self, leaf, min, max)
    }

    pub fn head_map(&self, _to: &K) -> Result<LeafScan<'_, K, V>> {
        Err(ArborError::Unsupported("head_map"))
    }

    pub fn tail_map(&self, _from: &K) -> Result<LeafScan<'_, K, V>> {
        Err(ArborError::Unsupported("tail_map"))
    }

    pub fn last_key(&self) -> Result<K> {
        Err(ArborError::Unsupported("last_key"))
    }

    /// Removes every entry, releasing all node pages.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_writable()?;
        let freed = self.free_subtree(self.root)?;
        let root = self.store.allocate()?;
        self.write_leaf(root, &LeafNode::empty())?;
        debug!(freed_pages = freed, root = %root, "cleared B+ tree");
        self.root = root;
        self.first_leaf = root;
        self.height = 1;
        self.size = 0;
        Ok(())
    }

    /// Flushes the underlying store.
    pub fn flush(&self) -> Result<()> {
        self.store.flush_all()
    }

    /// Describes the tree so it can be reopened later.
    pub fn descriptor(&self) -> TreeDescriptor {
        TreeDescriptor {
            backing_id: self.store.backing_id(),
            inner_order: self.config.inner_order as u32,
            leaf_order: self.config.leaf_order as u32,
            size: self.size,
            comparator: self.comparator.tag(),
            root: self.root,
            first_leaf: self.first_leaf,
            key_type: K::TYPE_TAG,
            value_type: V::TYPE_TAG,
            codec: self.codec.tag(),
        }
    }

    // ------------------------------------------------------------------
    // Node access shared by the engine modules
    // ------------------------------------------------------------------

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(ArborError::Unsupported("mutation of a read-only tree"));
        }
        Ok(())
    }

    pub(crate) fn open_node(&self, page_id: PageId) -> Result<NodeReader<'_>> {
        NodeReader::open(&*self.store, page_id, self.config.verify_checksums)
    }

    pub(crate) fn read_node(&self, page_id: PageId) -> Result<Node<K, V>> {
        Node::read(
            &*self.store,
            &*self.codec,
            page_id,
            self.config.verify_checksums,
        )
    }

    pub(crate) fn read_leaf(&self, page_id: PageId) -> Result<LeafNode<K, V>> {
        match self.read_node(page_id)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Inner(_) => Err(ArborError::InvariantViolation(format!(
                "expected leaf at {page_id}, found inner node"
            ))),
        }
    }

    pub(crate) fn read_inner(&self, page_id: PageId) -> Result<InnerNode<K>> {
        match self.read_node(page_id)? {
            Node::Inner(inner) => Ok(inner),
            Node::Leaf(_) => Err(ArborError::InvariantViolation(format!(
                "expected inner node at {page_id}, found leaf"
            ))),
        }
    }

    pub(crate) fn write_leaf(&self, page_id: PageId, leaf: &LeafNode<K, V>) -> Result<()> {
        leaf.write(&*self.store, &*self.codec, page_id)
    }

    pub(crate) fn write_inner(&self, page_id: PageId, inner: &InnerNode<K>) -> Result<()> {
        inner.write(&*self.store, &*self.codec, page_id)
    }

    /// Frees a node's head page and its overflow chain.
    pub(crate) fn free_node(&self, page_id: PageId) -> Result<usize> {
        free_node(&*self.store, page_id)
    }

    /// Frees every node of the subtree rooted at `page_id`. Returns the
    /// number of pages released.
    pub(crate) fn free_subtree(&self, page_id: PageId) -> Result<usize> {
        let mut freed = 0;
        let mut pending = vec![(page_id, 1usize)];
        while let Some((page_id, depth)) = pending.pop() {
            if depth > MAX_TREE_HEIGHT {
                return Err(too_deep(page_id));
            }
            if let Node::Inner(inner) = self.read_node(page_id)? {
                pending.extend(inner.children.iter().map(|&child| (child, depth + 1)));
            }
            freed += self.free_node(page_id)?;
        }
        Ok(freed)
    }

    /// Walks from the root to the leaf whose key range covers `key` and
    /// returns a reader positioned at the start of that leaf.
    pub(crate) fn descend_to_leaf(&self, key: &K) -> Result<NodeReader<'_>> {
        let mut page_id = self.root;
        for _ in 0..MAX_TREE_HEIGHT {
            let reader = self.open_node(page_id)?;
            if reader.is_leaf() {
                return Ok(reader);
            }
            let mut frame = InnerFrame::new(reader);
            page_id = frame
                .seek(&*self.codec, |separator| {
                    self.comparator.compare(separator, key).is_ge()
                })?
                .ok_or_else(|| too_deep(page_id))?;
        }
        Err(too_deep(page_id))
    }

    /// Largest key in the subtree rooted at `page_id`.
    pub(crate) fn right_most(&self, mut page_id: PageId) -> Result<Option<K>> {
        for _ in 0..MAX_TREE_HEIGHT {
            match self.read_node(page_id)? {
                Node::Inner(inner) => {
                    page_id = *inner.children.last().ok_or_else(|| {
                        ArborError::InvariantViolation(format!("inner node {page_id} has no children"))
                    })?;
                }
                Node::Leaf(mut leaf) => return Ok(leaf.entries.pop().map(|(key, _)| key)),
            }
        }
        Err(too_deep(page_id))
    }

    /// Counts levels along the leftmost path.
    fn measure_height(&self) -> Result<usize> {
        let mut page_id = self.root;
        for height in 1..=MAX_TREE_HEIGHT {
            let reader = self.open_node(page_id)?;
            if reader.is_leaf() {
                return Ok(height);
            }
            let mut frame = InnerFrame::new(reader);
            page_id = frame
                .seek(&*self.codec, |_| true)?
                .ok_or_else(|| too_deep(page_id))?;
        }
        Err(too_deep(page_id))
    }
}

impl<K, V> std::fmt::Debug for BPlusTree<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("root", &self.root)
            .field("first_leaf", &self.first_leaf)
            .field("height", &self.height)
            .field("size", &self.size)
            .field("config", &self.config)
            .field("read_only", &self.read_only)
            .finish()
    }
}

pub(crate) fn too_deep(page_id: PageId) -> ArborError {
    ArborError::InvariantViolation(format!(
        "tree deeper than {MAX_TREE_HEIGHT} levels at page {page_id}"
    ))
}

fn check_pairing<K, V>(codec: &dyn NodeCodec<K, V>, comparator: &dyn KeyComparator<K>) -> Result<()> {
    if !codec.supports(comparator.tag()) {
        return Err(ArborError::ConfigError(format!(
            "{} codec cannot encode keys in {} order",
            codec.tag(),
            comparator.tag()
        )));
    }
    Ok(())
}
