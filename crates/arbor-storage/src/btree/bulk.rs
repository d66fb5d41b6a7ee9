//! Bottom-up construction from sorted input.
//!
//! A level of `items` items gets `items / order` nodes, which is
//! `ceil(items / order)` whenever `order` divides `items`. Otherwise the
//! remainder is spread over the other nodes rather than opening a node
//! below its minimum fill. Entries stream into leaves along an even
//! integer partition, so every node lands within one item of the average
//! and inside `order..=2*order`. Each closed node hands `(page, max key)`
//! to the level above, which is created on first use with the same rule
//! over the node count below it, counting children against
//! `inner_order + 1`. The level that ends up with a single node is the
//! root.
//!
//! ```text
//! count = 10, leaf_order = 2  ->  5 leaves: [1 2] [3 4] [5 6] [7 8] [9 10]
//! count = 10, leaf_order = 4  ->  2 leaves: [1 2 3 4 5] [6 7 8 9 10]
//! ```

use crate::btree::codec::{Field, NodeCodec};
use crate::btree::comparator::KeyComparator;
use crate::btree::constants::MAX_TREE_HEIGHT;
use crate::btree::node::{InnerNode, LeafNode};
use crate::btree::page::free_node;
use crate::btree::store::PageStore;
use crate::btree::tree::BPlusTree;
use arbor_common::{ArborError, PageId, Result, TreeConfig};
use std::sync::Arc;
use tracing::{debug, warn};

/// Number of nodes for `items` items at `order` items per node, never
/// leaving a non-root node under `order`.
fn node_count(items: u64, order: usize) -> u64 {
    (items / order as u64).max(1)
}

/// Number of items fed to the first `index + 1` nodes of a level.
fn partition_end(index: u64, items: u64, nodes: u64) -> u64 {
    ((index as u128 + 1) * items as u128 / nodes as u128) as u64
}

/// One level of inner nodes under construction.
struct InnerLevel<K> {
    nodes: u64,
    /// Children fed to this level in total.
    items: u64,
    node_index: u64,
    fed: u64,
    page: PageId,
    keys: Vec<K>,
    children: Vec<PageId>,
}

/// Shape of a finished build.
struct BuiltTree {
    root: PageId,
    first_leaf: PageId,
    height: usize,
    leaves: u64,
}

/// Writes a complete tree into fresh pages.
struct BulkLoader<K, V> {
    store: Arc<dyn PageStore>,
    codec: Arc<dyn NodeCodec<K, V>>,
    comparator: Arc<dyn KeyComparator<K>>,
    config: TreeConfig,
    levels: Vec<InnerLevel<K>>,
    /// Root and height once the top level closes.
    root: Option<(PageId, usize)>,
    /// Every page handed out, for cleanup on failure.
    allocated: Vec<PageId>,
}

impl<K: Field, V: Field> BulkLoader<K, V> {
    fn new(tree: &BPlusTree<K, V>) -> Self {
        Self {
            store: Arc::clone(&tree.store),
            codec: Arc::clone(&tree.codec),
            comparator: Arc::clone(&tree.comparator),
            config: tree.config.clone(),
            levels: Vec::new(),
            root: None,
            allocated: Vec::new(),
        }
    }

    fn allocate(&mut self) -> Result<PageId> {
        let page_id = self.store.allocate()?;
        self.allocated.push(page_id);
        Ok(page_id)
    }

    fn load<I>(&mut self, entries: I, count: u64) -> Result<BuiltTree>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let leaves = node_count(count, self.config.leaf_order);
        let first_leaf = self.allocate()?;
        let mut page = first_leaf;
        let mut leaf_index = 0u64;
        let mut threshold = partition_end(0, count, leaves);
        let mut buffer: Vec<(K, V)> = Vec::with_capacity(self.config.max_leaf_entries());
        let mut previous_max: Option<K> = None;
        let mut position = 0u64;

        for (key, value) in entries {
            if position == count {
                return Err(ArborError::CountMismatch {
                    expected: count,
                    actual: position + 1,
                });
            }
            let previous = buffer.last().map(|(last, _)| last).or(previous_max.as_ref());
            if let Some(previous) = previous {
                if self.comparator.compare(previous, &key).is_ge() {
                    return Err(ArborError::UnsortedInput { position });
                }
            }
            key.validate()?;
            value.validate()?;
            buffer.push((key, value));
            position += 1;
            if position < threshold {
                continue;
            }

            let is_last = leaf_index + 1 == leaves;
            let sibling = if is_last { None } else { Some(self.allocate()?) };
            let leaf = LeafNode {
                entries: std::mem::take(&mut buffer),
                sibling,
            };
            leaf.write(&*self.store, &*self.codec, page)?;
            let max = leaf
                .last_key()
                .cloned()
                .ok_or_else(|| ArborError::Internal("bulk load closed an empty leaf".to_string()))?;
            previous_max = Some(max.clone());

            if leaves == 1 {
                self.root = Some((page, 1));
            } else {
                self.push_child(page, max, leaves)?;
            }
            if let Some(next) = sibling {
                leaf_index += 1;
                page = next;
                threshold = partition_end(leaf_index, count, leaves);
            }
        }

        if position != count {
            return Err(ArborError::CountMismatch {
                expected: count,
                actual: position,
            });
        }
        if count == 0 {
            LeafNode::<K, V>::empty().write(&*self.store, &*self.codec, first_leaf)?;
            self.root = Some((first_leaf, 1));
        }

        let (root, height) = self
            .root
            .ok_or_else(|| ArborError::Internal("bulk load produced no root".to_string()))?;
        Ok(BuiltTree {
            root,
            first_leaf,
            height,
            leaves,
        })
    }

    /// Feeds a closed node of the level below into the inner levels,
    /// closing inner nodes upwards as their partitions fill.
    fn push_child(&mut self, mut child: PageId, mut max: K, mut below: u64) -> Result<()> {
        let min_children = self.config.inner_order + 1;
        let fanout = self.config.max_inner_keys() + 1;
        let mut level = 0;
        loop {
            if level >= MAX_TREE_HEIGHT {
                return Err(ArborError::Internal(
                    "bulk load exceeded the maximum tree height".to_string(),
                ));
            }
            if level == self.levels.len() {
                let page = self.allocate()?;
                self.levels.push(InnerLevel {
                    nodes: node_count(below, min_children),
                    items: below,
                    node_index: 0,
                    fed: 0,
                    page,
                    keys: Vec::with_capacity(fanout),
                    children: Vec::with_capacity(fanout),
                });
            }

            let current = &mut self.levels[level];
            current.keys.push(max);
            current.children.push(child);
            current.fed += 1;
            if current.fed < partition_end(current.node_index, current.items, current.nodes) {
                return Ok(());
            }

            // The last child is the terminal one: its key becomes the
            // node's maximum instead of a separator.
            let node_max = current
                .keys
                .pop()
                .ok_or_else(|| ArborError::Internal("bulk load closed an empty inner node".to_string()))?;
            let node = InnerNode {
                keys: std::mem::take(&mut current.keys),
                children: std::mem::take(&mut current.children),
            };
            let page = current.page;
            let nodes = current.nodes;
            current.node_index += 1;
            let more = current.node_index < nodes;

            node.write(&*self.store, &*self.codec, page)?;
            if more {
                let next = self.allocate()?;
                self.levels[level].page = next;
            }
            if nodes == 1 {
                self.root = Some((page, level + 2));
                return Ok(());
            }
            child = page;
            max = node_max;
            below = nodes;
            level += 1;
        }
    }

    /// Releases every page written by a failed build.
    fn abandon(&self) {
        for &page_id in &self.allocated {
            if let Err(err) = free_node(&*self.store, page_id) {
                warn!(page = %page_id, error = %err, "failed to release page of abandoned bulk load");
            }
        }
    }
}

impl<K: Field, V: Field> BPlusTree<K, V> {
    /// Replaces the tree's contents with `count` entries from `entries`,
    /// which must be strictly ascending.
    ///
    /// On error the pages written so far are released and the existing
    /// contents stay in place.
    pub fn bulk_load<I>(&mut self, entries: I, count: u64) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.ensure_writable()?;
        let mut loader = BulkLoader::new(self);
        let built = match loader.load(entries, count) {
            Ok(built) => built,
            Err(err) => {
                loader.abandon();
                return Err(err);
            }
        };

        let freed = self.free_subtree(self.root)?;
        self.root = built.root;
        self.first_leaf = built.first_leaf;
        self.height = built.height;
        self.size = count;
        self.stats.bulk_loads += 1;
        self.store.flush_all()?;
        debug!(
            entries = count,
            leaves = built.leaves,
            height = built.height,
            freed_pages = freed,
            "bulk load complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_covers_all_items() {
        let nodes = node_count(10, 2);
        assert_eq!(nodes, 5);
        let ends: Vec<u64> = (0..nodes).map(|j| partition_end(j, 10, nodes)).collect();
        assert_eq!(ends, vec![2, 4, 6, 8, 10]);

        let nodes = node_count(10, 4);
        assert_eq!(nodes, 2);
        let ends: Vec<u64> = (0..nodes).map(|j| partition_end(j, 10, nodes)).collect();
        assert_eq!(ends, vec![5, 10]);
    }

    #[test]
    fn test_partition_sizes_within_one() {
        for items in 1..500u64 {
            let nodes = node_count(items, 4);
            let mut start = 0;
            let mut sizes = Vec::new();
            for j in 0..nodes {
                let end = partition_end(j, items, nodes);
                sizes.push(end - start);
                start = end;
            }
            assert_eq!(start, items);
            let min = *sizes.iter().min().unwrap();
            let max = *sizes.iter().max().unwrap();
            assert!(max - min <= 1, "items {items}: sizes {sizes:?}");
            assert!(max <= 8, "items {items}: sizes {sizes:?}");
            if nodes > 1 {
                assert!(min >= 4, "items {items}: sizes {sizes:?}");
            }
        }
    }

    #[test]
    fn test_node_count_never_zero() {
        assert_eq!(node_count(0, 4), 1);
        assert_eq!(node_count(3, 4), 1);
        assert_eq!(node_count(4, 4), 1);
        assert_eq!(node_count(8, 4), 2);
        assert_eq!(node_count(12, 4), 3);
    }
}
