//! Structural counters and verification summaries.

use serde::{Deserialize, Serialize};

/// Structural events observed by a tree handle since it was created or
/// opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    pub leaf_splits: u64,
    pub inner_splits: u64,
    /// A new root was created above a split root.
    pub root_splits: u64,
    /// Entries or children moved from a sibling to an underflowing node.
    pub borrows: u64,
    pub merges: u64,
    /// An inner root with a single child was replaced by that child.
    pub root_collapses: u64,
    pub bulk_loads: u64,
}

/// Shape of a tree as measured by `BPlusTree::verify`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSummary {
    pub height: usize,
    pub leaf_nodes: usize,
    pub inner_nodes: usize,
    /// Pages held by nodes, overflow pages included.
    pub pages: usize,
    pub entries: u64,
}
