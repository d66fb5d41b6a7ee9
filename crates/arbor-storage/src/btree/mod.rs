//! Paged B+ tree index with pluggable node codecs and SIP cursors.
//!
//! Nodes live in a `PageStore` as byte streams over chained 4KB pages. The
//! tree never interprets node bytes itself: a `NodeCodec` encodes and
//! decodes entries one at a time, given the previously decoded entry, so
//! codecs are free to delta- or prefix-compress keys.
//!
//! ```text
//!                       BPlusTree
//!             (navigation, split, merge, bulk load)
//!                 /          |           \
//!        KeyComparator   NodeCodec    PageStore
//!        (ordering,      (entry       (allocate, read,
//!         prefix match)   streams)     write, free)
//! ```
//!
//! ## Node layout
//!
//! Separator `k_i` of an inner node is the maximum key under child `i`; the
//! terminal child takes every key above the last separator. Leaves are
//! chained through sibling pointers in key order.
//!
//! Leaf stream:
//! ```text
//! +------+-----------+------+-----------+-----+------+----------+-----------+
//! | 0x01 | entry 0   | 0x01 | entry 1   | ... | 0x02 | present? | sibling   |
//! +------+-----------+------+-----------+-----+------+----------+-----------+
//! ```
//!
//! Inner stream:
//! ```text
//! +------+---------+-------+-----+------+----------------+
//! | 0x01 | child 0 | key 0 | ... | 0x03 | terminal child |
//! +------+---------+-------+-----+------+----------------+
//! ```
//!
//! Entry bodies are codec specific.
//!
//! ## Fill bounds
//!
//! Non-root leaves hold `leaf_order..=2*leaf_order` entries and non-root
//! inner nodes `inner_order..=2*inner_order` separators. Inserts split
//! overfull nodes at the midpoint; removals borrow from or merge with a
//! sibling, and a root left with one child is replaced by it.

pub mod codec;
pub mod comparator;
pub mod constants;
pub mod node;
pub mod page;
pub mod store;

mod bulk;
mod cursor;
mod descriptor;
mod frame;
mod insert;
mod remove;
mod scan;
mod shared;
mod stats;
mod tree;
mod verify;

#[cfg(test)]
mod tests;

// Re-exports for public API
pub use codec::{
    DeltaCodec, Field, InnerItem, LeafItem, NodeCodec, PlainCodec, PrefixCodec, PrefixKey,
};
pub use comparator::{KeyComparator, NaturalOrder, PrefixOrder, ReverseOrder};
pub use constants::MAX_TREE_HEIGHT;
pub use cursor::SipCursor;
pub use descriptor::TreeDescriptor;
pub use insert::InsertOutcome;
pub use node::{InnerNode, LeafNode, Node};
pub use page::{NodeReader, NodeWriter};
pub use remove::RemoveOutcome;
pub use scan::LeafScan;
pub use shared::SharedTree;
pub use stats::{TreeStats, TreeSummary};
pub use store::{MemoryPageStore, PageStore};
pub use tree::BPlusTree;
