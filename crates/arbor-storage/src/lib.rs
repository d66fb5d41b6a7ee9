//! Storage engine for Arbor.
//!
//! This crate provides:
//! - Page allocation with free lists
//! - Disk manager for page-level file I/O
//! - Paged B+ tree index with pluggable node codecs, bulk loading and
//!   prefix search cursors with sideways information passing

mod allocator;
pub mod btree;
mod disk;

pub use allocator::PageAllocator;
pub use btree::{
    BPlusTree, DeltaCodec, Field, InnerItem, InnerNode, InsertOutcome, KeyComparator, LeafItem,
    LeafNode, LeafScan, MemoryPageStore, NaturalOrder, Node, NodeCodec, NodeReader, NodeWriter,
    PageStore, PlainCodec, PrefixCodec, PrefixKey, PrefixOrder, RemoveOutcome, ReverseOrder,
    SharedTree, SipCursor, TreeDescriptor, TreeStats, TreeSummary, MAX_TREE_HEIGHT,
};
pub use disk::{DiskManager, FilePageStore};
