//! B+Tree constants for node encoding and navigation.

/// Upper bound on tree height. Deeper paths indicate a cycle or corruption.
pub const MAX_TREE_HEIGHT: usize = 64;

/// Upper bound on the number of pages one node may span.
pub(crate) const MAX_CHAIN_PAGES: usize = 1 << 16;

/// Upper bound on a single length-prefixed field (16 MB).
pub(crate) const MAX_FIELD_LEN: usize = 16 * 1024 * 1024;

/// Longest LEB128 encoding of a u64.
pub(crate) const MAX_VARINT_LEN: usize = 10;

// Entry tags shared by the shipped codecs

/// A leaf (key, value) entry or an inner (key, child) entry follows.
pub(crate) const TAG_ENTRY: u8 = 0x01;

/// End of a leaf; a presence byte and optional sibling page id follow.
pub(crate) const TAG_END_OF_LEAF: u8 = 0x02;

/// Terminal child of an inner node; a page id follows.
pub(crate) const TAG_TERMINAL_CHILD: u8 = 0x03;

// Descriptor record

/// Magic bytes at the start of a persisted tree descriptor.
pub(crate) const DESCRIPTOR_MAGIC: [u8; 4] = *b"ARBT";

/// Descriptor format version.
pub(crate) const DESCRIPTOR_VERSION: u16 = 1;
