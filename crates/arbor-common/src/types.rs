//! Type and strategy tags persisted in tree descriptors.

use serde::{Deserialize, Serialize};

/// Identifier for the key and value types a tree stores.
///
/// Tags are written to the tree descriptor so a reopened tree can be
/// checked against the Rust types it is instantiated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TypeTag {
    // Empty value (set-like trees)
    Unit = 0,

    // Integer types
    UInt32 = 22,
    UInt64 = 23,
    Int64 = 13,

    // String types
    Text = 52,

    // Binary types
    Bytes = 61,
}

impl TypeTag {
    /// Decodes a tag byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TypeTag::Unit),
            22 => Some(TypeTag::UInt32),
            23 => Some(TypeTag::UInt64),
            13 => Some(TypeTag::Int64),
            52 => Some(TypeTag::Text),
            61 => Some(TypeTag::Bytes),
            _ => None,
        }
    }

    /// Returns true if this type is an integer type (signed or unsigned).
    pub fn is_integer(&self) -> bool {
        matches!(self, TypeTag::UInt32 | TypeTag::UInt64 | TypeTag::Int64)
    }

    /// Returns true if values of this type are byte strings.
    pub fn is_byte_like(&self) -> bool {
        matches!(self, TypeTag::Text | TypeTag::Bytes)
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TypeTag::Unit => "UNIT",
            TypeTag::UInt32 => "UINT32",
            TypeTag::UInt64 => "UINT64",
            TypeTag::Int64 => "INT64",
            TypeTag::Text => "TEXT",
            TypeTag::Bytes => "BYTES",
        };
        write!(f, "{}", name)
    }
}

/// Identifies the key ordering of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ComparatorTag {
    /// Ascending `Ord` order.
    Natural = 0,
    /// Descending `Ord` order.
    Reverse = 1,
    /// Byte-lexicographic order with prefix matching.
    Prefix = 2,
}

impl ComparatorTag {
    /// Decodes a tag byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ComparatorTag::Natural),
            1 => Some(ComparatorTag::Reverse),
            2 => Some(ComparatorTag::Prefix),
            _ => None,
        }
    }
}

impl std::fmt::Display for ComparatorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Identifies the node encoding of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CodecTag {
    /// Every field written in full.
    Plain = 0,
    /// Integer keys as deltas from the previous key.
    Delta = 1,
    /// Byte keys as shared prefix plus suffix.
    Prefix = 2,
}

impl CodecTag {
    /// Decodes a tag byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CodecTag::Plain),
            1 => Some(CodecTag::Delta),
            2 => Some(CodecTag::Prefix),
            _ => None,
        }
    }
}

impl std::fmt::Display for CodecTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
