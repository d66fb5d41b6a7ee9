//! Pluggable node encodings.
//!
//! A `NodeCodec` turns leaf entries and inner (separator, child) pairs into
//! bytes on a `NodeWriter` and decodes them back one entry at a time from a
//! `NodeReader`. Decoding is resumable: callers keep the reader open and
//! call the decode method repeatedly, passing the previously decoded entry
//! as context. That context lets codecs store keys as deltas or shared
//! prefixes without the tree knowing anything about entry sizes.
//!
//! Stream layout shared by the shipped codecs:
//!
//! ```text
//! leaf:  (0x01 key value)*  0x02 has_sibling:u8 [sibling]
//! inner: (0x01 child key)*  0x03 terminal_child
//! ```

use crate::btree::constants::{MAX_FIELD_LEN, TAG_END_OF_LEAF, TAG_ENTRY, TAG_TERMINAL_CHILD};
use crate::btree::page::{NodeReader, NodeWriter};
use arbor_common::{ArborError, CodecTag, ComparatorTag, PageId, Result, TypeTag};
use bytes::Bytes;

/// One step of a streaming leaf decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafItem<K, V> {
    /// A (key, value) entry.
    Entry(K, V),
    /// The leaf's end marker with its sibling pointer.
    EndOfLeaf(Option<PageId>),
    /// No bytes left in the node.
    EndOfStream,
}

/// One step of a streaming inner node decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InnerItem<K> {
    /// A separator key and the child whose subtree maximum it is.
    Entry(K, PageId),
    /// The rightmost child, which has no separator.
    TerminalChild(PageId),
    /// No bytes left in the node.
    EndOfStream,
}

/// Encoding strategy for tree nodes.
pub trait NodeCodec<K, V>: Send + Sync {
    /// Identifies the codec in persisted descriptors.
    fn tag(&self) -> CodecTag;

    /// Returns false if the codec cannot encode keys ordered by `comparator`.
    fn supports(&self, _comparator: ComparatorTag) -> bool {
        true
    }

    /// Decodes the next leaf item. `last` is the previously decoded entry of
    /// the same node, `None` at the start of the node.
    fn decode_next_leaf_entry(
        &self,
        reader: &mut NodeReader<'_>,
        last: Option<(&K, &V)>,
    ) -> Result<LeafItem<K, V>>;

    /// Decodes the next inner item. `last_key` is the previously decoded
    /// separator of the same node.
    fn decode_next_inner_entry(
        &self,
        reader: &mut NodeReader<'_>,
        last_key: Option<&K>,
    ) -> Result<InnerItem<K>>;

    /// Encodes a leaf entry following `last`.
    fn encode_leaf_entry(
        &self,
        key: &K,
        value: &V,
        last: Option<(&K, &V)>,
        writer: &mut NodeWriter,
    ) -> Result<()>;

    /// Encodes an inner (child, separator) pair following `last_key`.
    fn encode_inner_entry(
        &self,
        child: PageId,
        key: &K,
        last_key: Option<&K>,
        writer: &mut NodeWriter,
    ) -> Result<()>;

    /// Encodes the rightmost child of an inner node.
    fn encode_terminal_child(&self, child: PageId, writer: &mut NodeWriter) -> Result<()>;

    /// Encodes the end of a leaf and its sibling pointer.
    fn encode_end_of_leaf(&self, sibling: Option<PageId>, writer: &mut NodeWriter) -> Result<()>;
}

// ============================================================================
// Field encodings
// ============================================================================

/// A key or value type with a self-delimiting byte encoding.
pub trait Field: Clone + Send + Sync + 'static {
    /// Type identifier persisted in tree descriptors.
    const TYPE_TAG: TypeTag;

    /// Rejects a field whose encoding could not be read back.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Appends the encoded field.
    fn encode_field(&self, writer: &mut NodeWriter) -> Result<()>;

    /// Decodes one field.
    fn decode_field(reader: &mut NodeReader<'_>) -> Result<Self>;
}

impl Field for () {
    const TYPE_TAG: TypeTag = TypeTag::Unit;

    fn encode_field(&self, _writer: &mut NodeWriter) -> Result<()> {
        Ok(())
    }

    fn decode_field(_reader: &mut NodeReader<'_>) -> Result<Self> {
        Ok(())
    }
}

impl Field for u32 {
    const TYPE_TAG: TypeTag = TypeTag::UInt32;

    fn encode_field(&self, writer: &mut NodeWriter) -> Result<()> {
        writer.put_varint(u64::from(*self));
        Ok(())
    }

    fn decode_field(reader: &mut NodeReader<'_>) -> Result<Self> {
        reader.read_varint_u32()
    }
}

impl Field for u64 {
    const TYPE_TAG: TypeTag = TypeTag::UInt64;

    fn encode_field(&self, writer: &mut NodeWriter) -> Result<()> {
        writer.put_varint(*self);
        Ok(())
    }

    fn decode_field(reader: &mut NodeReader<'_>) -> Result<Self> {
        reader.read_varint()
    }
}

impl Field for i64 {
    const TYPE_TAG: TypeTag = TypeTag::Int64;

    fn encode_field(&self, writer: &mut NodeWriter) -> Result<()> {
        // zigzag
        writer.put_varint(((*self << 1) ^ (*self >> 63)) as u64);
        Ok(())
    }

    fn decode_field(reader: &mut NodeReader<'_>) -> Result<Self> {
        let raw = reader.read_varint()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }
}

/// Fields longer than this are rejected on read, so they are never written.
fn check_field_len(len: usize) -> Result<()> {
    if len > MAX_FIELD_LEN {
        return Err(ArborError::FieldTooLarge {
            len,
            max: MAX_FIELD_LEN,
        });
    }
    Ok(())
}

fn encode_len_prefixed(bytes: &[u8], writer: &mut NodeWriter) -> Result<()> {
    check_field_len(bytes.len())?;
    writer.put_varint(bytes.len() as u64);
    writer.put_slice(bytes);
    Ok(())
}

fn decode_len_prefixed(reader: &mut NodeReader<'_>) -> Result<Vec<u8>> {
    let len = reader.read_varint()?;
    let len = usize::try_from(len)
        .map_err(|_| ArborError::CorruptEncoding(format!("field length {} too large", len)))?;
    reader.read_bytes(len)
}

impl Field for Vec<u8> {
    const TYPE_TAG: TypeTag = TypeTag::Bytes;

    fn validate(&self) -> Result<()> {
        check_field_len(self.len())
    }

    fn encode_field(&self, writer: &mut NodeWriter) -> Result<()> {
        encode_len_prefixed(self, writer)
    }

    fn decode_field(reader: &mut NodeReader<'_>) -> Result<Self> {
        decode_len_prefixed(reader)
    }
}

impl Field for Bytes {
    const TYPE_TAG: TypeTag = TypeTag::Bytes;

    fn validate(&self) -> Result<()> {
        check_field_len(self.len())
    }

    fn encode_field(&self, writer: &mut NodeWriter) -> Result<()> {
        encode_len_prefixed(self, writer)
    }

    fn decode_field(reader: &mut NodeReader<'_>) -> Result<Self> {
        Ok(Bytes::from(decode_len_prefixed(reader)?))
    }
}

impl Field for String {
    const TYPE_TAG: TypeTag = TypeTag::Text;

    fn validate(&self) -> Result<()> {
        check_field_len(self.len())
    }

    fn encode_field(&self, writer: &mut NodeWriter) -> Result<()> {
        encode_len_prefixed(self.as_bytes(), writer)
    }

    fn decode_field(reader: &mut NodeReader<'_>) -> Result<Self> {
        String::from_key_bytes(decode_len_prefixed(reader)?)
    }
}

/// Keys that are byte strings, usable with prefix compression and
/// prefix matching.
pub trait PrefixKey: Field {
    /// The key's bytes in comparison order.
    fn key_bytes(&self) -> &[u8];

    /// Rebuilds a key from its bytes.
    fn from_key_bytes(bytes: Vec<u8>) -> Result<Self>;
}

impl PrefixKey for Vec<u8> {
    fn key_bytes(&self) -> &[u8] {
        self
    }

    fn from_key_bytes(bytes: Vec<u8>) -> Result<Self> {
        Ok(bytes)
    }
}

impl PrefixKey for Bytes {
    fn key_bytes(&self) -> &[u8] {
        self
    }

    fn from_key_bytes(bytes: Vec<u8>) -> Result<Self> {
        Ok(Bytes::from(bytes))
    }
}

impl PrefixKey for String {
    fn key_bytes(&self) -> &[u8] {
        self.as_bytes()
    }

    fn from_key_bytes(bytes: Vec<u8>) -> Result<Self> {
        String::from_utf8(bytes)
            .map_err(|e| ArborError::CorruptEncoding(format!("invalid UTF-8 in string: {}", e)))
    }
}

// ============================================================================
// Shared framing
// ============================================================================

fn read_tag(reader: &mut NodeReader<'_>) -> Result<Option<u8>> {
    if reader.is_at_end()? {
        return Ok(None);
    }
    Ok(Some(reader.read_u8()?))
}

fn unknown_tag(reader: &NodeReader<'_>, tag: u8, node: &str) -> ArborError {
    ArborError::CorruptEncoding(format!(
        "unknown {} entry tag {:#04x} in node {}",
        node,
        tag,
        reader.head()
    ))
}

fn decode_leaf_with<K, V>(
    reader: &mut NodeReader<'_>,
    decode_entry: impl FnOnce(&mut NodeReader<'_>) -> Result<(K, V)>,
) -> Result<LeafItem<K, V>> {
    let Some(tag) = read_tag(reader)? else {
        return Ok(LeafItem::EndOfStream);
    };
    match tag {
        TAG_ENTRY => {
            let (key, value) = decode_entry(reader)?;
            Ok(LeafItem::Entry(key, value))
        }
        TAG_END_OF_LEAF => {
            let sibling = match reader.read_u8()? {
                0 => None,
                1 => Some(reader.read_page_id()?),
                other => {
                    return Err(ArborError::CorruptEncoding(format!(
                        "invalid sibling marker {} in node {}",
                        other,
                        reader.head()
                    )))
                }
            };
            Ok(LeafItem::EndOfLeaf(sibling))
        }
        other => Err(unknown_tag(reader, other, "leaf")),
    }
}

fn decode_inner_with<K>(
    reader: &mut NodeReader<'_>,
    decode_key: impl FnOnce(&mut NodeReader<'_>) -> Result<K>,
) -> Result<InnerItem<K>> {
    let Some(tag) = read_tag(reader)? else {
        return Ok(InnerItem::EndOfStream);
    };
    match tag {
        TAG_ENTRY => {
            let child = reader.read_page_id()?;
            let key = decode_key(reader)?;
            Ok(InnerItem::Entry(key, child))
        }
        TAG_TERMINAL_CHILD => Ok(InnerItem::TerminalChild(reader.read_page_id()?)),
        other => Err(unknown_tag(reader, other, "inner")),
    }
}

fn write_terminal_child(child: PageId, writer: &mut NodeWriter) {
    writer.put_u8(TAG_TERMINAL_CHILD);
    writer.put_page_id(child);
}

fn write_end_of_leaf(sibling: Option<PageId>, writer: &mut NodeWriter) {
    writer.put_u8(TAG_END_OF_LEAF);
    match sibling {
        Some(page_id) => {
            writer.put_u8(1);
            writer.put_page_id(page_id);
        }
        None => writer.put_u8(0),
    }
}

// ============================================================================
// PlainCodec
// ============================================================================

/// Writes every key and value in full with its `Field` encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCodec;

impl<K: Field, V: Field> NodeCodec<K, V> for PlainCodec {
    fn tag(&self) -> CodecTag {
        CodecTag::Plain
    }

    fn decode_next_leaf_entry(
        &self,
        reader: &mut NodeReader<'_>,
        _last: Option<(&K, &V)>,
    ) -> Result<LeafItem<K, V>> {
        decode_leaf_with(reader, |reader| {
            let key = K::decode_field(reader)?;
            let value = V::decode_field(reader)?;
            Ok((key, value))
        })
    }

    fn decode_next_inner_entry(
        &self,
        reader: &mut NodeReader<'_>,
        _last_key: Option<&K>,
    ) -> Result<InnerItem<K>> {
        decode_inner_with(reader, |reader| K::decode_field(reader))
    }

    fn encode_leaf_entry(
        &self,
        key: &K,
        value: &V,
        _last: Option<(&K, &V)>,
        writer: &mut NodeWriter,
    ) -> Result<()> {
        writer.put_u8(TAG_ENTRY);
        key.encode_field(writer)?;
        value.encode_field(writer)
    }

    fn encode_inner_entry(
        &self,
        child: PageId,
        key: &K,
        _last_key: Option<&K>,
        writer: &mut NodeWriter,
    ) -> Result<()> {
        writer.put_u8(TAG_ENTRY);
        writer.put_page_id(child);
        key.encode_field(writer)
    }

    fn encode_terminal_child(&self, child: PageId, writer: &mut NodeWriter) -> Result<()> {
        write_terminal_child(child, writer);
        Ok(())
    }

    fn encode_end_of_leaf(&self, sibling: Option<PageId>, writer: &mut NodeWriter) -> Result<()> {
        write_end_of_leaf(sibling, writer);
        Ok(())
    }
}

// ============================================================================
// DeltaCodec
// ============================================================================

/// Stores `u64` keys as the varint difference from the previous key of the
/// node. The first key of a node is stored in full.
///
/// Requires strictly ascending keys in natural order.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaCodec;

impl DeltaCodec {
    fn encode_key(key: u64, last: Option<u64>, writer: &mut NodeWriter) -> Result<()> {
        match last {
            None => writer.put_varint(key),
            Some(last) if key > last => writer.put_varint(key - last),
            Some(last) => {
                return Err(ArborError::InvariantViolation(format!(
                    "delta codec requires ascending keys, got {} after {}",
                    key, last
                )))
            }
        }
        Ok(())
    }

    fn decode_key(reader: &mut NodeReader<'_>, last: Option<u64>) -> Result<u64> {
        let raw = reader.read_varint()?;
        let Some(last) = last else {
            return Ok(raw);
        };
        if raw == 0 {
            return Err(ArborError::CorruptEncoding(format!(
                "zero key delta in node {}",
                reader.head()
            )));
        }
        last.checked_add(raw).ok_or_else(|| {
            ArborError::CorruptEncoding(format!("key delta overflow in node {}", reader.head()))
        })
    }
}

impl<V: Field> NodeCodec<u64, V> for DeltaCodec {
    fn tag(&self) -> CodecTag {
        CodecTag::Delta
    }

    fn supports(&self, comparator: ComparatorTag) -> bool {
        comparator == ComparatorTag::Natural
    }

    fn decode_next_leaf_entry(
        &self,
        reader: &mut NodeReader<'_>,
        last: Option<(&u64, &V)>,
    ) -> Result<LeafItem<u64, V>> {
        let last_key = last.map(|(key, _)| *key);
        decode_leaf_with(reader, |reader| {
            let key = Self::decode_key(reader, last_key)?;
            let value = V::decode_field(reader)?;
            Ok((key, value))
        })
    }

    fn decode_next_inner_entry(
        &self,
        reader: &mut NodeReader<'_>,
        last_key: Option<&u64>,
    ) -> Result<InnerItem<u64>> {
        let last_key = last_key.copied();
        decode_inner_with(reader, |reader| Self::decode_key(reader, last_key))
    }

    fn encode_leaf_entry(
        &self,
        key: &u64,
        value: &V,
        last: Option<(&u64, &V)>,
        writer: &mut NodeWriter,
    ) -> Result<()> {
        writer.put_u8(TAG_ENTRY);
        Self::encode_key(*key, last.map(|(key, _)| *key), writer)?;
        value.encode_field(writer)
    }

    fn encode_inner_entry(
        &self,
        child: PageId,
        key: &u64,
        last_key: Option<&u64>,
        writer: &mut NodeWriter,
    ) -> Result<()> {
        writer.put_u8(TAG_ENTRY);
        writer.put_page_id(child);
        Self::encode_key(*key, last_key.copied(), writer)
    }

    fn encode_terminal_child(&self, child: PageId, writer: &mut NodeWriter) -> Result<()> {
        write_terminal_child(child, writer);
        Ok(())
    }

    fn encode_end_of_leaf(&self, sibling: Option<PageId>, writer: &mut NodeWriter) -> Result<()> {
        write_end_of_leaf(sibling, writer);
        Ok(())
    }
}

// ============================================================================
// PrefixCodec
// ============================================================================

/// Stores byte-string keys as the length of the prefix shared with the
/// previous key followed by the remaining suffix.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefixCodec;

impl PrefixCodec {
    fn encode_key(key: &[u8], last: Option<&[u8]>, writer: &mut NodeWriter) -> Result<()> {
        check_field_len(key.len())?;
        let shared = last.map_or(0, |last| {
            last.iter().zip(key).take_while(|(a, b)| a == b).count()
        });
        writer.put_varint(shared as u64);
        writer.put_varint((key.len() - shared) as u64);
        writer.put_slice(&key[shared..]);
        Ok(())
    }

    fn decode_key<K: PrefixKey>(reader: &mut NodeReader<'_>, last: Option<&[u8]>) -> Result<K> {
        let shared = reader.read_varint()?;
        let last = last.unwrap_or(&[]);
        if shared > last.len() as u64 {
            return Err(ArborError::CorruptEncoding(format!(
                "shared prefix {} exceeds previous key length {} in node {}",
                shared,
                last.len(),
                reader.head()
            )));
        }
        let suffix_len = reader.read_varint()?;
        let suffix_len = usize::try_from(suffix_len).map_err(|_| {
            ArborError::CorruptEncoding(format!("suffix length {} too large", suffix_len))
        })?;
        let mut bytes = last[..shared as usize].to_vec();
        bytes.extend_from_slice(&reader.read_bytes(suffix_len)?);
        K::from_key_bytes(bytes)
    }
}

impl<K: PrefixKey, V: Field> NodeCodec<K, V> for PrefixCodec {
    fn tag(&self) -> CodecTag {
        CodecTag::Prefix
    }

    fn decode_next_leaf_entry(
        &self,
        reader: &mut NodeReader<'_>,
        last: Option<(&K, &V)>,
    ) -> Result<LeafItem<K, V>> {
        let last_key = last.map(|(key, _)| key.key_bytes());
        decode_leaf_with(reader, |reader| {
            let key = Self::decode_key(reader, last_key)?;
            let value = V::decode_field(reader)?;
            Ok((key, value))
        })
    }

    fn decode_next_inner_entry(
        &self,
        reader: &mut NodeReader<'_>,
        last_key: Option<&K>,
    ) -> Result<InnerItem<K>> {
        let last_key = last_key.map(|key| key.key_bytes());
        decode_inner_with(reader, |reader| Self::decode_key(reader, last_key))
    }

    fn encode_leaf_entry(
        &self,
        key: &K,
        value: &V,
        last: Option<(&K, &V)>,
        writer: &mut NodeWriter,
    ) -> Result<()> {
        writer.put_u8(TAG_ENTRY);
        Self::encode_key(key.key_bytes(), last.map(|(key, _)| key.key_bytes()), writer)?;
        value.encode_field(writer)
    }

    fn encode_inner_entry(
        &self,
        child: PageId,
        key: &K,
        last_key: Option<&K>,
        writer: &mut NodeWriter,
    ) -> Result<()> {
        writer.put_u8(TAG_ENTRY);
        writer.put_page_id(child);
        Self::encode_key(key.key_bytes(), last_key.map(|key| key.key_bytes()), writer)
    }

    fn encode_terminal_child(&self, child: PageId, writer: &mut NodeWriter) -> Result<()> {
        write_terminal_child(child, writer);
        Ok(())
    }

    fn encode_end_of_leaf(&self, sibling: Option<PageId>, writer: &mut NodeWriter) -> Result<()> {
        write_end_of_leaf(sibling, writer);
        Ok(())
    }
}
