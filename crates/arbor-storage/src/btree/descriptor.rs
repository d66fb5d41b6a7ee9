//! Persisted tree descriptor.
//!
//! The descriptor records everything needed to reopen a tree: its shape,
//! entry points and the strategies its pages were written with. It is
//! stored as a fixed 64-byte little-endian record in a `Descriptor` page:
//!
//! ```text
//! 0..4    magic "ARBT"         24..32  size
//! 4..6    format version       32..40  root page id
//! 6       comparator tag       40..48  first leaf page id
//! 7       codec tag            48..60  reserved
//! 8       key type tag         60..64  CRC32 of bytes 0..60
//! 9       value type tag
//! 10..12  reserved
//! 12..16  backing id
//! 16..20  inner order
//! 20..24  leaf order
//! ```

use crate::btree::codec::Field;
use crate::btree::constants::{DESCRIPTOR_MAGIC, DESCRIPTOR_VERSION};
use crate::btree::store::PageStore;
use arbor_common::page::{new_page_buf, seal_page, verify_page};
use arbor_common::{
    ArborError, CodecTag, ComparatorTag, PageHeader, PageId, PageType, Result, TypeTag,
};
use serde::{Deserialize, Serialize};

/// Everything needed to reopen a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDescriptor {
    pub backing_id: u32,
    pub inner_order: u32,
    pub leaf_order: u32,
    pub size: u64,
    pub comparator: ComparatorTag,
    pub root: PageId,
    pub first_leaf: PageId,
    pub key_type: TypeTag,
    pub value_type: TypeTag,
    pub codec: CodecTag,
}

impl TreeDescriptor {
    /// Encoded size in bytes.
    pub const SIZE: usize = 64;

    const CHECKSUM_OFFSET: usize = 60;

    /// Encodes the descriptor.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&DESCRIPTOR_MAGIC);
        buf[4..6].copy_from_slice(&DESCRIPTOR_VERSION.to_le_bytes());
        buf[6] = self.comparator as u8;
        buf[7] = self.codec as u8;
        buf[8] = self.key_type as u8;
        buf[9] = self.value_type as u8;
        buf[12..16].copy_from_slice(&self.backing_id.to_le_bytes());
        buf[16..20].copy_from_slice(&self.inner_order.to_le_bytes());
        buf[20..24].copy_from_slice(&self.leaf_order.to_le_bytes());
        buf[24..32].copy_from_slice(&self.size.to_le_bytes());
        buf[32..40].copy_from_slice(&self.root.as_u64().to_le_bytes());
        buf[40..48].copy_from_slice(&self.first_leaf.as_u64().to_le_bytes());
        let checksum = crc32fast::hash(&buf[..Self::CHECKSUM_OFFSET]);
        buf[Self::CHECKSUM_OFFSET..].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Decodes a descriptor, validating magic, version and checksum.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(ArborError::CorruptEncoding(format!(
                "descriptor needs {} bytes, got {}",
                Self::SIZE,
                buf.len()
            )));
        }
        if buf[0..4] != DESCRIPTOR_MAGIC {
            return Err(ArborError::CorruptEncoding(
                "descriptor magic mismatch".to_string(),
            ));
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != DESCRIPTOR_VERSION {
            return Err(ArborError::CorruptEncoding(format!(
                "unsupported descriptor version {version}"
            )));
        }
        let stored = read_u32(buf, Self::CHECKSUM_OFFSET);
        let computed = crc32fast::hash(&buf[..Self::CHECKSUM_OFFSET]);
        if stored != computed {
            return Err(ArborError::CorruptEncoding(format!(
                "descriptor checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
            )));
        }

        Ok(Self {
            comparator: ComparatorTag::from_u8(buf[6])
                .ok_or_else(|| unknown_tag("comparator", buf[6]))?,
            codec: CodecTag::from_u8(buf[7]).ok_or_else(|| unknown_tag("codec", buf[7]))?,
            key_type: TypeTag::from_u8(buf[8]).ok_or_else(|| unknown_tag("key type", buf[8]))?,
            value_type: TypeTag::from_u8(buf[9])
                .ok_or_else(|| unknown_tag("value type", buf[9]))?,
            backing_id: read_u32(buf, 12),
            inner_order: read_u32(buf, 16),
            leaf_order: read_u32(buf, 20),
            size: read_u64(buf, 24),
            root: PageId::from_u64(read_u64(buf, 32)),
            first_leaf: PageId::from_u64(read_u64(buf, 40)),
        })
    }

    /// Stores the descriptor in the page `page_id`.
    pub fn write_to(&self, store: &dyn PageStore, page_id: PageId) -> Result<()> {
        let mut page = new_page_buf();
        let mut header = PageHeader::new(page_id, PageType::Descriptor);
        header.payload_len = Self::SIZE as u16;
        page[..PageHeader::SIZE].copy_from_slice(&header.to_bytes());
        page[PageHeader::SIZE..PageHeader::SIZE + Self::SIZE].copy_from_slice(&self.to_bytes());
        seal_page(&mut page);
        store.write_page(page_id, &page)
    }

    /// Loads the descriptor stored in the page `page_id`.
    pub fn read_from(store: &dyn PageStore, page_id: PageId) -> Result<Self> {
        let page = store.read_page(page_id)?;
        verify_page(page_id, &page)?;
        let header = PageHeader::from_bytes(&page[..])?;
        if header.page_type != PageType::Descriptor {
            return Err(ArborError::PageCorrupted {
                page_id,
                reason: format!("expected a descriptor page, found {:?}", header.page_type),
            });
        }
        Self::from_bytes(&page[PageHeader::SIZE..PageHeader::SIZE + header.payload_len as usize])
    }

    /// Checks that a tree over this descriptor can be opened with the given
    /// store and strategies.
    pub(crate) fn check_compatible<K: Field, V: Field>(
        &self,
        backing_id: u32,
        codec: CodecTag,
        comparator: ComparatorTag,
    ) -> Result<()> {
        expect_field("backing_id", self.backing_id, backing_id)?;
        expect_field("key_type", self.key_type, K::TYPE_TAG)?;
        expect_field("value_type", self.value_type, V::TYPE_TAG)?;
        expect_field("codec", self.codec, codec)?;
        expect_field("comparator", self.comparator, comparator)?;
        if self.root.file_id != backing_id || self.first_leaf.file_id != backing_id {
            return Err(ArborError::DescriptorMismatch {
                field: "root",
                expected: format!("pages of backing id {backing_id}"),
                found: format!("root {} and first leaf {}", self.root, self.first_leaf),
            });
        }
        Ok(())
    }
}

fn expect_field<T: PartialEq + std::fmt::Display>(
    field: &'static str,
    stored: T,
    actual: T,
) -> Result<()> {
    if stored != actual {
        return Err(ArborError::DescriptorMismatch {
            field,
            expected: actual.to_string(),
            found: stored.to_string(),
        });
    }
    Ok(())
}

fn unknown_tag(kind: &str, value: u8) -> ArborError {
    ArborError::CorruptEncoding(format!("unknown {kind} tag {value} in descriptor"))
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}
