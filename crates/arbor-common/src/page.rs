//! Page structures for Arbor storage.

use crate::error::{ArborError, Result};
use serde::{Deserialize, Serialize};

/// Default page size in bytes (4 KB).
pub const PAGE_SIZE: usize = 4 * 1024;

/// Owned, heap-allocated page image.
pub type PageBuf = Box<[u8; PAGE_SIZE]>;

/// Returns a zeroed page image.
pub fn new_page_buf() -> PageBuf {
    Box::new([0u8; PAGE_SIZE])
}

/// Unique identifier for a page.
///
/// PageId consists of a backing file ID and page number within that file.
/// Every page of one tree shares the same `file_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId {
    /// Backing identifier (page namespace) the page belongs to.
    pub file_id: u32,
    /// Page number within the backing file (0-indexed).
    pub page_num: u32,
}

impl PageId {
    /// Creates a new PageId.
    pub fn new(file_id: u32, page_num: u32) -> Self {
        Self { file_id, page_num }
    }

    /// Returns the PageId as a single u64 for compact storage.
    pub fn as_u64(&self) -> u64 {
        ((self.file_id as u64) << 32) | (self.page_num as u64)
    }

    /// Creates a PageId from a u64 representation.
    pub fn from_u64(value: u64) -> Self {
        Self {
            file_id: (value >> 32) as u32,
            page_num: value as u32,
        }
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_id, self.page_num)
    }
}

/// Page types in Arbor storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageType {
    /// Unallocated/free page.
    Free = 0,
    /// Head page of a B+ tree leaf node.
    BTreeLeaf = 1,
    /// Head page of a B+ tree inner node.
    BTreeInner = 2,
    /// Continuation page of a node that does not fit one page.
    Overflow = 3,
    /// Persisted tree descriptor.
    Descriptor = 4,
}

impl PageType {
    /// Decodes a page type byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PageType::Free),
            1 => Some(PageType::BTreeLeaf),
            2 => Some(PageType::BTreeInner),
            3 => Some(PageType::Overflow),
            4 => Some(PageType::Descriptor),
            _ => None,
        }
    }

    /// Returns true for the head page of a tree node.
    pub fn is_node(&self) -> bool {
        matches!(self, PageType::BTreeLeaf | PageType::BTreeInner)
    }
}

/// Header structure at the beginning of every page.
///
/// Layout (32 bytes total):
/// - page_id: 8 bytes (file_id: 4, page_num: 4)
/// - page_type: 1 byte
/// - reserved: 1 byte
/// - payload_len: 2 bytes
/// - next_page: 4 bytes (continuation page in the same file, u32::MAX = none)
/// - checksum: 4 bytes
/// - reserved: 12 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageHeader {
    /// Unique page identifier.
    pub page_id: PageId,
    /// Type of this page.
    pub page_type: PageType,
    /// Number of payload bytes following the header.
    pub payload_len: u16,
    /// Page number of the continuation page, or `NO_NEXT_PAGE`.
    pub next_page: u32,
    /// CRC32 checksum of the page contents (excluding this field).
    pub checksum: u32,
}

impl PageHeader {
    /// Size of the page header in bytes.
    pub const SIZE: usize = 32;

    /// Payload bytes available after the header.
    pub const PAYLOAD_CAPACITY: usize = PAGE_SIZE - Self::SIZE;

    /// Marker for "no continuation page".
    pub const NO_NEXT_PAGE: u32 = u32::MAX;

    const CHECKSUM_OFFSET: usize = 16;

    /// Creates a new page header.
    pub fn new(page_id: PageId, page_type: PageType) -> Self {
        Self {
            page_id,
            page_type,
            payload_len: 0,
            next_page: Self::NO_NEXT_PAGE,
            checksum: 0,
        }
    }

    /// Returns the continuation page, if any.
    pub fn next_page_id(&self) -> Option<PageId> {
        if self.next_page == Self::NO_NEXT_PAGE {
            None
        } else {
            Some(PageId::new(self.page_id.file_id, self.next_page))
        }
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.page_id.file_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.page_id.page_num.to_le_bytes());
        buf[8] = self.page_type as u8;
        buf[10..12].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[12..16].copy_from_slice(&self.next_page.to_le_bytes());
        buf[16..20].copy_from_slice(&self.checksum.to_le_bytes());
        // bytes 9 and 20-31 are reserved (already zeroed)
        buf
    }

    /// Deserializes the header from bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(ArborError::CorruptEncoding(format!(
                "page header needs {} bytes, got {}",
                Self::SIZE,
                buf.len()
            )));
        }
        let file_id = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let page_num = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let page_id = PageId::new(file_id, page_num);
        let page_type = PageType::from_u8(buf[8]).ok_or_else(|| ArborError::PageCorrupted {
            page_id,
            reason: format!("unknown page type {}", buf[8]),
        })?;
        let payload_len = u16::from_le_bytes([buf[10], buf[11]]);
        let next_page = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let checksum = u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]);

        if payload_len as usize > Self::PAYLOAD_CAPACITY {
            return Err(ArborError::PageCorrupted {
                page_id,
                reason: format!("payload length {} exceeds page capacity", payload_len),
            });
        }

        Ok(Self {
            page_id,
            page_type,
            payload_len,
            next_page,
            checksum,
        })
    }
}

/// Computes the CRC32 of a page with the checksum field treated as zero.
pub fn compute_checksum(page: &[u8; PAGE_SIZE]) -> u32 {
    let offset = PageHeader::CHECKSUM_OFFSET;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page[..offset]);
    hasher.update(&[0u8; 4]);
    hasher.update(&page[offset + 4..]);
    hasher.finalize()
}

/// Stores the page checksum into its header.
pub fn seal_page(page: &mut [u8; PAGE_SIZE]) {
    let checksum = compute_checksum(page);
    let offset = PageHeader::CHECKSUM_OFFSET;
    page[offset..offset + 4].copy_from_slice(&checksum.to_le_bytes());
}

/// Verifies the stored checksum of a page read back as `page_id`.
pub fn verify_page(page_id: PageId, page: &[u8; PAGE_SIZE]) -> Result<()> {
    let offset = PageHeader::CHECKSUM_OFFSET;
    let stored = u32::from_le_bytes([
        page[offset],
        page[offset + 1],
        page[offset + 2],
        page[offset + 3],
    ]);
    let computed = compute_checksum(page);
    if stored != computed {
        return Err(ArborError::PageCorrupted {
            page_id,
            reason: format!(
                "checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored, computed
            ),
        });
    }
    Ok(())
}
