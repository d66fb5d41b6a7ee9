//! Node byte streams over chained pages.
//!
//! A node is stored as a byte stream: the head page carries the node kind
//! (leaf or inner) in its page header, and when the encoded node does not fit
//! one page the stream continues on `Overflow` pages linked through
//! `PageHeader::next_page`.
//!
//! ```text
//! +-------------+      +-------------+      +-------------+
//! | head page   | ---> | overflow    | ---> | overflow    | ---> none
//! | BTreeLeaf / |      | page        |      | page        |
//! | BTreeInner  |      |             |      |             |
//! +-------------+      +-------------+      +-------------+
//! ```
//!
//! `NodeReader` streams bytes lazily page by page so codecs can decode
//! entries one at a time. `NodeWriter` buffers a whole node and lays it out
//! over the chain on `finish`, reusing the node's existing overflow pages.

use crate::btree::constants::{MAX_CHAIN_PAGES, MAX_FIELD_LEN, MAX_VARINT_LEN};
use crate::btree::store::PageStore;
use arbor_common::page::{new_page_buf, seal_page, verify_page};
use arbor_common::{ArborError, PageBuf, PageHeader, PageId, PageType, Result};
use bytes::{BufMut, BytesMut};
use tracing::{trace, warn};

/// Reads and validates one page of a node chain.
fn load_page(
    store: &dyn PageStore,
    page_id: PageId,
    verify: bool,
) -> Result<(PageBuf, PageHeader)> {
    let page = store.read_page(page_id)?;
    if verify {
        if let Err(err) = verify_page(page_id, &page) {
            warn!(page = %page_id, "page checksum verification failed");
            return Err(err);
        }
    }
    let header = PageHeader::from_bytes(&page[..])?;
    if header.page_id != page_id {
        return Err(ArborError::PageCorrupted {
            page_id,
            reason: format!("header names page {}", header.page_id),
        });
    }
    Ok((page, header))
}

/// Returns every page of the node headed at `head`, head first.
///
/// A head page that does not hold a node (for example a freshly allocated,
/// zeroed page) has no continuation.
pub fn node_pages(store: &dyn PageStore, head: PageId) -> Result<Vec<PageId>> {
    let page = store.read_page(head)?;
    let header = PageHeader::from_bytes(&page[..])?;
    let mut pages = vec![head];
    if !header.page_type.is_node() {
        return Ok(pages);
    }

    let mut next = header.next_page_id();
    while let Some(page_id) = next {
        if pages.len() >= MAX_CHAIN_PAGES {
            return Err(ArborError::CorruptEncoding(format!(
                "node {} overflow chain exceeds {} pages",
                head, MAX_CHAIN_PAGES
            )));
        }
        let (_, header) = load_page(store, page_id, false)?;
        if header.page_type != PageType::Overflow {
            return Err(ArborError::PageCorrupted {
                page_id,
                reason: format!("expected overflow page in chain of {}", head),
            });
        }
        pages.push(page_id);
        next = header.next_page_id();
    }
    Ok(pages)
}

/// Frees every page of the node headed at `head`. Returns the page count.
pub fn free_node(store: &dyn PageStore, head: PageId) -> Result<usize> {
    let pages = node_pages(store, head)?;
    for &page_id in &pages {
        store.free(page_id)?;
    }
    Ok(pages.len())
}

// ============================================================================
// NodeReader
// ============================================================================

/// Streaming reader over one node's page chain.
///
/// Only the page currently being decoded is held in memory; the next
/// overflow page is loaded when the current one is exhausted. Dropping the
/// reader releases its page buffer.
pub struct NodeReader<'s> {
    store: &'s dyn PageStore,
    head: PageId,
    kind: PageType,
    page: PageBuf,
    /// Read offset within the current page's payload.
    pos: usize,
    /// Payload length of the current page.
    len: usize,
    next: Option<PageId>,
    verify: bool,
    pages_read: usize,
}

impl<'s> NodeReader<'s> {
    /// Opens the node whose head page is `head`.
    pub fn open(store: &'s dyn PageStore, head: PageId, verify: bool) -> Result<Self> {
        let (page, header) = load_page(store, head, verify)?;
        if !header.page_type.is_node() {
            return Err(ArborError::InvariantViolation(format!(
                "page {} is a {:?} page, expected a tree node",
                head, header.page_type
            )));
        }
        Ok(Self {
            store,
            head,
            kind: header.page_type,
            page,
            pos: 0,
            len: header.payload_len as usize,
            next: header.next_page_id(),
            verify,
            pages_read: 1,
        })
    }

    /// Head page of the node.
    pub fn head(&self) -> PageId {
        self.head
    }

    /// Node kind recorded in the head page.
    pub fn kind(&self) -> PageType {
        self.kind
    }

    /// Returns true if the node is a leaf.
    pub fn is_leaf(&self) -> bool {
        self.kind == PageType::BTreeLeaf
    }

    /// Number of pages loaded by this reader so far.
    pub fn pages_read(&self) -> usize {
        self.pages_read
    }

    /// Ensures unread bytes are available, following the chain if needed.
    fn fill(&mut self) -> Result<bool> {
        while self.pos == self.len {
            let Some(page_id) = self.next else {
                return Ok(false);
            };
            if self.pages_read >= MAX_CHAIN_PAGES {
                return Err(ArborError::CorruptEncoding(format!(
                    "node {} overflow chain exceeds {} pages",
                    self.head, MAX_CHAIN_PAGES
                )));
            }
            let (page, header) = load_page(self.store, page_id, self.verify)?;
            if header.page_type != PageType::Overflow {
                return Err(ArborError::PageCorrupted {
                    page_id,
                    reason: format!("expected overflow page in chain of {}", self.head),
                });
            }
            trace!(node = %self.head, page = %page_id, "following overflow page");
            self.page = page;
            self.pos = 0;
            self.len = header.payload_len as usize;
            self.next = header.next_page_id();
            self.pages_read += 1;
        }
        Ok(true)
    }

    fn truncated(&self) -> ArborError {
        ArborError::CorruptEncoding(format!("unexpected end of node {}", self.head))
    }

    /// Returns true once every byte of the node has been consumed.
    pub fn is_at_end(&mut self) -> Result<bool> {
        Ok(!self.fill()?)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        if !self.fill()? {
            return Err(self.truncated());
        }
        let byte = self.page[PageHeader::SIZE + self.pos];
        self.pos += 1;
        Ok(byte)
    }

    /// Fills `out` completely, crossing page boundaries as needed.
    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < out.len() {
            if !self.fill()? {
                return Err(self.truncated());
            }
            let available = self.len - self.pos;
            let take = available.min(out.len() - filled);
            let start = PageHeader::SIZE + self.pos;
            out[filled..filled + take].copy_from_slice(&self.page[start..start + take]);
            self.pos += take;
            filled += take;
        }
        Ok(())
    }

    /// Reads `len` bytes into a new vector.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if len > MAX_FIELD_LEN {
            return Err(ArborError::CorruptEncoding(format!(
                "field length {} in node {} exceeds {} bytes",
                len, self.head, MAX_FIELD_LEN
            )));
        }
        let mut out = vec![0u8; len];
        self.read_exact(&mut out)?;
        Ok(out)
    }

    /// Reads a LEB128 varint.
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.read_u8()?;
            let shift = 7 * i as u32;
            if i == MAX_VARINT_LEN - 1 && byte > 1 {
                break;
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ArborError::CorruptEncoding(format!(
            "varint overflow in node {}",
            self.head
        )))
    }

    /// Reads a varint that must fit a u32.
    pub fn read_varint_u32(&mut self) -> Result<u32> {
        let value = self.read_varint()?;
        u32::try_from(value).map_err(|_| {
            ArborError::CorruptEncoding(format!(
                "value {} in node {} does not fit 32 bits",
                value, self.head
            ))
        })
    }

    /// Reads a page id written by `NodeWriter::put_page_id`.
    pub fn read_page_id(&mut self) -> Result<PageId> {
        let file_id = self.read_varint_u32()?;
        let page_num = self.read_varint_u32()?;
        Ok(PageId::new(file_id, page_num))
    }

    /// Appends every unread byte to `out`.
    pub fn read_remaining(&mut self, out: &mut BytesMut) -> Result<()> {
        while self.fill()? {
            let start = PageHeader::SIZE + self.pos;
            let end = PageHeader::SIZE + self.len;
            out.put_slice(&self.page[start..end]);
            self.pos = self.len;
        }
        Ok(())
    }
}

// ============================================================================
// NodeWriter
// ============================================================================

/// Buffered writer for one node.
///
/// Bytes accumulate in memory until `finish` lays them out over the node's
/// page chain.
pub struct NodeWriter {
    head: PageId,
    kind: PageType,
    buf: BytesMut,
}

impl NodeWriter {
    /// Creates an empty writer for a node of `kind` headed at `head`.
    pub fn new(head: PageId, kind: PageType) -> Self {
        Self {
            head,
            kind,
            buf: BytesMut::with_capacity(PageHeader::PAYLOAD_CAPACITY),
        }
    }

    /// Creates a writer preloaded with the node's current bytes.
    pub fn append(store: &dyn PageStore, head: PageId, kind: PageType) -> Result<Self> {
        let mut reader = NodeReader::open(store, head, false)?;
        if reader.kind() != kind {
            return Err(ArborError::InvariantViolation(format!(
                "append to node {} of kind {:?} as {:?}",
                head,
                reader.kind(),
                kind
            )));
        }
        let mut writer = Self::new(head, kind);
        reader.read_remaining(&mut writer.buf)?;
        Ok(writer)
    }

    /// Head page of the node.
    pub fn head(&self) -> PageId {
        self.head
    }

    /// Node kind written to the head page.
    pub fn kind(&self) -> PageType {
        self.kind
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Writes one byte.
    pub fn put_u8(&mut self, byte: u8) {
        self.buf.put_u8(byte);
    }

    /// Writes raw bytes.
    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Writes a LEB128 varint.
    pub fn put_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.put_u8((value as u8) | 0x80);
            value >>= 7;
        }
        self.buf.put_u8(value as u8);
    }

    /// Writes a page id as two varints (file id, page number).
    pub fn put_page_id(&mut self, page_id: PageId) {
        self.put_varint(u64::from(page_id.file_id));
        self.put_varint(u64::from(page_id.page_num));
    }

    /// Lays the buffered bytes out over the node's page chain.
    ///
    /// Existing overflow pages of the node are reused in order; missing ones
    /// are allocated and surplus ones freed. Returns the number of pages the
    /// node now spans.
    pub fn finish(self, store: &dyn PageStore) -> Result<usize> {
        let mut overflow = node_pages(store, self.head)?;
        overflow.remove(0);

        let chunks: Vec<&[u8]> = if self.buf.is_empty() {
            vec![&self.buf[..]]
        } else {
            self.buf.chunks(PageHeader::PAYLOAD_CAPACITY).collect()
        };
        let needed = chunks.len() - 1;
        if chunks.len() > MAX_CHAIN_PAGES {
            return Err(ArborError::InvalidParameter {
                name: "node_size".to_string(),
                value: self.buf.len().to_string(),
            });
        }
        while overflow.len() < needed {
            overflow.push(store.allocate()?);
        }
        let surplus = overflow.split_off(needed);

        for (i, chunk) in chunks.iter().enumerate() {
            let (page_id, page_type) = if i == 0 {
                (self.head, self.kind)
            } else {
                (overflow[i - 1], PageType::Overflow)
            };
            let mut header = PageHeader::new(page_id, page_type);
            header.payload_len = chunk.len() as u16;
            if let Some(next) = overflow.get(i) {
                header.next_page = next.page_num;
            }

            let mut page = new_page_buf();
            page[..PageHeader::SIZE].copy_from_slice(&header.to_bytes());
            page[PageHeader::SIZE..PageHeader::SIZE + chunk.len()].copy_from_slice(chunk);
            seal_page(&mut page);
            store.write_page(page_id, &page)?;
        }

        for page_id in surplus {
            store.free(page_id)?;
        }
        if needed > 0 {
            trace!(node = %self.head, pages = needed + 1, "node spans overflow pages");
        }
        Ok(chunks.len())
    }
}
