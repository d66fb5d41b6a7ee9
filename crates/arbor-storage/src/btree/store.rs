//! Page store contract for B+Tree nodes and an in-memory implementation.

use crate::allocator::PageAllocator;
use crate::btree::page::{NodeReader, NodeWriter};
use arbor_common::page::new_page_buf;
use arbor_common::{ArborError, PageBuf, PageId, PageType, Result, PAGE_SIZE};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed-size page storage consumed by the tree.
///
/// All pages handed out by one store share its backing id as their
/// `file_id`. Implementations synchronize internally; the tree itself
/// performs no locking around page I/O.
pub trait PageStore: Send + Sync {
    /// Page namespace of this store.
    fn backing_id(&self) -> u32;

    /// Allocates a zeroed page.
    fn allocate(&self) -> Result<PageId>;

    /// Reads a full page image.
    ///
    /// Reading a page that is not allocated fails with `PageNotFound`.
    fn read_page(&self, page_id: PageId) -> Result<PageBuf>;

    /// Writes a full page image to an allocated page.
    fn write_page(&self, page_id: PageId, page: &[u8; PAGE_SIZE]) -> Result<()>;

    /// Returns a page to the store. The id may be handed out again.
    fn free(&self, page_id: PageId) -> Result<()>;

    /// Makes every completed write durable.
    fn flush_all(&self) -> Result<()>;
}

impl dyn PageStore + '_ {
    /// Opens a streaming reader over the node whose head page is `page_id`.
    pub fn open_read(&self, page_id: PageId, verify: bool) -> Result<NodeReader<'_>> {
        NodeReader::open(self, page_id, verify)
    }

    /// Opens a buffered writer for the node at `page_id`.
    ///
    /// With `append` the existing node bytes are loaded first so new
    /// entries continue the stream; otherwise the node is rewritten from
    /// scratch when the writer finishes.
    pub fn open_write(&self, page_id: PageId, kind: PageType, append: bool) -> Result<NodeWriter> {
        if append {
            NodeWriter::append(self, page_id, kind)
        } else {
            Ok(NodeWriter::new(page_id, kind))
        }
    }
}

/// In-memory page storage for B+Tree nodes.
///
/// Pages live in a Vec indexed by page number; freed slots are dropped and
/// their numbers recycled through a `PageAllocator`. Read and write counters
/// make page traffic observable in tests.
pub struct MemoryPageStore {
    /// Page namespace of this store.
    backing_id: u32,
    /// Pages stored by page number (index = page_num).
    pages: RwLock<Vec<Option<PageBuf>>>,
    /// Page number allocator.
    allocator: PageAllocator,
    /// Number of page reads served.
    reads: AtomicU64,
    /// Number of page writes accepted.
    writes: AtomicU64,
}

impl MemoryPageStore {
    /// Creates a new empty page store.
    pub fn new(backing_id: u32) -> Self {
        Self {
            backing_id,
            pages: RwLock::new(Vec::new()),
            allocator: PageAllocator::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of currently allocated pages.
    pub fn live_pages(&self) -> usize {
        self.allocator.live_count()
    }

    /// Number of page reads served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of page writes accepted so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Resets the read and write counters.
    pub fn reset_counters(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
    }

    /// Runs `f` on a stored page, for tests that corrupt pages in place.
    pub fn with_page_mut<R>(
        &self,
        page_id: PageId,
        f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> R,
    ) -> Result<R> {
        self.check_backing(page_id)?;
        let mut pages = self.pages.write();
        let page = pages
            .get_mut(page_id.page_num as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(ArborError::PageNotFound { page_id })?;
        Ok(f(page))
    }

    fn check_backing(&self, page_id: PageId) -> Result<()> {
        if page_id.file_id != self.backing_id {
            return Err(ArborError::PageNotFound { page_id });
        }
        Ok(())
    }
}

impl PageStore for MemoryPageStore {
    fn backing_id(&self) -> u32 {
        self.backing_id
    }

    fn allocate(&self) -> Result<PageId> {
        let page_num = self.allocator.allocate()?;
        let mut pages = self.pages.write();
        let index = page_num as usize;
        if pages.len() <= index {
            pages.resize_with(index + 1, || None);
        }
        pages[index] = Some(new_page_buf());
        Ok(PageId::new(self.backing_id, page_num))
    }

    fn read_page(&self, page_id: PageId) -> Result<PageBuf> {
        self.check_backing(page_id)?;
        let pages = self.pages.read();
        let page = pages
            .get(page_id.page_num as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or(ArborError::PageNotFound { page_id })?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(page.clone())
    }

    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        self.check_backing(page_id)?;
        let mut pages = self.pages.write();
        let page = pages
            .get_mut(page_id.page_num as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(ArborError::PageNotFound { page_id })?;
        page.copy_from_slice(data);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn free(&self, page_id: PageId) -> Result<()> {
        self.check_backing(page_id)?;
        self.allocator.release(page_id.page_num)?;
        let mut pages = self.pages.write();
        if let Some(slot) = pages.get_mut(page_id.page_num as usize) {
            *slot = None;
        }
        Ok(())
    }

    fn flush_all(&self) -> Result<()> {
        Ok(())
    }
}
