//! Page number allocation with a free list.

use arbor_common::{ArborError, Result};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use tracing::trace;

/// Hands out page numbers within one backing id.
///
/// Fresh numbers come from a monotonically increasing counter; freed numbers
/// are kept in a free set and reused lowest-first. A page number is only
/// handed out again after it has been released.
pub struct PageAllocator {
    state: Mutex<AllocatorState>,
}

struct AllocatorState {
    /// Next never-used page number.
    next_page: u32,
    /// Released page numbers available for reuse.
    free: BTreeSet<u32>,
}

impl PageAllocator {
    /// Creates an allocator whose first fresh page is `next_page`.
    pub fn new(next_page: u32) -> Self {
        Self::with_free_pages(next_page, std::iter::empty())
    }

    /// Creates an allocator with a pre-existing free list.
    pub fn with_free_pages(next_page: u32, free: impl IntoIterator<Item = u32>) -> Self {
        let free = free.into_iter().filter(|&page| page < next_page).collect();
        Self {
            state: Mutex::new(AllocatorState { next_page, free }),
        }
    }

    /// Allocates a page number, reusing a freed one when available.
    pub fn allocate(&self) -> Result<u32> {
        let mut state = self.state.lock();
        if let Some(page) = state.free.pop_first() {
            trace!(page, "reusing freed page");
            return Ok(page);
        }
        let page = state.next_page;
        if page == u32::MAX {
            return Err(ArborError::Internal("page number space exhausted".to_string()));
        }
        state.next_page = page + 1;
        Ok(page)
    }

    /// Returns a page number to the free list.
    pub fn release(&self, page: u32) -> Result<()> {
        let mut state = self.state.lock();
        if page >= state.next_page {
            return Err(ArborError::InvariantViolation(format!(
                "release of page {} that was never allocated",
                page
            )));
        }
        if !state.free.insert(page) {
            return Err(ArborError::InvariantViolation(format!(
                "double free of page {}",
                page
            )));
        }
        Ok(())
    }

    /// Returns true if `page` is currently allocated.
    pub fn is_allocated(&self, page: u32) -> bool {
        let state = self.state.lock();
        page < state.next_page && !state.free.contains(&page)
    }

    /// Number of page numbers ever handed out (the high-water mark).
    pub fn high_water(&self) -> u32 {
        self.state.lock().next_page
    }

    /// Number of freed page numbers awaiting reuse.
    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Number of currently allocated page numbers.
    pub fn live_count(&self) -> usize {
        let state = self.state.lock();
        state.next_page as usize - state.free.len()
    }
}
