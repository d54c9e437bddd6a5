//! # Descriptor Pools
//!
//! A pool owns every page of one heap kind and routes allocation
//! requests to a page with room, growing by whole pages when none fits.
//! New pages are sized to the largest request seen so far, so one
//! oversized allocation raises the page size for the rest of the run.
//!
//! The pool is where CPU bookkeeping meets GPU progress: the render loop
//! calls [`DescriptorPool::reclaim_stale`] once per frame boundary, after
//! its fence confirms the frame's GPU work finished.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::allocation::SlotRange;
use crate::device::{HeapBackend, HeapKind};
use crate::error::{DescriptorError, DescriptorResult};
use crate::page::DescriptorPage;

/// Routing state, guarded by the pool mutex.
struct PoolState {
    /// Every page ever created, in creation order.
    pages: Vec<Arc<DescriptorPage>>,
    /// Indices of pages believed to have free slots.
    available: BTreeSet<usize>,
    /// Slot capacity for the next page; high-water-marked by requests.
    page_size: u32,
}

/// Growable collection of descriptor pages of one heap kind.
///
/// Thread-safe: resource-loading threads may allocate and release
/// concurrently. Routing runs under the pool mutex, page internals under
/// their own page mutexes, and the two are never taken in the reverse
/// order.
pub struct DescriptorPool {
    kind: HeapKind,
    backend: Arc<dyn HeapBackend>,
    state: Mutex<PoolState>,
}

impl DescriptorPool {
    /// Creates an empty pool. Pages appear on first allocation.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is zero.
    #[must_use]
    pub fn new(kind: HeapKind, page_size: u32, backend: Arc<dyn HeapBackend>) -> Self {
        assert!(page_size > 0, "page size must be non-zero");
        Self {
            kind,
            backend,
            state: Mutex::new(PoolState {
                pages: Vec::new(),
                available: BTreeSet::new(),
                page_size,
            }),
        }
    }

    /// Heap kind served by this pool.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> HeapKind {
        self.kind
    }

    /// Number of pages created so far.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.state.lock().pages.len()
    }

    /// Free slots across all pages. Slots parked behind the frame barrier
    /// are not counted.
    #[must_use]
    pub fn free_slots(&self) -> u32 {
        self.state
            .lock()
            .pages
            .iter()
            .map(|page| page.free_slots())
            .sum()
    }

    /// Allocates `count` contiguous slots, growing by one page when no
    /// existing page can satisfy the request.
    ///
    /// Page exhaustion is handled internally and never surfaces. The
    /// failure modes are a zero-slot request and the backend refusing to
    /// create a page; the latter is fatal for the caller.
    pub fn allocate(&self, count: u32) -> DescriptorResult<SlotRange> {
        if count == 0 {
            return Err(DescriptorError::EmptyRequest);
        }
        let mut state = self.state.lock();

        // Scan only pages believed to have room, dropping exhausted ones
        // from the set as they are discovered.
        let candidates: Vec<usize> = state.available.iter().copied().collect();
        for index in candidates {
            let page = Arc::clone(&state.pages[index]);
            let allocation = page.allocate(count);
            if page.free_slots() == 0 {
                state.available.remove(&index);
            }
            if let Some(range) = allocation {
                return Ok(range);
            }
        }

        // Nothing fits; grow by one page sized to the largest request
        // seen, so repeats of this request reuse the new page.
        state.page_size = state.page_size.max(count);
        let page = self.create_page(&mut state)?;
        match page.allocate(count) {
            Some(range) => Ok(range),
            // A fresh page holds at least `count` slots by construction.
            None => unreachable!("fresh descriptor page rejected its first allocation"),
        }
    }

    fn create_page(&self, state: &mut PoolState) -> DescriptorResult<Arc<DescriptorPage>> {
        let backing = self.backend.create_heap(self.kind, state.page_size)?;
        let page = DescriptorPage::new(self.kind, state.page_size, backing);
        state.pages.push(Arc::clone(&page));
        state.available.insert(state.pages.len() - 1);
        debug!(
            "created {:?} descriptor page of {} slots ({} pages total)",
            self.kind,
            state.page_size,
            state.pages.len()
        );
        Ok(page)
    }

    /// Reclaims every page's stale ranges retired at or before
    /// `completed_frame`.
    ///
    /// Call once per frame boundary, after a fence proves the frame's GPU
    /// work is done. Pages that regain free slots re-enter the allocation
    /// scan.
    pub fn reclaim_stale(&self, completed_frame: u64) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for (index, page) in state.pages.iter().enumerate() {
            page.reclaim(completed_frame);
            if page.free_slots() > 0 {
                state.available.insert(index);
            }
        }
    }
}
