//! # Descriptor Pages
//!
//! A page owns one fixed-capacity slot table and the bookkeeping to carve
//! ranges out of it: free blocks indexed both by offset and by size,
//! split on allocation, coalesced with their neighbors on reclamation,
//! plus a FIFO of released ranges waiting behind the frame barrier.
//!
//! ## Invariants
//!
//! - Free blocks never overlap and never touch; adjacency is coalesced
//!   the moment a range is reclaimed, so blocks are always maximal.
//! - Every free block has exactly one entry in the offset index and one
//!   in the size index.
//! - `free_slots` equals the sum of all free block sizes at all times;
//!   slots parked behind the frame barrier count as neither free nor
//!   live.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::allocation::SlotRange;
use crate::device::{CpuDescriptor, HeapBacking, HeapKind};

/// Stable handle into the block arena.
///
/// The generation counter catches use of a handle after its record was
/// recycled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BlockHandle {
    index: u32,
    generation: u32,
}

/// One arena record: a free block's extent plus liveness tracking.
#[derive(Clone, Copy, Debug)]
struct BlockSlot {
    offset: u32,
    size: u32,
    generation: u32,
    live: bool,
}

/// Arena of free-block records with index recycling.
///
/// Both free-list indices store [`BlockHandle`]s instead of pointers, so
/// structural changes to either `BTreeMap` can never invalidate what the
/// other one refers to.
#[derive(Debug, Default)]
struct BlockArena {
    slots: Vec<BlockSlot>,
    recycled: Vec<u32>,
}

impl BlockArena {
    fn insert(&mut self, offset: u32, size: u32) -> BlockHandle {
        if let Some(index) = self.recycled.pop() {
            let slot = &mut self.slots[index as usize];
            slot.offset = offset;
            slot.size = size;
            slot.live = true;
            BlockHandle {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(BlockSlot {
                offset,
                size,
                generation: 0,
                live: true,
            });
            BlockHandle {
                index,
                generation: 0,
            }
        }
    }

    fn remove(&mut self, handle: BlockHandle) -> (u32, u32) {
        let slot = &mut self.slots[handle.index as usize];
        debug_assert!(
            slot.live && slot.generation == handle.generation,
            "stale block handle"
        );
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.recycled.push(handle.index);
        (slot.offset, slot.size)
    }

    fn get(&self, handle: BlockHandle) -> (u32, u32) {
        let slot = &self.slots[handle.index as usize];
        debug_assert!(
            slot.live && slot.generation == handle.generation,
            "stale block handle"
        );
        (slot.offset, slot.size)
    }
}

/// A released range waiting for its frame barrier.
#[derive(Clone, Copy, Debug)]
struct StaleRange {
    offset: u32,
    size: u32,
    retire_frame: u64,
}

/// Mutable page state, guarded by the page mutex.
#[derive(Debug, Default)]
struct PageState {
    arena: BlockArena,
    /// Free blocks keyed by offset, for neighbor lookups.
    free_by_offset: BTreeMap<u32, BlockHandle>,
    /// Free blocks keyed by (size, offset), for best-fit search. The
    /// offset component breaks size ties toward the lowest address.
    free_by_size: BTreeMap<(u32, u32), BlockHandle>,
    /// Released ranges in retire-frame order.
    stale: VecDeque<StaleRange>,
    free_slots: u32,
}

impl PageState {
    /// Records a free block in the arena and both indices.
    fn add_block(&mut self, offset: u32, size: u32) {
        let handle = self.arena.insert(offset, size);
        self.free_by_offset.insert(offset, handle);
        self.free_by_size.insert((size, offset), handle);
    }

    /// Removes a block from the arena and both indices, returning its
    /// extent.
    fn take_block(&mut self, handle: BlockHandle) -> (u32, u32) {
        let (offset, size) = self.arena.remove(handle);
        self.free_by_offset.remove(&offset);
        self.free_by_size.remove(&(size, offset));
        (offset, size)
    }

    /// Merges a reclaimed range with its free neighbors and records the
    /// result as one block.
    fn merge_free(&mut self, offset: u32, size: u32) {
        let mut merged_offset = offset;
        let mut merged_size = size;

        // Absorb the block ending exactly where this range starts.
        let prev = self
            .free_by_offset
            .range(..offset)
            .next_back()
            .map(|(_, &handle)| handle);
        if let Some(handle) = prev {
            let (prev_offset, prev_size) = self.arena.get(handle);
            if prev_offset + prev_size == offset {
                self.take_block(handle);
                merged_offset = prev_offset;
                merged_size += prev_size;
            }
        }

        // Absorb the block starting exactly where this range ends.
        let next = self
            .free_by_offset
            .range(offset..)
            .next()
            .map(|(_, &handle)| handle);
        if let Some(handle) = next {
            let (next_offset, next_size) = self.arena.get(handle);
            if offset + size == next_offset {
                self.take_block(handle);
                merged_size += next_size;
            }
        }

        self.add_block(merged_offset, merged_size);
    }
}

/// One fixed-capacity descriptor slot table with best-fit sub-allocation.
///
/// Pages are created and owned by a [`crate::pool::DescriptorPool`];
/// issued [`SlotRange`]s hold weak back-references for release. All
/// methods take `&self` and synchronize on the page mutex, so pages can
/// be shared across resource-loading threads.
#[derive(Debug)]
pub struct DescriptorPage {
    kind: HeapKind,
    capacity: u32,
    base: CpuDescriptor,
    stride: u32,
    /// Handed to issued ranges so release can find its way back.
    weak_self: Weak<DescriptorPage>,
    state: Mutex<PageState>,
}

impl DescriptorPage {
    /// Creates a page over `backing` with the whole table as one free
    /// block.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(kind: HeapKind, capacity: u32, backing: HeapBacking) -> Arc<Self> {
        assert!(capacity > 0, "page capacity must be non-zero");
        let mut state = PageState {
            arena: BlockArena::default(),
            free_by_offset: BTreeMap::new(),
            free_by_size: BTreeMap::new(),
            stale: VecDeque::new(),
            free_slots: capacity,
        };
        state.add_block(0, capacity);
        Arc::new_cyclic(|weak| Self {
            kind,
            capacity,
            base: backing.base,
            stride: backing.stride,
            weak_self: weak.clone(),
            state: Mutex::new(state),
        })
    }

    /// Heap kind this page allocates from.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> HeapKind {
        self.kind
    }

    /// Total slot capacity.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Bytes between consecutive slots.
    #[inline]
    #[must_use]
    pub const fn stride(&self) -> u32 {
        self.stride
    }

    /// Number of slots currently on the free lists.
    #[must_use]
    pub fn free_slots(&self) -> u32 {
        self.state.lock().free_slots
    }

    /// Number of slots parked behind the frame barrier.
    #[must_use]
    pub fn stale_slots(&self) -> u32 {
        self.state.lock().stale.iter().map(|s| s.size).sum()
    }

    /// True when some single free block can hold `count` slots.
    ///
    /// Fragmentation matters here: a page with many free slots may still
    /// lack a contiguous run of the requested length.
    #[must_use]
    pub fn has_capacity(&self, count: u32) -> bool {
        self.state
            .lock()
            .free_by_size
            .range((count, 0)..)
            .next()
            .is_some()
    }

    /// Carves `count` slots out of the smallest free block that fits,
    /// preferring the lowest offset among equal sizes.
    ///
    /// Returns `None` when no single block is large enough, or when the
    /// request is zero or exceeds the page capacity. The pool treats
    /// `None` as a signal to try elsewhere or grow, never as an error.
    pub fn allocate(&self, count: u32) -> Option<SlotRange> {
        if count == 0 || count > self.capacity {
            return None;
        }
        let mut state = self.state.lock();

        let handle = state
            .free_by_size
            .range((count, 0)..)
            .next()
            .map(|(_, &handle)| handle)?;
        let (offset, size) = state.take_block(handle);

        // Return whatever the request did not consume.
        if size > count {
            state.add_block(offset + count, size - count);
        }
        state.free_slots -= count;

        Some(SlotRange::new(
            self.base.offset_by(offset, self.stride),
            offset,
            count,
            self.stride,
            self.weak_self.clone(),
        ))
    }

    /// Parks a released range behind the `frame` barrier.
    ///
    /// Called by [`SlotRange::release`]. The slots stay out of
    /// circulation until [`DescriptorPage::reclaim`] observes the frame
    /// complete.
    pub(crate) fn retire(&self, offset: u32, count: u32, frame: u64) {
        let mut state = self.state.lock();
        debug_assert!(
            state.stale.back().map_or(true, |s| s.retire_frame <= frame),
            "release frames must be non-decreasing"
        );
        state.stale.push_back(StaleRange {
            offset,
            size: count,
            retire_frame: frame,
        });
    }

    /// Returns every range retired at or before `completed_frame` to the
    /// free lists.
    ///
    /// Retire frames are non-decreasing in queue order, so completed
    /// ranges always form a prefix. Each reclaimed range merges with its
    /// offset-neighbors before insertion, keeping free blocks maximal.
    pub fn reclaim(&self, completed_frame: u64) {
        let mut state = self.state.lock();
        let mut reclaimed = 0u32;
        while state
            .stale
            .front()
            .is_some_and(|s| s.retire_frame <= completed_frame)
        {
            if let Some(range) = state.stale.pop_front() {
                state.merge_free(range.offset, range.size);
                state.free_slots += range.size;
                reclaimed += range.size;
            }
        }
        if reclaimed > 0 {
            trace!(
                "reclaimed {} stale slots ({}/{} free)",
                reclaimed,
                state.free_slots,
                self.capacity
            );
        }
    }
}
