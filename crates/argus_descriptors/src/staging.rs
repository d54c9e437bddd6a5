//! # Staging Heaps
//!
//! Per-command-context staging of descriptor tables. Callers stage CPU
//! handles into scratch storage keyed by root parameter index; at draw or
//! dispatch time [`StagingHeap::commit`] copies only the tables that went
//! stale since the last commit into a shader-visible heap and binds them
//! through the caller's [`CommandSink`].
//!
//! Shader-visible heaps come from a [`ShaderHeapPool`] shared by every
//! staging heap of one kind, and go back to it on [`StagingHeap::reset`]
//! when the command context is recycled.
//!
//! ## Staleness
//!
//! Two bitmasks over root parameter indices drive this layer: which
//! indices declare tables (set by `parse_layout`) and which of those need
//! re-committing (set by `stage`, cleared by `commit`). Swapping to a
//! fresh shader-visible heap invalidates every GPU location bound from
//! the old one, so a swap re-marks all declared tables stale.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::allocation::SlotRange;
use crate::device::{
    BindPoint, CommandSink, CpuDescriptor, GpuDescriptor, HeapBackend, HeapKind, ShaderHeap,
};
use crate::error::{DescriptorError, DescriptorResult};

/// Highest number of root parameters a layout may declare.
pub const MAX_ROOT_TABLES: u32 = 32;

/// Which root parameters carry descriptor tables and how many slots each
/// table holds. Built by the root-signature layer, consumed by
/// [`StagingHeap::parse_layout`].
#[derive(Clone, Debug, Default)]
pub struct RootTableLayout {
    mask: u32,
    counts: [u32; MAX_ROOT_TABLES as usize],
}

impl RootTableLayout {
    /// Creates an empty layout with no descriptor tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a table of `count` slots at `root_index`.
    ///
    /// # Panics
    ///
    /// Panics if `root_index >= MAX_ROOT_TABLES` or `count` is zero.
    #[must_use]
    pub fn with_table(mut self, root_index: u32, count: u32) -> Self {
        assert!(
            root_index < MAX_ROOT_TABLES,
            "root index {root_index} out of range"
        );
        assert!(count > 0, "descriptor tables cannot be empty");
        self.mask |= 1 << root_index;
        self.counts[root_index as usize] = count;
        self
    }

    /// Bitmask of root parameter indices that declare tables.
    #[inline]
    #[must_use]
    pub const fn mask(&self) -> u32 {
        self.mask
    }

    /// Declared slot count at `root_index`, zero when undeclared.
    #[must_use]
    pub fn slot_count(&self, root_index: u32) -> u32 {
        if root_index < MAX_ROOT_TABLES {
            self.counts[root_index as usize]
        } else {
            0
        }
    }

    /// Total slots demanded by all declared tables.
    #[must_use]
    pub fn total_slots(&self) -> u32 {
        self.counts.iter().sum()
    }
}

/// Recycling pool of shader-visible heaps, shared by all staging heaps of
/// one kind.
///
/// Every heap parked here has the same kind and capacity as the staging
/// heaps it serves; mixing sizes in one pool is not supported. Traffic is
/// a handful of handles per frame, so a plain mutex is plenty.
#[derive(Default)]
pub struct ShaderHeapPool {
    heaps: Mutex<VecDeque<ShaderHeap>>,
}

impl ShaderHeapPool {
    /// Creates an empty recycler.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn acquire(&self) -> Option<ShaderHeap> {
        self.heaps.lock().pop_front()
    }

    fn recycle(&self, heap: ShaderHeap) {
        self.heaps.lock().push_back(heap);
    }

    /// Number of heaps currently parked for reuse.
    #[must_use]
    pub fn parked(&self) -> usize {
        self.heaps.lock().len()
    }
}

/// Scratch placement of one declared table.
#[derive(Clone, Copy, Debug, Default)]
struct TableCache {
    /// First scratch slot of this table.
    start: u32,
    /// Declared slot count.
    count: u32,
}

/// Stages descriptor table contents for one command-recording context and
/// commits the stale ones into shader-visible heaps.
///
/// Not thread-safe by design: one staging heap belongs to one command
/// context, mirroring how command recording itself is single-threaded.
pub struct StagingHeap {
    kind: HeapKind,
    heap_size: u32,
    backend: Arc<dyn HeapBackend>,
    recycler: Arc<ShaderHeapPool>,
    /// CPU-side staged handles; each declared table lives at its cached
    /// start offset.
    scratch: Vec<CpuDescriptor>,
    tables: [TableCache; MAX_ROOT_TABLES as usize],
    /// Root indices declaring tables, from the last parsed layout.
    declared: u32,
    /// Root indices whose tables need re-committing.
    stale: u32,
    layout_parsed: bool,
    /// Heap receiving commits, once one exists.
    current: Option<ShaderHeap>,
    /// Next free slot in the current heap.
    cursor: u32,
    /// Heaps filled earlier in this session; recycled on reset.
    retired: Vec<ShaderHeap>,
}

impl StagingHeap {
    /// Creates a staging heap for one command context.
    ///
    /// `heap_size` bounds the total slot demand of any layout parsed into
    /// this heap, and `recycler` must only ever serve heaps of that same
    /// size and kind.
    ///
    /// # Panics
    ///
    /// Panics if `heap_size` is zero or `kind` cannot be shader-visible.
    #[must_use]
    pub fn new(
        kind: HeapKind,
        heap_size: u32,
        backend: Arc<dyn HeapBackend>,
        recycler: Arc<ShaderHeapPool>,
    ) -> Self {
        assert!(heap_size > 0, "staging heap size must be non-zero");
        assert!(
            kind.shader_visible(),
            "{kind:?} descriptors cannot be shader-visible"
        );
        Self {
            kind,
            heap_size,
            backend,
            recycler,
            scratch: vec![CpuDescriptor::NULL; heap_size as usize],
            tables: [TableCache::default(); MAX_ROOT_TABLES as usize],
            declared: 0,
            stale: 0,
            layout_parsed: false,
            current: None,
            cursor: 0,
            retired: Vec::new(),
        }
    }

    /// Heap kind this staging heap commits into.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> HeapKind {
        self.kind
    }

    /// Capacity of the shader-visible heaps this staging heap fills.
    #[inline]
    #[must_use]
    pub const fn heap_size(&self) -> u32 {
        self.heap_size
    }

    /// True once a layout has been parsed and not dropped.
    #[inline]
    #[must_use]
    pub const fn has_layout(&self) -> bool {
        self.layout_parsed
    }

    /// Bitmask of root indices declaring tables.
    #[inline]
    #[must_use]
    pub const fn declared_mask(&self) -> u32 {
        self.declared
    }

    /// Bitmask of root indices staged since the last commit.
    #[inline]
    #[must_use]
    pub const fn stale_mask(&self) -> u32 {
        self.stale
    }

    /// Total slots across tables currently marked stale.
    #[must_use]
    pub fn stale_slot_count(&self) -> u32 {
        let mut remaining = self.stale;
        let mut total = 0;
        while remaining != 0 {
            let root_index = remaining.trailing_zeros();
            total += self.tables[root_index as usize].count;
            remaining &= remaining - 1;
        }
        total
    }

    /// Rebuilds the per-root-index table cache from `layout` and clears
    /// all staleness. Call whenever the bound root signature changes.
    ///
    /// Fails without mutating anything when the layout's total slot
    /// demand exceeds one shader-visible heap. The current heap and its
    /// cursor are kept: tables already committed stay bound until staged
    /// anew.
    pub fn parse_layout(&mut self, layout: &RootTableLayout) -> DescriptorResult<()> {
        let required = layout.total_slots();
        if required > self.heap_size {
            return Err(DescriptorError::LayoutTooLarge {
                required,
                capacity: self.heap_size,
            });
        }

        self.declared = layout.mask();
        self.stale = 0;
        self.tables = [TableCache::default(); MAX_ROOT_TABLES as usize];
        self.layout_parsed = true;

        let mut cursor = 0;
        let mut remaining = self.declared;
        while remaining != 0 {
            let root_index = remaining.trailing_zeros();
            let count = layout.slot_count(root_index);
            self.tables[root_index as usize] = TableCache {
                start: cursor,
                count,
            };
            cursor += count;
            remaining &= remaining - 1;
        }
        Ok(())
    }

    /// Writes `handles` into the staged table at `root_index`, starting
    /// `offset` slots in, and marks the table stale.
    ///
    /// Contract violations (no layout parsed, undeclared or out-of-range
    /// root index, handles running past the declared table size) fail
    /// before anything mutates.
    pub fn stage(
        &mut self,
        root_index: u32,
        offset: u32,
        handles: &[CpuDescriptor],
    ) -> DescriptorResult<()> {
        let table = self.table_for(root_index, "stage")?;
        let count = handles.len() as u32;
        if offset.checked_add(count).map_or(true, |end| end > table.count) {
            return Err(DescriptorError::TableOverflow {
                root_index,
                offset,
                count,
                declared: table.count,
            });
        }

        let start = (table.start + offset) as usize;
        self.scratch[start..start + handles.len()].copy_from_slice(handles);
        self.stale |= 1 << root_index;
        Ok(())
    }

    /// Stages every slot of `range` into the table at `root_index`,
    /// starting `offset` slots in.
    ///
    /// Same contract as [`StagingHeap::stage`], without materializing a
    /// handle slice.
    pub fn stage_range(
        &mut self,
        root_index: u32,
        offset: u32,
        range: &SlotRange,
    ) -> DescriptorResult<()> {
        let table = self.table_for(root_index, "stage")?;
        let count = range.count();
        if offset.checked_add(count).map_or(true, |end| end > table.count) {
            return Err(DescriptorError::TableOverflow {
                root_index,
                offset,
                count,
                declared: table.count,
            });
        }

        let start = (table.start + offset) as usize;
        for index in 0..count {
            self.scratch[start + index as usize] = range.handle(index);
        }
        self.stale |= 1 << root_index;
        Ok(())
    }

    /// Copies every stale table into the current shader-visible heap and
    /// binds each one through `sink` at the given pipeline point.
    ///
    /// No-ops when nothing is stale. When the current heap cannot hold
    /// the pending tables, a heap is drawn from the recycler (or created)
    /// and every declared table is committed, because the swap
    /// invalidated all previously bound GPU locations.
    pub fn commit(&mut self, bind: BindPoint, sink: &mut dyn CommandSink) -> DescriptorResult<()> {
        if !self.layout_parsed {
            return Err(DescriptorError::LayoutMissing {
                operation: "commit",
            });
        }
        if self.stale == 0 {
            return Ok(());
        }

        let heap = self.ensure_room(self.stale_slot_count(), sink)?;
        let mut committed = 0u32;

        // The swap inside ensure_room may have widened `stale` to every
        // declared table.
        while self.stale != 0 {
            let root_index = self.stale.trailing_zeros();
            let table = self.tables[root_index as usize];
            let start = table.start as usize;
            let destination = heap.cpu_base.offset_by(self.cursor, heap.stride);
            let location = heap.gpu_base.offset_by(self.cursor, heap.stride);

            self.backend.copy_slots(
                self.kind,
                destination,
                &self.scratch[start..start + table.count as usize],
            );
            sink.bind_table(bind, root_index, location);

            self.cursor += table.count;
            committed += table.count;
            self.stale &= !(1 << root_index);
        }

        trace!(
            "committed {} descriptor slots ({} heap slots left)",
            committed,
            heap.capacity - self.cursor
        );
        Ok(())
    }

    /// Copies one descriptor into the current shader-visible heap and
    /// returns its GPU-visible location.
    ///
    /// For one-off bindings that bypass root tables (clear operations and
    /// the like). Needs no parsed layout. A heap swap inside this call
    /// re-marks every declared table stale, same as a commit-time swap.
    pub fn copy_descriptor(
        &mut self,
        sink: &mut dyn CommandSink,
        source: CpuDescriptor,
    ) -> DescriptorResult<GpuDescriptor> {
        let heap = self.ensure_room(1, sink)?;
        let destination = heap.cpu_base.offset_by(self.cursor, heap.stride);
        let location = heap.gpu_base.offset_by(self.cursor, heap.stride);
        self.backend.copy_slots(self.kind, destination, &[source]);
        self.cursor += 1;
        Ok(location)
    }

    /// Ends the staging session: every heap touched this session goes
    /// back to the shared recycler and all staleness clears.
    ///
    /// The parsed layout survives; root signature shapes outlive a single
    /// command-context reuse. Drop it with [`StagingHeap::reset_layout`].
    pub fn reset(&mut self) {
        if let Some(heap) = self.current.take() {
            self.recycler.recycle(heap);
        }
        for heap in self.retired.drain(..) {
            self.recycler.recycle(heap);
        }
        self.cursor = 0;
        self.stale = 0;
    }

    /// Drops the parsed layout on top of a session reset.
    pub fn reset_layout(&mut self) {
        self.reset();
        self.declared = 0;
        self.tables = [TableCache::default(); MAX_ROOT_TABLES as usize];
        self.layout_parsed = false;
    }

    /// Validates `root_index` against the parsed layout.
    fn table_for(&self, root_index: u32, operation: &'static str) -> DescriptorResult<TableCache> {
        if !self.layout_parsed {
            return Err(DescriptorError::LayoutMissing { operation });
        }
        if root_index >= MAX_ROOT_TABLES {
            return Err(DescriptorError::RootIndexOutOfRange {
                root_index,
                max: MAX_ROOT_TABLES - 1,
            });
        }
        if self.declared & (1 << root_index) == 0 {
            return Err(DescriptorError::UndeclaredTable { root_index });
        }
        Ok(self.tables[root_index as usize])
    }

    /// Guarantees the current heap has `required` free slots, swapping in
    /// a recycled or fresh heap when it does not.
    fn ensure_room(
        &mut self,
        required: u32,
        sink: &mut dyn CommandSink,
    ) -> DescriptorResult<ShaderHeap> {
        if let Some(heap) = self.current {
            if heap.capacity - self.cursor >= required {
                return Ok(heap);
            }
        }

        // Park the exhausted heap for the rest of the session and start a
        // new one. GPU locations bound from the old heap die with it, so
        // every declared table goes back to stale.
        if let Some(old) = self.current.take() {
            self.retired.push(old);
        }
        let heap = match self.recycler.acquire() {
            Some(heap) => {
                trace!("recycled shader-visible {:?} heap", self.kind);
                heap
            }
            None => {
                let heap = self.backend.create_shader_heap(self.kind, self.heap_size)?;
                debug!(
                    "created shader-visible {:?} heap of {} slots",
                    self.kind, self.heap_size
                );
                heap
            }
        };
        debug_assert!(
            required <= heap.capacity,
            "shader heap too small for pending commit"
        );

        self.cursor = 0;
        self.stale = self.declared;
        self.current = Some(heap);
        sink.bind_heap(self.kind, heap.id);
        Ok(heap)
    }
}
