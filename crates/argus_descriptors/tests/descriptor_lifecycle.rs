//! # Descriptor Lifecycle Verification
//!
//! End-to-end scenarios for the allocator and staging stack:
//!
//! 1. **Full pipeline**: slots allocated from a pool flow through staging
//!    into a shader-visible heap and bind with the right contents
//! 2. **Frame barrier**: released slots stay out of circulation until the
//!    fence reports their frame complete
//! 3. **Heap churn**: commits that outgrow a shader-visible heap swap
//!    heaps and re-bind every declared table
//! 4. **Thread safety**: loading threads allocating and releasing
//!    concurrently never corrupt the accounting
//!
//! Run with: cargo test --test descriptor_lifecycle -- --nocapture

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use argus_descriptors::{
    BindPoint, CommandSink, CpuDescriptor, DescriptorConfig, DescriptorError, DescriptorPool,
    FrameTimeline, GpuDescriptor, HeapBackend, HeapBacking, HeapId, HeapKind, RootTableLayout,
    ShaderHeap, ShaderHeapPool, StagingHeap,
};

const STRIDE: u32 = 32;
/// GPU handle space sits far above every CPU handle the test allocates.
const GPU_OFFSET: u64 = 1 << 40;

// ============================================================================
// IN-MEMORY DEVICE
// ============================================================================

/// A device stand-in: heaps are address ranges, descriptor contents live
/// in a flat store keyed by CPU handle address.
struct MemoryDevice {
    next_handle: AtomicU64,
    shader_heaps_created: AtomicU64,
    store: Mutex<HashMap<u64, u64>>,
}

impl MemoryDevice {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            next_handle: AtomicU64::new(0x1000),
            shader_heaps_created: AtomicU64::new(0),
            store: Mutex::new(HashMap::new()),
        })
    }

    /// Writes a descriptor payload at `handle`, the way a device-API view
    /// creation call would.
    fn write(&self, handle: CpuDescriptor, payload: u64) {
        self.store.lock().insert(handle.0, payload);
    }

    /// Reads the payload behind a GPU-visible location.
    fn read_gpu(&self, location: GpuDescriptor) -> Option<u64> {
        self.store.lock().get(&(location.0 - GPU_OFFSET)).copied()
    }
}

impl HeapBackend for MemoryDevice {
    fn create_heap(
        &self,
        _kind: HeapKind,
        capacity: u32,
    ) -> Result<HeapBacking, DescriptorError> {
        let bytes = u64::from(capacity) * u64::from(STRIDE);
        let base = self.next_handle.fetch_add(bytes, Ordering::Relaxed);
        Ok(HeapBacking {
            base: CpuDescriptor(base),
            stride: STRIDE,
        })
    }

    fn create_shader_heap(
        &self,
        kind: HeapKind,
        capacity: u32,
    ) -> Result<ShaderHeap, DescriptorError> {
        self.shader_heaps_created.fetch_add(1, Ordering::Relaxed);
        let backing = self.create_heap(kind, capacity)?;
        Ok(ShaderHeap {
            id: HeapId(backing.base.0),
            cpu_base: backing.base,
            gpu_base: GpuDescriptor(backing.base.0 + GPU_OFFSET),
            stride: STRIDE,
            capacity,
        })
    }

    fn copy_slots(&self, _kind: HeapKind, dst: CpuDescriptor, src: &[CpuDescriptor]) {
        let mut store = self.store.lock();
        for (index, source) in src.iter().enumerate() {
            let payload = store.get(&source.0).copied().unwrap_or(0);
            store.insert(dst.0 + index as u64 * u64::from(STRIDE), payload);
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    heap_binds: Vec<HeapId>,
    table_binds: Vec<(BindPoint, u32, GpuDescriptor)>,
}

impl CommandSink for RecordingSink {
    fn bind_heap(&mut self, _kind: HeapKind, heap: HeapId) {
        self.heap_binds.push(heap);
    }

    fn bind_table(&mut self, bind: BindPoint, root_index: u32, location: GpuDescriptor) {
        self.table_binds.push((bind, root_index, location));
    }
}

// ============================================================================
// SCENARIO 1: FULL PIPELINE
// ============================================================================

#[test]
fn verify_slots_flow_from_pool_to_bound_tables() {
    let device = MemoryDevice::new();
    let config = DescriptorConfig::from_toml_str("page_size = 16\nstaging_size = 32").unwrap();
    let pool = DescriptorPool::new(
        HeapKind::Resource,
        config.page_size,
        Arc::clone(&device) as Arc<dyn HeapBackend>,
    );
    let timeline = FrameTimeline::new();

    // A loader fills four slots the way view-creation calls would.
    let range = pool.allocate(4).unwrap();
    for index in 0..4 {
        device.write(range.handle(index), 0xA0 + u64::from(index));
    }

    let mut staging = StagingHeap::new(
        HeapKind::Resource,
        config.staging_size,
        Arc::clone(&device) as Arc<dyn HeapBackend>,
        ShaderHeapPool::new(),
    );
    staging
        .parse_layout(&RootTableLayout::new().with_table(0, 4))
        .unwrap();
    staging.stage_range(0, 0, &range).unwrap();

    let mut sink = RecordingSink::default();
    staging.commit(BindPoint::Graphics, &mut sink).unwrap();

    // The bound table exposes exactly the staged contents.
    assert_eq!(sink.heap_binds.len(), 1);
    let (_, root_index, location) = sink.table_binds[0];
    assert_eq!(root_index, 0);
    for index in 0..4u32 {
        let slot = GpuDescriptor(location.0 + u64::from(index) * u64::from(STRIDE));
        assert_eq!(device.read_gpu(slot), Some(0xA0 + u64::from(index)));
    }

    // Frame lifecycle returns the slots once the fence passes.
    let frame = timeline.begin_frame();
    range.release(frame);
    timeline.mark_completed(frame);
    pool.reclaim_stale(timeline.completed());
    assert_eq!(pool.free_slots(), config.page_size);
}

// ============================================================================
// SCENARIO 2: FRAME BARRIER
// ============================================================================

#[test]
fn verify_released_slots_wait_for_the_fence() {
    let device = MemoryDevice::new();
    let pool = DescriptorPool::new(HeapKind::Resource, 16, device as Arc<dyn HeapBackend>);
    let timeline = FrameTimeline::new();

    // Fill the first page completely.
    let a = pool.allocate(6).unwrap();
    let first_slot = a.handle(0);
    let b = pool.allocate(4).unwrap();
    let c = pool.allocate(6).unwrap();
    assert_eq!(pool.page_count(), 1);

    let frame = timeline.begin_frame();
    a.release(frame);

    // The fence has not passed; the same-sized request must grow a page
    // instead of touching the parked slots.
    pool.reclaim_stale(timeline.completed());
    let elsewhere = pool.allocate(6).unwrap();
    assert_eq!(pool.page_count(), 2);
    assert_ne!(elsewhere.handle(0), first_slot);

    // Once the fence passes, the slots come back coalesced.
    timeline.mark_completed(frame);
    pool.reclaim_stale(timeline.completed());
    let reused = pool.allocate(6).unwrap();
    assert_eq!(pool.page_count(), 2);
    assert_eq!(reused.handle(0), first_slot);

    let last = timeline.begin_frame();
    b.release(last);
    c.release(last);
    elsewhere.release(last);
    reused.release(last);
}

// ============================================================================
// SCENARIO 3: HEAP CHURN
// ============================================================================

#[test]
fn verify_heap_swap_rebinds_tables_with_current_contents() {
    let device = MemoryDevice::new();
    let pool = DescriptorPool::new(
        HeapKind::Resource,
        16,
        Arc::clone(&device) as Arc<dyn HeapBackend>,
    );
    let mut staging = StagingHeap::new(
        HeapKind::Resource,
        7,
        Arc::clone(&device) as Arc<dyn HeapBackend>,
        ShaderHeapPool::new(),
    );
    let mut sink = RecordingSink::default();

    let textures = pool.allocate(4).unwrap();
    let buffers = pool.allocate(2).unwrap();
    for index in 0..4 {
        device.write(textures.handle(index), 0x100 + u64::from(index));
    }
    for index in 0..2 {
        device.write(buffers.handle(index), 0x200 + u64::from(index));
    }

    staging
        .parse_layout(&RootTableLayout::new().with_table(0, 4).with_table(1, 2))
        .unwrap();
    staging.stage_range(0, 0, &textures).unwrap();
    staging.stage_range(1, 0, &buffers).unwrap();
    staging.commit(BindPoint::Graphics, &mut sink).unwrap();
    assert_eq!(sink.table_binds.len(), 2);

    // One slot of headroom left: updating table 1 forces a heap swap,
    // which must re-bind table 0 as well.
    device.write(buffers.handle(0), 0x999);
    staging.stage_range(1, 0, &buffers).unwrap();
    sink.table_binds.clear();
    staging.commit(BindPoint::Graphics, &mut sink).unwrap();

    assert_eq!(device.shader_heaps_created.load(Ordering::Relaxed), 2);
    assert_eq!(sink.heap_binds.len(), 2);
    assert_eq!(sink.table_binds.len(), 2);

    // Both tables read back their current contents from the new heap.
    for (_, root_index, location) in &sink.table_binds {
        match *root_index {
            0 => {
                for index in 0..4u64 {
                    let slot = GpuDescriptor(location.0 + index * u64::from(STRIDE));
                    assert_eq!(device.read_gpu(slot), Some(0x100 + index));
                }
            }
            1 => {
                assert_eq!(device.read_gpu(*location), Some(0x999));
                let second = GpuDescriptor(location.0 + u64::from(STRIDE));
                assert_eq!(device.read_gpu(second), Some(0x201));
            }
            other => panic!("unexpected root index {other}"),
        }
    }

    textures.release(1);
    buffers.release(1);
}

// ============================================================================
// SCENARIO 4: THREAD SAFETY
// ============================================================================

#[test]
fn verify_concurrent_loading_threads_keep_accounts_balanced() {
    let device = MemoryDevice::new();
    let pool = Arc::new(DescriptorPool::new(
        HeapKind::Resource,
        64,
        device as Arc<dyn HeapBackend>,
    ));

    std::thread::scope(|scope| {
        let workers: Vec<_> = (0..4u32)
            .map(|thread_index| {
                let pool = Arc::clone(&pool);
                scope.spawn(move || {
                    for iteration in 0..50u32 {
                        let count = (thread_index + iteration) % 4 + 1;
                        let range = pool.allocate(count).unwrap();
                        assert!(!range.is_null());
                        range.release(1);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
    });

    pool.reclaim_stale(1);

    // Every page fully coalesced: the sum of free slots matches the
    // created capacity exactly.
    let expected = u32::try_from(pool.page_count()).unwrap() * 64;
    assert_eq!(pool.free_slots(), expected);

    // And one whole-page allocation still succeeds, proving coalescing
    // restored a maximal block.
    let whole = pool.allocate(64).unwrap();
    assert_eq!(whole.offset(), 0);
    whole.release(2);
}

// ============================================================================
// SCENARIO 5: CONFIG BOUNDS
// ============================================================================

#[test]
fn verify_config_sizes_bound_the_stack() {
    let device = MemoryDevice::new();
    let config = DescriptorConfig::from_toml_str("page_size = 8\nstaging_size = 4").unwrap();

    let pool = DescriptorPool::new(
        HeapKind::Resource,
        config.page_size,
        Arc::clone(&device) as Arc<dyn HeapBackend>,
    );
    let range = pool.allocate(3).unwrap();
    assert_eq!(pool.free_slots(), 5);

    let mut staging = StagingHeap::new(
        HeapKind::Resource,
        config.staging_size,
        Arc::clone(&device) as Arc<dyn HeapBackend>,
        ShaderHeapPool::new(),
    );
    let too_big = RootTableLayout::new().with_table(0, 5);
    assert!(matches!(
        staging.parse_layout(&too_big),
        Err(DescriptorError::LayoutTooLarge {
            required: 5,
            capacity: 4
        })
    ));

    range.release(1);
}
