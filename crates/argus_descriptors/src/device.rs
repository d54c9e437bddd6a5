//! # Device Seam
//!
//! Handle types and the collaborator traits that connect the allocator to
//! the device-owning layer. The allocator never creates or destroys heap
//! resources itself: it receives base handles, strides and capacities
//! through [`HeapBackend`] and issues bind calls through [`CommandSink`].
//!
//! Handles are plain old data. They carry no lifetime and no ownership;
//! validity is governed entirely by the frame barrier protocol in
//! [`crate::page`] and [`crate::pool`].

use bytemuck::{Pod, Zeroable};

use crate::error::DescriptorResult;

/// A CPU-visible descriptor handle: an address into a CPU-writable slot
/// table.
///
/// Zero is the null handle and never addresses a valid slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct CpuDescriptor(pub u64);

impl CpuDescriptor {
    /// The null handle.
    pub const NULL: Self = Self(0);

    /// Returns true for the null handle.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the handle `slots` slots past this one.
    #[inline]
    #[must_use]
    pub const fn offset_by(self, slots: u32, stride: u32) -> Self {
        Self(self.0 + slots as u64 * stride as u64)
    }
}

/// A GPU-visible descriptor handle: an address the shader pipeline binds.
///
/// Only slots inside shader-visible heaps have one. Zero is null.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct GpuDescriptor(pub u64);

impl GpuDescriptor {
    /// The null handle.
    pub const NULL: Self = Self(0);

    /// Returns true for the null handle.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the handle `slots` slots past this one.
    #[inline]
    #[must_use]
    pub const fn offset_by(self, slots: u32, stride: u32) -> Self {
        Self(self.0 + slots as u64 * stride as u64)
    }
}

/// Identifier of a backend-owned heap resource, used in bind calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeapId(pub u64);

/// The kinds of descriptor heap the device distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// Constant buffers, shader resources and unordered access views.
    Resource,
    /// Texture samplers.
    Sampler,
    /// Render target views.
    RenderTarget,
    /// Depth stencil views.
    DepthStencil,
}

impl HeapKind {
    /// Whether heaps of this kind may be made shader-visible.
    ///
    /// Only resource and sampler heaps can be bound to the shader
    /// pipeline; render target and depth stencil descriptors stay CPU-side.
    #[inline]
    #[must_use]
    pub const fn shader_visible(self) -> bool {
        matches!(self, Self::Resource | Self::Sampler)
    }
}

/// Which pipeline a committed descriptor table binds to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindPoint {
    /// Graphics root table (draw path).
    Graphics,
    /// Compute root table (dispatch path).
    Compute,
}

/// Backing storage for one allocator page: the base handle of a CPU-only
/// slot table plus the byte stride between slots.
#[derive(Clone, Copy, Debug)]
pub struct HeapBacking {
    /// Handle of slot 0.
    pub base: CpuDescriptor,
    /// Bytes between consecutive slots.
    pub stride: u32,
}

/// A shader-visible heap used by the staging layer for commits.
#[derive(Clone, Copy, Debug)]
pub struct ShaderHeap {
    /// Backend identifier for bind calls.
    pub id: HeapId,
    /// CPU-writable handle of slot 0, the destination of staged copies.
    pub cpu_base: CpuDescriptor,
    /// GPU-visible handle of slot 0, the source of bind locations.
    pub gpu_base: GpuDescriptor,
    /// Bytes between consecutive slots.
    pub stride: u32,
    /// Total slot capacity.
    pub capacity: u32,
}

/// Heap-resource collaborator: owns the actual device heaps.
///
/// Implementations create fixed-size slot tables on demand and copy
/// descriptor contents between slots. All calls are synchronous and must
/// be callable from any thread.
pub trait HeapBackend: Send + Sync {
    /// Creates a CPU-only heap of `capacity` slots for an allocator page.
    fn create_heap(&self, kind: HeapKind, capacity: u32) -> DescriptorResult<HeapBacking>;

    /// Creates a shader-visible heap of `capacity` slots for staging
    /// commits.
    fn create_shader_heap(&self, kind: HeapKind, capacity: u32) -> DescriptorResult<ShaderHeap>;

    /// Copies descriptor contents from each `src` slot to the contiguous
    /// destination range starting at `dst`.
    fn copy_slots(&self, kind: HeapKind, dst: CpuDescriptor, src: &[CpuDescriptor]);
}

/// Bind collaborator: receives heap and table bindings during commit.
///
/// One implementation per command-recording context; calls arrive in
/// recording order.
pub trait CommandSink {
    /// Makes `heap` the active descriptor heap of `kind` for this context.
    fn bind_heap(&mut self, kind: HeapKind, heap: HeapId);

    /// Binds a committed table at `root_index` to the given pipeline
    /// point.
    fn bind_table(&mut self, bind: BindPoint, root_index: u32, location: GpuDescriptor);
}
