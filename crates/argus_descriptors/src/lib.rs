//! # ARGUS Descriptors
//!
//! Descriptor slot allocation and staging for the ARGUS renderer:
//! - Paged best-fit slot allocator with frame-delayed reclamation
//! - Per-context staging heaps committing stale root tables per draw
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   DESCRIPTOR PIPELINE                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  DescriptorPool → DescriptorPage → SlotRange                 │
//! │        ↑                                ↓                    │
//! │  reclaim_stale(frame) ← FrameTimeline ← release(frame)       │
//! │                                                              │
//! │  StagingHeap: stage(root, handles) → commit → CommandSink    │
//! │        ↕                    ↓                                │
//! │  ShaderHeapPool        HeapBackend (device seam)             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//!
//! 1. **No GPU waits in here**: frame barriers are numbers the caller
//!    has already proven safe with its own fence.
//! 2. **Exhaustion is not an error**: pools grow; only the device seam
//!    can fail an allocation.
//! 3. **Contract violations mutate nothing**: a failed staging call
//!    leaves the session exactly as it was.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod allocation;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod page;
pub mod pool;
pub mod staging;

pub use allocation::SlotRange;
pub use config::{DescriptorConfig, DEFAULT_PAGE_SIZE, DEFAULT_STAGING_SIZE};
pub use device::{
    BindPoint, CommandSink, CpuDescriptor, GpuDescriptor, HeapBackend, HeapBacking, HeapId,
    HeapKind, ShaderHeap,
};
pub use error::{DescriptorError, DescriptorResult};
pub use frame::FrameTimeline;
pub use page::DescriptorPage;
pub use pool::DescriptorPool;
pub use staging::{RootTableLayout, ShaderHeapPool, StagingHeap, MAX_ROOT_TABLES};
