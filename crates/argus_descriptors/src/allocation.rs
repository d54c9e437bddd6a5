//! # Slot Ranges
//!
//! The result of a page allocation: a contiguous run of descriptor slots.
//!
//! A range stays valid until it is handed back with [`SlotRange::release`]
//! and a frame tag. Because the GPU may still be reading the slots when
//! the CPU lets go of them, release never frees immediately; the owning
//! page parks the range until the tagged frame is reported complete.

use std::sync::Weak;

use crate::device::CpuDescriptor;
use crate::page::DescriptorPage;

/// A contiguous range of descriptor slots issued by a page.
///
/// The null range (`count == 0`) means "no allocation" and owns nothing.
/// Non-null ranges must be released explicitly; dropping one trips a debug
/// assertion, because leaked slots never return to the free lists.
///
/// Ranges are not `Clone`: exactly one owner may release them.
#[derive(Debug)]
pub struct SlotRange {
    /// Handle of the first slot.
    base: CpuDescriptor,
    /// First slot index within the owning page.
    offset: u32,
    /// Number of slots in the range.
    count: u32,
    /// Bytes between consecutive slots.
    stride: u32,
    /// Owning page. Weak so a range outliving its pool degrades to a
    /// no-op release instead of keeping the page alive.
    page: Weak<DescriptorPage>,
}

impl SlotRange {
    pub(crate) fn new(
        base: CpuDescriptor,
        offset: u32,
        count: u32,
        stride: u32,
        page: Weak<DescriptorPage>,
    ) -> Self {
        Self {
            base,
            offset,
            count,
            stride,
            page,
        }
    }

    /// Creates the null range.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            base: CpuDescriptor::NULL,
            offset: 0,
            count: 0,
            stride: 0,
            page: Weak::new(),
        }
    }

    /// Returns true if this range holds no slots.
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.count == 0
    }

    /// First slot index within the owning page.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> u32 {
        self.offset
    }

    /// Number of slots in the range.
    #[inline]
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Bytes between consecutive slots.
    #[inline]
    #[must_use]
    pub const fn stride(&self) -> u32 {
        self.stride
    }

    /// Returns the CPU handle of slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= count`, which includes every access to a null
    /// range.
    #[must_use]
    pub fn handle(&self, index: u32) -> CpuDescriptor {
        assert!(
            index < self.count,
            "slot index {index} out of range for {} slots",
            self.count
        );
        self.base.offset_by(index, self.stride)
    }

    /// Hands the slots back to the owning page, tagged with `frame`.
    ///
    /// The page parks the range until `frame` is reported complete through
    /// reclamation; only then do the slots rejoin the free lists. Releasing
    /// a null range, or a range whose page is gone, does nothing.
    pub fn release(mut self, frame: u64) {
        if self.count == 0 {
            return;
        }
        if let Some(page) = self.page.upgrade() {
            page.retire(self.offset, self.count, frame);
        }
        self.count = 0;
    }
}

impl Default for SlotRange {
    fn default() -> Self {
        Self::null()
    }
}

impl Drop for SlotRange {
    fn drop(&mut self) {
        debug_assert!(
            self.is_null(),
            "slot range dropped without release; {} slots leaked",
            self.count
        );
    }
}
