//! # Frame Timeline
//!
//! Monotone frame accounting. The render loop opens a frame per submitted
//! command batch and reports frames complete once its fence says so;
//! pools consume the completed number as their reclamation barrier.
//!
//! No GPU synchronization happens here. The timeline is bookkeeping over
//! numbers the caller has already proven safe.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic submitted/completed frame counters.
///
/// Frame 0 means "before any work"; the first opened frame is 1.
/// Completion never runs ahead of submission and never decreases.
#[derive(Debug, Default)]
pub struct FrameTimeline {
    submitted: AtomicU64,
    completed: AtomicU64,
}

impl FrameTimeline {
    /// Creates a timeline with no frames submitted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the next frame and returns its number. Tag releases with it.
    pub fn begin_frame(&self) -> u64 {
        self.submitted.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The most recently opened frame number.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }

    /// Marks every frame up to and including `frame` complete.
    ///
    /// Completion reports may arrive out of order; the timeline keeps the
    /// maximum.
    ///
    /// # Panics
    ///
    /// Panics if `frame` was never submitted.
    pub fn mark_completed(&self, frame: u64) {
        assert!(
            frame <= self.current(),
            "frame {frame} was never submitted"
        );
        self.completed.fetch_max(frame, Ordering::AcqRel);
    }

    /// Highest frame known complete.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Whether `frame`'s GPU work is known complete.
    #[must_use]
    pub fn is_complete(&self, frame: u64) -> bool {
        frame <= self.completed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_open_sequentially() {
        let timeline = FrameTimeline::new();
        assert_eq!(timeline.current(), 0);
        assert_eq!(timeline.begin_frame(), 1);
        assert_eq!(timeline.begin_frame(), 2);
        assert_eq!(timeline.current(), 2);
    }

    #[test]
    fn test_completion_is_monotone() {
        let timeline = FrameTimeline::new();
        timeline.begin_frame();
        timeline.begin_frame();
        timeline.begin_frame();

        timeline.mark_completed(2);
        assert_eq!(timeline.completed(), 2);
        assert!(timeline.is_complete(1));
        assert!(timeline.is_complete(2));
        assert!(!timeline.is_complete(3));

        // Late report for an earlier frame never regresses the barrier.
        timeline.mark_completed(1);
        assert_eq!(timeline.completed(), 2);
    }

    #[test]
    #[should_panic(expected = "never submitted")]
    fn test_completing_an_unsubmitted_frame_panics() {
        let timeline = FrameTimeline::new();
        timeline.mark_completed(1);
    }
}
