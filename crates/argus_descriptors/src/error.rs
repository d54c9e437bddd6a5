//! # Descriptor Error Types
//!
//! All errors surfaced by the descriptor allocator and staging layer.
//!
//! Exactly two classes exist: caller contract violations, reported before
//! any state mutates, and backend heap-creation failures, which are fatal
//! at this layer. Running a page out of free slots is *not* an error; the
//! pool grows instead.

use thiserror::Error;

use crate::device::HeapKind;

/// Errors that can occur while allocating or staging descriptors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// Requested an allocation of zero slots.
    #[error("requested a slot range of zero descriptors")]
    EmptyRequest,

    /// The backend failed to create a heap. This is device-level resource
    /// exhaustion and is not recoverable here.
    #[error("backend failed to create {kind:?} heap of {capacity} slots: {reason}")]
    HeapCreation {
        /// Heap kind that was requested.
        kind: HeapKind,
        /// Requested slot capacity.
        capacity: u32,
        /// Backend-supplied failure description.
        reason: String,
    },

    /// A staging operation ran before any root table layout was parsed.
    #[error("no root table layout parsed before {operation}")]
    LayoutMissing {
        /// The operation that needed a layout.
        operation: &'static str,
    },

    /// Root parameter index outside the supported table range.
    #[error("root parameter index {root_index} out of range (max {max})")]
    RootIndexOutOfRange {
        /// The offending index.
        root_index: u32,
        /// Highest supported index.
        max: u32,
    },

    /// The root parameter exists but declares no descriptor table.
    #[error("root parameter {root_index} declares no descriptor table")]
    UndeclaredTable {
        /// The offending index.
        root_index: u32,
    },

    /// Staged handles would run past the declared table size.
    #[error(
        "staging {count} handles at offset {offset} overflows table {root_index} (declared {declared})"
    )]
    TableOverflow {
        /// Root parameter index being staged.
        root_index: u32,
        /// First staged slot within the table.
        offset: u32,
        /// Number of staged handles.
        count: u32,
        /// Declared table size.
        declared: u32,
    },

    /// The parsed layout demands more slots than one shader-visible heap
    /// holds.
    #[error("root table layout needs {required} slots, staging heaps hold {capacity}")]
    LayoutTooLarge {
        /// Total slots demanded by the layout.
        required: u32,
        /// Shader-visible heap capacity.
        capacity: u32,
    },

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for descriptor operations.
pub type DescriptorResult<T> = Result<T, DescriptorError>;
