//! Error Types
//!
//! All render graph failures are recoverable at the graph boundary: a
//! builder degrades into its invalid-latch state, or the frame is
//! skipped. Nothing in this crate panics on user input; every failure is
//! also written to the log sink with the offending node name and handle
//! index before the API returns its sentinel value.

use thiserror::Error;

use crate::graph::handle::NodeKind;

/// The error type for render graph construction, compilation and
/// execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderGraphError {
    /// A handle did not resolve to a live node, or resolved to a node of
    /// a different kind.
    #[error("handle {index} does not resolve to a {expected:?} node")]
    InvalidHandle {
        /// The kind the caller asked for.
        expected: NodeKind,
        /// The raw handle index.
        index: u32,
    },

    /// A declared read or write is not permitted by the resource's usage
    /// flags.
    #[error("{op} of `{name}` is not permitted by its usage flags")]
    UsageMismatch {
        /// "read" or "write".
        op: &'static str,
        /// Resource name.
        name: String,
    },

    /// One pass used the same resource as both read and write, or two
    /// versions of the same resource at once.
    #[error("pass `{pass}` aliases `{name}` as both input and output")]
    AliasConflict {
        /// Pass name.
        pass: String,
        /// Resource name.
        name: String,
    },

    /// Render target, depth-stencil, present source or swap chain was
    /// configured twice on one builder.
    #[error("pass `{pass}`: {what} is already set")]
    DuplicateConfig {
        /// Pass name.
        pass: String,
        /// Which configuration slot was set twice.
        what: &'static str,
    },

    /// `finish()` was called before a mandatory configuration step.
    #[error("pass `{pass}`: {what} is not set")]
    MissingConfig {
        /// Pass name.
        pass: String,
        /// Which configuration is missing.
        what: &'static str,
    },

    /// A name is already registered in the blackboard for this kind.
    #[error("name `{name}` already exists for {kind:?}")]
    NameCollision {
        /// The node kind whose blackboard collided.
        kind: NodeKind,
        /// The colliding name.
        name: String,
    },

    /// A write targeted a resource version that has already been
    /// superseded.
    #[error("pass `{pass}` writes stale version {version} of `{name}`")]
    OldVersionWrite {
        /// Pass name.
        pass: String,
        /// Resource name.
        name: String,
        /// The stale version number.
        version: u32,
    },

    /// The pass-only flow graph contains a cycle; the topological sort
    /// could not drain.
    #[error("render graph contains a cycle ({remaining} passes unschedulable)")]
    CycleDetected {
        /// Number of passes left unscheduled when the sort stalled.
        remaining: usize,
    },

    /// Two distinct producers of the same underlying resource meet at a
    /// single consumer (only reachable through move-alias fan-in).
    #[error("resource `{name}` has conflicting writers `{first}` and `{second}`")]
    ConflictingWriters {
        /// Resource name.
        name: String,
        /// First producer pass.
        first: String,
        /// Second producer pass.
        second: String,
    },

    /// An error surfaced verbatim from the device layer.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Alias for `Result<T, RenderGraphError>`.
pub type Result<T> = std::result::Result<T, RenderGraphError>;
