//! Error types for span tracking.

use taskmesh_metrics::SpanId;
use thiserror::Error;

/// Errors surfaced by span construction, tagging, and heartbeat ingestion.
///
/// Broken internal invariants (a child id that no longer resolves in the
/// registry arena, a metrics snapshot taken twice) are not represented here:
/// they indicate a bug rather than a condition to recover from, and panic.
#[derive(Error, Debug)]
pub enum SpanError {
    /// A span context was opened without any tags.
    #[error("a span context requires at least one tag")]
    EmptyTags,

    /// A merge was requested over zero spans.
    #[error("nothing to merge")]
    EmptyMerge,

    /// A span annotation carried mismatched or empty tag/id sequences.
    #[error("span annotation must carry equal-length, non-empty tag and id sequences (got {names} tags, {ids} ids)")]
    MalformedAnnotation { names: usize, ids: usize },

    /// A worker reported metrics against a span the coordinator has never
    /// created. Span ids are minted before any task executes, so this means
    /// the worker and coordinator are desynchronized.
    #[error("heartbeat referenced unknown span {0}; worker and coordinator are desynchronized")]
    UnknownSpanId(SpanId),

    /// Configuration could not be parsed.
    #[error("invalid spans configuration: {0}")]
    Config(String),

    /// I/O error while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for span operations.
pub type SpanResult<T> = Result<T, SpanError>;
