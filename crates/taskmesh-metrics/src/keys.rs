//! Span identifiers and structured metric keys.
//!
//! Worker metrics travel keyed by `(context, span id, dimensions...)`. On the
//! coordinator the span id is stripped from the key (it is implicit in which
//! span owns the accumulated map), leaving `(context, dimensions...)`. Both
//! shapes are explicit structs here rather than loose tuples, so the boundary
//! that parses heartbeat payloads gets a place to validate them.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of one span instance.
///
/// Two span instances may share a name (a tag path) but never an id. Ids are
/// minted by the client tagging context, one per nesting level, and by the
/// coordinator when it opens a default span.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpanId(Uuid);

impl SpanId {
    /// Mint a fresh random id.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({})", self.0)
    }
}

/// Execution context tag of a metric key.
///
/// `Execute` marks time actually spent executing tasks; it is the only
/// context the worker collector forwards and the one the idle-seconds
/// synthesis keys off. Other contexts pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricContext {
    Execute,
    Other(String),
}

impl fmt::Display for MetricContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricContext::Execute => f.write_str("execute"),
            MetricContext::Other(s) => f.write_str(s),
        }
    }
}

/// Key of one worker-side metric as it travels in a heartbeat payload.
///
/// `dims` are implementation-defined remaining dimensions; currently
/// `[task prefix, activity, unit]`, but consumers should match on
/// [`MetricContext`] and the last dimension rather than assume arity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeartbeatKey {
    pub context: MetricContext,
    pub span_id: SpanId,
    pub dims: Vec<String>,
}

impl HeartbeatKey {
    /// Key for an execution metric of the given span.
    pub fn execute(span_id: SpanId, dims: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            context: MetricContext::Execute,
            span_id,
            dims: dims.into_iter().map(Into::into).collect(),
        }
    }

    /// Split off the span id, leaving the span-local key the coordinator
    /// accumulates under.
    pub fn strip_span_id(self) -> (SpanId, MetricKey) {
        (
            self.span_id,
            MetricKey {
                context: self.context,
                dims: self.dims,
            },
        )
    }
}

/// Span-local metric key: a [`HeartbeatKey`] with the span id removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricKey {
    pub context: MetricContext,
    pub dims: Vec<String>,
}

impl MetricKey {
    pub fn execute(dims: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            context: MetricContext::Execute,
            dims: dims.into_iter().map(Into::into).collect(),
        }
    }

    /// True for entries that count execution time in seconds; these make up
    /// the "known" side of the idle-seconds subtraction.
    pub fn is_execute_seconds(&self) -> bool {
        self.context == MetricContext::Execute && self.dims.last().map(String::as_str) == Some("seconds")
    }

    /// Key of the synthesized bucket holding CPU-seconds that were available
    /// to a span but not accounted to any execution metric.
    pub fn idle_seconds() -> Self {
        Self::execute(["N/A", "idle or other spans", "seconds"])
    }
}

/// One heartbeat's worth of additive metric deltas, worker to coordinator.
pub type HeartbeatPayload = HashMap<HeartbeatKey, f64>;
