//! Worker-side span metrics support for TaskMesh.
//!
//! Workers accumulate execution metrics locally between heartbeats. The task
//! execution loop and the heartbeat loop are cooperatively scheduled on the
//! same logical thread and may interleave at any suspension point, so the
//! hand-off to the transport is split into two non-suspending steps:
//!
//! 1. [`SpanMetricsCollector::collect_digests`] copies the span-scoped
//!    entries out of the live [`DigestAccumulator`] into a private pending
//!    buffer, without clearing the source;
//! 2. [`SpanMetricsCollector::heartbeat`] takes ownership of the pending
//!    buffer, replacing it with an empty one, and returns it for transport.
//!
//! Anything between a copy and a clear is vulnerable to re-entrant
//! collection or duplicate delivery; the split confines each step to a
//! single atomic (non-suspending) operation.

pub mod collector;
pub mod digests;

pub use collector::SpanMetricsCollector;
pub use digests::{DigestAccumulator, DigestKey};
