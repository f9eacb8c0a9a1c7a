//! Shared metric vocabulary and time-series primitives for TaskMesh.
//!
//! This crate holds the types that both sides of the heartbeat protocol agree
//! on (span identifiers, metric keys, and the heartbeat payload shape), plus
//! the pure helpers the coordinator's rollup math is built on:
//!
//! - [`ffill`]: forward-fill resampling of a sparse series onto a shared axis
//! - [`sum_mappings`]: elementwise sum of sparse keyed numeric mappings
//! - [`OrderedSet`]: insertion-ordered deduplicated set
//! - [`Clock`]: a seam over wall-clock time so rollups that depend on "now"
//!   stay deterministic under test
//!
//! Nothing in here owns state beyond its own fields and nothing performs I/O.

pub mod clock;
pub mod collections;
pub mod keys;
pub mod timeseries;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use collections::{sum_mappings, OrderedSet};
pub use keys::{HeartbeatKey, HeartbeatPayload, MetricContext, MetricKey, SpanId};
pub use timeseries::{ffill, seconds_between};
