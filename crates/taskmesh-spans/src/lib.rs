//! Coordinator-side span tracking for TaskMesh.
//!
//! Units of work are grouped into a caller-defined hierarchy of named spans.
//! The coordinator keeps a live forest of them, attaches task groups as they
//! become runnable, reconciles per-worker execution metrics into the forest
//! through a periodic heartbeat, and answers rollup queries (durations, byte
//! counts, CPU-seconds actually available, completion state) over arbitrary
//! subtrees, including synthetic unions of unrelated spans selected by tag.
//!
//! # Span Hierarchy
//!
//! ```text
//! ("workflow",)                      <- created implicitly as an ancestor
//!   ├─ ("workflow", "phaseA")       <- tagged by the client
//!   └─ ("workflow", "phaseB")
//! ("default",)                       <- rolling span for unannotated work
//! ```
//!
//! # Usage
//!
//! 1. Clients thread a [`SpanContextStack`] through their submission code;
//!    tasks pick up the resulting [`SpanAnnotation`].
//! 2. The coordinator feeds runnable tasks to
//!    [`SpanRegistry::observe_tasks`] and worker heartbeat batches to
//!    [`SpanRegistry::heartbeat`].
//! 3. Dashboards and APIs resolve any span through [`SpanRegistry::view`]
//!    and read the derived rollups, or merge unrelated spans with
//!    [`SpanRegistry::merge_by_tags`].

pub mod config;
pub mod context;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod span;

#[cfg(test)]
pub(crate) mod testing;

pub use config::SpansConfig;
pub use context::{SourceCode, SpanAnnotation, SpanContextStack};
pub use error::{SpanError, SpanResult};
pub use registry::SpanRegistry;
pub use scheduler::{
    NthreadsHistory, NthreadsSample, TaskGroup, TaskGroupRef, TaskPhase, TaskState, TaskStateRef,
};
pub use span::{NthreadsInterval, Span, SpanSummary, SpanTraversal, SpanView, MERGED_TAG};
