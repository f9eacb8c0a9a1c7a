//! The slice of scheduler state this subsystem consumes.
//!
//! Task lifecycle, placement, and retries belong to the scheduler proper;
//! spans only observe already-scheduled groups of tasks and aggregate facts
//! about them. The types here are that observation surface: task groups with
//! their live statistics, the per-task annotation hand-off, and the
//! cluster-wide thread-count history.
//!
//! Everything is shared through `Rc`/`RefCell`: the coordinator runs as a
//! single logical thread with cooperative suspension points, and none of the
//! mutation paths in this crate suspend mid-mutation.

use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskmesh_metrics::SpanId;

use crate::context::SpanAnnotation;

/// Lifecycle state of a task, as counted by a group's state histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskPhase {
    Released,
    Waiting,
    NoWorker,
    Queued,
    Processing,
    Memory,
    Erred,
    Forgotten,
}

/// A group of same-kind tasks with shared lifecycle statistics.
///
/// Owned by the scheduler; this subsystem reads its statistics and owns
/// exactly one field, the span affiliation, which is set at most once.
/// Groups are forgotten when their last task is forgotten; two groups with
/// the same key may therefore exist over a cluster's lifetime, attached to
/// different spans.
#[derive(Debug)]
pub struct TaskGroup {
    key: String,
    span_id: Option<SpanId>,
    /// Number of tasks currently in each state.
    pub states: HashMap<TaskPhase, usize>,
    /// When the first task of this group started computing; `None` until one
    /// has finished computing.
    pub start: Option<DateTime<Utc>>,
    /// When the last task of this group stopped computing.
    pub stop: Option<DateTime<Utc>>,
    /// Cumulative seconds of completed activity, by activity name.
    pub all_durations: HashMap<String, f64>,
    /// Total bytes produced by this group.
    pub nbytes_total: u64,
    /// Whether every task in this group is complete. The scheduler may flip
    /// this back to false, e.g. when a lost worker forces recomputation.
    pub done: bool,
}

impl TaskGroup {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            span_id: None,
            states: HashMap::new(),
            start: None,
            stop: None,
            all_durations: HashMap::new(),
            nbytes_total: 0,
            done: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The span this group belongs to, once observed.
    pub fn span_id(&self) -> Option<SpanId> {
        self.span_id
    }

    /// Record the group's span affiliation. A group belongs to exactly one
    /// span for its whole lifetime.
    pub(crate) fn affiliate(&mut self, span_id: SpanId) {
        assert!(
            self.span_id.is_none(),
            "task group {:?} is already affiliated with a span",
            self.key
        );
        self.span_id = Some(span_id);
    }

    /// Total seconds spent on this group across all activities.
    pub fn duration(&self) -> f64 {
        self.all_durations.values().sum()
    }

    pub fn shared(self) -> TaskGroupRef {
        Rc::new(RefCell::new(self))
    }
}

pub type TaskGroupRef = Rc<RefCell<TaskGroup>>;

/// A runnable task as presented to the registry: its group, plus the span
/// annotation it may carry. The annotation is consumed on first observation;
/// afterwards the group's recorded affiliation is authoritative.
#[derive(Debug)]
pub struct TaskState {
    pub group: TaskGroupRef,
    pub(crate) annotation: Option<SpanAnnotation>,
}

impl TaskState {
    pub fn new(group: TaskGroupRef, annotation: Option<SpanAnnotation>) -> Self {
        Self { group, annotation }
    }

    pub fn annotation(&self) -> Option<&SpanAnnotation> {
        self.annotation.as_ref()
    }

    pub fn shared(self) -> TaskStateRef {
        Rc::new(RefCell::new(self))
    }
}

pub type TaskStateRef = Rc<RefCell<TaskState>>;

/// One sample of the cluster-wide thread count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NthreadsSample {
    pub at: DateTime<Utc>,
    pub nthreads: usize,
}

/// Shared, append-only history of the cluster-wide thread count.
///
/// Owned by the scheduler and referenced (never copied) by every span; each
/// span remembers only its starting offset into it. Must contain at least one
/// sample before the first span is created.
#[derive(Debug, Clone, Default)]
pub struct NthreadsHistory(Rc<RefCell<Vec<NthreadsSample>>>);

impl NthreadsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample. Timestamps must be monotonically non-decreasing.
    pub fn record(&self, at: DateTime<Utc>, nthreads: usize) {
        let mut samples = self.0.borrow_mut();
        if let Some(last) = samples.last() {
            assert!(
                at >= last.at,
                "thread-count history must stay ordered by timestamp"
            );
        }
        samples.push(NthreadsSample { at, nthreads });
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub(crate) fn samples(&self) -> Ref<'_, Vec<NthreadsSample>> {
        self.0.borrow()
    }
}
