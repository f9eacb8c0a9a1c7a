//! Fixtures shared by this crate's unit tests.

use std::rc::Rc;

use chrono::{DateTime, TimeZone, Utc};

use taskmesh_metrics::{ManualClock, SpanId};

use crate::context::SpanAnnotation;
use crate::registry::SpanRegistry;
use crate::scheduler::{NthreadsHistory, TaskGroup, TaskGroupRef, TaskState, TaskStateRef};

/// A fixed base instant plus an offset in seconds.
pub(crate) fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub(crate) struct Harness {
    pub clock: Rc<ManualClock>,
    pub history: NthreadsHistory,
    pub registry: SpanRegistry,
}

/// Registry over a one-sample thread history (recorded before `t(0)`), with
/// a manual clock starting at `t(0)`.
pub(crate) fn harness(nthreads: usize) -> Harness {
    let clock = Rc::new(ManualClock::new(t(0)));
    let history = NthreadsHistory::new();
    history.record(t(-60), nthreads);
    let registry = SpanRegistry::new(history.clone()).with_clock(clock.clone());
    Harness {
        clock,
        history,
        registry,
    }
}

/// Annotation over `tags` with fresh ids.
pub(crate) fn annotation(tags: &[&str]) -> SpanAnnotation {
    SpanAnnotation::new(
        tags.iter().map(|tag| (*tag).to_string()).collect(),
        tags.iter().map(|_| SpanId::new()).collect(),
    )
    .unwrap()
}

/// Annotation one level below `parent`, sharing its id history.
pub(crate) fn child_annotation(parent: &SpanAnnotation, tag: &str) -> SpanAnnotation {
    let mut name = parent.name().to_vec();
    name.push(tag.to_string());
    let mut ids = parent.ids().to_vec();
    ids.push(SpanId::new());
    SpanAnnotation::new(name, ids).unwrap()
}

pub(crate) fn group(key: &str) -> TaskGroupRef {
    TaskGroup::new(key).shared()
}

pub(crate) fn task(group: &TaskGroupRef, annotation: Option<SpanAnnotation>) -> TaskStateRef {
    TaskState::new(Rc::clone(group), annotation).shared()
}

/// Observe one task for `group` under the given annotation.
pub(crate) fn observe(
    registry: &mut SpanRegistry,
    annotation: Option<SpanAnnotation>,
    group: &TaskGroupRef,
) {
    registry.observe_tasks(&[task(group, annotation)], &[]);
}

/// Mark a group as fully computed over `[start, stop]`.
pub(crate) fn finish(group: &TaskGroupRef, start: DateTime<Utc>, stop: DateTime<Utc>) {
    let mut g = group.borrow_mut();
    g.start = Some(start);
    g.stop = Some(stop);
    g.done = true;
}
