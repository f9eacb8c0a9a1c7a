//! Span nodes and subtree rollups.
//!
//! A [`Span`] is one node of the coordinator's span forest. Ownership lives
//! in the registry's arena (a map keyed by span id); parent and child links
//! are ids resolved through that arena, so a parent can never dangle while
//! the registry is alive. Rollups are computed through a [`SpanView`] (a
//! borrow of the registry plus one span) and are always recomputed from the
//! live task groups, never cached, so results stay consistent with current
//! group state.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use taskmesh_metrics::{ffill, seconds_between, sum_mappings, MetricKey, OrderedSet, SpanId};

use crate::context::SourceCode;
use crate::error::{SpanError, SpanResult};
use crate::registry::SpanRegistry;
use crate::scheduler::{TaskGroupRef, TaskPhase};

/// Tag carried by synthetic spans produced by [`Span::merge`].
pub const MERGED_TAG: &str = "(merged)";

/// One node of the span forest.
pub struct Span {
    name: Vec<String>,
    id: SpanId,
    parent: Option<SpanId>,
    /// Direct children, in creation order.
    pub(crate) children: Vec<SpanId>,
    /// Task groups directly attached to this span (not descendants').
    /// A group is attached exactly once, when its affiliation is recorded.
    pub(crate) groups: Vec<TaskGroupRef>,
    /// When this span first appeared on the coordinator. Always less than or
    /// equal to the same field on any child.
    pub(crate) enqueued: DateTime<Utc>,
    /// Client-submitted code batches, deduplicated in insertion order.
    pub(crate) code: OrderedSet<Vec<SourceCode>>,
    /// Worker metrics accumulated against this span directly, keyed with the
    /// span id dimension stripped.
    pub(crate) cumulative_worker_metrics: HashMap<MetricKey, f64>,
    /// Length of the shared thread-count history minus one, captured when
    /// this span was created.
    pub(crate) nthreads_offset: usize,
    merged: bool,
}

impl Span {
    pub(crate) fn new(
        name: Vec<String>,
        id: SpanId,
        parent: Option<SpanId>,
        enqueued: DateTime<Utc>,
        nthreads_offset: usize,
    ) -> Self {
        Self {
            name,
            id,
            parent,
            children: Vec::new(),
            groups: Vec::new(),
            enqueued,
            code: OrderedSet::new(),
            cumulative_worker_metrics: HashMap::new(),
            nthreads_offset,
            merged: false,
        }
    }

    /// Merge unrelated spans into one synthetic root.
    ///
    /// The result's children are exactly the inputs; its enqueue time and
    /// history offset are the minima over the inputs. It is never inserted
    /// into the registry's indices; query it through
    /// [`SpanRegistry::view`]. The inputs must not be related to one another;
    /// that is the caller's responsibility and is not re-validated here.
    pub fn merge(items: &[&Span]) -> SpanResult<Span> {
        let Some(first) = items.first() else {
            return Err(SpanError::EmptyMerge);
        };
        let mut out = Span::new(
            vec![MERGED_TAG.to_string()],
            SpanId::new(),
            None,
            items.iter().map(|s| s.enqueued).min().unwrap_or(first.enqueued),
            items
                .iter()
                .map(|s| s.nthreads_offset)
                .min()
                .unwrap_or(first.nthreads_offset),
        );
        out.children = items.iter().map(|s| s.id).collect();
        out.merged = true;
        Ok(out)
    }

    /// Full tag path from the forest root to this span. Identifies a lineage,
    /// not an instance: a re-opened span shares its predecessor's name but
    /// not its id.
    pub fn name(&self) -> &[String] {
        &self.name
    }

    pub fn id(&self) -> SpanId {
        self.id
    }

    pub fn parent(&self) -> Option<SpanId> {
        self.parent
    }

    pub fn children(&self) -> &[SpanId] {
        &self.children
    }

    pub fn enqueued(&self) -> DateTime<Utc> {
        self.enqueued
    }

    pub fn is_merged(&self) -> bool {
        self.merged
    }

    /// Task groups directly attached to this span.
    pub fn groups(&self) -> &[TaskGroupRef] {
        &self.groups
    }

    /// Worker metrics accumulated against this span alone, excluding
    /// descendants. For the subtree rollup (including the synthesized idle
    /// bucket) see [`SpanView::cumulative_worker_metrics`].
    pub fn local_worker_metrics(&self) -> &HashMap<MetricKey, f64> {
        &self.cumulative_worker_metrics
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("merged", &self.merged)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Span<name=({}), id={}>", self.name.join(", "), self.id)
    }
}

/// Half-open interval during which a span was active, annotated with the
/// cluster-wide thread count over that interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NthreadsInterval {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub nthreads: usize,
}

impl NthreadsInterval {
    pub fn seconds(&self) -> f64 {
        seconds_between(self.begin, self.end)
    }
}

/// Serializable snapshot of a span's headline rollups, for the query surface.
#[derive(Debug, Clone, Serialize)]
pub struct SpanSummary {
    pub id: SpanId,
    pub name: Vec<String>,
    pub enqueued: DateTime<Utc>,
    pub start: Option<DateTime<Utc>>,
    pub stop: DateTime<Utc>,
    pub done: bool,
    pub states: HashMap<TaskPhase, usize>,
    pub duration: f64,
    pub nbytes_total: u64,
    pub active_cpu_seconds: f64,
}

/// A span resolved against the registry that owns its subtree.
///
/// All derived rollups live here. Cheap to construct and `Copy`; holds no
/// state beyond the two borrows.
#[derive(Clone, Copy)]
pub struct SpanView<'a> {
    registry: &'a SpanRegistry,
    span: &'a Span,
}

impl<'a> SpanView<'a> {
    pub(crate) fn new(registry: &'a SpanRegistry, span: &'a Span) -> Self {
        Self { registry, span }
    }

    pub fn span(&self) -> &'a Span {
        self.span
    }

    /// Pre-order walk of this span and every descendant: the span itself
    /// first, then each child's full subtree in creation order. Iterative,
    /// restartable, and safe on arbitrarily deep trees.
    pub fn traverse_spans(&self) -> SpanTraversal<'a> {
        SpanTraversal {
            registry: self.registry,
            stack: vec![self.span],
        }
    }

    /// Every task group attached anywhere in this subtree.
    pub fn traverse_groups(&self) -> impl Iterator<Item = TaskGroupRef> + 'a {
        self.traverse_spans()
            .flat_map(|span| span.groups.iter().cloned())
    }

    /// Earliest time a task in this subtree started computing, clamped up to
    /// `enqueued` to absorb clock skew between workers and the coordinator.
    /// `None` until something has started; may move backward as new,
    /// earlier-starting work joins the subtree.
    pub fn start(&self) -> Option<DateTime<Utc>> {
        let earliest = self
            .traverse_groups()
            .filter_map(|g| g.borrow().start)
            .min()?;
        Some(earliest.max(self.span.enqueued))
    }

    /// When this subtree finished computing, or the current instant while it
    /// has not. Never before `enqueued`.
    pub fn stop(&self) -> DateTime<Utc> {
        if !self.done() {
            return self.registry.clock().now();
        }
        let latest = self.traverse_groups().filter_map(|g| g.borrow().stop).max();
        latest.map_or(self.span.enqueued, |t| t.max(self.span.enqueued))
    }

    /// Number of tasks currently in each state, summed over the subtree.
    pub fn states(&self) -> HashMap<TaskPhase, usize> {
        sum_mappings(self.traverse_groups().map(|g| g.borrow().states.clone()))
    }

    /// True when every task group in the subtree is complete. Vacuously true
    /// for an empty subtree. Not monotonic: a new sub-span, or recomputation
    /// forced by a lost worker, may flip it back to false.
    pub fn done(&self) -> bool {
        self.traverse_groups().all(|g| g.borrow().done)
    }

    /// Cumulative seconds of completed activity over the subtree, by
    /// activity name.
    pub fn all_durations(&self) -> HashMap<String, f64> {
        sum_mappings(
            self.traverse_groups()
                .map(|g| g.borrow().all_durations.clone()),
        )
    }

    /// Grand total of [`Self::all_durations`].
    pub fn duration(&self) -> f64 {
        self.traverse_groups().map(|g| g.borrow().duration()).sum()
    }

    /// Total bytes produced by the subtree.
    pub fn nbytes_total(&self) -> u64 {
        self.traverse_groups().map(|g| g.borrow().nbytes_total).sum()
    }

    /// Client-submitted code batches across the subtree, deduplicated with
    /// first-seen order preserved.
    pub fn code(&self) -> Vec<Vec<SourceCode>> {
        let mut out = OrderedSet::new();
        for span in self.traverse_spans() {
            for batch in span.code.iter() {
                out.insert(batch.clone());
            }
        }
        out.into_items()
    }

    /// Worker metrics summed over the subtree, plus one synthesized entry:
    /// the CPU-seconds that were available to this span but not accounted to
    /// any execution metric, under [`MetricKey::idle_seconds`]. Clamped at
    /// zero, since externally injected metrics can exceed the available
    /// capacity.
    pub fn cumulative_worker_metrics(&self) -> HashMap<MetricKey, f64> {
        let mut out = sum_mappings(
            self.traverse_spans()
                .map(|s| s.cumulative_worker_metrics.clone()),
        );
        let known_seconds: f64 = out
            .iter()
            .filter(|(k, _)| k.is_execute_seconds())
            .map(|(_, v)| *v)
            .sum();
        let unknown_seconds = (self.active_cpu_seconds() - known_seconds).max(0.0);
        out.insert(MetricKey::idle_seconds(), unknown_seconds);
        out
    }

    /// The cluster-wide thread count over every moment this span was active,
    /// as non-overlapping half-open intervals.
    ///
    /// Two timelines are merged onto one sorted, deduplicated axis with
    /// forward-fill: the shared thread-count history truncated at this
    /// span's starting offset (and at `stop` once done, timestamps clamped
    /// up to `enqueued`), and the activity timeline: a single interval for
    /// an ordinary span, or the swept union of the children's intervals for
    /// a merged span, where gaps between children are not active.
    pub fn nthreads_intervals(&self) -> Vec<NthreadsInterval> {
        let (nthreads_t, nthreads_n) = self.nthreads_timeseries();
        let (active_t, active_flags) = self.active_timeseries();
        if nthreads_t.is_empty() || active_t.is_empty() {
            return Vec::new();
        }

        let axis: Vec<DateTime<Utc>> = nthreads_t
            .iter()
            .chain(active_t.iter())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let counts = ffill(&axis, &nthreads_t, &nthreads_n, 0);
        let flags = ffill(&axis, &active_t, &active_flags, false);

        let mut out = Vec::new();
        for i in 0..axis.len().saturating_sub(1) {
            if flags[i] {
                out.push(NthreadsInterval {
                    begin: axis[i],
                    end: axis[i + 1],
                    nthreads: counts[i],
                });
            }
        }
        out
    }

    /// Total CPU-seconds made available to this span while it was active:
    /// thread capacity integrated over [`Self::nthreads_intervals`]. Accounts
    /// for workers joining and leaving, and for gaps between merged inputs.
    pub fn active_cpu_seconds(&self) -> f64 {
        self.nthreads_intervals()
            .iter()
            .map(|iv| iv.seconds() * iv.nthreads as f64)
            .sum()
    }

    /// Headline rollups in one serializable snapshot.
    pub fn summary(&self) -> SpanSummary {
        SpanSummary {
            id: self.span.id,
            name: self.span.name.clone(),
            enqueued: self.span.enqueued,
            start: self.start(),
            stop: self.stop(),
            done: self.done(),
            states: self.states(),
            duration: self.duration(),
            nbytes_total: self.nbytes_total(),
            active_cpu_seconds: self.active_cpu_seconds(),
        }
    }

    /// Thread-count history from this span's offset forward, truncated at
    /// `stop` once done, timestamps clamped up to `enqueued`.
    fn nthreads_timeseries(&self) -> (Vec<DateTime<Utc>>, Vec<usize>) {
        let stop_if_done = self.done().then(|| self.stop());
        let history = self.registry.nthreads_history();
        let samples = history.samples();

        let mut ts = Vec::new();
        let mut counts = Vec::new();
        for sample in samples.iter().skip(self.span.nthreads_offset) {
            if let Some(stop) = stop_if_done {
                if sample.at >= stop {
                    break;
                }
            }
            ts.push(sample.at.max(self.span.enqueued));
            counts.push(sample.nthreads);
        }
        (ts, counts)
    }

    /// Breakpoints of the "is this span active" flag. An ordinary span is
    /// active over its whole `[enqueued, stop-or-now)` interval; a merged
    /// span is active whenever at least one input is, computed with a +1/-1
    /// sweep over the children's intervals so gaps between them stay
    /// inactive.
    fn active_timeseries(&self) -> (Vec<DateTime<Utc>>, Vec<bool>) {
        let now = self.registry.clock().now();
        if !self.span.merged {
            let stop = if self.done() { self.stop() } else { now };
            return (vec![self.span.enqueued, stop], vec![true, false]);
        }

        let mut events: Vec<(DateTime<Utc>, i32)> = Vec::new();
        for &child_id in &self.span.children {
            let child = SpanView::new(self.registry, self.registry.expect_span(child_id));
            let stop = if child.done() { child.stop() } else { now };
            events.push((child.span.enqueued, 1));
            events.push((stop, -1));
        }
        // Starts before stops at equal timestamps, so a child whose interval
        // is empty cannot drive the counter negative.
        events.sort_by_key(|&(t, delta)| (t, std::cmp::Reverse(delta)));

        let mut ts = Vec::new();
        let mut flags = Vec::new();
        let mut active = 0i32;
        for (t, delta) in events {
            if active == 0 {
                debug_assert!(delta > 0);
                ts.push(t);
                flags.push(true);
            }
            active += delta;
            if active == 0 {
                ts.push(t);
                flags.push(false);
            }
        }
        (ts, flags)
    }
}

/// Iterator behind [`SpanView::traverse_spans`]: pre-order with an explicit
/// stack.
pub struct SpanTraversal<'a> {
    registry: &'a SpanRegistry,
    stack: Vec<&'a Span>,
}

impl<'a> Iterator for SpanTraversal<'a> {
    type Item = &'a Span;

    fn next(&mut self) -> Option<&'a Span> {
        let span = self.stack.pop()?;
        for &child in span.children.iter().rev() {
            self.stack.push(self.registry.expect_span(child));
        }
        Some(span)
    }
}
