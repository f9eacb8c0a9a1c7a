//! The coordinator's span registry.
//!
//! Owns the span forest (an arena keyed by span id), the name and tag search
//! indices, and the two ingestion paths: task observation and worker
//! heartbeats. Spans are created lazily, the first time a task group needs
//! one, and are never deleted: they stay resident for historical queries
//! until the coordinator process discards the whole registry.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, error, trace};

use taskmesh_metrics::{
    HeartbeatPayload, OrderedSet, SharedClock, SpanId, SystemClock,
};

use crate::config::SpansConfig;
use crate::context::{SourceCode, SpanAnnotation};
use crate::error::{SpanError, SpanResult};
use crate::scheduler::{NthreadsHistory, TaskStateRef};
use crate::span::{Span, SpanView};

/// Tag path of the implicit span used for unannotated work.
const DEFAULT_TAG: &str = "default";

/// Coordinator-side owner of the span forest.
pub struct SpanRegistry {
    /// All spans, by id. The arena: owning every span for the registry's
    /// lifetime is what guarantees parents outlive their children.
    spans: HashMap<SpanId, Span>,
    /// Spans without a parent, in creation order.
    root_spans: Vec<SpanId>,
    /// All spans keyed by full name, in creation order.
    spans_search_by_name: HashMap<Vec<String>, Vec<SpanId>>,
    /// All spans keyed by each individual tag of their name, in creation
    /// order.
    spans_search_by_tag: HashMap<String, Vec<SpanId>>,
    nthreads_history: NthreadsHistory,
    clock: SharedClock,
    config: SpansConfig,
}

impl SpanRegistry {
    /// Build a registry over the scheduler's shared thread-count history,
    /// with the system clock and default configuration.
    pub fn new(nthreads_history: NthreadsHistory) -> Self {
        Self {
            spans: HashMap::new(),
            root_spans: Vec::new(),
            spans_search_by_name: HashMap::new(),
            spans_search_by_tag: HashMap::new(),
            nthreads_history,
            clock: Rc::new(SystemClock),
            config: SpansConfig::default(),
        }
    }

    /// Replace the clock (builder pattern).
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the configuration (builder pattern).
    pub fn with_config(mut self, config: SpansConfig) -> Self {
        self.config = config;
        self
    }

    pub fn span(&self, id: SpanId) -> Option<&Span> {
        self.spans.get(&id)
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Root spans in creation order.
    pub fn root_spans(&self) -> impl Iterator<Item = &Span> {
        self.root_spans.iter().map(move |&id| self.expect_span(id))
    }

    /// Every span instance carrying exactly this name, in creation order.
    pub fn spans_with_name(&self, name: &[String]) -> impl Iterator<Item = &Span> {
        self.spans_search_by_name
            .get(name)
            .into_iter()
            .flatten()
            .map(move |&id| self.expect_span(id))
    }

    /// Resolve a span (owned by this registry, or a synthetic merged span
    /// over its spans) for rollup queries.
    pub fn view<'a>(&'a self, span: &'a Span) -> SpanView<'a> {
        SpanView::new(self, span)
    }

    pub fn view_by_id(&self, id: SpanId) -> Option<SpanView<'_>> {
        self.span(id).map(|span| SpanView::new(self, span))
    }

    /// Acknowledge runnable tasks: new ones, previously unrunnable ones, or
    /// ones already fed through here.
    ///
    /// A group that already carries a span affiliation keeps it: first
    /// affiliation wins, even when the current task batch is annotated with a
    /// different span, so one logical group is never split across spans.
    /// Otherwise the task's annotation (or, absent one, the current default
    /// span) decides. The consumed annotation is cleared from the task: its
    /// information now lives in the group/span linkage and must not be
    /// reinterpreted later.
    pub fn observe_tasks(&mut self, tasks: &[TaskStateRef], code: &[SourceCode]) {
        let mut default_span: Option<SpanId> = None;

        for ts in tasks {
            let mut task = ts.borrow_mut();
            let group = Rc::clone(&task.group);
            let existing = group.borrow().span_id();
            let span_id = match existing {
                Some(id) => id,
                None => {
                    let id = match task.annotation.as_ref() {
                        Some(annotation) => self.ensure_span(annotation),
                        None => match default_span {
                            Some(id) => id,
                            None => {
                                let id = self.ensure_default_span();
                                default_span = Some(id);
                                id
                            }
                        },
                    };
                    group.borrow_mut().affiliate(id);
                    self.expect_span_mut(id).groups.push(Rc::clone(&group));
                    trace!(span = %id, group = group.borrow().key(), "attached task group");
                    id
                }
            };

            if !code.is_empty() && self.config.capture_code {
                self.expect_span_mut(span_id).code.insert(code.to_vec());
            }

            // The group's recorded span may differ from the one this task's
            // annotation referenced; the stale annotation is dropped rather
            // than reinterpreted.
            task.annotation = None;
        }
    }

    /// The currently live default span, or a brand-new one if the previous
    /// instance finished. An idle cluster running only unannotated work rolls
    /// through default-span instances: one while live, a fresh id once it
    /// completes and new unannotated work arrives.
    pub fn ensure_default_span(&mut self) -> SpanId {
        let default_name = [DEFAULT_TAG.to_string()];
        let last = self
            .spans_search_by_name
            .get(&default_name[..])
            .and_then(|ids| ids.last())
            .copied();
        if let Some(id) = last {
            if !self.view(self.expect_span(id)).done() {
                return id;
            }
        }
        debug!("opening a new default span");
        self.ensure_chain(&default_name, &[SpanId::new()])
    }

    /// Idempotent construction of a whole span chain: if the innermost id
    /// already exists it is returned as-is; otherwise every strict prefix of
    /// the annotation is ensured first, in order, and the new leaf is
    /// registered into the arena, both search indices, and its parent's
    /// children (or the root list).
    ///
    /// Ids are minted by whoever built the annotation, never here.
    pub fn ensure_span(&mut self, annotation: &SpanAnnotation) -> SpanId {
        self.ensure_chain(annotation.name(), annotation.ids())
    }

    fn ensure_chain(&mut self, name: &[String], ids: &[SpanId]) -> SpanId {
        debug_assert!(!ids.is_empty() && name.len() == ids.len());
        let leaf = ids[ids.len() - 1];
        if self.spans.contains_key(&leaf) {
            return leaf;
        }

        let mut parent = None;
        for i in 1..name.len() {
            parent = Some(self.ensure_chain(&name[..i], &ids[..i]));
        }

        assert!(
            !self.nthreads_history.is_empty(),
            "thread-count history must contain at least one sample before spans are created"
        );
        let span = Span::new(
            name.to_vec(),
            leaf,
            parent,
            self.clock.now(),
            self.nthreads_history.len() - 1,
        );
        debug!(span = %leaf, name = ?name, "created span");

        self.spans_search_by_name
            .entry(name.to_vec())
            .or_default()
            .push(leaf);
        for tag in name {
            self.spans_search_by_tag
                .entry(tag.clone())
                .or_default()
                .push(leaf);
        }
        match parent {
            Some(parent_id) => self.expect_span_mut(parent_id).children.push(leaf),
            None => self.root_spans.push(leaf),
        }
        self.spans.insert(leaf, span);
        leaf
    }

    /// Every span whose name contains any of the given tags, ancestor wins:
    /// when a tag is shared by a span and its descendants, only the
    /// shallowest is returned. A span matching several tags is returned
    /// once.
    ///
    /// Checking only the direct parent suffices: a span's name is its full
    /// tag path, so every descendant of a match also matches, and the match
    /// set is closed under descendants.
    pub fn find_by_tags<'a>(&'a self, tags: &[&str]) -> Vec<&'a Span> {
        let mut matched: OrderedSet<SpanId> = OrderedSet::new();
        let mut by_level: BTreeMap<usize, Vec<SpanId>> = BTreeMap::new();
        for &tag in tags {
            if let Some(ids) = self.spans_search_by_tag.get(tag) {
                for &id in ids {
                    if matched.insert(id) {
                        by_level
                            .entry(self.expect_span(id).name().len())
                            .or_default()
                            .push(id);
                    }
                }
            }
        }

        let mut seen: HashSet<SpanId> = HashSet::new();
        let mut out = Vec::new();
        for (_, level) in by_level {
            seen.extend(level.iter().copied());
            for id in level {
                let span = self.expect_span(id);
                if !span.parent().is_some_and(|parent| seen.contains(&parent)) {
                    out.push(span);
                }
            }
        }
        out
    }

    /// Synthetic merged span over every root in the forest.
    pub fn merge_all(&self) -> SpanResult<Span> {
        let roots: Vec<&Span> = self.root_spans().collect();
        Span::merge(&roots)
    }

    /// Synthetic merged span over the [`Self::find_by_tags`] result.
    pub fn merge_by_tags(&self, tags: &[&str]) -> SpanResult<Span> {
        Span::merge(&self.find_by_tags(tags))
    }

    /// Fold one worker's heartbeat batch into the matching spans'
    /// cumulative metrics, stripping the span id dimension from each key.
    ///
    /// An entry referencing an unknown span id is a protocol violation
    /// (span ids always reach the coordinator before any worker can execute
    /// tasks under them) and aborts ingestion with an error rather than
    /// being dropped, so the desynchronization stays visible. Entries folded
    /// before the failing one remain applied.
    pub fn heartbeat(&mut self, worker: &str, data: HeartbeatPayload) -> SpanResult<()> {
        let entries = data.len();
        for (key, value) in data {
            let (span_id, metric) = key.strip_span_id();
            let Some(span) = self.spans.get_mut(&span_id) else {
                error!(
                    worker,
                    span = %span_id,
                    "heartbeat referenced a span this coordinator has never created"
                );
                return Err(SpanError::UnknownSpanId(span_id));
            };
            *span.cumulative_worker_metrics.entry(metric).or_insert(0.0) += value;
        }
        trace!(worker, entries, "ingested span metrics heartbeat");
        Ok(())
    }

    pub(crate) fn clock(&self) -> &dyn taskmesh_metrics::Clock {
        self.clock.as_ref()
    }

    pub(crate) fn nthreads_history(&self) -> &NthreadsHistory {
        &self.nthreads_history
    }

    /// Arena lookup for ids that are linked inside the forest. Failure means
    /// the tree invariant was broken elsewhere; that must not be masked.
    pub(crate) fn expect_span(&self, id: SpanId) -> &Span {
        self.spans.get(&id).unwrap_or_else(|| {
            panic!("span {id} is linked in the forest but missing from the registry arena")
        })
    }

    fn expect_span_mut(&mut self, id: SpanId) -> &mut Span {
        self.spans.get_mut(&id).unwrap_or_else(|| {
            panic!("span {id} is linked in the forest but missing from the registry arena")
        })
    }
}
