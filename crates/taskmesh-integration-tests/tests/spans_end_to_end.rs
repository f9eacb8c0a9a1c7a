//! End-to-end scenarios: client tagging context -> registry forest ->
//! worker metrics -> heartbeat reconciliation -> rollup queries.

use std::collections::HashMap;
use std::rc::Rc;

use taskmesh_integration_tests::{init_test_logging, t, TestCluster};
use taskmesh_metrics::{HeartbeatKey, MetricKey, SpanId};
use taskmesh_spans::{SpanContextStack, SpanError, TaskGroup, TaskState};
use taskmesh_worker::{DigestAccumulator, DigestKey, SpanMetricsCollector};

#[test]
fn test_nested_tags_build_the_expected_forest() -> anyhow::Result<()> {
    init_test_logging();
    let mut cluster = TestCluster::start(4);
    let mut ctx = SpanContextStack::new();

    let g_a1 = TaskGroup::new("load-1").shared();
    let g_a2 = TaskGroup::new("load-2").shared();
    let g_b = TaskGroup::new("train-1").shared();
    let g_default = TaskGroup::new("adhoc-1").shared();

    let (ann_a, ann_b) = ctx.scope(&["workflow"], |ctx, _| {
        let a = ctx.scope(&["phaseA"], |ctx, _| ctx.annotation().unwrap())?;
        let b = ctx.scope(&["phaseB"], |ctx, _| ctx.annotation().unwrap())?;
        Ok::<_, SpanError>((a, b))
    })??;

    // Three tagged tasks and one untagged straggler.
    let tasks = [
        TaskState::new(Rc::clone(&g_a1), Some(ann_a.clone())).shared(),
        TaskState::new(Rc::clone(&g_a2), Some(ann_a.clone())).shared(),
        TaskState::new(Rc::clone(&g_b), Some(ann_b.clone())).shared(),
        TaskState::new(Rc::clone(&g_default), None).shared(),
    ];
    cluster.registry.observe_tasks(&tasks, &[]);

    // Two leaves sharing one ("workflow",) parent, plus the rolling default.
    let workflow_id = ann_a.ids()[0];
    assert_eq!(ann_b.ids()[0], workflow_id);
    let workflow = cluster.registry.span(workflow_id).unwrap();
    assert_eq!(workflow.children(), [ann_a.leaf_id(), ann_b.leaf_id()]);
    assert_eq!(cluster.registry.span_count(), 4);

    let phase_a = cluster.registry.span(ann_a.leaf_id()).unwrap();
    assert_eq!(phase_a.parent(), Some(workflow_id));
    assert_eq!(phase_a.groups().len(), 2);

    let default_id = g_default.borrow().span_id().unwrap();
    let default = cluster.registry.span(default_id).unwrap();
    assert_eq!(default.name(), ["default"]);
    assert_eq!(default.parent(), None);

    // Durations roll up through the workflow subtree only.
    g_a1.borrow_mut().all_durations.insert("compute".into(), 2.0);
    g_a2.borrow_mut().all_durations.insert("compute".into(), 3.0);
    g_b.borrow_mut().all_durations.insert("compute".into(), 5.0);
    g_default
        .borrow_mut()
        .all_durations
        .insert("compute".into(), 100.0);

    let found = cluster.registry.find_by_tags(&["workflow"]);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), workflow_id);

    let merged = cluster.registry.merge_by_tags(&["workflow"])?;
    let merged_view = cluster.registry.view(&merged);
    let phase_durations: f64 = [ann_a.leaf_id(), ann_b.leaf_id()]
        .into_iter()
        .map(|id| cluster.registry.view_by_id(id).unwrap().duration())
        .sum();
    assert_eq!(merged_view.duration(), phase_durations);
    assert_eq!(merged_view.duration(), 10.0);

    // merge_all spans the whole forest: the workflow tree and the default.
    let everything = cluster.registry.merge_all()?;
    assert_eq!(everything.children().len(), 2);
    assert_eq!(cluster.registry.view(&everything).duration(), 110.0);

    Ok(())
}

#[test]
fn test_worker_heartbeat_reconciles_into_the_tree() -> anyhow::Result<()> {
    init_test_logging();
    let mut cluster = TestCluster::start(2);
    let mut ctx = SpanContextStack::new();
    let ann = ctx.scope(&["workflow"], |ctx, _| ctx.annotation().unwrap())?;

    let group = TaskGroup::new("sum-1").shared();
    let task = TaskState::new(Rc::clone(&group), Some(ann.clone())).shared();
    cluster.registry.observe_tasks(&[task], &[]);
    {
        let mut g = group.borrow_mut();
        g.start = Some(t(0));
        g.stop = Some(t(10));
        g.done = true;
    }
    let span_id = group.borrow().span_id().unwrap();
    assert_eq!(span_id, ann.leaf_id());

    // Worker side: the execution loop digests metrics, the heartbeat cycle
    // snapshots and drains them.
    let mut digests = DigestAccumulator::new();
    digests.digest(
        DigestKey::Span(HeartbeatKey::execute(
            span_id,
            ["sum", "compute", "seconds"],
        )),
        3.5,
    );
    digests.digest(DigestKey::Counter("event-loop-lag".into()), 0.2);

    let mut collector = SpanMetricsCollector::new();
    collector.collect_digests(&digests);
    digests.clear();
    let payload = collector.heartbeat();
    cluster.registry.heartbeat("tcp://10.0.0.8:9000", payload)?;

    let view = cluster.registry.view_by_id(span_id).unwrap();
    let metrics = view.cumulative_worker_metrics();
    assert_eq!(
        metrics[&MetricKey::execute(["sum", "compute", "seconds"])],
        3.5
    );
    // Two threads over ten seconds were available; 3.5 were accounted for.
    assert_eq!(metrics[&MetricKey::idle_seconds()], 20.0 - 3.5);

    Ok(())
}

#[test]
fn test_two_workers_accumulate_into_one_span() -> anyhow::Result<()> {
    let mut cluster = TestCluster::start(4);
    let mut ctx = SpanContextStack::new();
    let ann = ctx.scope(&["workflow"], |ctx, _| ctx.annotation().unwrap())?;
    let group = TaskGroup::new("sum-1").shared();
    cluster
        .registry
        .observe_tasks(&[TaskState::new(Rc::clone(&group), Some(ann.clone())).shared()], &[]);

    for (worker, seconds) in [("tcp://10.0.0.8:9000", 1.25), ("tcp://10.0.0.9:9000", 2.25)] {
        let mut digests = DigestAccumulator::new();
        digests.digest(
            DigestKey::Span(HeartbeatKey::execute(
                ann.leaf_id(),
                ["sum", "compute", "seconds"],
            )),
            seconds,
        );
        let mut collector = SpanMetricsCollector::new();
        collector.collect_digests(&digests);
        digests.clear();
        cluster.registry.heartbeat(worker, collector.heartbeat())?;
    }

    let span = cluster.registry.span(ann.leaf_id()).unwrap();
    assert_eq!(
        span.local_worker_metrics()[&MetricKey::execute(["sum", "compute", "seconds"])],
        3.5
    );
    Ok(())
}

#[test]
fn test_default_span_rolls_over_and_may_overlap() {
    let mut cluster = TestCluster::start(1);

    let g1 = TaskGroup::new("adhoc-1").shared();
    cluster
        .registry
        .observe_tasks(&[TaskState::new(Rc::clone(&g1), None).shared()], &[]);
    {
        let mut g = g1.borrow_mut();
        g.start = Some(t(0));
        g.stop = Some(t(5));
        g.done = true;
    }

    cluster.clock.set(t(10));
    let g2 = TaskGroup::new("adhoc-2").shared();
    cluster
        .registry
        .observe_tasks(&[TaskState::new(Rc::clone(&g2), None).shared()], &[]);

    let first = g1.borrow().span_id().unwrap();
    let second = g2.borrow().span_id().unwrap();
    assert_ne!(first, second);

    let name = ["default".to_string()];
    assert_eq!(cluster.registry.spans_with_name(&name).count(), 2);

    // A lost worker forces recomputation of the finished default: both
    // instances are now transiently live at once.
    g1.borrow_mut().done = false;
    assert!(!cluster.registry.view_by_id(first).unwrap().done());
    assert!(!cluster.registry.view_by_id(second).unwrap().done());

    // New unannotated work still lands on the most recent instance.
    let g3 = TaskGroup::new("adhoc-3").shared();
    cluster
        .registry
        .observe_tasks(&[TaskState::new(Rc::clone(&g3), None).shared()], &[]);
    assert_eq!(g3.borrow().span_id(), Some(second));
}

#[test]
fn test_heartbeat_for_unminted_span_is_loud() {
    let mut cluster = TestCluster::start(1);
    let stray = SpanId::new();
    let payload = HashMap::from([(
        HeartbeatKey::execute(stray, ["sum", "compute", "seconds"]),
        1.0,
    )]);
    let err = cluster
        .registry
        .heartbeat("tcp://10.0.0.8:9000", payload)
        .unwrap_err();
    assert!(matches!(err, SpanError::UnknownSpanId(id) if id == stray));
}
