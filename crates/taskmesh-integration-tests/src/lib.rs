//! Shared harness for TaskMesh end-to-end scenario tests.

use std::rc::Rc;

use chrono::{DateTime, TimeZone, Utc};

use taskmesh_metrics::ManualClock;
use taskmesh_spans::{NthreadsHistory, SpanRegistry};

/// A fixed base instant plus an offset in seconds.
pub fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// A simulated coordinator: manual clock starting at `t(0)`, one initial
/// thread-count sample recorded a minute earlier, and a registry wired to
/// both.
pub struct TestCluster {
    pub clock: Rc<ManualClock>,
    pub history: NthreadsHistory,
    pub registry: SpanRegistry,
}

impl TestCluster {
    pub fn start(nthreads: usize) -> Self {
        let clock = Rc::new(ManualClock::new(t(0)));
        let history = NthreadsHistory::new();
        history.record(t(-60), nthreads);
        let registry = SpanRegistry::new(history.clone()).with_clock(clock.clone());
        Self {
            clock,
            history,
            registry,
        }
    }
}

/// Install a test-friendly tracing subscriber once per process.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
