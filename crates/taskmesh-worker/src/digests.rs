//! The worker's live metrics accumulator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use taskmesh_metrics::HeartbeatKey;

/// Key of a locally accumulated metric.
///
/// The accumulator is heterogeneous: span-scoped execution metrics sit next
/// to plain worker-level counters (event-loop lag, transfer totals, ...).
/// Only the span-scoped execute-context entries are forwarded to the
/// coordinator's span registry; everything else belongs to other reporting
/// paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestKey {
    /// A metric attributed to a span.
    Span(HeartbeatKey),
    /// A worker-level counter with no span attribution.
    Counter(String),
}

/// Additive metric totals observed since the last heartbeat.
///
/// Owned by the worker's execution machinery; the span collector only reads
/// it. Clearing after a snapshot is the worker loop's responsibility and
/// must happen without an intervening suspension point.
#[derive(Debug, Default)]
pub struct DigestAccumulator {
    totals: HashMap<DigestKey, f64>,
}

impl DigestAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` to the running total for `key`.
    pub fn digest(&mut self, key: DigestKey, value: f64) {
        *self.totals.entry(key).or_insert(0.0) += value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DigestKey, f64)> {
        self.totals.iter().map(|(k, v)| (k, *v))
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    /// Drop all accumulated totals. Called by the worker loop immediately
    /// after a snapshot, in the same non-suspending step.
    pub fn clear(&mut self) {
        self.totals.clear();
    }
}
