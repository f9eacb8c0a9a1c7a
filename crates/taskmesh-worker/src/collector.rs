//! Two-phase snapshot of span-scoped execution metrics.

use std::mem;

use tracing::trace;

use taskmesh_metrics::{HeartbeatPayload, MetricContext};

use crate::digests::{DigestAccumulator, DigestKey};

/// Buffers span-scoped execution metrics between heartbeats and hands them
/// off as one atomic snapshot per cycle.
#[derive(Debug, Default)]
pub struct SpanMetricsCollector {
    pending: HeartbeatPayload,
}

impl SpanMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the span-scoped execute-context entries out of the live
    /// accumulator into the pending buffer, without clearing the source.
    ///
    /// # Panics
    ///
    /// If the pending buffer is not empty: a snapshot was taken and never
    /// drained, meaning a heartbeat cycle was skipped or re-entered. That is
    /// a programming error, not a recoverable condition.
    ///
    /// Registration paths may call this spuriously; when they do, the
    /// accumulator is guaranteed to hold no metrics yet and the call is a
    /// no-op.
    pub fn collect_digests(&mut self, digests: &DigestAccumulator) {
        assert!(
            self.pending.is_empty(),
            "span metrics snapshot taken while a previous snapshot is still pending"
        );
        self.pending = digests
            .iter()
            .filter_map(|(key, value)| match key {
                DigestKey::Span(hk) if hk.context == MetricContext::Execute => {
                    Some((hk.clone(), value))
                }
                _ => None,
            })
            .collect();
        trace!(entries = self.pending.len(), "collected span metric digests");
    }

    /// Take ownership of the pending buffer for transport, leaving an empty
    /// one behind. The returned payload is reported against the spans on the
    /// coordinator.
    pub fn heartbeat(&mut self) -> HeartbeatPayload {
        mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use taskmesh_metrics::{HeartbeatKey, SpanId};

    use super::*;

    fn spanned(span_id: SpanId) -> DigestKey {
        DigestKey::Span(HeartbeatKey::execute(
            span_id,
            ["sum", "compute", "seconds"],
        ))
    }

    #[test]
    fn test_collect_filters_to_spanned_execution_metrics() {
        let span_id = SpanId::new();
        let mut acc = DigestAccumulator::new();
        acc.digest(spanned(span_id), 3.5);
        acc.digest(DigestKey::Counter("event-loop-lag".into()), 0.1);
        acc.digest(
            DigestKey::Span(HeartbeatKey {
                context: MetricContext::Other("get-data".into()),
                span_id,
                dims: vec!["seconds".into()],
            }),
            2.0,
        );

        let mut collector = SpanMetricsCollector::new();
        collector.collect_digests(&acc);
        let payload = collector.heartbeat();
        assert_eq!(payload.len(), 1);
        assert_eq!(
            payload[&HeartbeatKey::execute(span_id, ["sum", "compute", "seconds"])],
            3.5
        );
        // The source is untouched; clearing is the worker loop's call.
        assert_eq!(acc.len(), 3);
    }

    #[test]
    fn test_heartbeat_drains_the_pending_buffer() {
        let mut acc = DigestAccumulator::new();
        acc.digest(spanned(SpanId::new()), 1.0);

        let mut collector = SpanMetricsCollector::new();
        collector.collect_digests(&acc);
        assert_eq!(collector.heartbeat().len(), 1);
        assert!(collector.heartbeat().is_empty());

        // Once drained, the next cycle can snapshot again.
        acc.clear();
        acc.digest(spanned(SpanId::new()), 2.0);
        collector.collect_digests(&acc);
        assert_eq!(collector.heartbeat().len(), 1);
    }

    #[test]
    #[should_panic(expected = "previous snapshot is still pending")]
    fn test_double_snapshot_panics() {
        let mut acc = DigestAccumulator::new();
        acc.digest(spanned(SpanId::new()), 1.0);

        let mut collector = SpanMetricsCollector::new();
        collector.collect_digests(&acc);
        collector.collect_digests(&acc);
    }

    #[test]
    fn test_spurious_collect_with_empty_accumulator_is_harmless() {
        let acc = DigestAccumulator::new();
        let mut collector = SpanMetricsCollector::new();
        collector.collect_digests(&acc);
        collector.collect_digests(&acc);
        assert!(collector.heartbeat().is_empty());
    }
}
