//! Reporting hooks for flush outcomes.
//!
//! Persistence failures during a background flush never reach a Push caller;
//! they surface only through a [`FlushObserver`].

use metrics::counter;

use crate::error::StatsError;

/// Totals for one flush pass across all shards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Shards that held at least one event.
    pub shards: usize,
    /// Rows persisted.
    pub rows: usize,
    /// Insert statements that succeeded.
    pub chunks: usize,
    /// Insert statements that failed.
    pub failed_chunks: usize,
    /// Rows dropped because their chunk failed.
    pub dropped_rows: usize,
}

impl FlushReport {
    /// Whether the pass touched no events at all.
    pub const fn is_empty(&self) -> bool {
        self.rows == 0 && self.dropped_rows == 0
    }
}

/// Receives flush and rejection events from a [`Flusher`](super::Flusher).
pub trait FlushObserver: Send + Sync {
    /// A chunk of `rows` events from shard `shard` was inserted.
    fn chunk_persisted(&self, shard: usize, rows: usize);

    /// A chunk of `rows` events from shard `shard` failed and was dropped.
    fn chunk_failed(&self, shard: usize, rows: usize, error: &StatsError);

    /// A push was rejected because the flusher is no longer running.
    fn push_rejected(&self);

    /// A flush pass finished.
    fn flush_completed(&self, _report: &FlushReport) {}
}

/// Default observer: `tracing` events plus `metrics` counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl FlushObserver for TracingObserver {
    fn chunk_persisted(&self, shard: usize, rows: usize) {
        tracing::trace!(shard, rows, "Chunk persisted");
        counter!("tally.flush.chunks").increment(1);
        counter!("tally.flush.rows").increment(rows as u64);
    }

    fn chunk_failed(&self, shard: usize, rows: usize, error: &StatsError) {
        tracing::error!(shard, rows, error = %error, "Error when flushing data");
        counter!("tally.flush.failed_chunks").increment(1);
        counter!("tally.flush.dropped_rows").increment(rows as u64);
    }

    fn push_rejected(&self) {
        counter!("tally.push.rejected").increment(1);
    }

    fn flush_completed(&self, report: &FlushReport) {
        if report.is_empty() {
            tracing::trace!("Flush found no buffered events");
            return;
        }
        tracing::info!(
            shards = report.shards,
            rows = report.rows,
            failed_chunks = report.failed_chunks,
            dropped_rows = report.dropped_rows,
            "Flush complete"
        );
    }
}
