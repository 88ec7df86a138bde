//! Common test utilities for tally-stats integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tally_id::{IdError, IdGenerator};
use tally_stats::buffer::{FlushObserver, FlushReport};
use tally_stats::config::BufferConfig;
use tally_stats::store::EventSink;
use tally_stats::{Event, StatsError, StatsResult};

/// Sink that records batches and can be told to fail or stall.
#[derive(Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<Vec<Event>>>,
    fail_when: Option<fn(&Event) -> bool>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every batch containing an event matching `predicate`.
    pub fn failing_when(predicate: fn(&Event) -> bool) -> Self {
        Self {
            fail_when: Some(predicate),
            ..Self::default()
        }
    }

    /// Sleep for `delay` before recording each batch.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.batches().into_iter().flatten().collect()
    }

    pub fn rows(&self) -> usize {
        self.batches().iter().map(Vec::len).sum()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn insert_batch(&self, events: &[Event]) -> StatsResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(fail) = self.fail_when {
            if events.iter().any(fail) {
                return Err(StatsError::Database(sqlx::Error::PoolTimedOut));
            }
        }
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(events.to_vec());
        Ok(())
    }
}

/// Observer that keeps every flush report.
#[derive(Default)]
pub struct ReportingObserver {
    reports: Mutex<Vec<FlushReport>>,
    rejected: AtomicUsize,
}

impl ReportingObserver {
    pub fn reports(&self) -> Vec<FlushReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }
}

impl FlushObserver for ReportingObserver {
    fn chunk_persisted(&self, _shard: usize, _rows: usize) {}

    fn chunk_failed(&self, _shard: usize, _rows: usize, _error: &StatsError) {}

    fn push_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
    }

    fn flush_completed(&self, report: &FlushReport) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*report);
    }
}

/// Generator handing out 1, 2, 3, ...
#[derive(Default)]
pub struct SequentialIds(AtomicU64);

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> Result<u64, IdError> {
        Ok(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

pub fn buffer_config(shard_count: usize, flush_interval_secs: u64, chunk_size: usize) -> BufferConfig {
    BufferConfig {
        shard_count,
        flush_interval_secs,
        chunk_size,
    }
}

pub fn event(id: u64) -> Event {
    Event {
        id,
        property: "news".to_owned(),
        property_section: 1,
        property_id: 1,
        remote_ip: "192.0.2.10".to_owned(),
        stamp: Utc::now(),
    }
}
