//! In-memory event sink for testing.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::StatsResult;
use crate::event::Event;

use super::EventSink;

/// Sink that keeps every inserted batch in memory.
///
/// Not suitable for production use as data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: RwLock<Vec<Vec<Event>>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch received so far, in insert order.
    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.batches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Total number of rows received.
    pub fn rows(&self) -> usize {
        self.batches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Vec::len)
            .sum()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn insert_batch(&self, events: &[Event]) -> StatsResult<()> {
        self.batches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(events.to_vec());
        Ok(())
    }
}
