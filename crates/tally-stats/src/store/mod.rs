//! Event sinks.
//!
//! The flusher hands every chunk of drained events to an [`EventSink`]. The
//! production sink writes to MySQL; the in-memory sink records batches for
//! tests and dry runs.

mod memory;
mod mysql;

pub use memory::MemorySink;
pub use mysql::{connect_with_retry, mask_dsn, MySqlSink};

use async_trait::async_trait;

use crate::error::StatsResult;
use crate::event::Event;

/// Destination for batches of drained events.
///
/// Implementations must be safe for concurrent use; the flusher does not add
/// its own locking around sink calls.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Persist `events` as one multi-row insert.
    ///
    /// Called with a non-empty slice no longer than the configured chunk size.
    async fn insert_batch(&self, events: &[Event]) -> StatsResult<()>;
}
