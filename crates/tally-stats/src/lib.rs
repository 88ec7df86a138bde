//! Tally stats - view-event ingestion with sharded write buffering.
//!
//! Push requests are validated, stamped with a Sonyflake id, and appended to
//! one of a fixed set of in-memory shards. A background flusher drains the
//! shards on an interval and writes each one to MySQL in bounded multi-row
//! inserts.
//!
//! ## Architecture
//!
//! ```text
//! HTTP Push → StatsService → ShardSet ──tick──▶ Flusher → EventSink (MySQL)
//!                                         ▲
//!                           cancel ───────┘ (disable pushes, final flush)
//! ```
//!
//! A persistence failure drops the affected chunk and is reported only
//! through the [`FlushObserver`](buffer::FlushObserver); Push callers never
//! see it.

#![forbid(unsafe_code)]

pub mod buffer;
pub mod config;
pub mod error;
pub mod event;
pub mod exporter;
pub mod ingest;
pub mod server;
pub mod store;

pub use buffer::{Flusher, FlusherState};
pub use config::StatsConfig;
pub use error::{StatsError, StatsResult};
pub use event::Event;
