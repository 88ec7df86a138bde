//! In-memory event buffering.
//!
//! Pushed events land in a [`ShardSet`]; a [`Flusher`] periodically drains
//! every shard and hands the events to an [`EventSink`](crate::store::EventSink)
//! in bounded chunks.

mod flusher;
mod observer;
mod shard;
mod shard_set;

pub use flusher::{Flusher, FlusherState};
pub use observer::{FlushObserver, FlushReport, TracingObserver};
pub use shard::Shard;
pub use shard_set::ShardSet;
