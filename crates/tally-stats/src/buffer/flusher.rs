//! Background drain-and-persist loop over a [`ShardSet`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{FlushObserver, FlushReport, ShardSet, TracingObserver};
use crate::config::BufferConfig;
use crate::error::{StatsError, StatsResult};
use crate::event::Event;
use crate::store::EventSink;

/// Lifecycle of a [`Flusher`].
///
/// ```text
/// Running ──cancel──▶ Draining ──final flush──▶ Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlusherState {
    /// Accepting pushes; flushing on every tick.
    Running,
    /// Cancellation observed; pushes rejected, final flush in progress.
    Draining,
    /// Background loop has exited.
    Stopped,
}

impl fmt::Display for FlusherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

struct Inner {
    shards: ShardSet,
    sink: Arc<dyn EventSink>,
    observer: Arc<dyn FlushObserver>,
    chunk_size: usize,
    enabled: AtomicBool,
    /// Pushes between their enabled check and their append.
    in_flight: AtomicUsize,
    /// Signalled when the last in-flight push finishes after disable.
    idle: Notify,
    state: watch::Sender<FlusherState>,
}

/// Buffers pushed events across shards and persists them in chunks.
///
/// A background task flushes every `flush_interval_secs`. Cancelling the
/// parent token, calling [`shutdown`](Self::shutdown), or dropping the flusher
/// disables pushes and triggers one final flush.
pub struct Flusher {
    inner: Arc<Inner>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Flusher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flusher")
            .field("shards", &self.inner.shards.len())
            .field("chunk_size", &self.inner.chunk_size)
            .field("state", &self.state())
            .field("buffered", &self.buffered())
            .finish()
    }
}

impl Flusher {
    /// Create a flusher and start its background loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        parent: &CancellationToken,
        sink: Arc<dyn EventSink>,
        config: &BufferConfig,
    ) -> StatsResult<Self> {
        Self::with_observer(parent, sink, config, Arc::new(TracingObserver))
    }

    /// Create a flusher reporting to a custom observer.
    pub fn with_observer(
        parent: &CancellationToken,
        sink: Arc<dyn EventSink>,
        config: &BufferConfig,
        observer: Arc<dyn FlushObserver>,
    ) -> StatsResult<Self> {
        config.validate()?;

        let (state, _) = watch::channel(FlusherState::Running);
        let inner = Arc::new(Inner {
            shards: ShardSet::new(config.shard_count)?,
            sink,
            observer,
            chunk_size: config.chunk_size,
            enabled: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            state,
        });

        let cancel = parent.child_token();
        let task = tokio::spawn(run(inner.clone(), cancel.clone(), config.flush_interval()));

        Ok(Self {
            inner,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Buffer an event for the next flush.
    ///
    /// Returns [`StatsError::FlusherDisabled`] once the flusher has left the
    /// running state. Success means accepted into memory, not committed.
    pub fn push(&self, event: Event) -> StatsResult<()> {
        let _guard = InFlight::enter(&self.inner);
        if !self.inner.enabled.load(Ordering::SeqCst) {
            self.inner.observer.push_rejected();
            return Err(StatsError::FlusherDisabled);
        }
        self.inner.shards.select_for_write().append(event);
        Ok(())
    }

    /// Events currently buffered across all shards.
    pub fn buffered(&self) -> usize {
        self.inner.shards.buffered()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FlusherState {
        *self.inner.state.borrow()
    }

    /// Signal the background loop to stop and wait for the final flush.
    ///
    /// Safe to call more than once and from several tasks at the same time.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background flush task terminated abnormally");
                self.inner.enabled.store(false, Ordering::SeqCst);
                self.inner.state.send_replace(FlusherState::Stopped);
            }
        }

        self.wait().await;
    }

    /// Wait until the background loop has stopped, without cancelling it.
    pub async fn wait(&self) {
        let mut state = self.inner.state.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = state
            .wait_for(|state| *state == FlusherState::Stopped)
            .await;
    }

    #[cfg(test)]
    fn shards(&self) -> &ShardSet {
        &self.inner.shards
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Marks a push as in progress for the duration of its critical section.
struct InFlight<'a>(&'a Inner);

impl<'a> InFlight<'a> {
    fn enter(inner: &'a Inner) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let inner = self.0;
        // Only a draining flusher has a waiter; the running path skips the wake.
        if inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1
            && !inner.enabled.load(Ordering::SeqCst)
        {
            inner.idle.notify_waiters();
        }
    }
}

impl Inner {
    /// Drain every shard and insert its events in chunks.
    ///
    /// A failed chunk is reported and dropped; the remaining chunks and shards
    /// are still flushed.
    async fn flush(&self) -> FlushReport {
        let mut report = FlushReport::default();

        for (index, shard) in self.shards.all().iter().enumerate() {
            let rows = shard.drain();
            if rows.is_empty() {
                continue;
            }

            report.shards += 1;
            tracing::debug!(shard = index, rows = rows.len(), "Drained shard");

            for chunk in rows.chunks(self.chunk_size) {
                match self.sink.insert_batch(chunk).await {
                    Ok(()) => {
                        report.chunks += 1;
                        report.rows += chunk.len();
                        self.observer.chunk_persisted(index, chunk.len());
                    }
                    Err(e) => {
                        report.failed_chunks += 1;
                        report.dropped_rows += chunk.len();
                        self.observer.chunk_failed(index, chunk.len(), &e);
                    }
                }
            }
        }

        self.observer.flush_completed(&report);
        report
    }

    /// Stop accepting pushes and wait out any push already past its check.
    ///
    /// Pairs with [`Flusher::push`]: a push either observes the disabled flag
    /// or is counted in `in_flight` before the flag flips, so nothing lands in
    /// a shard after the final drain. The last push to leave wakes `idle`.
    async fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        loop {
            let idle = self.idle.notified();
            tokio::pin!(idle);
            // Register before checking so a wake between the two is not lost.
            idle.as_mut().enable();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }
}

async fn run(inner: Arc<Inner>, cancel: CancellationToken, period: Duration) {
    tracing::info!(
        shards = inner.shards.len(),
        interval_secs = period.as_secs(),
        chunk_size = inner.chunk_size,
        "Started background flush task"
    );

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                inner.flush().await;
            }
            () = cancel.cancelled() => {
                tracing::info!("Cancellation received, performing final flush");
                inner.state.send_replace(FlusherState::Draining);
                inner.disable().await;
                inner.flush().await;
                break;
            }
        }
    }

    inner.state.send_replace(FlusherState::Stopped);
    tracing::info!("Background flush task stopped");
}
