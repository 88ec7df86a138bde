//! A single lock-protected bucket of pending events.

use std::mem;
use std::sync::{PoisonError, RwLock};

use crate::event::Event;

/// Append-only holding pen for events awaiting flush.
///
/// Every read and write of the sequence happens under the lock. Append and
/// drain cannot leave the vector half-written, so a poisoned lock is
/// recovered rather than propagated.
#[derive(Debug, Default)]
pub struct Shard {
    values: RwLock<Vec<Event>>,
}

impl Shard {
    /// Create an empty shard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event to the tail of the shard.
    pub fn append(&self, event: Event) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Take every buffered event, leaving the shard empty.
    ///
    /// The buffered vector is swapped out whole for an empty one sized to the
    /// previous round, so the lock is held for O(1) work. An append racing
    /// with a drain lands either in the returned batch or in the shard, never
    /// both.
    pub fn drain(&self) -> Vec<Event> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        let capacity = values.capacity();
        mem::replace(&mut *values, Vec::with_capacity(capacity))
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the shard holds no events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use chrono::Utc;

    fn event(id: u64) -> Event {
        Event {
            id,
            property: "news".to_owned(),
            property_section: 1,
            property_id: 1,
            remote_ip: String::new(),
            stamp: Utc::now(),
        }
    }

    #[test]
    fn append_and_drain() {
        let shard = Shard::new();
        assert_eq!(shard.len(), 0);
        assert!(shard.is_empty());

        shard.append(event(1));
        shard.append(event(2));
        shard.append(event(3));
        assert_eq!(shard.len(), 3);

        let items = shard.drain();
        assert_eq!(items.iter().map(|e| e.id).collect::<Vec<_>>(), [1, 2, 3]);
        assert_eq!(shard.len(), 0);
        assert!(shard.drain().is_empty());
    }

    #[test]
    fn drain_hands_over_buffer_and_reserves_capacity() {
        let shard = Shard::new();
        for i in 0..100 {
            shard.append(event(i));
        }
        let before = shard.values.read().unwrap().capacity();

        let items = shard.drain();

        assert_eq!(items.len(), 100);
        assert_eq!(items.capacity(), before);
        let values = shard.values.read().unwrap();
        assert!(values.is_empty());
        assert!(values.capacity() >= before);
    }

    #[test]
    fn concurrent_appends_are_all_kept() {
        let shard = Arc::new(Shard::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let shard = shard.clone();
                thread::spawn(move || {
                    for i in 0..1_000 {
                        shard.append(event(t * 1_000 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(shard.len(), 8_000);
    }

    #[test]
    fn drain_under_load_neither_loses_nor_duplicates() {
        const WRITERS: u64 = 4;
        const PER_WRITER: u64 = 5_000;

        let shard = Arc::new(Shard::new());
        let writers: Vec<_> = (0..WRITERS)
            .map(|t| {
                let shard = shard.clone();
                thread::spawn(move || {
                    for i in 0..PER_WRITER {
                        shard.append(event(t * PER_WRITER + i));
                    }
                })
            })
            .collect();

        let mut drained = Vec::new();
        while writers.iter().any(|w| !w.is_finished()) {
            drained.extend(shard.drain());
            thread::yield_now();
        }
        for writer in writers {
            writer.join().unwrap();
        }
        drained.extend(shard.drain());

        let mut ids: Vec<u64> = drained.iter().map(|e| e.id).collect();
        assert_eq!(ids.len() as u64, WRITERS * PER_WRITER);
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len() as u64, WRITERS * PER_WRITER);
    }

    #[test]
    fn drain_preserves_per_writer_order() {
        let shard = Arc::new(Shard::new());
        let writer = {
            let shard = shard.clone();
            thread::spawn(move || {
                for i in 0..10_000 {
                    shard.append(event(i));
                }
            })
        };

        let mut drained = Vec::new();
        while !writer.is_finished() {
            drained.extend(shard.drain());
        }
        writer.join().unwrap();
        drained.extend(shard.drain());

        assert!(drained.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(drained.len(), 10_000);
    }
}
