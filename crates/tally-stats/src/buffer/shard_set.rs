//! Fixed-size fan-out of shards with round-robin selection.

use std::sync::atomic::{AtomicU32, Ordering};

use super::Shard;
use crate::error::{StatsError, StatsResult};

/// A power-of-two sized collection of [`Shard`]s.
///
/// Writers are spread round-robin rather than by event identity, which keeps
/// the load even regardless of input skew. No ordering exists across shards.
#[derive(Debug)]
pub struct ShardSet {
    shards: Box<[Shard]>,
    counter: AtomicU32,
    mask: u32,
}

impl ShardSet {
    /// Allocate `size` shards.
    ///
    /// Returns a configuration error unless `size` is a non-zero power of two
    /// that fits the rotating counter.
    pub fn new(size: usize) -> StatsResult<Self> {
        if !size.is_power_of_two() {
            return Err(StatsError::Config(format!(
                "shard count must be a non-zero power of two, got {size}"
            )));
        }
        let mask = u32::try_from(size - 1)
            .map_err(|_| StatsError::Config(format!("shard count {size} is too large")))?;

        Ok(Self {
            shards: (0..size).map(|_| Shard::new()).collect(),
            counter: AtomicU32::new(0),
            mask,
        })
    }

    /// Pick the shard for the next write.
    ///
    /// The counter wraps on overflow; with a power-of-two size the masked
    /// index stays evenly distributed across the wrap.
    pub fn select_for_write(&self) -> &Shard {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) & self.mask;
        #[allow(clippy::as_conversions)]
        &self.shards[index as usize]
    }

    /// All shards, in index order.
    pub fn all(&self) -> &[Shard] {
        &self.shards
    }

    /// Number of shards.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Always false; a shard set holds at least one shard.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Total number of buffered events across all shards.
    pub fn buffered(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }
}
