//! Distributed, roughly time-ordered 64-bit identifiers.
//!
//! Identifiers follow the Sonyflake layout:
//!
//! ```text
//! | 1 bit unused | 39 bits elapsed time (10ms units) | 8 bits sequence | 16 bits machine id |
//! ```
//!
//! The [`IdGenerator`] trait is the seam consumers depend on, so tests can swap
//! in a deterministic generator.

#![forbid(unsafe_code)]

mod error;
mod sonyflake;

pub use error::IdError;
pub use sonyflake::{
    decompose, Settings, Sonyflake, BIT_LEN_MACHINE_ID, BIT_LEN_SEQUENCE, BIT_LEN_TIME,
};

/// Source of unique identifiers.
pub trait IdGenerator: Send + Sync {
    /// Produce the next identifier.
    fn next_id(&self) -> Result<u64, IdError>;
}
