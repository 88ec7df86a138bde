//! The view event record and its persisted layout.

use chrono::{DateTime, Utc};

/// Table view events are written to.
pub const INCOMING_TABLE: &str = "incoming";

/// Column order used for every INSERT into [`INCOMING_TABLE`].
pub const INCOMING_FIELDS: [&str; 6] = [
    "id",
    "property",
    "property_section",
    "property_id",
    "remote_ip",
    "stamp",
];

/// One observed view, buffered in memory until the next flush.
///
/// Events are immutable once pushed; a shard owns them until drain, after
/// which the flush routine owns them until the insert completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Tracking id from the identifier generator.
    pub id: u64,
    /// Property name (human readable, a-z).
    pub property: String,
    /// Property section id.
    pub property_section: u32,
    /// Property item id.
    pub property_id: u32,
    /// Address of the client making the request. May be empty.
    pub remote_ip: String,
    /// Capture time.
    pub stamp: DateTime<Utc>,
}
