//! The Push operation: request validation, id assignment, and buffering.

pub mod http;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tally_id::IdGenerator;

use crate::buffer::Flusher;
use crate::config::ValidationConfig;
use crate::error::{StatsError, StatsResult};
use crate::event::Event;

/// A single observed view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushRequest {
    /// Property name, e.g. `news`.
    pub property: String,
    /// Property section id.
    pub section: u32,
    /// Property item id.
    pub id: u32,
}

/// Empty acknowledgement; the event was accepted into memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {}

/// Validates Push requests and feeds accepted events to the [`Flusher`].
pub struct StatsService {
    flusher: Arc<Flusher>,
    ids: Arc<dyn IdGenerator>,
    allowed_properties: HashSet<String>,
}

impl fmt::Debug for StatsService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsService")
            .field("flusher", &self.flusher)
            .field("allowed_properties", &self.allowed_properties)
            .finish_non_exhaustive()
    }
}

impl StatsService {
    /// Create a service over an existing flusher and id generator.
    pub fn new(
        flusher: Arc<Flusher>,
        ids: Arc<dyn IdGenerator>,
        validation: &ValidationConfig,
    ) -> Self {
        Self {
            flusher,
            ids,
            allowed_properties: validation.allowed_properties.iter().cloned().collect(),
        }
    }

    /// The flusher accepted events are pushed to.
    pub fn flusher(&self) -> &Flusher {
        &self.flusher
    }

    /// Check a request, reporting the first problem found.
    pub fn validate(&self, request: &PushRequest) -> StatsResult<()> {
        if request.property.is_empty() {
            return Err(StatsError::invalid("missing property"));
        }
        if !self.allowed_properties.contains(&request.property) {
            return Err(StatsError::invalid("invalid property"));
        }
        if request.id < 1 {
            return Err(StatsError::invalid("missing id"));
        }
        if request.section < 1 {
            return Err(StatsError::invalid("missing section"));
        }
        Ok(())
    }

    /// Record one view made from `remote_ip`.
    ///
    /// On success the event is buffered, not yet persisted.
    pub fn push(&self, request: PushRequest, remote_ip: String) -> StatsResult<PushResponse> {
        self.validate(&request)?;

        let event = Event {
            id: self.ids.next_id()?,
            property: request.property,
            property_section: request.section,
            property_id: request.id,
            remote_ip,
            stamp: Utc::now(),
        };
        tracing::trace!(id = event.id, property = %event.property, "Accepted view");

        self.flusher.push(event)?;
        Ok(PushResponse {})
    }
}
