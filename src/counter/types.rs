//! Core data types for the runner counter
//!
//! `CategoryCounters` is the per-category pair kept by the store,
//! `Observation` is one (entity, category) sighting extracted from an
//! inbound record, and `SnapshotRecord` is what the reporter hands downstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters tracked per category (e.g. per timing mat)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounters {
    /// Every observation ever attributed to this category since the last reset
    pub crossed_count: u64,

    /// Entities currently associated with this category
    pub occupancy_count: i64,
}

impl CategoryCounters {
    pub fn new(crossed_count: u64, occupancy_count: i64) -> Self {
        Self {
            crossed_count,
            occupancy_count,
        }
    }
}

/// One (entity, category) sighting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub entity_id: String,
    pub category: String,
}

impl Observation {
    pub fn new(entity_id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            category: category.into(),
        }
    }
}

/// Record emitted downstream for one category on each report tick
///
/// Field names follow the `RunnerCounter` event definition so existing
/// consumers keep working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    #[serde(rename = "MatId")]
    pub category: String,

    #[serde(rename = "MatCrossedCount")]
    pub crossed_count: u64,

    #[serde(rename = "OnCourseCount")]
    pub occupancy_count: i64,

    #[serde(rename = "LastReceived")]
    pub timestamp: DateTime<Utc>,

    /// Event type property (always "event")
    #[serde(rename = "type")]
    pub event_type: String,

    /// Id of the processor instance that produced the record
    #[serde(rename = "ownerId")]
    pub owner_id: String,

    /// Destination the record is published to (`<owner_id>:event`)
    pub destination: String,
}

impl SnapshotRecord {
    pub fn new(
        category: &str,
        counters: CategoryCounters,
        timestamp: DateTime<Utc>,
        owner_id: &str,
    ) -> Self {
        Self {
            category: category.to_string(),
            crossed_count: counters.crossed_count,
            occupancy_count: counters.occupancy_count,
            timestamp,
            event_type: "event".to_string(),
            owner_id: owner_id.to_string(),
            destination: format!("{}:event", owner_id),
        }
    }
}
