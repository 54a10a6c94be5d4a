//! Inbound event ingestion
//!
//! Inbound records are flat JSON objects. The entity comes from the track
//! identity field, the category from the configured category field. Events
//! that can't be turned into an observation are dropped with a warning.

use super::controller::Controller;
use super::types::Observation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractError {
    MissingField(String),
    InvalidField(String, String),
    EmptyValue(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::MissingField(field) => write!(f, "Missing field: {}", field),
            ExtractError::InvalidField(field, reason) => {
                write!(f, "Invalid field {}: {}", field, reason)
            }
            ExtractError::EmptyValue(field) => write!(f, "Empty value for field: {}", field),
        }
    }
}

impl std::error::Error for ExtractError {}

/// One inbound record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InboundEvent {
    fields: Map<String, Value>,
}

impl InboundEvent {
    pub fn from_json(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }
}

/// Pulls (entity, category) out of inbound records
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    track_id_field: String,
    category_field: String,
}

impl FieldExtractor {
    pub fn new(track_id_field: impl Into<String>, category_field: impl Into<String>) -> Self {
        Self {
            track_id_field: track_id_field.into(),
            category_field: category_field.into(),
        }
    }

    pub fn extract(&self, event: &InboundEvent) -> Result<Observation, ExtractError> {
        let entity_id = string_field(event, &self.track_id_field)?;
        let category = string_field(event, &self.category_field)?;
        Ok(Observation::new(entity_id, category))
    }
}

fn string_field(event: &InboundEvent, name: &str) -> Result<String, ExtractError> {
    let value = event
        .field(name)
        .ok_or_else(|| ExtractError::MissingField(name.to_string()))?;

    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => return Err(ExtractError::EmptyValue(name.to_string())),
        other => {
            return Err(ExtractError::InvalidField(
                name.to_string(),
                format!("expected string, got {}", other),
            ))
        }
    };

    if text.is_empty() {
        return Err(ExtractError::EmptyValue(name.to_string()));
    }
    Ok(text)
}

/// Counters kept by the ingestion loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionStats {
    pub received: u64,
    pub applied: u64,
    pub dropped: u64,
}

/// Drain inbound events into the controller until the channel closes
pub async fn start_ingestion(
    mut rx: mpsc::Receiver<InboundEvent>,
    controller: Arc<Controller>,
    extractor: FieldExtractor,
) -> IngestionStats {
    log::info!("🚀 Starting counter ingestion");
    log::info!("   ├─ Track id field: {}", extractor.track_id_field);
    log::info!("   └─ Category field: {}", extractor.category_field);

    let mut stats = IngestionStats::default();
    let mut window_count = 0u64;
    let mut last_log_time = std::time::Instant::now();

    while let Some(event) = rx.recv().await {
        stats.received += 1;

        match extractor.extract(&event) {
            Ok(observation) => {
                controller.handle_event(&observation.entity_id, &observation.category);
                stats.applied += 1;
                window_count += 1;
            }
            Err(e) => {
                stats.dropped += 1;
                log::warn!("⚠️  Dropping inbound event: {}", e);
            }
        }

        // Log throughput every 10 seconds
        if last_log_time.elapsed().as_secs() >= 10 {
            let per_sec = window_count as f64 / last_log_time.elapsed().as_secs_f64();
            log::info!(
                "📊 Ingestion rate: {:.1} events/sec (total: {})",
                per_sec,
                stats.applied
            );
            last_log_time = std::time::Instant::now();
            window_count = 0;
        }
    }

    log::info!(
        "🛑 Ingestion channel closed ({} received, {} applied, {} dropped)",
        stats.received,
        stats.applied,
        stats.dropped
    );
    stats
}
