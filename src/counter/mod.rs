//! # Runner Counter
//!
//! Turns a stream of (entity, category) observations - e.g. a runner's
//! track id and the timing mat it just crossed - into two live counters
//! per category:
//!
//! - **crossed**: every observation attributed to the category
//! - **occupancy**: entities whose last observation was this category
//!
//! ## Architecture
//!
//! ```text
//! InboundEvent ──► FieldExtractor ──► Controller::handle_event()
//!                                          │
//!                                          ▼
//!                                   AggregateStore (one mutex)
//!                                     ▲            ▲
//!                     snapshot() every │            │ reset/clear daily
//!                       report_interval│            │ at reset_time
//!                                 reporter_task   reset_scheduler_task
//!                                      │
//!                                      ▼
//!                                 SnapshotSink (JSONL / SQLite)
//! ```
//!
//! The store is the only point of serialization between the three flows.
//! Sink I/O always happens on a copied snapshot, never under the lock.
//!
//! ## Module Organization
//!
//! - `types` - CategoryCounters, Observation, SnapshotRecord
//! - `store` - AggregateStore (atomic observe / snapshot / reset / clear)
//! - `config` - CounterConfig from environment variables
//! - `reporter` - periodic snapshot emission
//! - `scheduler` - daily reset / clear
//! - `sink` - downstream sink trait and backends
//! - `ingestion` - field extraction and the inbound channel loop
//! - `controller` - lifecycle state machine and host hooks

pub mod types;
pub mod store;
pub mod config;
pub mod reporter;
pub mod scheduler;
pub mod sink;
pub mod ingestion;
pub mod controller;

// Re-export commonly used types
pub use types::{CategoryCounters, Observation, SnapshotRecord};
pub use store::AggregateStore;
pub use config::{ConfigError, CounterConfig, ResetConfig, SinkBackend};
pub use reporter::{report_once, ReportSummary};
pub use scheduler::ResetAction;
pub use sink::{JsonlSnapshotSink, SinkError, SnapshotSink, SqliteSnapshotSink};
pub use ingestion::{start_ingestion, ExtractError, FieldExtractor, InboundEvent};
pub use controller::{Controller, ControllerError};
