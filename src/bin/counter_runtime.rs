//! Counter Runtime - standalone host for the runner counter
//!
//! - Loads and validates configuration from the environment
//! - Creates the snapshot sink (JSONL or SQLite)
//! - Starts the controller (reporter + optional daily reset scheduler)
//! - Reads inbound JSON records from stdin, one per line
//!
//! Usage:
//!   cargo run --release --bin counter_runtime -- [--backend jsonl|sqlite] < events.jsonl
//!
//! Environment variables:
//!   REPORT_INTERVAL_SECS - Report interval in seconds (default: 10)
//!   CATEGORY_FIELD - Inbound category field (default: MatId)
//!   TRACK_ID_FIELD - Inbound track id field (default: TRACK_ID)
//!   AUTO_RESET_COUNTER - Zero counters daily (default: false)
//!   RESET_TIME - Daily reset time HH:MM:SS (default: 00:00:00)
//!   CLEAR_CACHE - Clear all state daily (default: true)
//!   CLEAR_CACHE_ON_START - Clear state on start (default: false)
//!   COUNTER_SINK_BACKEND - jsonl or sqlite (default: jsonl)
//!   SNAPSHOT_OUTPUT_PATH / COUNTER_DB_PATH - Sink locations

use dotenv::dotenv;
use log::{error, info, warn};
use runner_counter::counter::{
    config::{CounterConfig, SinkBackend},
    controller::Controller,
    ingestion::{start_ingestion, FieldExtractor, InboundEvent},
    sink::{JsonlSnapshotSink, SnapshotSink, SqliteSnapshotSink},
};
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Runner Counter Runtime");

    let mut config = match CounterConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ {}", e);
            return Err(e.into());
        }
    };

    let args: Vec<String> = env::args().collect();
    if let Some(backend) = SinkBackend::from_args(&args) {
        config.sink_backend = backend?;
    }

    info!("   ├─ Processor: {}", config.processor_id);
    info!("   ├─ Report interval: {}s", config.report_interval.as_secs());
    info!("   ├─ Category field: {}", config.category_field);
    info!(
        "   ├─ Daily reset: {} (auto reset: {}, clear cache: {})",
        config.reset.reset_time, config.reset.auto_reset, config.reset.clear_cache
    );
    info!("   └─ Clear cache on start: {}", config.reset.clear_cache_on_start);

    let sink: Arc<dyn SnapshotSink> = match config.sink_backend {
        SinkBackend::Jsonl => Arc::new(JsonlSnapshotSink::new(&config.output_path)?),
        SinkBackend::Sqlite => Arc::new(SqliteSnapshotSink::new(&config.db_path)?),
    };
    info!("✅ {} sink ready", sink.backend_type());

    let extractor = FieldExtractor::new(&config.track_id_field, &config.category_field);
    let (tx, rx) = mpsc::channel::<InboundEvent>(config.channel_buffer);

    let controller = Arc::new(Controller::new(config, sink)?);
    controller.on_start()?;

    let controller_ingestion = controller.clone();
    let ingestion = tokio::spawn(async move {
        start_ingestion(rx, controller_ingestion, extractor).await
    });

    // Reader: stdin JSONL -> channel
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match InboundEvent::from_json(&line) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                break; // Ingestion stopped
                            }
                        }
                        Err(e) => warn!("⚠️  Skipping malformed input line: {}", e),
                    }
                }
                Ok(None) => {
                    info!("📭 End of input");
                    break;
                }
                Err(e) => {
                    error!("❌ Failed to read input: {}", e);
                    break;
                }
            }
        }
    });

    let reader_abort = reader.abort_handle();
    info!("🔄 Reading events from stdin, press CTRL+C to shutdown");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
                Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
            }
            reader_abort.abort();
        }
        _ = reader => {}
    }

    // Reader is gone, so the channel closes once buffered events drain
    match ingestion.await {
        Ok(stats) => info!(
            "📊 Ingested {} events ({} dropped)",
            stats.applied, stats.dropped
        ),
        Err(e) => error!("❌ Ingestion task failed: {}", e),
    }

    controller.on_shutdown().await;

    // Final snapshot so short inputs still produce output
    let summary = controller.report_now().await;
    info!("📤 Final report: {} records sent, {} failed", summary.emitted, summary.failed);
    info!("{}", controller.status_details());

    info!("✅ Counter runtime stopped");
    Ok(())
}
