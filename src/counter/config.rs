//! Counter configuration from environment variables
//!
//! Loaded once at startup and read-only afterwards. Malformed values are
//! rejected instead of silently replaced by defaults, and `validate()`
//! collects every problem before the processor is allowed to start.

use chrono::NaiveTime;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Longest accepted report interval (one day)
pub const MAX_REPORT_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidValue(String),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
            ConfigError::Validation(errors) => {
                writeln!(f, "Counter configuration is invalid:")?;
                for error in errors {
                    writeln!(f, "  - {}", error)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Downstream sink selection
#[derive(Debug, Clone, PartialEq)]
pub enum SinkBackend {
    Jsonl,
    Sqlite,
}

impl SinkBackend {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_lowercase().as_str() {
            "jsonl" => Ok(SinkBackend::Jsonl),
            "sqlite" => Ok(SinkBackend::Sqlite),
            other => Err(ConfigError::InvalidValue(format!(
                "sink backend must be 'jsonl' or 'sqlite', got '{}'",
                other
            ))),
        }
    }

    /// `--backend <jsonl|sqlite>` from the command line, if present
    pub fn from_args(args: &[String]) -> Option<Result<Self, ConfigError>> {
        let idx = args.iter().position(|a| a == "--backend")?;
        Some(match args.get(idx + 1) {
            Some(value) => Self::parse(value),
            None => Err(ConfigError::InvalidValue("--backend needs a value".to_string())),
        })
    }
}

/// Daily reset / clear behaviour
#[derive(Debug, Clone, PartialEq)]
pub struct ResetConfig {
    /// Zero all counters at `reset_time`
    pub auto_reset: bool,

    /// Wall-clock time of day (local) at which the daily task fires
    pub reset_time: NaiveTime,

    /// Drop all categories and entity tracks at `reset_time`
    pub clear_cache: bool,

    /// Drop all state when the processor starts
    pub clear_cache_on_start: bool,
}

impl ResetConfig {
    /// Whether the daily scheduler has anything to do
    pub fn schedule_enabled(&self) -> bool {
        self.auto_reset || self.clear_cache
    }
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            auto_reset: false,
            reset_time: NaiveTime::MIN,
            clear_cache: true,
            clear_cache_on_start: false,
        }
    }
}

/// Configuration for the counter runtime
#[derive(Debug, Clone)]
pub struct CounterConfig {
    /// How often the reporter emits a snapshot
    pub report_interval: Duration,

    /// Inbound field holding the category (e.g. the mat id)
    pub category_field: String,

    /// Inbound field holding the entity's track id
    pub track_id_field: String,

    pub reset: ResetConfig,

    /// Processor instance id, stamped on every output record
    pub processor_id: String,

    pub sink_backend: SinkBackend,

    /// JSONL output file (jsonl backend)
    pub output_path: PathBuf,

    /// SQLite database file (sqlite backend)
    pub db_path: PathBuf,

    /// Inbound channel capacity (events)
    pub channel_buffer: usize,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            report_interval: Duration::from_secs(10),
            category_field: "MatId".to_string(),
            track_id_field: "TRACK_ID".to_string(),
            reset: ResetConfig::default(),
            processor_id: "runner-counter".to_string(),
            sink_backend: SinkBackend::Jsonl,
            output_path: PathBuf::from("streams/runner_counter/snapshots.jsonl"),
            db_path: PathBuf::from("data/runner_counter.db"),
            channel_buffer: 10_000,
        }
    }
}

impl CounterConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `REPORT_INTERVAL_SECS` (default: 10, must be > 0)
    /// - `CATEGORY_FIELD` (default: MatId)
    /// - `TRACK_ID_FIELD` (default: TRACK_ID)
    /// - `AUTO_RESET_COUNTER` (default: false)
    /// - `RESET_TIME` (default: 00:00:00)
    /// - `CLEAR_CACHE` (default: true)
    /// - `CLEAR_CACHE_ON_START` (default: false)
    /// - `PROCESSOR_ID` (default: runner-counter)
    /// - `COUNTER_SINK_BACKEND` (default: jsonl)
    /// - `SNAPSHOT_OUTPUT_PATH` (default: streams/runner_counter/snapshots.jsonl)
    /// - `COUNTER_DB_PATH` (default: data/runner_counter.db)
    /// - `INGEST_CHANNEL_BUFFER` (default: 10000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let report_interval_secs: i64 = parse_var("REPORT_INTERVAL_SECS", 10)?;
        if report_interval_secs <= 0 {
            return Err(ConfigError::Validation(vec![format!(
                "REPORT_INTERVAL_SECS must be greater than 0, got {}",
                report_interval_secs
            )]));
        }

        let reset_time = match env::var("RESET_TIME") {
            Ok(value) => parse_reset_time(&value)?,
            Err(_) => defaults.reset.reset_time,
        };

        let sink_backend = match env::var("COUNTER_SINK_BACKEND") {
            Ok(value) => SinkBackend::parse(&value)?,
            Err(_) => defaults.sink_backend,
        };

        let config = Self {
            report_interval: Duration::from_secs(report_interval_secs as u64),
            category_field: env::var("CATEGORY_FIELD").unwrap_or(defaults.category_field),
            track_id_field: env::var("TRACK_ID_FIELD").unwrap_or(defaults.track_id_field),
            reset: ResetConfig {
                auto_reset: parse_bool_var("AUTO_RESET_COUNTER", defaults.reset.auto_reset)?,
                reset_time,
                clear_cache: parse_bool_var("CLEAR_CACHE", defaults.reset.clear_cache)?,
                clear_cache_on_start: parse_bool_var(
                    "CLEAR_CACHE_ON_START",
                    defaults.reset.clear_cache_on_start,
                )?,
            },
            processor_id: env::var("PROCESSOR_ID").unwrap_or(defaults.processor_id),
            sink_backend,
            output_path: env::var("SNAPSHOT_OUTPUT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_path),
            db_path: env::var("COUNTER_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            channel_buffer: parse_var("INGEST_CHANNEL_BUFFER", defaults.channel_buffer)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration before the processor becomes active
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.report_interval.is_zero() {
            errors.push("report interval must be greater than 0 seconds".to_string());
        } else if self.report_interval > MAX_REPORT_INTERVAL {
            errors.push(format!(
                "report interval must be at most {}s, got {}s",
                MAX_REPORT_INTERVAL.as_secs(),
                self.report_interval.as_secs()
            ));
        }
        if self.category_field.trim().is_empty() {
            errors.push("category field name cannot be empty".to_string());
        }
        if self.track_id_field.trim().is_empty() {
            errors.push("track id field name cannot be empty".to_string());
        }
        if self.processor_id.trim().is_empty() {
            errors.push("processor id cannot be empty".to_string());
        }
        if self.channel_buffer == 0 {
            errors.push("ingest channel buffer must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Parse a `HH:MM:SS` (24h) reset time
pub fn parse_reset_time(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M:%S").map_err(|e| {
        ConfigError::InvalidValue(format!(
            "RESET_TIME must be HH:MM:SS, got '{}' ({})",
            value, e
        ))
    })
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(format!("{} has an invalid value: '{}'", name, value))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_bool_var(name: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().to_lowercase().parse::<bool>().map_err(|_| {
            ConfigError::InvalidValue(format!("{} must be true or false, got '{}'", name, value))
        }),
        Err(_) => Ok(default),
    }
}
