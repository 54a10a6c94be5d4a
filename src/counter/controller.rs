//! Controller - lifecycle glue for the runner counter
//!
//! Owns the configuration, the aggregate store and the background tasks.
//! The lifecycle is an explicit `Stopped -> Running -> Stopped` state
//! machine behind a mutex, so at most one reporter and one reset scheduler
//! are alive at any time no matter how often the host calls the hooks.

use super::config::{ConfigError, CounterConfig};
use super::reporter::{report_once, reporter_task, ReportSummary};
use super::scheduler::{reset_scheduler_task, ResetAction};
use super::sink::SnapshotSink;
use super::store::AggregateStore;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum ControllerError {
    /// `start()` was called without a Tokio runtime to spawn tasks on
    NoRuntime(String),
}

impl std::fmt::Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerError::NoRuntime(e) => write!(f, "No Tokio runtime available: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

/// Background tasks of one running cycle
struct RunningTasks {
    shutdown_tx: watch::Sender<bool>,
    reporter: JoinHandle<()>,
    scheduler: Option<JoinHandle<()>>,
}

impl RunningTasks {
    fn signal_stop(&self) {
        // Receivers may already be gone if a task ended on its own
        let _ = self.shutdown_tx.send(true);
    }

    async fn join(self) {
        if let Err(e) = self.reporter.await {
            log::error!("❌ Reporter task ended abnormally: {}", e);
        }
        if let Some(scheduler) = self.scheduler {
            if let Err(e) = scheduler.await {
                log::error!("❌ Reset scheduler task ended abnormally: {}", e);
            }
        }
    }
}

enum Lifecycle {
    Stopped,
    Running(RunningTasks),
}

pub struct Controller {
    config: CounterConfig,
    store: Arc<AggregateStore>,
    sink: Arc<dyn SnapshotSink>,
    lifecycle: Mutex<Lifecycle>,
}

impl Controller {
    /// Create a controller; fails if the configuration doesn't validate
    pub fn new(config: CounterConfig, sink: Arc<dyn SnapshotSink>) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            config,
            store: Arc::new(AggregateStore::new()),
            sink,
            lifecycle: Mutex::new(Lifecycle::Stopped),
        })
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|poisoned| {
            log::warn!("⚠️  Controller lifecycle lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<AggregateStore> {
        self.store.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle(), Lifecycle::Running(_))
    }

    /// Start the reporter (and the reset scheduler if configured)
    ///
    /// Fails without touching any state when called outside a Tokio
    /// runtime. A second call while running is a no-op.
    pub fn start(&self) -> Result<(), ControllerError> {
        let mut lifecycle = self.lifecycle();
        if matches!(*lifecycle, Lifecycle::Running(_)) {
            log::debug!("Counter already running, ignoring start");
            return Ok(());
        }

        let runtime = Handle::try_current().map_err(|e| {
            log::error!("❌ Cannot start runner counter: {}", e);
            ControllerError::NoRuntime(e.to_string())
        })?;

        if self.config.reset.clear_cache_on_start {
            self.store.clear();
            log::info!(
                "🧹 Clear cache on start -- tracks: {}, categories: {}",
                self.store.tracked_entity_count(),
                self.store.category_count()
            );
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = ResetAction::for_config(&self.config.reset).map(|action| {
            runtime.spawn(reset_scheduler_task(
                self.store.clone(),
                self.config.reset.reset_time,
                action,
                shutdown_rx.clone(),
            ))
        });

        let reporter = runtime.spawn(reporter_task(
            self.store.clone(),
            self.sink.clone(),
            self.config.report_interval,
            self.config.processor_id.clone(),
            shutdown_rx,
        ));

        *lifecycle = Lifecycle::Running(RunningTasks {
            shutdown_tx,
            reporter,
            scheduler,
        });

        log::info!("✅ Runner counter {} started", self.config.processor_id);
        Ok(())
    }

    fn take_running(&self) -> Option<RunningTasks> {
        let mut lifecycle = self.lifecycle();
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running(tasks) => Some(tasks),
            Lifecycle::Stopped => None,
        }
    }

    /// Signal the background tasks to stop; safe to call at any time
    pub fn stop(&self) {
        match self.take_running() {
            Some(tasks) => {
                tasks.signal_stop();
                log::info!("🛑 Runner counter {} stopping", self.config.processor_id);
            }
            None => log::debug!("Counter not running, ignoring stop"),
        }
    }

    /// Stop and wait for the background tasks to finish
    pub async fn shutdown(&self) {
        if let Some(tasks) = self.take_running() {
            tasks.signal_stop();
            tasks.join().await;
            log::info!("🛑 Runner counter {} stopped", self.config.processor_id);
        }
    }

    /// Apply one inbound observation; output only flows via the reporter
    pub fn handle_event(&self, entity_id: &str, category: &str) {
        self.store.observe(entity_id, category);
    }

    /// Emit one snapshot immediately, outside the reporter schedule
    pub async fn report_now(&self) -> ReportSummary {
        report_once(&self.store, self.sink.as_ref(), &self.config.processor_id).await
    }

    // Host lifecycle hooks

    pub fn on_start(&self) -> Result<(), ControllerError> {
        self.start()
    }

    pub fn on_stop(&self) {
        self.stop();
    }

    pub async fn on_shutdown(&self) {
        self.shutdown().await;
    }

    /// Short human-readable status for the host
    pub fn status_details(&self) -> String {
        let state = if self.is_running() { "running" } else { "stopped" };
        format!(
            "{} ({} sink): {} categories, {} tracked entities",
            state,
            self.sink.backend_type(),
            self.store.category_count(),
            self.store.tracked_entity_count()
        )
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop();
    }
}
