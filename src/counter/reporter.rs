//! Periodic snapshot reporter
//!
//! Each tick copies the store (lock held only for the copy), then hands one
//! record per category to the sink with the lock released. A failed send is
//! logged and skipped; the remaining categories and later ticks are
//! unaffected.

use super::config::MAX_REPORT_INTERVAL;
use super::sink::SnapshotSink;
use super::store::AggregateStore;
use super::types::SnapshotRecord;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

/// Outcome of one report tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub emitted: usize,
    pub failed: usize,
}

/// Emit one snapshot of every category to the sink
pub async fn report_once(
    store: &AggregateStore,
    sink: &dyn SnapshotSink,
    owner_id: &str,
) -> ReportSummary {
    let snapshot = store.snapshot(); // Lock released here
    let now = chrono::Utc::now();
    let mut summary = ReportSummary::default();

    for (category, counters) in snapshot {
        log::trace!(
            "report: {} crossed = {} on course = {}",
            category,
            counters.crossed_count,
            counters.occupancy_count
        );

        let record = SnapshotRecord::new(&category, counters, now, owner_id);
        match sink.emit(&record).await {
            Ok(()) => summary.emitted += 1,
            Err(e) => {
                summary.failed += 1;
                log::error!("❌ Failed to send snapshot for {}: {}", category, e);
            }
        }
    }

    if summary.emitted > 0 {
        if let Err(e) = sink.flush().await {
            log::error!("❌ Failed to flush {} sink: {}", sink.backend_type(), e);
        }
    }

    summary
}

/// Reporter task - emits a snapshot every `report_interval` until stopped
///
/// The first report fires one full interval after start. Setting the
/// shutdown channel to `true` ends the loop before the next tick.
/// Intervals above `MAX_REPORT_INTERVAL` are clamped to it.
pub async fn reporter_task(
    store: Arc<AggregateStore>,
    sink: Arc<dyn SnapshotSink>,
    report_interval: Duration,
    owner_id: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let report_interval = if report_interval > MAX_REPORT_INTERVAL {
        log::warn!(
            "⚠️  Report interval {}s exceeds {}s, clamping",
            report_interval.as_secs(),
            MAX_REPORT_INTERVAL.as_secs()
        );
        MAX_REPORT_INTERVAL
    } else {
        report_interval
    };

    log::info!(
        "📡 Starting snapshot reporter (interval: {}ms, sink: {})",
        report_interval.as_millis(),
        sink.backend_type()
    );

    let mut timer = interval_at(Instant::now() + report_interval, report_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = timer.tick() => {
                let summary = report_once(&store, sink.as_ref(), &owner_id).await;
                log::debug!(
                    "📊 Report tick: {} records sent, {} failed",
                    summary.emitted,
                    summary.failed
                );
            }

            changed = shutdown.changed() => {
                if changed.is_err() {
                    log::warn!("⚠️  Reporter shutdown channel closed, stopping");
                    break;
                }
                if !*shutdown.borrow() {
                    log::debug!("Reporter woke without a stop request, continuing");
                }
            }
        }
    }

    log::info!("📡 Snapshot reporter stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::sink::SinkError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Sink that records everything and fails for configured categories
    struct RecordingSink {
        records: Mutex<Vec<SnapshotRecord>>,
        fail_for: Vec<String>,
    }

    impl RecordingSink {
        fn new(fail_for: &[&str]) -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                fail_for: fail_for.iter().map(|s| s.to_string()).collect(),
            }
        }

        fn categories(&self) -> Vec<String> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.category.clone())
                .collect()
        }
    }

    #[async_trait]
    impl SnapshotSink for RecordingSink {
        async fn emit(&self, record: &SnapshotRecord) -> Result<(), SinkError> {
            if self.fail_for.contains(&record.category) {
                return Err(SinkError::Closed(format!("refusing {}", record.category)));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }

        fn backend_type(&self) -> &'static str {
            "recording"
        }
    }

    #[tokio::test]
    async fn test_report_once_isolates_failures() {
        // Test: sink failing for X still gets Y and Z in the same tick
        let store = AggregateStore::new();
        store.observe("r1", "X");
        store.observe("r2", "Y");
        store.observe("r3", "Z");
        let sink = RecordingSink::new(&["X"]);

        let summary = report_once(&store, &sink, "proc").await;

        assert_eq!(summary, ReportSummary { emitted: 2, failed: 1 });
        assert_eq!(sink.categories(), vec!["Y", "Z"]);
    }

    #[tokio::test]
    async fn test_report_once_empty_store() {
        let store = AggregateStore::new();
        let sink = RecordingSink::new(&[]);

        let summary = report_once(&store, &sink, "proc").await;

        assert_eq!(summary, ReportSummary::default());
        assert!(sink.categories().is_empty());
    }

    #[tokio::test]
    async fn test_report_once_stamps_owner() {
        let store = AggregateStore::new();
        store.observe("r1", "mat_a");
        let sink = RecordingSink::new(&[]);

        report_once(&store, &sink, "mat-counter-1").await;

        let records = sink.records.lock().unwrap();
        assert_eq!(records[0].owner_id, "mat-counter-1");
        assert_eq!(records[0].destination, "mat-counter-1:event");
        assert_eq!(records[0].crossed_count, 1);
        assert_eq!(records[0].occupancy_count, 1);
    }

    #[tokio::test]
    async fn test_reporter_task_ticks_and_stops() {
        // Test: reporter keeps ticking despite failures and exits on stop
        let store = Arc::new(AggregateStore::new());
        store.observe("r1", "X");
        store.observe("r2", "Y");
        let sink = Arc::new(RecordingSink::new(&["X"]));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(reporter_task(
            store.clone(),
            sink.clone(),
            Duration::from_millis(20),
            "proc".to_string(),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(110)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter did not stop")
            .unwrap();

        let categories = sink.categories();
        assert!(categories.len() >= 2, "expected several ticks, got {}", categories.len());
        assert!(categories.iter().all(|c| c == "Y"));

        // Nothing more arrives after stop
        let count = categories.len();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(sink.categories().len(), count);
    }

    #[tokio::test]
    async fn test_reporter_task_exits_when_channel_dropped() {
        let store = Arc::new(AggregateStore::new());
        let sink = Arc::new(RecordingSink::new(&[]));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(reporter_task(
            store,
            sink,
            Duration::from_secs(3600),
            "proc".to_string(),
            rx,
        ));
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_reporter_task_clamps_huge_interval() {
        // Test: Duration::MAX doesn't overflow the timer; task runs until stopped
        let store = Arc::new(AggregateStore::new());
        let sink = Arc::new(RecordingSink::new(&[]));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(reporter_task(
            store,
            sink,
            Duration::MAX,
            "proc".to_string(),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished(), "reporter ended before stop");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_reporter_task_ignores_wake_without_stop() {
        // Test: a `false` on the shutdown channel keeps the loop ticking
        let store = Arc::new(AggregateStore::new());
        store.observe("r1", "Y");
        let sink = Arc::new(RecordingSink::new(&[]));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(reporter_task(
            store,
            sink.clone(),
            Duration::from_millis(20),
            "proc".to_string(),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(5)).await;
        tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_millis(90)).await;

        assert!(!handle.is_finished(), "reporter stopped on a false wake");
        assert!(sink.categories().len() >= 2, "expected ticks after the wake");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter did not stop")
            .unwrap();
    }
}
