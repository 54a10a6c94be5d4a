//! Daily reset scheduler
//!
//! Fires once per day at the configured local time of day. The delay to the
//! next fire is recomputed from the wall clock after every fire, so a DST
//! change shifts at most one fire by the size of the jump.

use super::config::ResetConfig;
use super::store::AggregateStore;
use chrono::{Duration as ChronoDuration, NaiveDateTime, NaiveTime};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;

/// What the scheduler does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetAction {
    /// Zero counters, keep categories and entity tracks
    ResetCounters,
    /// Drop everything (subsumes ResetCounters)
    Clear,
}

impl ResetAction {
    /// Effective action for a reset configuration; clear wins over reset
    pub fn for_config(config: &ResetConfig) -> Option<Self> {
        if config.clear_cache {
            Some(ResetAction::Clear)
        } else if config.auto_reset {
            Some(ResetAction::ResetCounters)
        } else {
            None
        }
    }

    pub fn apply(self, store: &AggregateStore) {
        match self {
            ResetAction::ResetCounters => store.reset_counters(),
            ResetAction::Clear => store.clear(),
        }
    }
}

/// Time until the next occurrence of `at`, at or after `now`
///
/// If `at` is exactly `now` the delay is zero; if it already passed today
/// the next occurrence is tomorrow.
pub fn duration_until_next(now: NaiveDateTime, at: NaiveTime) -> Duration {
    let today = now.date().and_time(at);
    let next = if today >= now {
        today
    } else {
        today + ChronoDuration::days(1)
    };

    (next - now).to_std().unwrap_or(Duration::ZERO)
}

fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Scheduler task - applies `action` once per day at `reset_time`
pub async fn reset_scheduler_task(
    store: Arc<AggregateStore>,
    reset_time: NaiveTime,
    action: ResetAction,
    mut shutdown: watch::Receiver<bool>,
) {
    log::info!("⏰ Starting reset scheduler (daily at {}, action: {:?})", reset_time, action);

    loop {
        if *shutdown.borrow() {
            break;
        }

        let delay = duration_until_next(local_now(), reset_time);
        log::debug!("⏰ Next {:?} in {}s", action, delay.as_secs());

        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                log::info!("⏰ Daily {:?} firing", action);
                action.apply(&store);

                // Step past the fire time so a zero delay can't fire twice
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            changed = shutdown.changed() => {
                if changed.is_err() {
                    log::warn!("⚠️  Scheduler shutdown channel closed, stopping");
                    break;
                }
                if !*shutdown.borrow() {
                    log::debug!("Reset scheduler woke without a stop request, continuing");
                }
            }
        }
    }

    log::info!("⏰ Reset scheduler stopped");
}
