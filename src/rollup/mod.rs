use crate::config::RollupConfig;
use crate::persist::AlertStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Background roll-up loop: periodically asks the alert store to
/// refresh the current day's per-vehicle stats.
///
/// Runs off the event path on its own timer; a failed aggregation is
/// logged and retried on the next tick. Missed ticks are skipped rather
/// than bunched up after a stall.
pub async fn run_rollup_loop(store: Arc<dyn AlertStore>, config: RollupConfig) {
    if !config.enabled {
        info!("Rollup disabled, exiting loop");
        return;
    }

    info!(
        interval_minutes = config.interval_minutes,
        "Starting rollup loop"
    );

    let mut timer = interval(Duration::from_secs(config.interval_minutes * 60));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        timer.tick().await;

        match store.aggregate_daily_stats(Utc::now()).await {
            Ok(vehicles) => {
                info!(vehicles = vehicles, "Daily stats aggregated");
            }
            Err(e) => {
                error!(error = %e, "Failed to aggregate daily stats");
            }
        }
    }
}
