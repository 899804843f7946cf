use std::time::Duration;
use chrono::Utc;
use tokio::task::JoinHandle;

use crate::services::subscription::{SubscriptionManager, SweepReport};

/// Runs one lifecycle pass: renewals, abandoned pending records, and
/// past-due subscriptions whose grace period ran out.
pub async fn run_sweep(manager: &SubscriptionManager) -> SweepReport {
    log::debug!("Running subscription lifecycle sweep");
    let report = manager.sweep(Utc::now()).await;

    if report.errors > 0 {
        log::warn!("Lifecycle sweep finished with errors: {:?}", report);
    } else if report != SweepReport::default() {
        log::info!(
            "Lifecycle sweep: renewed={} past_due={} refunded={} reclaimed={} activated={} expired={}",
            report.renewed, report.moved_past_due, report.refunded, report.reclaimed, report.activated, report.expired
        );
    }
    report
}

pub fn start_sweep_task(manager: SubscriptionManager, every: Duration) -> JoinHandle<()> {
    log::info!("Lifecycle sweep scheduled every {}s", every.as_secs());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            run_sweep(&manager).await;
        }
    })
}
