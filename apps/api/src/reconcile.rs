use std::time::Duration;

use dlsgate_application::GrantManager;
use tokio::time::MissedTickBehavior;
use tracing::warn;

/// Sweeps the ledger for active grants that lost their timer or were never
/// confirmed by the permission store.
pub fn spawn_reconcile_loop(grant_manager: GrantManager, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately and startup recovery already ran.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(error) = grant_manager.reconcile().await {
                warn!(error = %error, "reconciliation sweep failed");
            }
        }
    });
}
