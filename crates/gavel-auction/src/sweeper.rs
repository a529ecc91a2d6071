use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::core::AuctionCore;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodically finalizes overdue auctions. Runs until the process exits;
/// a failed pass is logged and retried on the next tick.
pub async fn run(core: Arc<AuctionCore>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match core.sweep_once().await {
            Ok(0) => {}
            Ok(n) => debug!(finalized = n, "expiration sweep complete"),
            Err(e) => warn!(error = %e, "expiration sweep failed"),
        }
    }
}
