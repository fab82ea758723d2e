// talktome-core/src/tasks/usage_retention.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

use crate::Error;
use crate::quota::QuotaEngine;

/// Deletes usage records that fell out of the quota window as of `now`.
pub async fn run_usage_prune(engine: &QuotaEngine, now: DateTime<Utc>) -> Result<u64, Error> {
    let cutoff = now - engine.policy().window;
    let deleted = engine.prune_older_than(cutoff).await?;
    info!("Deleted {} token usage records older than {}", deleted, cutoff);
    Ok(deleted)
}

/// Spawns a background task that prunes the ledger every `every`. The first
/// run happens right away, so startup always prunes once. Failures are
/// logged and the next tick tries again.
pub fn spawn_usage_prune_task(engine: Arc<QuotaEngine>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = run_usage_prune(&engine, Utc::now()).await {
                error!("Token usage pruning failed: {:?}", e);
            }
        }
    })
}
