use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use wisp_db::Store;

/// Periodic soft-delete of stories past their expiry.
///
/// The first tick fires immediately, so expired rows left over from downtime
/// are reaped on startup. The loop keeps no state between iterations; a
/// failed sweep just waits for the next tick, and extra instances are safe
/// because the delete is idempotent by predicate.
pub async fn run_expiration_loop<S: Store + 'static>(store: Arc<S>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    info!(period_secs = period.as_secs(), "expiration worker started");

    loop {
        interval.tick().await;

        let started = Instant::now();
        let store = store.clone();
        let swept = tokio::task::spawn_blocking(move || store.soft_delete_expired(Utc::now())).await;

        match swept {
            Ok(Ok(rows)) => info!(
                rows,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "expired stories swept"
            ),
            Ok(Err(e)) => warn!("expiration sweep failed: {e}"),
            Err(e) => warn!("expiration sweep task failed: {e}"),
        }
    }
}
