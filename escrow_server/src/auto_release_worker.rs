use std::time::Duration;

use escrow_engine::{EscrowApi, SqliteDatabase};
use log::*;
use tokio::task::JoinHandle;

/// Starts the auto-release worker. Do not await the returned JoinHandle, as it will run indefinitely.
///
/// Every `interval`, escrows whose dispute window has closed are released to their suppliers. A failed sweep is
/// logged and retried on the next tick.
pub fn start_auto_release_worker(api: EscrowApi<SqliteDatabase>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🕰️ Auto-release worker started. Sweeping every {}s", interval.as_secs());
        loop {
            timer.tick().await;
            debug!("🕰️ Running auto-release job");
            match api.process_auto_releases().await {
                Ok(0) => trace!("🕰️ No escrows were due for release"),
                Ok(released) => info!("🕰️ {released} escrows auto-released"),
                Err(e) => error!("🕰️ Error running auto-release job: {e}"),
            }
        }
    })
}
