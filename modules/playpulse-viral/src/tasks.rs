//! Periodic driver for the viral subsystem: a scan every 15 minutes, an
//! expiry sweep once a day. Replaces an external task broker with two plain
//! interval loops; the singleton guarantee comes from the task lock, not
//! from the scheduler.

use std::time::Duration;

use tracing::{error, info};

use playpulse_common::Result;

use crate::detector::{OutlierDetector, ScanOutcome};

pub const SCAN_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// One scan pass. Lock contention is a clean skip, not an error.
pub async fn scan_once(detector: &OutlierDetector) -> Result<ScanOutcome> {
    detector.run_scan().await
}

/// One expiry sweep.
pub async fn cleanup_once(detector: &OutlierDetector) -> Result<u64> {
    detector.cleanup_expired().await
}

/// Drive both periodic tasks forever. Errors are logged and the loops keep
/// going; a failing scan never takes the cleanup down with it.
pub async fn run_periodic(detector: OutlierDetector) {
    let mut scan_timer = tokio::time::interval(SCAN_INTERVAL);
    let mut cleanup_timer = tokio::time::interval(CLEANUP_INTERVAL);

    info!(
        scan_secs = SCAN_INTERVAL.as_secs(),
        cleanup_secs = CLEANUP_INTERVAL.as_secs(),
        "Starting periodic viral tasks"
    );

    loop {
        tokio::select! {
            _ = scan_timer.tick() => {
                match scan_once(&detector).await {
                    Ok(ScanOutcome::Skipped) => info!("Scan skipped, lock held elsewhere"),
                    Ok(ScanOutcome::Completed { outliers_found, .. }) => {
                        info!(outliers_found, "Periodic scan finished");
                    }
                    Err(e) => error!(error = %e, "Periodic scan failed"),
                }
            }
            _ = cleanup_timer.tick() => {
                if let Err(e) = cleanup_once(&detector).await {
                    error!(error = %e, "Periodic cleanup failed");
                }
            }
        }
    }
}
