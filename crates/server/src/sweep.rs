//! Background expiry of abandoned upload sessions.

use crate::upload::UploadManager;
use std::sync::Arc;
use std::time::Duration;

/// Spawn a task that discards sessions idle for longer than the configured
/// TTL, once per `interval`.
pub fn spawn_session_sweeper(
    uploads: Arc<UploadManager>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match uploads.sweep_expired().await {
                Ok(0) => {}
                Ok(removed) => {
                    tracing::info!(removed, "Session sweeper discarded expired sessions");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Session sweep failed");
                }
            }
        }
    })
}
