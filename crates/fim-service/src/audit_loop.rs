//! Periodic integrity audit loop.
//!
//! Asks the coordinator for a full scan every `scan_interval`, starting
//! immediately. This catches anything the watcher missed (restarts, event
//! overflow, platforms without notifications).

use crate::coordinator::Command;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Handle returned to the caller so it can request an immediate scan.
pub struct AuditLoopHandle {
    /// Wakes the loop early; the regular schedule restarts from there.
    pub wake: Arc<Notify>,
}

pub fn spawn_audit_loop(
    interval: Duration,
    commands: mpsc::Sender<Command>,
    mut shutdown: watch::Receiver<bool>,
) -> (JoinHandle<()>, AuditLoopHandle) {
    let wake = Arc::new(Notify::new());
    let wake_clone = wake.clone();

    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "audit loop started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wake_clone.notified() => {
                    debug!("audit loop woken early");
                    ticker.reset();
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        info!("audit loop shutting down");
                        return;
                    }
                    continue;
                }
            }

            if *shutdown.borrow() {
                return;
            }
            if commands.send(Command::Rescan).await.is_err() {
                debug!("coordinator gone, audit loop exiting");
                return;
            }
        }
    });

    (handle, AuditLoopHandle { wake })
}
