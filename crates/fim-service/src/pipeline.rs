//! Debounced watcher pipeline.
//!
//! Receives [`WatchSignal`]s from the notification bridge, feeds raw events
//! into a [`DebouncedEventAggregator`], and on every drain tick hands the
//! settled paths to the coordinator as one `Targeted` command.

use crate::coordinator::Command;
use crate::watcher::WatchSignal;
use fim_core::{DebouncedEventAggregator, ReportSink, ScanWarning, WarningKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub struct PipelineSettings {
    pub debounce: Duration,
    pub tick: Duration,
}

/// Spawn the debounce pipeline.
///
/// A rescan hint from the watcher wakes the audit loop when there is one
/// (`rescan_wake`), otherwise a `Rescan` command goes straight to the
/// coordinator.
pub fn spawn_debounce_pipeline(
    mut signals: mpsc::UnboundedReceiver<WatchSignal>,
    settings: PipelineSettings,
    commands: mpsc::Sender<Command>,
    rescan_wake: Option<Arc<Notify>>,
    sink: Arc<dyn ReportSink>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut aggregator = DebouncedEventAggregator::new(settings.debounce);
        let mut tick = tokio::time::interval(settings.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut signals_open = true;

        info!(
            debounce_ms = settings.debounce.as_millis() as u64,
            tick_ms = settings.tick.as_millis() as u64,
            "watcher pipeline started"
        );

        loop {
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        debug!(discarded = aggregator.pending_len(), "watcher pipeline shutting down");
                        return;
                    }
                }
                signal = signals.recv(), if signals_open => match signal {
                    Some(WatchSignal::Event(event)) => aggregator.ingest(event),
                    Some(WatchSignal::Rescan(reason)) => {
                        warn!(%reason, "notifications may have been lost, requesting full scan");
                        let delivered = match &rescan_wake {
                            Some(wake) => {
                                wake.notify_one();
                                true
                            }
                            None => commands.send(Command::Rescan).await.is_ok(),
                        };
                        if !delivered {
                            return;
                        }
                    }
                    Some(WatchSignal::Error(message)) => {
                        sink.warning(&ScanWarning::new(
                            WarningKind::NotificationError,
                            "",
                            message,
                        ));
                    }
                    None => {
                        warn!("notification channel closed; real-time detection stopped");
                        signals_open = false;
                    }
                },
                _ = tick.tick() => {
                    let ready = aggregator.drain();
                    if !ready.is_empty() {
                        debug!(paths = ready.len(), "flushing settled paths");
                        if commands.send(Command::Targeted(ready)).await.is_err() {
                            return;
                        }
                    } else if !signals_open && aggregator.is_idle() {
                        return;
                    }
                }
            }
        }
    })
}
