//! Continuous monitoring: real-time and periodic branches feeding one
//! coordinator.

use crate::audit_loop::spawn_audit_loop;
use crate::coordinator::{Command, Coordinator};
use crate::pipeline::{spawn_debounce_pipeline, PipelineSettings};
use crate::watcher::WatchSignal;
use anyhow::{anyhow, Result};
use fim_core::{Baseline, FimError, MonitorConfig, ReportSink, ScanWarning, WarningKind};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum WatchMode {
    #[value(name = "realtime")]
    RealtimeOnly,
    #[value(name = "polling")]
    PollOnly,
    #[default]
    #[value(name = "both")]
    Both,
}

/// Whether OS notifications could be set up, decided before the loop starts.
#[derive(Debug)]
pub enum Notifications {
    Available(mpsc::UnboundedReceiver<WatchSignal>),
    Unavailable(String),
}

pub struct WatchLoop {
    config: MonitorConfig,
    mode: WatchMode,
    sink: Arc<dyn ReportSink>,
}

impl WatchLoop {
    pub fn new(config: MonitorConfig, mode: WatchMode, sink: Arc<dyn ReportSink>) -> Self {
        Self { config, mode, sink }
    }

    /// Start every task the mode needs and return at once.
    pub fn start(self, baseline: Baseline, notifications: Notifications) -> Result<WatchHandle> {
        baseline.ensure_algorithm(self.config.hash_algorithm)?;

        let (realtime, polling) = match (self.mode, notifications) {
            (WatchMode::RealtimeOnly, Notifications::Unavailable(reason)) => {
                return Err(FimError::NotificationsUnavailable(reason).into());
            }
            (WatchMode::RealtimeOnly, Notifications::Available(rx)) => (Some(rx), false),
            (WatchMode::PollOnly, _) => (None, true),
            (WatchMode::Both, Notifications::Available(rx)) => (Some(rx), true),
            (WatchMode::Both, Notifications::Unavailable(reason)) => {
                warn!(%reason, "real-time notifications unavailable, falling back to polling");
                self.sink.warning(&ScanWarning::new(
                    WarningKind::NotificationUnavailable,
                    "",
                    format!("real-time notifications unavailable ({reason}); polling only"),
                ));
                (None, true)
            }
        };

        let realtime_enabled = realtime.is_some();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (commands, command_rx) = mpsc::channel(64);

        let coordinator = Coordinator::new(
            baseline,
            self.config.enumerator()?,
            self.config.hasher(),
            self.sink.clone(),
        )
        .spawn(command_rx, shutdown_rx.clone());

        let mut tasks = Vec::new();
        let mut rescan_wake = None;
        if polling {
            let (task, handle) =
                spawn_audit_loop(self.config.scan_interval, commands.clone(), shutdown_rx.clone());
            rescan_wake = Some(handle.wake);
            tasks.push(task);
        }
        if let Some(signals) = realtime {
            tasks.push(spawn_debounce_pipeline(
                signals,
                PipelineSettings {
                    debounce: self.config.event_debounce,
                    tick: self.config.drain_tick(),
                },
                commands.clone(),
                rescan_wake,
                self.sink.clone(),
                shutdown_rx,
            ));
        }

        info!(
            mode = ?self.mode,
            realtime = realtime_enabled,
            polling,
            "watch loop running"
        );

        Ok(WatchHandle {
            commands,
            shutdown_tx,
            coordinator,
            tasks,
        })
    }

    /// Run until `shutdown` resolves, then return the final working baseline.
    pub async fn run<F>(
        self,
        baseline: Baseline,
        notifications: Notifications,
        shutdown: F,
    ) -> Result<Baseline>
    where
        F: Future<Output = ()>,
    {
        let handle = self.start(baseline, notifications)?;
        shutdown.await;
        info!("shutdown requested");
        handle.shutdown().await
    }
}

pub struct WatchHandle {
    commands: mpsc::Sender<Command>,
    shutdown_tx: watch::Sender<bool>,
    coordinator: JoinHandle<Baseline>,
    tasks: Vec<JoinHandle<()>>,
}

impl WatchHandle {
    /// The coordinator's current working baseline.
    pub async fn snapshot(&self) -> Result<Arc<Baseline>> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot(tx))
            .await
            .map_err(|_| anyhow!("watch loop has stopped"))?;
        Ok(rx.await?)
    }

    /// Queue a full scan outside the regular schedule.
    pub async fn rescan(&self) -> Result<()> {
        self.commands
            .send(Command::Rescan)
            .await
            .map_err(|_| anyhow!("watch loop has stopped"))
    }

    /// Stop all tasks. The job in progress completes first; pending
    /// debounced paths are discarded.
    pub async fn shutdown(self) -> Result<Baseline> {
        let _ = self.shutdown_tx.send(true);
        drop(self.commands);
        for task in self.tasks {
            task.await?;
        }
        Ok(self.coordinator.await?)
    }
}
