//! Single owner of the watch loop's working baseline.
//!
//! Every other task talks to the coordinator through [`Command`]s. Jobs run
//! one at a time on the blocking pool against an `Arc` snapshot; their result
//! is folded back in before the next command is read, so the real-time and
//! periodic branches never report the same change twice.

use fim_core::{diff_targeted, scan, Baseline, FileHasher, PathEnumerator, ReportSink};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug)]
pub enum Command {
    /// Re-hash settled paths from the real-time branch.
    Targeted(BTreeSet<PathBuf>),
    /// Full scan; the fresh result replaces the working baseline.
    Rescan,
    Snapshot(oneshot::Sender<Arc<Baseline>>),
}

pub struct Coordinator {
    baseline: Arc<Baseline>,
    enumerator: Arc<PathEnumerator>,
    hasher: FileHasher,
    sink: Arc<dyn ReportSink>,
}

impl Coordinator {
    pub fn new(
        baseline: Baseline,
        enumerator: PathEnumerator,
        hasher: FileHasher,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            baseline: Arc::new(baseline),
            enumerator: Arc::new(enumerator),
            hasher,
            sink,
        }
    }

    /// Run until shutdown or until every command sender is gone. Returns the
    /// working baseline as it stood after the last completed job.
    pub fn spawn(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<Baseline> {
        tokio::spawn(async move {
            info!(entries = self.baseline.len(), "coordinator started");
            loop {
                tokio::select! {
                    biased;
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    cmd = commands.recv() => match cmd {
                        Some(cmd) => self.handle(cmd).await,
                        None => break,
                    },
                }
            }
            info!(entries = self.baseline.len(), "coordinator stopped");
            Arc::try_unwrap(self.baseline).unwrap_or_else(|shared| (*shared).clone())
        })
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Targeted(paths) => self.targeted(paths).await,
            Command::Rescan => self.rescan().await,
            Command::Snapshot(reply) => {
                let _ = reply.send(self.baseline.clone());
            }
        }
    }

    async fn targeted(&mut self, paths: BTreeSet<PathBuf>) {
        debug!(paths = paths.len(), "re-hashing settled paths");
        let snapshot = self.baseline.clone();
        let enumerator = self.enumerator.clone();
        let hasher = self.hasher;
        let job = tokio::task::spawn_blocking(move || {
            diff_targeted(&snapshot, paths, &enumerator, &hasher)
        });
        let result = match job.await {
            Ok(result) => result,
            Err(e) => {
                error!("targeted diff task failed: {}", e);
                return;
            }
        };

        if !result.upserts.is_empty() || !result.removals.is_empty() {
            result.apply_to(Arc::make_mut(&mut self.baseline));
        }
        if !result.events.is_empty() {
            self.sink.changes(&result.events);
        }
        self.sink.warnings(&result.warnings);
    }

    async fn rescan(&mut self) {
        let snapshot = self.baseline.clone();
        let enumerator = self.enumerator.clone();
        let hasher = self.hasher;
        let job = tokio::task::spawn_blocking(move || scan(&snapshot, &enumerator, &hasher));
        let outcome = match job.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("periodic scan task failed: {}", e);
                return;
            }
        };

        self.baseline = Arc::new(outcome.current);
        if !outcome.report.events.is_empty() {
            self.sink.changes(&outcome.report.events);
        }
        self.sink.warnings(&outcome.report.warnings);
    }
}
