//! Real-time file system watcher using the `notify` crate.
//!
//! Watches the monitored roots and forwards classified notifications as
//! [`WatchSignal`]s over an unbounded channel, so delivery never blocks the
//! OS callback. A single-file root is watched through its parent directory,
//! so editors that save by replacing the file do not silently drop the watch.

use anyhow::{Context, Result};
use fim_core::{RawEvent, RawEventKind};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// What the notification facility tells the watch loop.
#[derive(Debug, Clone)]
pub enum WatchSignal {
    Event(RawEvent),
    /// Events may have been lost; only a full scan restores certainty.
    Rescan(String),
    Error(String),
}

/// Keeps the OS watch registrations alive. Dropping it stops delivery.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    watched: Vec<PathBuf>,
}

impl FileWatcher {
    /// Register a watch for every existing root: recursive for directories,
    /// on the parent directory for single files.
    ///
    /// Fails if the platform facility cannot be initialised or no root could
    /// be watched; the caller treats that as "notifications unavailable".
    pub fn start(roots: &[PathBuf], signals: UnboundedSender<WatchSignal>) -> Result<Self> {
        let (sync_tx, sync_rx) = mpsc::channel::<notify::Result<Event>>();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = sync_tx.send(res);
            },
            Config::default(),
        )
        .context("initialising filesystem notifications")?;

        let (targets, scope) = watch_targets(roots);
        let mut watched = Vec::new();
        for (target, mode) in targets {
            watcher
                .watch(&target, mode)
                .with_context(|| format!("watching {}", target.display()))?;
            info!("Watching: {}", target.display());
            watched.push(target);
        }
        if watched.is_empty() {
            anyhow::bail!("none of the monitored paths exist");
        }

        // Bridge the synchronous notify callback to the async side.
        std::thread::Builder::new()
            .name("fim-watcher-bridge".into())
            .spawn(move || bridge(sync_rx, signals, scope))
            .context("spawning watcher bridge thread")?;

        Ok(Self {
            _watcher: watcher,
            watched,
        })
    }

    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }
}

/// Paths whose notifications are forwarded.
#[derive(Debug, Default)]
pub(crate) struct WatchScope {
    dirs: Vec<PathBuf>,
    files: HashSet<PathBuf>,
}

impl WatchScope {
    fn covers(&self, path: &Path) -> bool {
        self.files.contains(path) || self.dirs.iter().any(|dir| path.starts_with(dir))
    }

    /// Whether a signal concerns a monitored path. Sibling files seen through
    /// a single-file root's parent watch are dropped.
    pub(crate) fn admits(&self, signal: &WatchSignal) -> bool {
        match signal {
            WatchSignal::Event(raw) => {
                self.covers(&raw.path)
                    || matches!(&raw.kind, RawEventKind::Moved { from } if self.covers(from))
            }
            WatchSignal::Rescan(_) | WatchSignal::Error(_) => true,
        }
    }
}

/// What to register with the platform for `roots`, deduplicated, plus the
/// scope used to filter what comes back. Missing roots are skipped.
pub(crate) fn watch_targets(roots: &[PathBuf]) -> (Vec<(PathBuf, RecursiveMode)>, WatchScope) {
    let mut targets: Vec<(PathBuf, RecursiveMode)> = Vec::new();
    let mut scope = WatchScope::default();
    for root in roots {
        if !root.exists() {
            warn!("Path does not exist, cannot watch: {}", root.display());
            continue;
        }
        let target = if root.is_dir() {
            scope.dirs.push(root.clone());
            (root.clone(), RecursiveMode::Recursive)
        } else {
            scope.files.insert(root.clone());
            match root.parent() {
                Some(parent) => (parent.to_path_buf(), RecursiveMode::NonRecursive),
                None => (root.clone(), RecursiveMode::NonRecursive),
            }
        };
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    (targets, scope)
}

fn bridge(
    sync_rx: mpsc::Receiver<notify::Result<Event>>,
    signals: UnboundedSender<WatchSignal>,
    scope: WatchScope,
) {
    while let Ok(res) = sync_rx.recv() {
        let outgoing: Vec<WatchSignal> = match res {
            Ok(event) => classify_event(&event)
                .into_iter()
                .filter(|signal| scope.admits(signal))
                .collect(),
            Err(e) => {
                error!("File watcher error: {}", e);
                vec![WatchSignal::Error(e.to_string())]
            }
        };
        for signal in outgoing {
            if signals.send(signal).is_err() {
                debug!("Watch loop gone, stopping watcher bridge");
                return;
            }
        }
    }
    debug!("Watcher channel closed");
}

/// Translate one notify event into zero or more signals.
pub(crate) fn classify_event(event: &Event) -> Vec<WatchSignal> {
    if event.need_rescan() {
        return vec![WatchSignal::Rescan(format!("{:?}", event.kind))];
    }

    let each = |kind: RawEventKind| -> Vec<WatchSignal> {
        event
            .paths
            .iter()
            .map(|p| WatchSignal::Event(RawEvent::new(p.clone(), kind.clone())))
            .collect()
    };

    match &event.kind {
        EventKind::Create(_) => each(RawEventKind::Created),
        EventKind::Remove(_) => each(RawEventKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            vec![WatchSignal::Event(RawEvent::new(
                event.paths[1].clone(),
                RawEventKind::Moved {
                    from: event.paths[0].clone(),
                },
            ))]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(RawEventKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(RawEventKind::Created),
        EventKind::Modify(_) => each(RawEventKind::Modified),
        // Access and unclassified events never change content.
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, Flag, RemoveKind};

    fn raw(signals: Vec<WatchSignal>) -> Vec<RawEvent> {
        signals
            .into_iter()
            .filter_map(|s| match s {
                WatchSignal::Event(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn create_modify_remove_map_directly() {
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path("/srv/a".into());
        let modify = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path("/srv/a".into());
        let remove = Event::new(EventKind::Remove(RemoveKind::File)).add_path("/srv/a".into());

        assert_eq!(raw(classify_event(&create))[0].kind, RawEventKind::Created);
        assert_eq!(raw(classify_event(&modify))[0].kind, RawEventKind::Modified);
        assert_eq!(raw(classify_event(&remove))[0].kind, RawEventKind::Deleted);
    }

    #[test]
    fn rename_with_both_ends_is_a_move() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/srv/old".into())
            .add_path("/srv/new".into());
        let events = raw(classify_event(&event));
        assert_eq!(
            events,
            vec![RawEvent::new(
                "/srv/new",
                RawEventKind::Moved {
                    from: PathBuf::from("/srv/old")
                }
            )]
        );
    }

    #[test]
    fn half_renames_become_delete_and_create() {
        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path("/srv/old".into());
        let to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path("/srv/new".into());
        assert_eq!(raw(classify_event(&from))[0].kind, RawEventKind::Deleted);
        assert_eq!(raw(classify_event(&to))[0].kind, RawEventKind::Created);
    }

    #[test]
    fn metadata_changes_are_rechecked() {
        let event = Event::new(EventKind::Modify(ModifyKind::Metadata(
            notify::event::MetadataKind::Permissions,
        )))
        .add_path("/srv/a".into());
        assert_eq!(raw(classify_event(&event))[0].kind, RawEventKind::Modified);
    }

    #[test]
    fn access_events_are_ignored() {
        let event = Event::new(EventKind::Access(AccessKind::Read)).add_path("/srv/a".into());
        assert!(classify_event(&event).is_empty());
    }

    #[test]
    fn single_file_root_is_watched_through_its_parent() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().canonicalize().unwrap();
        let config = parent.join("app.conf");
        let hosts = parent.join("hosts");
        let tree = parent.join("tree");
        std::fs::write(&config, b"a=1").unwrap();
        std::fs::write(&hosts, b"127.0.0.1").unwrap();
        std::fs::create_dir_all(&tree).unwrap();

        let (targets, scope) = watch_targets(&[
            config.clone(),
            hosts.clone(),
            tree.clone(),
            parent.join("missing"),
        ]);
        assert_eq!(
            targets,
            vec![
                (parent.clone(), RecursiveMode::NonRecursive),
                (tree.clone(), RecursiveMode::Recursive),
            ]
        );

        let event = |path: PathBuf| WatchSignal::Event(RawEvent::new(path, RawEventKind::Modified));
        assert!(scope.admits(&event(config.clone())));
        assert!(scope.admits(&event(tree.join("deep/file"))));
        assert!(!scope.admits(&event(parent.join("app.conf.swp"))));

        let renamed_away = WatchSignal::Event(RawEvent::new(
            parent.join("app.conf.bak"),
            RawEventKind::Moved {
                from: config.clone(),
            },
        ));
        assert!(scope.admits(&renamed_away));
        // an editor's atomic save renames a temporary file over the root
        let replace = WatchSignal::Event(RawEvent::new(
            config.clone(),
            RawEventKind::Moved {
                from: parent.join(".app.conf.tmp"),
            },
        ));
        assert!(scope.admits(&replace));
        assert!(scope.admits(&WatchSignal::Rescan("overflow".into())));
    }

    #[test]
    fn rescan_flag_requests_full_scan() {
        let event = Event::new(EventKind::Other).set_flag(Flag::Rescan);
        let signals = classify_event(&event);
        assert_eq!(signals.len(), 1);
        assert!(matches!(signals[0], WatchSignal::Rescan(_)));
    }
}
