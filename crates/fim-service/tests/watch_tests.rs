//! Watch loop behaviour with injected notifications.
//!
//! Raw events are pushed straight into the signal channel so the tests do not
//! depend on the platform notification facility.

use fim_core::{
    Baseline, ChangeEvent, ChangeKind, ConfigFile, FimError, MonitorConfig, RawEvent,
    RawEventKind, ReportSink, ScanWarning, WarningKind,
};
use fim_service::{Notifications, WatchLoop, WatchMode, WatchSignal};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::sync::mpsc;

#[derive(Default)]
struct MemorySink {
    events: Mutex<Vec<ChangeEvent>>,
    warnings: Mutex<Vec<ScanWarning>>,
}

impl MemorySink {
    fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().clone()
    }

    fn warnings(&self) -> Vec<ScanWarning> {
        self.warnings.lock().clone()
    }
}

impl ReportSink for MemorySink {
    fn changes(&self, events: &[ChangeEvent]) {
        self.events.lock().extend_from_slice(events);
    }

    fn warning(&self, warning: &ScanWarning) {
        self.warnings.lock().push(warning.clone());
    }
}

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    config: MonitorConfig,
    sink: Arc<MemorySink>,
}

fn fixture(scan_interval_seconds: u64) -> Fixture {
    let dir = tempdir().unwrap();
    let root = dir.path().join("watched");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("a.txt"), b"hello").unwrap();

    let config = MonitorConfig::from_file(ConfigFile {
        paths: vec![root.clone()],
        baseline_file: dir.path().join("baseline.json"),
        log_file: dir.path().join("fim.log"),
        scan_interval_seconds,
        event_debounce_ms: 50,
        ..ConfigFile::default()
    })
    .unwrap();
    let root = root.canonicalize().unwrap();

    Fixture {
        _dir: dir,
        root,
        config,
        sink: Arc::new(MemorySink::default()),
    }
}

fn baseline_for(config: &MonitorConfig) -> Baseline {
    Baseline::build_from_config(config).unwrap().baseline
}

/// Poll `check` until it holds or `limit` elapses.
async fn wait_for(limit: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

fn modified(path: &Path) -> WatchSignal {
    WatchSignal::Event(RawEvent::new(path, RawEventKind::Modified))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn burst_of_events_reports_one_modification() {
    let fx = fixture(3600);
    let baseline = baseline_for(&fx.config);
    let (tx, rx) = mpsc::unbounded_channel();

    let handle = WatchLoop::new(fx.config.clone(), WatchMode::RealtimeOnly, fx.sink.clone())
        .start(baseline, Notifications::Available(rx))
        .unwrap();

    let file = fx.root.join("a.txt");
    fs::write(&file, b"hello!").unwrap();
    for _ in 0..10 {
        tx.send(modified(&file)).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let sink = fx.sink.clone();
    assert!(wait_for(Duration::from_secs(5), || !sink.events().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let events = fx.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ChangeKind::Modified);
    assert_eq!(events[0].path, file.display().to_string());

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(
        snapshot.get(&file.display().to_string()).map(|r| r.hash.clone()),
        events[0].new_hash
    );

    let final_baseline = handle.shutdown().await.unwrap();
    assert_eq!(final_baseline.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn move_reports_delete_and_create() {
    let fx = fixture(3600);
    let baseline = baseline_for(&fx.config);
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = WatchLoop::new(fx.config.clone(), WatchMode::RealtimeOnly, fx.sink.clone())
        .start(baseline, Notifications::Available(rx))
        .unwrap();

    let from = fx.root.join("a.txt");
    let to = fx.root.join("b.txt");
    fs::rename(&from, &to).unwrap();
    tx.send(WatchSignal::Event(RawEvent::new(
        &to,
        RawEventKind::Moved { from: from.clone() },
    )))
    .unwrap();

    let sink = fx.sink.clone();
    assert!(wait_for(Duration::from_secs(5), || sink.events().len() >= 2).await);
    let kinds: Vec<ChangeKind> = fx.sink.events().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ChangeKind::Deleted, ChangeKind::Created]);

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn polling_detects_created_file() {
    let fx = fixture(1);
    let baseline = baseline_for(&fx.config);

    let handle = WatchLoop::new(fx.config.clone(), WatchMode::PollOnly, fx.sink.clone())
        .start(baseline, Notifications::Unavailable("not probed".into()))
        .unwrap();

    fs::write(fx.root.join("new.txt"), b"new").unwrap();

    let sink = fx.sink.clone();
    assert!(wait_for(Duration::from_secs(5), || !sink.events().is_empty()).await);
    let events = fx.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ChangeKind::Created);
    // polling mode asked for no notifications, so none are missing
    assert!(fx.sink.warnings().is_empty());

    let final_baseline = handle.shutdown().await.unwrap();
    assert_eq!(final_baseline.len(), 2);
}

#[tokio::test]
async fn realtime_without_notifications_is_fatal() {
    let fx = fixture(60);
    let baseline = baseline_for(&fx.config);

    let err = WatchLoop::new(fx.config.clone(), WatchMode::RealtimeOnly, fx.sink.clone())
        .start(baseline, Notifications::Unavailable("inotify limit reached".into()))
        .err()
        .unwrap();
    assert!(matches!(
        err.downcast_ref::<FimError>(),
        Some(FimError::NotificationsUnavailable(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn both_without_notifications_falls_back_to_polling() {
    let fx = fixture(1);
    let baseline = baseline_for(&fx.config);

    let handle = WatchLoop::new(fx.config.clone(), WatchMode::Both, fx.sink.clone())
        .start(baseline, Notifications::Unavailable("unsupported".into()))
        .unwrap();

    let warnings = fx.sink.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].kind, WarningKind::NotificationUnavailable);

    fs::write(fx.root.join("a.txt"), b"changed").unwrap();
    let sink = fx.sink.clone();
    assert!(wait_for(Duration::from_secs(5), || !sink.events().is_empty()).await);
    assert_eq!(fx.sink.events()[0].kind, ChangeKind::Modified);

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn periodic_scan_does_not_repeat_realtime_report() {
    let fx = fixture(1);
    let baseline = baseline_for(&fx.config);
    let (tx, rx) = mpsc::unbounded_channel();

    let handle = WatchLoop::new(fx.config.clone(), WatchMode::Both, fx.sink.clone())
        .start(baseline, Notifications::Available(rx))
        .unwrap();

    let file = fx.root.join("a.txt");
    fs::write(&file, b"edited").unwrap();
    tx.send(modified(&file)).unwrap();

    let sink = fx.sink.clone();
    assert!(wait_for(Duration::from_secs(5), || !sink.events().is_empty()).await);
    // at least one more periodic scan
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let events = fx.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ChangeKind::Modified);

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rescan_hint_triggers_full_scan() {
    let fx = fixture(3600);
    let baseline = baseline_for(&fx.config);
    let (tx, rx) = mpsc::unbounded_channel();

    let handle = WatchLoop::new(fx.config.clone(), WatchMode::RealtimeOnly, fx.sink.clone())
        .start(baseline, Notifications::Available(rx))
        .unwrap();

    // a change the watcher "missed"
    fs::write(fx.root.join("unseen.txt"), b"unseen").unwrap();
    tx.send(WatchSignal::Rescan("queue overflow".into())).unwrap();

    let sink = fx.sink.clone();
    assert!(wait_for(Duration::from_secs(5), || !sink.events().is_empty()).await);
    let events = fx.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ChangeKind::Created);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn mismatched_algorithm_is_rejected() {
    let fx = fixture(60);
    let mut config = fx.config.clone();
    let baseline = baseline_for(&config);
    config.hash_algorithm = fim_core::HashAlgorithm::Blake3;

    let err = WatchLoop::new(config, WatchMode::PollOnly, fx.sink.clone())
        .start(baseline, Notifications::Unavailable("n/a".into()))
        .err()
        .unwrap();
    assert!(matches!(
        err.downcast_ref::<FimError>(),
        Some(FimError::AlgorithmMismatch { .. })
    ));
}
