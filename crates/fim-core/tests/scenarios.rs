//! End-to-end scan scenarios.
//!
//! Tests cover:
//!  1. Rebuilding an untouched tree yields no events
//!  2. Content edit → single Modified
//!  3. Delete + create → sorted Deleted/Created
//!  4. Timestamp-only touch → nothing
//!  5. Excluded files never appear
//!  6. Saved baseline survives a reload

use fim_core::{
    diff, scan, Baseline, ChangeKind, FileHasher, HashAlgorithm, PathEnumerator, ScanReport,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

fn setup(root: &Path, excludes: &[&str]) -> (PathEnumerator, FileHasher) {
    let globs: Vec<String> = excludes.iter().map(|s| s.to_string()).collect();
    let enumerator =
        PathEnumerator::new(vec![root.canonicalize().unwrap()], &globs, false).unwrap();
    (enumerator, FileHasher::new(HashAlgorithm::Sha256))
}

fn canonical(root: &Path, name: &str) -> String {
    root.canonicalize().unwrap().join(name).display().to_string()
}

fn summary(report: &ScanReport) -> Vec<(ChangeKind, String)> {
    report
        .events
        .iter()
        .map(|e| {
            let name = PathBuf::from(&e.path)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned();
            (e.kind, name)
        })
        .collect()
}

// ─── 1: reflexivity ─────────────────────────────────────────────────────────

#[test]
fn rebuilding_unchanged_tree_is_clean() {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("etc/conf.d")).unwrap();
    fs::write(dir.path().join("etc/hosts"), b"127.0.0.1 localhost").unwrap();
    fs::write(dir.path().join("etc/conf.d/app.conf"), b"debug=false").unwrap();

    let (enumerator, hasher) = setup(dir.path(), &[]);
    let first = Baseline::build(&enumerator, &hasher).baseline;
    let second = Baseline::build(&enumerator, &hasher).baseline;
    assert_eq!(first.len(), 2);
    assert!(diff(&first, &second).is_empty());
}

// ─── 2: single edit ─────────────────────────────────────────────────────────

#[test]
fn content_edit_reports_one_modified() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"hello").unwrap();
    let (enumerator, hasher) = setup(dir.path(), &[]);
    let baseline = Baseline::build(&enumerator, &hasher).baseline;

    fs::write(dir.path().join("a.txt"), b"hello!").unwrap();
    let outcome = scan(&baseline, &enumerator, &hasher);

    assert_eq!(summary(&outcome.report), vec![(ChangeKind::Modified, "a.txt".into())]);
    let event = &outcome.report.events[0];
    assert_eq!(event.path, canonical(dir.path(), "a.txt"));
    assert_ne!(event.old_hash, event.new_hash);
    assert!(outcome.report.warnings.is_empty());
}

// ─── 3: delete + create ─────────────────────────────────────────────────────

#[test]
fn delete_and_create_sorted_by_path() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"a").unwrap();
    fs::write(dir.path().join("b.txt"), b"b").unwrap();
    let (enumerator, hasher) = setup(dir.path(), &[]);
    let baseline = Baseline::build(&enumerator, &hasher).baseline;

    fs::remove_file(dir.path().join("b.txt")).unwrap();
    fs::write(dir.path().join("c.txt"), b"c").unwrap();
    let outcome = scan(&baseline, &enumerator, &hasher);

    assert_eq!(
        summary(&outcome.report),
        vec![
            (ChangeKind::Deleted, "b.txt".into()),
            (ChangeKind::Created, "c.txt".into()),
        ]
    );
}

#[test]
fn adding_one_file_is_one_created() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("base.txt"), b"base").unwrap();
    let (enumerator, hasher) = setup(dir.path(), &[]);
    let before = Baseline::build(&enumerator, &hasher).baseline;

    fs::write(dir.path().join("extra.txt"), b"distinct").unwrap();
    let after = Baseline::build(&enumerator, &hasher).baseline;

    let events = diff(&before, &after);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ChangeKind::Created);
    assert_eq!(events[0].path, canonical(dir.path(), "extra.txt"));

    let back = diff(&after, &before);
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].kind, ChangeKind::Deleted);
}

// ─── 4: timestamps alone ────────────────────────────────────────────────────

#[test]
fn touching_without_content_change_is_silent() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("touched.txt");
    fs::write(&file, b"constant").unwrap();
    let (enumerator, hasher) = setup(dir.path(), &[]);
    let baseline = Baseline::build(&enumerator, &hasher).baseline;

    for offset in [60u64, 3600, 86_400] {
        let handle = fs::OpenOptions::new().write(true).open(&file).unwrap();
        handle
            .set_modified(SystemTime::now() + Duration::from_secs(offset))
            .unwrap();
        drop(handle);
        assert!(scan(&baseline, &enumerator, &hasher).report.is_clean());
    }

    fs::write(&file, b"changed").unwrap();
    let outcome = scan(&baseline, &enumerator, &hasher);
    assert_eq!(summary(&outcome.report), vec![(ChangeKind::Modified, "touched.txt".into())]);
}

// ─── 5: exclusion ───────────────────────────────────────────────────────────

#[test]
fn excluded_paths_never_appear() {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("tmp")).unwrap();
    fs::write(dir.path().join("app.conf"), b"conf").unwrap();
    fs::write(dir.path().join("debug.log"), b"log 1").unwrap();
    fs::write(dir.path().join("tmp/cache.bin"), b"cache 1").unwrap();

    let (enumerator, hasher) = setup(dir.path(), &["*.log", "tmp"]);
    let baseline = Baseline::build(&enumerator, &hasher).baseline;
    assert_eq!(baseline.len(), 1);
    assert!(!baseline.contains(&canonical(dir.path(), "debug.log")));

    fs::write(dir.path().join("debug.log"), b"log 2").unwrap();
    fs::write(dir.path().join("tmp/cache.bin"), b"cache 2").unwrap();
    fs::write(dir.path().join("new.log"), b"new").unwrap();

    assert!(scan(&baseline, &enumerator, &hasher).report.is_clean());

    let targeted = fim_core::diff_targeted(
        &baseline,
        vec![
            dir.path().join("debug.log"),
            dir.path().join("tmp/cache.bin"),
            dir.path().join("new.log"),
        ],
        &enumerator,
        &hasher,
    );
    assert!(targeted.events.is_empty());
}

// ─── 6: persistence ─────────────────────────────────────────────────────────

#[test]
fn saved_baseline_scans_identically_after_reload() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    fs::create_dir_all(&data).unwrap();
    fs::write(data.join("one"), b"1").unwrap();
    fs::write(data.join("two"), b"2").unwrap();

    let (enumerator, hasher) = setup(&data, &[]);
    let baseline = Baseline::build(&enumerator, &hasher).baseline;
    let stored = dir.path().join("baseline.json");
    baseline.save(&stored).unwrap();

    let loaded = Baseline::load(&stored).unwrap();
    assert_eq!(loaded, baseline);
    assert_eq!(loaded.algorithm(), HashAlgorithm::Sha256);

    fs::write(data.join("two"), b"22").unwrap();
    let outcome = scan(&loaded, &enumerator, &hasher);
    assert_eq!(summary(&outcome.report), vec![(ChangeKind::Modified, "two".into())]);
}
