//! Hash-based change classification.
//!
//! Only content hashes decide whether a file changed. A different
//! modification time with an equal hash is not a change.

use crate::baseline::{hash_warning, Baseline, FileRecord};
use crate::enumerator::{canonical_identity, leaf_identity, PathEnumerator};
use crate::hasher::FileHasher;
use crate::report::{ScanWarning, WarningKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Deleted,
    Modified,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Deleted => "deleted",
            Self::Modified => "modified",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub path: String,
    pub kind: ChangeKind,
    pub old_hash: Option<String>,
    pub new_hash: Option<String>,
    pub detected_at: DateTime<Utc>,
}

impl ChangeEvent {
    fn created(path: &str, new: &FileRecord, at: DateTime<Utc>) -> Self {
        Self {
            path: path.to_string(),
            kind: ChangeKind::Created,
            old_hash: None,
            new_hash: Some(new.hash.clone()),
            detected_at: at,
        }
    }

    fn deleted(path: &str, old: &FileRecord, at: DateTime<Utc>) -> Self {
        Self {
            path: path.to_string(),
            kind: ChangeKind::Deleted,
            old_hash: Some(old.hash.clone()),
            new_hash: None,
            detected_at: at,
        }
    }

    fn modified(path: &str, old: &FileRecord, new: &FileRecord, at: DateTime<Utc>) -> Self {
        Self {
            path: path.to_string(),
            kind: ChangeKind::Modified,
            old_hash: Some(old.hash.clone()),
            new_hash: Some(new.hash.clone()),
            detected_at: at,
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let old = self.old_hash.as_deref().unwrap_or("");
        let new = self.new_hash.as_deref().unwrap_or("");
        match self.kind {
            ChangeKind::Modified => {
                write!(f, "MODIFIED {} before={} after={}", self.path, old, new)
            }
            ChangeKind::Created => write!(f, "CREATED {} hash={}", self.path, new),
            ChangeKind::Deleted => write!(f, "DELETED {} hash={}", self.path, old),
        }
    }
}

/// Classify every difference between two baselines, sorted by path.
pub fn diff(old: &Baseline, new: &Baseline) -> Vec<ChangeEvent> {
    let now = Utc::now();
    let mut events = Vec::new();
    let mut old_iter = old.entries().iter().peekable();
    let mut new_iter = new.entries().iter().peekable();

    loop {
        let order = match (old_iter.peek(), new_iter.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((old_path, _)), Some((new_path, _))) => old_path.cmp(new_path),
        };
        match order {
            Ordering::Less => {
                if let Some((path, record)) = old_iter.next() {
                    events.push(ChangeEvent::deleted(path, record, now));
                }
            }
            Ordering::Greater => {
                if let Some((path, record)) = new_iter.next() {
                    events.push(ChangeEvent::created(path, record, now));
                }
            }
            Ordering::Equal => {
                if let (Some((path, before)), Some((_, after))) = (old_iter.next(), new_iter.next()) {
                    if before.hash != after.hash {
                        events.push(ChangeEvent::modified(path, before, after, now));
                    }
                }
            }
        }
    }

    events
}

/// Result of re-hashing a handful of paths against a baseline.
#[derive(Debug, Default)]
pub struct TargetedDiff {
    pub events: Vec<ChangeEvent>,
    pub upserts: Vec<(String, FileRecord)>,
    pub removals: Vec<String>,
    pub warnings: Vec<ScanWarning>,
}

impl TargetedDiff {
    /// Bring a working baseline up to date with what was observed.
    pub fn apply_to(&self, baseline: &mut Baseline) {
        for key in &self.removals {
            baseline.remove(key);
        }
        for (key, record) in &self.upserts {
            baseline.upsert(key.clone(), record.clone());
        }
    }
}

enum Observation {
    Present(FileRecord),
    Absent,
    Unknown,
}

/// Re-hash only `candidates` and compare each against `baseline`.
///
/// Candidates outside the monitored roots, excluded by a pattern, or (when
/// symlinks are not followed) symlinks are ignored. A directory candidate is
/// reconciled as a whole subtree; a vanished directory deletes every entry
/// beneath it.
pub fn diff_targeted<I>(
    baseline: &Baseline,
    candidates: I,
    enumerator: &PathEnumerator,
    hasher: &FileHasher,
) -> TargetedDiff
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut observed: BTreeMap<String, Observation> = BTreeMap::new();
    let mut warnings = Vec::new();

    for candidate in candidates {
        let entry = leaf_identity(&candidate);
        if enumerator.admits(&entry).is_none() {
            debug!(path = %entry.display(), "ignoring path outside monitored scope");
            continue;
        }

        let is_link = fs::symlink_metadata(&entry)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        let path = match (is_link, enumerator.follow_symlinks()) {
            (false, _) => entry,
            (true, false) => {
                // links are never recorded, so whatever was here is gone
                for known in baseline.keys_under(&entry.display().to_string()) {
                    observed.insert(known.clone(), Observation::Absent);
                }
                continue;
            }
            (true, true) => {
                let target = canonical_identity(&entry);
                if !enumerator.accepts_target(&target) {
                    debug!(path = %entry.display(), "link target excluded");
                    continue;
                }
                target
            }
        };
        let key = path.display().to_string();

        match fs::metadata(&path) {
            Ok(m) if m.is_dir() => {
                let subtree = enumerator.enumerate_under(&path);
                warnings.extend(subtree.warnings);
                for known in baseline.keys_under(&key) {
                    observed.entry(known.clone()).or_insert(Observation::Absent);
                }
                for file in subtree.files {
                    let file_key = file.display().to_string();
                    let observation = observe(&file, hasher, &mut warnings);
                    observed.insert(file_key, observation);
                }
                for dir in subtree.unreadable_dirs {
                    for known in baseline.keys_under(&dir.display().to_string()) {
                        observed.insert(known.clone(), Observation::Unknown);
                    }
                }
            }
            Ok(m) if m.is_file() => {
                let observation = observe(&path, hasher, &mut warnings);
                observed.insert(key, observation);
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                for known in baseline.keys_under(&key) {
                    observed.insert(known.clone(), Observation::Absent);
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot stat changed path");
                warnings.push(ScanWarning::new(WarningKind::UnreadableFile, &path, e.to_string()));
                for known in baseline.keys_under(&key) {
                    observed.insert(known.clone(), Observation::Unknown);
                }
            }
        }
    }

    let now = Utc::now();
    let mut out = TargetedDiff {
        warnings,
        ..TargetedDiff::default()
    };
    for (key, observation) in observed {
        match (baseline.get(&key), observation) {
            (None, Observation::Present(record)) => {
                out.events.push(ChangeEvent::created(&key, &record, now));
                out.upserts.push((key, record));
            }
            (Some(before), Observation::Present(record)) => {
                if before.hash != record.hash {
                    out.events.push(ChangeEvent::modified(&key, before, &record, now));
                    out.upserts.push((key, record));
                }
            }
            (Some(before), Observation::Absent) => {
                out.events.push(ChangeEvent::deleted(&key, before, now));
                out.removals.push(key);
            }
            (None, Observation::Absent) | (_, Observation::Unknown) => {}
        }
    }
    out
}

fn observe(path: &Path, hasher: &FileHasher, warnings: &mut Vec<ScanWarning>) -> Observation {
    match hasher.hash_file(path) {
        Ok(digest) => Observation::Present(FileRecord {
            hash: digest.hash,
            size: digest.size,
            modified_at: digest.modified_at,
        }),
        Err(e) if e.is_not_found() => Observation::Absent,
        Err(e) => {
            warn!("Skipping {}: {}", path.display(), e);
            warnings.push(hash_warning(path, &e));
            Observation::Unknown
        }
    }
}
