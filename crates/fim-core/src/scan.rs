//! Full scan against a stored baseline.

use crate::baseline::{Baseline, BuildOutcome};
use crate::config::MonitorConfig;
use crate::differ::{diff, ChangeKind};
use crate::enumerator::PathEnumerator;
use crate::error::Result;
use crate::hasher::FileHasher;
use crate::report::ScanReport;
use tracing::{error, info};

#[derive(Debug)]
pub struct ScanOutcome {
    pub report: ScanReport,
    /// What the monitored files look like now. Files that exist but could not
    /// be hashed keep their previous record.
    pub current: Baseline,
}

/// Enumerate, hash and diff against `baseline`.
///
/// A file that is still present but unreadable is not reported as deleted;
/// it carries its old record forward and shows up in the warnings instead.
/// The same holds for every file beneath a directory that cannot be listed.
pub fn scan(baseline: &Baseline, enumerator: &PathEnumerator, hasher: &FileHasher) -> ScanOutcome {
    info!(
        entries = baseline.len(),
        "Running integrity scan against baseline"
    );
    let BuildOutcome {
        baseline: mut current,
        warnings,
        unreadable,
        unreadable_dirs,
    } = Baseline::build(enumerator, hasher);

    for key in unreadable {
        if let Some(record) = baseline.get(&key) {
            current.upsert(key, record.clone());
        }
    }
    for dir in &unreadable_dirs {
        for key in baseline.keys_under(dir) {
            if current.get(key).is_none() {
                if let Some(record) = baseline.get(key) {
                    current.upsert(key.clone(), record.clone());
                }
            }
        }
    }

    let events = diff(baseline, &current);
    let report = ScanReport { events, warnings };

    if report.is_clean() {
        info!("Integrity scan passed: {} files verified", current.len());
    } else {
        error!(
            "INTEGRITY VIOLATION: {} modified, {} deleted, {} created",
            report.count(ChangeKind::Modified),
            report.count(ChangeKind::Deleted),
            report.count(ChangeKind::Created),
        );
    }

    ScanOutcome { report, current }
}

pub fn scan_with_config(baseline: &Baseline, config: &MonitorConfig) -> Result<ScanOutcome> {
    let enumerator = config.enumerator()?;
    Ok(scan(baseline, &enumerator, &config.hasher()))
}
