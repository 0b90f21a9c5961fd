//! Append-only, hash-chained JSONL record of everything the monitor reported.
//!
//! Each line carries the SHA-256 of its own content (minus `hash`) and the
//! hash of the line before it, starting from `CHAIN_START` in every file.
//! Editing or dropping a line breaks the chain at that point.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fim_core::{ChangeEvent, ChangeKind, ReportSink, ScanWarning};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::error;

const MAX_ROTATIONS: usize = 5;
const CHAIN_START: &str = "CHAIN_START";

pub const DEFAULT_MAX_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warn,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub record_type: String,
    pub severity: Severity,
    pub data: serde_json::Value,
    pub prev_hash: String,
    pub hash: String,
}

/// Outcome of walking the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    Intact { entries: u64 },
    Broken { file: PathBuf, seq: u64, reason: String },
}

pub struct AuditLog {
    path: PathBuf,
    inner: Mutex<LogState>,
    max_bytes: u64,
}

#[derive(Debug)]
struct LogState {
    last_seq: u64,
    last_hash: String,
}

impl AuditLog {
    pub fn open<P: AsRef<Path>>(path: P, max_bytes: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating audit log directory {}", parent.display()))?;
        }
        let (last_seq, last_hash) = Self::load_state(&path)?;
        Ok(Self {
            path,
            inner: Mutex::new(LogState {
                last_seq,
                last_hash,
            }),
            max_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_state(path: &Path) -> Result<(u64, String)> {
        if !path.exists() {
            return Ok((0, CHAIN_START.to_string()));
        }
        let reader = BufReader::new(File::open(path)?);
        let mut last_seq = 0;
        let mut last_hash = CHAIN_START.to_string();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditEntry = serde_json::from_str(&line)
                .with_context(|| format!("parsing audit log {}", path.display()))?;
            last_seq = entry.seq;
            last_hash = entry.hash;
        }
        Ok((last_seq, last_hash))
    }

    fn compute_hash(entry_without_hash: &serde_json::Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(entry_without_hash.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn append(
        &self,
        record_type: &str,
        severity: Severity,
        data: serde_json::Value,
    ) -> Result<AuditEntry> {
        let mut state = self.inner.lock();
        self.rotate_if_needed(&mut state)?;

        let seq = state.last_seq + 1;
        let mut entry_value = serde_json::json!({
            "seq": seq,
            "timestamp": Utc::now(),
            "record_type": record_type,
            "severity": severity,
            "data": data,
            "prev_hash": state.last_hash,
        });
        let hash = Self::compute_hash(&entry_value);
        entry_value["hash"] = serde_json::Value::String(hash.clone());

        // Write the exact bytes that were hashed, plus the hash.
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening audit log {}", self.path.display()))?;
        writeln!(file, "{}", entry_value)?;
        file.flush()?;

        let entry: AuditEntry = serde_json::from_value(entry_value)?;
        state.last_seq = seq;
        state.last_hash = hash;
        Ok(entry)
    }

    fn rotate_if_needed(&self, state: &mut LogState) -> Result<()> {
        match fs::metadata(&self.path) {
            Ok(metadata) if metadata.len() >= self.max_bytes => {}
            _ => return Ok(()),
        }
        for i in (1..=MAX_ROTATIONS).rev() {
            let rotated = self.path_with_suffix(i);
            if rotated.exists() {
                if i == MAX_ROTATIONS {
                    fs::remove_file(&rotated)?;
                } else {
                    fs::rename(&rotated, self.path_with_suffix(i + 1))?;
                }
            }
        }
        fs::rename(&self.path, self.path_with_suffix(1))?;
        // new file, new chain; seq stays monotonic
        state.last_hash = CHAIN_START.to_string();
        Ok(())
    }

    /// Most recent entries first, optionally filtered by `since` and capped
    /// at `limit`. Only the current file is read.
    pub fn read_recent(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<AuditEntry>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditEntry = serde_json::from_str(&line)?;
            if since.is_some_and(|ts| entry.timestamp < ts) {
                continue;
            }
            entries.push(entry);
        }
        entries.reverse();
        if let Some(lim) = limit {
            entries.truncate(lim);
        }
        Ok(entries)
    }

    /// Walk every retained file, oldest rotation first, and report the first
    /// entry whose hash or back-link does not check out.
    pub fn verify(&self) -> Result<ChainStatus> {
        let _guard = self.inner.lock();
        let mut files: Vec<PathBuf> = (1..=MAX_ROTATIONS)
            .rev()
            .map(|i| self.path_with_suffix(i))
            .filter(|p| p.exists())
            .collect();
        if self.path.exists() {
            files.push(self.path.clone());
        }

        let mut total = 0;
        for file in files {
            match verify_file(&file)? {
                ChainStatus::Intact { entries } => total += entries,
                broken => return Ok(broken),
            }
        }
        Ok(ChainStatus::Intact { entries: total })
    }

    fn path_with_suffix(&self, index: usize) -> PathBuf {
        let filename = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audit.log".into());
        self.path.with_file_name(format!("{}.{}", filename, index))
    }

    fn record(&self, record_type: &str, severity: Severity, data: serde_json::Value) {
        if let Err(e) = self.append(record_type, severity, data) {
            error!("Failed to append to audit log {}: {:#}", self.path.display(), e);
        }
    }
}

fn verify_file(path: &Path) -> Result<ChainStatus> {
    let reader = BufReader::new(File::open(path)?);
    let mut prev_hash = CHAIN_START.to_string();
    let mut last_seq = 0u64;
    let mut entries = 0u64;

    let broken = |seq: u64, reason: &str| ChainStatus::Broken {
        file: path.to_path_buf(),
        seq,
        reason: reason.to_string(),
    };

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut value: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => return Ok(broken(last_seq + 1, "unparseable entry")),
        };
        let seq = value["seq"].as_u64().unwrap_or(last_seq + 1);
        let Some(recorded) = value
            .as_object_mut()
            .and_then(|o| o.remove("hash"))
            .and_then(|h| h.as_str().map(str::to_owned))
        else {
            return Ok(broken(seq, "missing hash"));
        };
        if value["prev_hash"].as_str() != Some(prev_hash.as_str()) {
            return Ok(broken(seq, "prev_hash does not match preceding entry"));
        }
        if AuditLog::compute_hash(&value) != recorded {
            return Ok(broken(seq, "content does not match recorded hash"));
        }
        if entries > 0 && seq != last_seq + 1 {
            return Ok(broken(seq, "sequence gap"));
        }
        prev_hash = recorded;
        last_seq = seq;
        entries += 1;
    }
    Ok(ChainStatus::Intact { entries })
}

impl ReportSink for AuditLog {
    fn changes(&self, events: &[ChangeEvent]) {
        for event in events {
            let (record_type, severity) = match event.kind {
                ChangeKind::Created => ("FILE_CREATED", Severity::Warn),
                ChangeKind::Modified => ("FILE_MODIFIED", Severity::Critical),
                ChangeKind::Deleted => ("FILE_DELETED", Severity::Critical),
            };
            match serde_json::to_value(event) {
                Ok(data) => self.record(record_type, severity, data),
                Err(e) => error!("Failed to serialize change event: {}", e),
            }
        }
    }

    fn warning(&self, warning: &ScanWarning) {
        match serde_json::to_value(warning) {
            Ok(data) => self.record("SCAN_WARNING", Severity::Warn, data),
            Err(e) => error!("Failed to serialize warning: {}", e),
        }
    }
}
