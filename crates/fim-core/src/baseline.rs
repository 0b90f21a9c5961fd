//! Baseline construction and persistence.
//!
//! A baseline maps each canonical file path to the content hash, size and
//! modification time recorded when it was built. It is stored as pretty JSON
//! with sorted keys so it can be inspected and diffed with ordinary tools.

use crate::config::MonitorConfig;
use crate::enumerator::PathEnumerator;
use crate::error::{FimError, HashError, Result};
use crate::hasher::{FileHasher, HashAlgorithm};
use crate::report::{ScanWarning, WarningKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Trusted state of one file. The canonical path is the key it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub hash: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    algorithm: HashAlgorithm,
    created_at: DateTime<Utc>,
    entries: BTreeMap<String, FileRecord>,
}

/// A freshly built baseline and the files that could not be hashed.
#[derive(Debug)]
pub struct BuildOutcome {
    pub baseline: Baseline,
    pub warnings: Vec<ScanWarning>,
    /// Keys of files that exist but could not be hashed.
    pub unreadable: Vec<String>,
    /// Directories that could not be listed, as baseline key prefixes.
    pub unreadable_dirs: Vec<String>,
}

impl Baseline {
    pub fn new(algorithm: HashAlgorithm, entries: BTreeMap<String, FileRecord>) -> Self {
        Self {
            algorithm,
            created_at: Utc::now(),
            entries,
        }
    }

    pub fn empty(algorithm: HashAlgorithm) -> Self {
        Self::new(algorithm, BTreeMap::new())
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn entries(&self) -> &BTreeMap<String, FileRecord> {
        &self.entries
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys equal to `path` or nested beneath it, in order.
    pub fn keys_under<'a>(&'a self, path: &str) -> impl Iterator<Item = &'a String> + 'a {
        let prefix = format!("{path}{}", std::path::MAIN_SEPARATOR);
        let exact = self.entries.get_key_value(path).map(|(k, _)| k);
        exact.into_iter().chain(
            self.entries
                .range(prefix.clone()..)
                .map(|(k, _)| k)
                .take_while(move |k| k.starts_with(&prefix)),
        )
    }

    /// Working-copy update used by the watch loop's coordinator, the only
    /// holder of a mutable baseline.
    pub fn upsert(&mut self, path: String, record: FileRecord) {
        self.entries.insert(path, record);
    }

    pub fn remove(&mut self, path: &str) -> Option<FileRecord> {
        self.entries.remove(path)
    }

    /// Hash every enumerated file. Files that fail to hash are left out and
    /// reported as warnings.
    pub fn build(enumerator: &PathEnumerator, hasher: &FileHasher) -> BuildOutcome {
        let enumeration = enumerator.enumerate();
        let mut warnings = enumeration.warnings;
        let unreadable_dirs = enumeration
            .unreadable_dirs
            .iter()
            .map(|dir| dir.display().to_string())
            .collect();
        let mut unreadable = Vec::new();
        let mut entries = BTreeMap::new();

        for path in enumeration.files {
            let key = path.display().to_string();
            match hasher.hash_file(&path) {
                Ok(digest) => {
                    entries.insert(
                        key,
                        FileRecord {
                            hash: digest.hash,
                            size: digest.size,
                            modified_at: digest.modified_at,
                        },
                    );
                }
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    if !e.is_not_found() {
                        unreadable.push(key);
                    }
                    warnings.push(hash_warning(&path, &e));
                }
            }
        }

        debug!(files = entries.len(), skipped = warnings.len(), "baseline built");
        BuildOutcome {
            baseline: Baseline::new(hasher.algorithm(), entries),
            warnings,
            unreadable,
            unreadable_dirs,
        }
    }

    /// Build using the enumerator and hasher described by `config`.
    pub fn build_from_config(config: &MonitorConfig) -> Result<BuildOutcome> {
        let enumerator = config.enumerator()?;
        Ok(Self::build(&enumerator, &config.hasher()))
    }

    /// Fail early if the baseline cannot be written to `path`.
    pub fn ensure_writable(path: &Path) -> Result<()> {
        let unwritable = |source| FimError::BaselineUnwritable {
            path: path.to_path_buf(),
            source,
        };
        let parent = parent_dir(path);
        fs::create_dir_all(&parent).map_err(unwritable)?;
        tempfile::NamedTempFile::new_in(&parent).map_err(unwritable)?;
        if path.is_dir() {
            return Err(unwritable(std::io::Error::new(
                std::io::ErrorKind::Other,
                "path is a directory",
            )));
        }
        Ok(())
    }

    /// Save baseline to disk as JSON, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let unwritable = |source| FimError::BaselineUnwritable {
            path: path.to_path_buf(),
            source,
        };
        let parent = parent_dir(path);
        fs::create_dir_all(&parent).map_err(unwritable)?;

        let json = serde_json::to_string_pretty(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(unwritable)?;
        tmp.write_all(json.as_bytes()).map_err(unwritable)?;
        tmp.write_all(b"\n").map_err(unwritable)?;
        tmp.persist(path).map_err(|e| unwritable(e.error))?;

        info!(entries = self.entries.len(), "Baseline saved to {}", path.display());
        Ok(())
    }

    /// Load baseline from disk. A missing or unparsable file is fatal; it is
    /// never treated as an empty baseline.
    pub fn load(path: &Path) -> Result<Self> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FimError::BaselineMissing(path.to_path_buf()))
            }
            Err(e) => return Err(FimError::Io(e)),
        };
        let baseline: Baseline =
            serde_json::from_str(&json).map_err(|source| FimError::BaselineCorrupt {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(
            "Baseline loaded from {} ({} entries)",
            path.display(),
            baseline.entries.len()
        );
        Ok(baseline)
    }

    /// A baseline hashed with another algorithm cannot be compared.
    pub fn ensure_algorithm(&self, configured: HashAlgorithm) -> Result<()> {
        if self.algorithm != configured {
            return Err(FimError::AlgorithmMismatch {
                baseline: self.algorithm.to_string(),
                configured: configured.to_string(),
            });
        }
        Ok(())
    }
}

pub(crate) fn hash_warning(path: &Path, err: &HashError) -> ScanWarning {
    let kind = match err {
        HashError::TooLarge { .. } => WarningKind::FileTooLarge,
        HashError::Io { .. } => WarningKind::UnreadableFile,
    };
    ScanWarning::new(kind, path, err.to_string())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
