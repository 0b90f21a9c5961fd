//! Monitor configuration.
//!
//! `ConfigFile` is the JSON document as written by an operator; every field
//! has a default. `MonitorConfig` is the validated value the engine consumes.

use crate::enumerator::PathEnumerator;
use crate::error::{FimError, Result};
use crate::hasher::{FileHasher, HashAlgorithm};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_hash_algorithm() -> String {
    "sha256".into()
}

fn default_baseline_file() -> PathBuf {
    PathBuf::from("./baseline.json")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("./logs/fim.log")
}

fn default_scan_interval() -> u64 {
    60
}

fn default_debounce_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,
    #[serde(default = "default_baseline_file")]
    pub baseline_file: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    #[serde(default)]
    pub audit_log_file: Option<PathBuf>,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_seconds: u64,
    #[serde(default = "default_debounce_ms")]
    pub event_debounce_ms: u64,
    #[serde(default)]
    pub max_file_size_bytes: Option<u64>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            paths: vec![],
            exclude_globs: vec![],
            follow_symlinks: false,
            hash_algorithm: default_hash_algorithm(),
            baseline_file: default_baseline_file(),
            log_file: default_log_file(),
            audit_log_file: None,
            scan_interval_seconds: default_scan_interval(),
            event_debounce_ms: default_debounce_ms(),
            max_file_size_bytes: None,
        }
    }
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|source| FimError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| FimError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Validated configuration. Roots are absolute and, where they exist,
/// canonical.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub paths: Vec<PathBuf>,
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
    pub hash_algorithm: HashAlgorithm,
    pub baseline_file: PathBuf,
    pub log_file: PathBuf,
    pub audit_log_file: Option<PathBuf>,
    pub scan_interval: Duration,
    pub event_debounce: Duration,
    pub max_file_size_bytes: Option<u64>,
}

impl MonitorConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_file(ConfigFile::load(path)?)
    }

    pub fn from_file(file: ConfigFile) -> Result<Self> {
        if file.paths.is_empty() {
            return Err(FimError::Config("config must include at least one path".into()));
        }
        if file.scan_interval_seconds == 0 {
            return Err(FimError::Config("scan_interval_seconds must be positive".into()));
        }
        let hash_algorithm: HashAlgorithm = file.hash_algorithm.parse()?;
        let paths = file
            .paths
            .iter()
            .map(|p| resolve_root(p))
            .collect::<Result<Vec<_>>>()?;

        let config = Self {
            paths,
            exclude_globs: file.exclude_globs,
            follow_symlinks: file.follow_symlinks,
            hash_algorithm,
            baseline_file: file.baseline_file,
            log_file: file.log_file,
            audit_log_file: file.audit_log_file,
            scan_interval: Duration::from_secs(file.scan_interval_seconds),
            event_debounce: Duration::from_millis(file.event_debounce_ms),
            max_file_size_bytes: file.max_file_size_bytes,
        };
        // compile the globs once so a bad pattern fails at startup
        config.enumerator()?;
        Ok(config)
    }

    pub fn enumerator(&self) -> Result<PathEnumerator> {
        PathEnumerator::new(self.paths.clone(), &self.exclude_globs, self.follow_symlinks)
    }

    pub fn hasher(&self) -> FileHasher {
        FileHasher::new(self.hash_algorithm).with_max_file_size(self.max_file_size_bytes)
    }

    /// How often the watch loop drains settled paths: half the debounce
    /// window, kept within [5ms, 250ms] and never longer than the window
    /// itself. A zero window still ticks every 5ms.
    pub fn drain_tick(&self) -> Duration {
        let tick =
            (self.event_debounce / 2).clamp(Duration::from_millis(5), Duration::from_millis(250));
        if self.event_debounce.is_zero() {
            tick
        } else {
            tick.min(self.event_debounce)
        }
    }
}

fn resolve_root(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(absolute.canonicalize().unwrap_or(absolute))
}
