//! File integrity monitoring engine.
//!
//! Builds content-hash baselines of the monitored paths, classifies changes
//! against them, and debounces raw filesystem notifications for the watch
//! loop. Nothing in this crate knows whether OS notifications exist.

pub mod baseline;
pub mod config;
pub mod debounce;
pub mod differ;
pub mod enumerator;
pub mod error;
pub mod hasher;
pub mod report;
pub mod scan;

pub use baseline::{Baseline, BuildOutcome, FileRecord};
pub use config::{ConfigFile, MonitorConfig};
pub use debounce::{DebouncedEventAggregator, RawEvent, RawEventKind};
pub use differ::{diff, diff_targeted, ChangeEvent, ChangeKind, TargetedDiff};
pub use enumerator::{canonical_identity, Enumeration, PathEnumerator};
pub use error::{FimError, HashError, Result};
pub use hasher::{FileDigest, FileHasher, HashAlgorithm};
pub use report::{ReportSink, ScanReport, ScanWarning, WarningKind};
pub use scan::{scan, scan_with_config, ScanOutcome};
