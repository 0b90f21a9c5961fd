//! Reporting types shared by scans and the watch loop.

use crate::differ::{ChangeEvent, ChangeKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    UnreadableFile,
    UnreadableDirectory,
    MissingRoot,
    SymlinkLoop,
    FileTooLarge,
    NotificationUnavailable,
    NotificationError,
}

/// A recoverable problem encountered during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    pub path: String,
    pub kind: WarningKind,
    pub message: String,
}

impl ScanWarning {
    pub fn new(kind: WarningKind, path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().display().to_string(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Everything a one-shot scan could determine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub events: Vec<ChangeEvent>,
    pub warnings: Vec<ScanWarning>,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.events.is_empty()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.events.is_empty() {
            writeln!(f, "No changes detected.")?;
        } else {
            writeln!(f, "Changes ({}):", self.events.len())?;
            for event in &self.events {
                writeln!(f, "  {event}")?;
            }
        }
        if !self.warnings.is_empty() {
            writeln!(f)?;
            writeln!(f, "Warnings ({}):", self.warnings.len())?;
            for warning in &self.warnings {
                writeln!(f, "  {warning}")?;
            }
        }
        Ok(())
    }
}

/// Destination for change events and warnings.
///
/// Implementations receive each batch exactly once, in the order the differ
/// produced it.
pub trait ReportSink: Send + Sync {
    fn changes(&self, events: &[ChangeEvent]);

    fn warning(&self, warning: &ScanWarning);

    fn warnings(&self, warnings: &[ScanWarning]) {
        for warning in warnings {
            self.warning(warning);
        }
    }
}
