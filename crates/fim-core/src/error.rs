use std::path::PathBuf;

/// Result type for engine operations that can fail fatally.
pub type Result<T> = std::result::Result<T, FimError>;

/// Fatal conditions. Per-file and per-directory problems never end up here;
/// they are collected as [`crate::report::ScanWarning`]s instead.
#[derive(Debug, thiserror::Error)]
pub enum FimError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown hash algorithm: {0} (expected sha256, sha512 or blake3)")]
    UnknownAlgorithm(String),

    #[error("invalid exclude pattern {pattern:?}: {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("cannot read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("baseline {0} not found; run `fim baseline` first")]
    BaselineMissing(PathBuf),

    #[error("baseline {path} is corrupt ({source}); run `fim baseline` to rebuild it")]
    BaselineCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("baseline path {path} is not writable: {source}")]
    BaselineUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "baseline was recorded with {baseline} but config requests {configured}; rebuild the baseline"
    )]
    AlgorithmMismatch {
        baseline: String,
        configured: String,
    },

    #[error("real-time mode requested but file notifications are unavailable: {0}")]
    NotificationsUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A per-file hashing failure. Callers skip the file and warn.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is {size} bytes, over the {limit} byte ceiling")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },
}

impl HashError {
    /// True when the file disappeared before or while it was read.
    pub fn is_not_found(&self) -> bool {
        matches!(self, HashError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}
