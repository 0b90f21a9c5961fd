//! Streaming content hasher.
//!
//! Files are read in 64 KiB chunks so memory use stays flat for arbitrarily
//! large inputs. Only file content feeds the digest; permissions, ownership
//! and timestamps never do.

use crate::error::{FimError, HashError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Read buffer size for streaming hashes (64KB)
const BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
    Blake3,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Blake3 => "blake3",
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = FimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            "blake3" => Ok(Self::Blake3),
            other => Err(FimError::UnknownAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What hashing a file yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    /// Lowercase hex digest
    pub hash: String,
    /// Number of bytes fed to the digest
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

enum StreamState {
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl StreamState {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
            HashAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Hashes files with one algorithm and an optional size ceiling.
#[derive(Debug, Clone, Copy)]
pub struct FileHasher {
    algorithm: HashAlgorithm,
    max_file_size: Option<u64>,
}

impl FileHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            max_file_size: None,
        }
    }

    pub fn with_max_file_size(mut self, limit: Option<u64>) -> Self {
        self.max_file_size = limit;
        self
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hash a single file.
    pub fn hash_file(&self, path: &Path) -> Result<FileDigest, HashError> {
        let io_err = |source| HashError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::open(path).map_err(io_err)?;
        let metadata = file.metadata().map_err(io_err)?;

        if let Some(limit) = self.max_file_size {
            if metadata.len() > limit {
                return Err(HashError::TooLarge {
                    path: path.to_path_buf(),
                    size: metadata.len(),
                    limit,
                });
            }
        }

        let mut state = StreamState::new(self.algorithm);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut size = 0u64;
        loop {
            let n = file.read(&mut buffer).map_err(io_err)?;
            if n == 0 {
                break;
            }
            state.update(&buffer[..n]);
            size += n as u64;
        }

        let modified_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(FileDigest {
            hash: state.finalize(),
            size,
            modified_at,
        })
    }
}

/// Hash a file with `algorithm` and no size ceiling.
pub fn hash(path: &Path, algorithm: HashAlgorithm) -> Result<FileDigest, HashError> {
    FileHasher::new(algorithm).hash_file(path)
}
