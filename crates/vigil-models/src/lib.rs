//! Integrity verification for the optional spoof-classifier model.
//!
//! The operator pins the model's SHA-256 digest in configuration. The file
//! is hashed before it is handed to the inference runtime, and a missing
//! file or digest mismatch keeps the model from loading.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelIntegrityError {
    #[error("model file not found: {path}")]
    MissingModel { path: PathBuf },

    #[error("failed to read model file: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("pinned digest is not a sha256 hex string: {0:?}")]
    InvalidDigest(String),

    #[error("model checksum mismatch ({path})\n  expected: {expected}\n  got:      {got}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        got: String,
    },
}

/// A model file and the digest it is expected to have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedModel {
    pub path: PathBuf,
    /// Lowercase hex. `None` accepts any content.
    pub sha256: Option<String>,
}

/// A model that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedModel {
    pub path: PathBuf,
    pub sha256: String,
    /// Whether the digest was checked against a pin.
    pub pinned: bool,
}

impl PinnedModel {
    pub fn new(path: impl Into<PathBuf>, sha256: Option<&str>) -> Result<Self, ModelIntegrityError> {
        let sha256 = sha256.map(normalize_digest).transpose()?;
        Ok(Self {
            path: path.into(),
            sha256,
        })
    }

    pub fn verify(&self) -> Result<VerifiedModel, ModelIntegrityError> {
        if !self.path.is_file() {
            return Err(ModelIntegrityError::MissingModel {
                path: self.path.clone(),
            });
        }

        let got = sha256_file_hex(&self.path)?;
        if let Some(expected) = &self.sha256 {
            if *expected != got {
                return Err(ModelIntegrityError::ChecksumMismatch {
                    path: self.path.clone(),
                    expected: expected.clone(),
                    got,
                });
            }
        }

        Ok(VerifiedModel {
            path: self.path.clone(),
            sha256: got,
            pinned: self.sha256.is_some(),
        })
    }
}

fn normalize_digest(raw: &str) -> Result<String, ModelIntegrityError> {
    let digest = raw.trim().to_ascii_lowercase();
    if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ModelIntegrityError::InvalidDigest(raw.to_string()));
    }
    Ok(digest)
}

/// SHA-256 hex digest of a file, streamed.
pub fn sha256_file_hex(path: &Path) -> Result<String, ModelIntegrityError> {
    let read_err = |source| ModelIntegrityError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::File::open(path).map_err(read_err)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(read_err)?;
    Ok(format!("{:x}", hasher.finalize()))
}
