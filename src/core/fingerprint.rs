//! Manifest fingerprinting
//!
//! A fingerprint is a SHA-256 digest over the contents of the declared
//! manifest files, in declared order. Paths, timestamps and permissions
//! never contribute, so moving a project keeps its cache warm.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::FingerprintError;

/// Number of digest bytes kept in the rendered fingerprint
const FINGERPRINT_BYTES: usize = 16;

/// Hex-encoded manifest fingerprint (32 characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of in-memory contents, in order
    pub fn of_contents<I, B>(contents: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut hasher = Sha256::new();
        for content in contents {
            let bytes = content.as_ref();
            // Length prefix keeps file boundaries unambiguous
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..FINGERPRINT_BYTES]))
    }

    /// Parse a rendered fingerprint, e.g. from a cache directory name
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == FINGERPRINT_BYTES * 2
            && s.chars().all(|c| c.is_ascii_digit() || matches!(c, 'a'..='f'));
        valid.then(|| Self(s.to_string()))
    }

    /// The hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint of an ordered list of manifest files
pub fn fingerprint_manifests<P: AsRef<Path>>(paths: &[P]) -> Result<Fingerprint, FingerprintError> {
    let mut contents = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(FingerprintError::ManifestNotFound {
                path: path.to_path_buf(),
            });
        }
        let bytes = std::fs::read(path).map_err(|e| FingerprintError::ReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        contents.push(bytes);
    }

    let fingerprint = Fingerprint::of_contents(&contents);
    tracing::debug!(files = paths.len(), %fingerprint, "computed manifest fingerprint");
    Ok(fingerprint)
}
