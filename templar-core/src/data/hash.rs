//! Content addressing for canonicalized file bodies.
//!
//! Digests go through the [`ContentHasher`] capability so callers and tests
//! can swap the primitive. [`hash_content`] never fails: when the digest is
//! unavailable it returns a `fallback-` identifier that is unique per call
//! and carries no content meaning.

use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, warn};

pub const HASH_LEN: usize = 64;
pub const FALLBACK_PREFIX: &str = "fallback-";
/// Stored in place of a digest for markdown guidance files.
pub const MARKDOWN_SENTINEL: &str = "md-not-hashed";

#[derive(Debug, Error)]
pub enum HashError {
    #[error("digest primitive unavailable: {0}")]
    Unavailable(String),
    #[error("invalid digest length: {0}")]
    InvalidLength(usize),
}

pub trait ContentHasher: Send + Sync {
    /// Lower-case hex digest of `bytes`.
    fn digest(&self, bytes: &[u8]) -> Result<String, HashError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn digest(&self, bytes: &[u8]) -> Result<String, HashError> {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

/// A 64-character content identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Fallback identifiers are not derived from content and never collide
    /// with each other in practice, so they do not take part in dedup.
    pub fn is_fallback(&self) -> bool {
        is_fallback_hash(&self.0)
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn is_fallback_hash(hash: &str) -> bool {
    hash.starts_with(FALLBACK_PREFIX)
}

fn fallback_hash(len: usize) -> String {
    const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let random: String = (0..13)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    let millis = chrono::Utc::now().timestamp_millis();

    let mut id = format!("{FALLBACK_PREFIX}{millis}-{len}-{random}");
    if id.len() < HASH_LEN {
        id.extend(std::iter::repeat('0').take(HASH_LEN - id.len()));
    }
    id.truncate(HASH_LEN);
    id
}

/// Digest `bytes`, substituting a fallback identifier if the primitive fails.
pub fn hash_content(hasher: &dyn ContentHasher, bytes: &[u8]) -> ContentHash {
    let digest = hasher.digest(bytes).and_then(|hex| {
        if hex.len() == HASH_LEN {
            Ok(hex)
        } else {
            Err(HashError::InvalidLength(hex.len()))
        }
    });

    match digest {
        Ok(hex) => ContentHash(hex),
        Err(e) => {
            error!("content digest failed, using fallback identifier: {}", e);
            let id = fallback_hash(bytes.len());
            warn!("using fallback hash {}", id);
            ContentHash(id)
        }
    }
}
