//! # Cache Keys
//!
//! Derivation of filesystem-safe storage identifiers from namespaced logical keys.

use std::fmt;

use sha2::{Digest, Sha256};

const TAG_EMPTY: u8 = 0x00;
const TAG_KEY: u8 = 0x01;

/// A logical key scoped by the namespace (instance name) of a cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Namespace the key belongs to
    pub namespace: String,
    /// Caller supplied logical key, e.g. a serialized request identity
    pub logical_key: String,
}

impl CacheKey {
    /// Create a new cache key
    pub fn new(namespace: impl Into<String>, logical_key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            logical_key: logical_key.into(),
        }
    }

    /// Derive the storage identifier for this key
    pub fn identifier(&self) -> StorageIdentifier {
        StorageIdentifier::derive(&self.namespace, &self.logical_key)
    }
}

/// Hashed, namespace-folded identifier used by the stores.
///
/// Always 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageIdentifier(String);

impl StorageIdentifier {
    /// Derive an identifier from a namespace and a logical key.
    ///
    /// The hash input is length framed so that moving bytes between the
    /// namespace and the key never produces the same identifier. The empty
    /// logical key hashes under its own tag.
    pub fn derive(namespace: &str, logical_key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((namespace.len() as u64).to_be_bytes());
        hasher.update(namespace.as_bytes());
        if logical_key.is_empty() {
            hasher.update([TAG_EMPTY]);
        } else {
            hasher.update([TAG_KEY]);
            hasher.update(logical_key.as_bytes());
        }

        let hash = hasher.finalize();
        Self(format!("{hash:x}"))
    }

    /// Parse an identifier previously produced by [`StorageIdentifier::derive`]
    pub fn parse(value: &str) -> Option<Self> {
        let valid = value.len() == 64
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(value.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two character shard prefix used to spread entries over directories
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for StorageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
