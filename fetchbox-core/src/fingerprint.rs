//! Request fingerprints.
//!
//! A [`Fingerprint`] is a hex encoded SHA-256 digest over an ordered list of
//! components. Each component is length-prefixed before it is fed into the
//! hasher, so an empty component still participates and component
//! boundaries can never be shifted to produce a collision:
//!
//! ```
//! use fetchbox_core::Fingerprint;
//!
//! let a = Fingerprint::builder().component("ab").component("").build();
//! let b = Fingerprint::builder().component("a").component("b").build();
//! let c = Fingerprint::builder().component("ab").build();
//!
//! assert_ne!(a, b);
//! assert_ne!(a, c);
//! assert_eq!(a.as_str().len(), 64);
//! ```
//!
//! [`Fingerprint`] wraps an `Arc<str>`, so cloning it only bumps a reference
//! count. Fingerprints are cloned into every timer and pipeline task.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Deterministic digest identifying a logically identical request.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    inner: Arc<str>,
}

impl Fingerprint {
    /// Starts a new fingerprint computation.
    pub fn builder() -> FingerprintBuilder {
        FingerprintBuilder::default()
    }

    /// Wraps an already computed digest, e.g. one read back from a store.
    pub fn from_digest(digest: impl Into<Arc<str>>) -> Self {
        Fingerprint {
            inner: digest.into(),
        }
    }

    /// Returns the hex encoded digest.
    pub fn as_str(&self) -> &str {
        &self.inner
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fingerprint").field(&&*self.inner).finish()
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.inner)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let digest = String::deserialize(deserializer)?;
        Ok(Fingerprint::from_digest(digest))
    }
}

/// Incremental builder feeding length-prefixed components into SHA-256.
#[derive(Clone, Default)]
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    /// Appends one component.
    pub fn component(mut self, value: impl AsRef<[u8]>) -> Self {
        self.push(value);
        self
    }

    /// Appends one component in place.
    pub fn push(&mut self, value: impl AsRef<[u8]>) {
        let bytes = value.as_ref();
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    /// Finalizes the digest.
    pub fn build(self) -> Fingerprint {
        Fingerprint::from_digest(hex::encode(self.hasher.finalize()))
    }
}
