//! Content digests over rule sets.
//!
//! A digest identifies the *shape* of a definition: which slots it fills,
//! not which technical ids they carry. Forking keeps the digest.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 content digest, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapeDigest(pub String);

impl ShapeDigest {
    pub fn builder() -> ShapeDigestBuilder {
        ShapeDigestBuilder {
            hasher: Sha256::new(),
        }
    }
}

impl fmt::Display for ShapeDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incremental digest builder.
///
/// Callers feed fields in a stable order; the builder does not sort.
pub struct ShapeDigestBuilder {
    hasher: Sha256,
}

impl ShapeDigestBuilder {
    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.hasher.update(name.as_bytes());
        self.hasher.update(b":");
        self.hasher.update(value.as_bytes());
        self.hasher.update(b"\n");
        self
    }

    pub fn finish(self) -> ShapeDigest {
        let hash = self.hasher.finalize();
        ShapeDigest(format!("{hash:x}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let a = ShapeDigest::builder().field("slot", "attribute:color").finish();
        let b = ShapeDigest::builder().field("slot", "attribute:color").finish();
        assert_eq!(a, b);
        assert_eq!(a.0.len(), 64);
    }

    #[test]
    fn digest_is_order_sensitive() {
        let a = ShapeDigest::builder()
            .field("slot", "a")
            .field("slot", "b")
            .finish();
        let b = ShapeDigest::builder()
            .field("slot", "b")
            .field("slot", "a")
            .finish();
        assert_ne!(a, b);
    }
}
