//! Lookup key derivation.
//!
//! A lookup key is derived from an ordered list of identity parts (client
//! address, guard name, caller-supplied sub-key). Each part is hashed on its
//! own, the encodings are concatenated and hashed once more. The resulting key
//! has a fixed length no matter how long the parts are.

use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque, fixed-length key identifying one protected identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BruteKey(String);

impl BruteKey {
    /// Derive a key from ordered identity parts.
    ///
    /// Absent and empty parts contribute nothing, so `[None, a, b]` and
    /// `[a, b]` derive the same key. Callers must keep a stable part order
    /// per logical key type.
    ///
    /// # Example
    /// ```
    /// use brute_throttle::BruteKey;
    ///
    /// let a = BruteKey::derive([Some("10.0.0.1"), Some("login"), Some("alice")]);
    /// let b = BruteKey::derive([Some("10.0.0.1"), Some("login"), Some("alice")]);
    /// let c = BruteKey::derive([Some("10.0.0.1"), Some("login"), Some("bob")]);
    ///
    /// assert_eq!(a, b);
    /// assert_ne!(a, c);
    /// assert_eq!(a.as_str().len(), 44);
    /// ```
    pub fn derive<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = Option<P>>,
        P: AsRef<[u8]>,
    {
        let mut combined = String::new();

        for part in parts.into_iter().flatten() {
            let bytes = part.as_ref();
            if bytes.is_empty() {
                continue;
            }
            combined.push_str(&digest_base64(bytes));
        }

        BruteKey(digest_base64(combined.as_bytes()))
    }

    /// Wrap an already derived key, e.g. one read back from a store.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        BruteKey(raw.into())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for BruteKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BruteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn digest_base64(data: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(data))
}
