//! Document content fingerprints.
//!
//! A [`Fingerprint`] is the lowercase hex SHA-256 of a document's raw text.
//! It is stored on every chunk as provenance (`content_hash`) so that
//! byte-identical re-submissions can be recognised independently of the
//! filename they arrive under.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fixed-length (64 hex chars) fingerprint of a document's raw text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint of `text`.
///
/// Pure and platform independent: the digest is taken over the UTF-8 bytes.
pub fn fingerprint(text: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    Fingerprint(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_for_same_text() {
        assert_eq!(fingerprint("hello world"), fingerprint("hello world"));
    }

    #[test]
    fn differs_on_single_byte() {
        assert_ne!(fingerprint("hello world"), fingerprint("hello worle"));
        assert_ne!(fingerprint("abc"), fingerprint("abc "));
    }

    #[test]
    fn known_digest() {
        // SHA-256 of the empty string.
        assert_eq!(
            fingerprint("").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn fixed_length_hex() {
        let fp = fingerprint("report contents");
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
