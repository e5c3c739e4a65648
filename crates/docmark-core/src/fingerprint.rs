//! Content-addressed document fingerprints.
//!
//! A [`Fingerprint`] is the lowercase hex SHA-256 digest of a document's
//! identifying fields. It is the primary key of the conversion cache, so two
//! submissions with the same fields always map to the same record.
//!
//! # Input layout
//!
//! Each field is fed to the hasher as an 8-byte little-endian length
//! followed by the field bytes:
//!
//! ```text
//! len(content) ‖ content ‖ len(name) ‖ name [‖ len(type) ‖ type]
//! ```
//!
//! Length prefixes keep field boundaries fixed, so `("ab", "c")` and
//! `("a", "bc")` never collide by concatenation.
//!
//! # Schemes
//!
//! | Scheme | Fields |
//! |--------|--------|
//! | [`FingerprintScheme::ContentNameType`] | content, name, declared type (default) |
//! | [`FingerprintScheme::ContentName`] | content, name |

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::Document;

/// Hex-encoded SHA-256 digest identifying a document for caching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Length of the hex rendering.
    pub const HEX_LEN: usize = 64;

    /// Wraps an already-computed hex digest, e.g. one read back from storage.
    ///
    /// Returns `None` unless `hex` is exactly 64 lowercase hex characters.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let valid = hex.len() == Self::HEX_LEN
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(hex.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Which document fields feed the fingerprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintScheme {
    /// Content, name, and declared type. Byte-identical files uploaded under
    /// different names or types get separate cache entries.
    #[default]
    ContentNameType,
    /// Content and name only.
    ContentName,
}

impl FingerprintScheme {
    pub fn fingerprint(&self, content: &[u8], name: &str, declared_type: &str) -> Fingerprint {
        let mut hasher = Sha256::new();
        update_field(&mut hasher, content);
        update_field(&mut hasher, name.as_bytes());
        if *self == FingerprintScheme::ContentNameType {
            update_field(&mut hasher, declared_type.as_bytes());
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn fingerprint_document(&self, doc: &Document) -> Fingerprint {
        self.fingerprint(&doc.content, &doc.name, &doc.content_type)
    }
}

/// Fingerprint with the default [`FingerprintScheme::ContentNameType`].
pub fn fingerprint(content: &[u8], name: &str, declared_type: &str) -> Fingerprint {
    FingerprintScheme::default().fingerprint(content, name, declared_type)
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
