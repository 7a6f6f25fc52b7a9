use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StoreError;

/// SHA-256 fingerprint of a whole object's content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Fingerprints the given content.
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Parses a 64 character hex digest.
    pub fn from_hex(s: &str) -> Result<Self, StoreError> {
        if s.len() != 64 {
            return Err(StoreError::Validation(format!(
                "content hash must be 64 hex characters, got {}",
                s.len()
            )));
        }
        let mut out = [0u8; 32];
        faster_hex::hex_decode(s.as_bytes(), &mut out)
            .map_err(|e| StoreError::Validation(format!("invalid content hash: {e}")))?;
        Ok(Self(out))
    }

    /// Lowercase hex rendering, as stored in the registry.
    pub fn to_hex(&self) -> String {
        faster_hex::hex_string(&self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        let hash = ContentHash::compute(b"abc");
        assert_eq!(
            hash.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn empty_content_has_a_digest() {
        let hash = ContentHash::compute(b"");
        assert_eq!(
            hash.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(ContentHash::from_hex("abc").is_err());
        let not_hex = "z".repeat(64);
        assert!(ContentHash::from_hex(&not_hex).is_err());
    }

    #[test]
    fn parse_accepts_rendered_form() {
        let hash = ContentHash::compute(b"payload");
        let parsed: ContentHash = hash.to_hex().parse().unwrap();
        assert_eq!(parsed, hash);
    }

    #[test]
    fn serializes_as_hex_string() {
        let hash = ContentHash::compute(b"serde");
        let json = serde_json::to_value(hash).unwrap();
        assert_eq!(json, serde_json::Value::String(hash.to_hex()));
    }
}
