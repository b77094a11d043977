//! Checksum utilities for schema identity checks

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA256 checksum of canonical schema content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum from JSON value.
    ///
    /// Object keys serialize in sorted order, so structurally equal values
    /// hash identically regardless of how they were authored.
    pub fn from_json(value: &serde_json::Value) -> Self {
        Self::from_bytes(value.to_string().as_bytes())
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }

    /// Verify that JSON value matches this checksum
    pub fn verify_json(&self, value: &serde_json::Value) -> bool {
        Self::from_json(value) == *self
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_checksum_ignores_key_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b": "int", "a": "string"}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"a": "string", "b": "int"}"#).unwrap();
        assert_eq!(Checksum::from_json(&a), Checksum::from_json(&b));
    }

    #[test]
    fn test_checksum_different_content() {
        let c1 = Checksum::from_json(&json!({"name": "string"}));
        let c2 = Checksum::from_json(&json!({"name": "int"}));
        assert_ne!(c1, c2);
        assert!(c1.verify_json(&json!({"name": "string"})));
        assert_eq!(c1.short().len(), 12);
    }
}
