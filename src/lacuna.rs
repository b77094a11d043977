//! Lacunas: recorded semantic gaps in a translation
//!
//! A lens that cannot carry every value of its input faithfully into the
//! target schema says so by emitting [`Lacuna`]s. They describe the specific
//! translation that produced them and are handed straight back to the caller
//! of `translate`; nothing stores or deduplicates them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A field path and the value found there
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRef {
    pub path: String,
    #[serde(default)]
    pub value: Value,
}

impl FieldRef {
    pub fn new(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }

    /// A reference with no value attached
    pub fn path(path: impl Into<String>) -> Self {
        Self::new(path, Value::Null)
    }
}

/// Class of a [`Lacuna`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum LacunaType {
    /// The target requires a value the source cannot supply; a placeholder
    /// was written instead.
    Placeholder,
    /// A source field has no counterpart in the target and was dropped.
    DroppedField,
    /// A source value was mapped into the target with loss of precision or
    /// meaning.
    LossyFieldMapping,
    /// The target schema's default differs from the source's, so an implicit
    /// value changed meaning.
    ChangedDefault,
}

impl LacunaType {
    /// Stable numeric identifier
    pub fn code(self) -> u16 {
        match self {
            Self::Placeholder => 0,
            Self::DroppedField => 1,
            Self::LossyFieldMapping => 2,
            Self::ChangedDefault => 3,
        }
    }
}

impl TryFrom<u16> for LacunaType {
    type Error = u16;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Placeholder),
            1 => Ok(Self::DroppedField),
            2 => Ok(Self::LossyFieldMapping),
            3 => Ok(Self::ChangedDefault),
            other => Err(other),
        }
    }
}

impl fmt::Display for LacunaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Placeholder => "Placeholder",
            Self::DroppedField => "DroppedField",
            Self::LossyFieldMapping => "LossyFieldMapping",
            Self::ChangedDefault => "ChangedDefault",
        };
        f.write_str(name)
    }
}

/// A semantic gap in a lens's mapping between two schemas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lacuna {
    /// Fields of the pre-translation instance involved in the gap
    #[serde(default)]
    pub source_fields: Vec<FieldRef>,
    /// Fields of the post-translation instance involved in the gap
    #[serde(default)]
    pub target_fields: Vec<FieldRef>,
    #[serde(rename = "type")]
    pub kind: LacunaType,
    pub message: String,
}

impl Lacuna {
    pub fn new(kind: LacunaType, message: impl Into<String>) -> Self {
        Self {
            source_fields: Vec::new(),
            target_fields: Vec::new(),
            kind,
            message: message.into(),
        }
    }

    pub fn with_source(mut self, field: FieldRef) -> Self {
        self.source_fields.push(field);
        self
    }

    pub fn with_target(mut self, field: FieldRef) -> Self {
        self.target_fields.push(field);
        self
    }
}

impl fmt::Display for Lacuna {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lacuna_wire_shape() {
        let lac = Lacuna::new(LacunaType::DroppedField, "legacy flag has no successor")
            .with_source(FieldRef::new("legacy", json!(true)));
        let v = serde_json::to_value(&lac).unwrap();
        assert_eq!(v["type"], json!("DroppedField"));
        assert_eq!(v["sourceFields"][0]["path"], json!("legacy"));
        assert_eq!(v["targetFields"], json!([]));
    }

    #[test]
    fn test_lacuna_type_codes() {
        for code in 0..4u16 {
            let kind = LacunaType::try_from(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert_eq!(LacunaType::try_from(9), Err(9));
    }
}
