//! Error types for lineage binding, translation, publication and data codecs
//!
//! Data-level validation failures live in [`crate::validate`]; everything a
//! caller must fix in a lineage definition is a [`LineageError`].

use thiserror::Error;

use crate::validate::ValidationFailure;
use crate::version::SyntacticVersion;

/// Result type for lineage operations
pub type Result<T> = std::result::Result<T, LineageError>;

/// Coarse class of a [`LineageError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ValueNotExist,
    ValueNotALineage,
    InvalidLineage,
    InvalidSchemasOrder,
    NoSchemaWithVersion,
    MalformedVersion,
}

/// Structural errors surfaced while binding or querying a lineage
#[derive(Error, Debug)]
pub enum LineageError {
    #[error("value does not exist{}", path_suffix(.path))]
    ValueNotExist { path: Option<String> },

    #[error("not a lineage: {reason}")]
    ValueNotALineage { reason: String },

    #[error("invalid lineage: {reason}")]
    InvalidLineage { reason: String },

    #[error("invalid lineage: schemas out of order: {reason}")]
    InvalidSchemasOrder { reason: String },

    #[error("{}", compat_message(.predecessor, .successor, .detail))]
    CompatInvariant {
        predecessor: SyntacticVersion,
        successor: SyntacticVersion,
        detail: String,
    },

    #[error("lineage {lineage:?} does not contain schema with version {version}")]
    NoSchemaWithVersion {
        lineage: String,
        version: SyntacticVersion,
    },

    #[error("not a valid syntactic version: {0}")]
    MalformedVersion(String),
}

impl LineageError {
    pub(crate) fn not_a_lineage(reason: impl Into<String>) -> Self {
        Self::ValueNotALineage {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidLineage {
            reason: reason.into(),
        }
    }

    pub(crate) fn out_of_order(reason: impl Into<String>) -> Self {
        Self::InvalidSchemasOrder {
            reason: reason.into(),
        }
    }

    /// The sentinel class of this error. Compatibility violations are
    /// reported as [`ErrorKind::InvalidLineage`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValueNotExist { .. } => ErrorKind::ValueNotExist,
            Self::ValueNotALineage { .. } => ErrorKind::ValueNotALineage,
            Self::InvalidLineage { .. } | Self::CompatInvariant { .. } => ErrorKind::InvalidLineage,
            Self::InvalidSchemasOrder { .. } => ErrorKind::InvalidSchemasOrder,
            Self::NoSchemaWithVersion { .. } => ErrorKind::NoSchemaWithVersion,
            Self::MalformedVersion(_) => ErrorKind::MalformedVersion,
        }
    }

    pub fn is_invalid_lineage(&self) -> bool {
        self.kind() == ErrorKind::InvalidLineage
    }
}

fn path_suffix(path: &Option<String>) -> String {
    match path {
        Some(p) => format!(": no value at path {:?}", p),
        None => String::new(),
    }
}

fn compat_message(pred: &SyntacticVersion, succ: &SyntacticVersion, detail: &str) -> String {
    if pred.sequence == succ.sequence {
        format!(
            "invalid lineage: schema {} is not backwards compatible with schema {}: {}",
            succ, pred, detail
        )
    } else {
        format!(
            "invalid lineage: schema {} must be backwards incompatible with schema {}; redeclare it as a minor version bump of {}",
            succ, pred, pred
        )
    }
}

/// Errors from translating an instance to another schema version
#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("lineage {lineage:?} has no schema with version {version}, cannot translate")]
    NoSchemaWithVersion {
        lineage: String,
        version: SyntacticVersion,
    },

    #[error("no lens from {from} to {to} in lineage {lineage:?}")]
    NoLens {
        lineage: String,
        from: SyntacticVersion,
        to: SyntacticVersion,
    },

    #[error("no translation route from {from} to {to} in lineage {lineage:?}")]
    NoRoute {
        lineage: String,
        from: SyntacticVersion,
        to: SyntacticVersion,
    },

    #[error("schema {version} has no {direction} in lineage {lineage:?}")]
    NoAdjacentSchema {
        lineage: String,
        version: SyntacticVersion,
        direction: &'static str,
    },

    #[error("lens from {from} to {to} produced data invalid for the target schema:\n{source}")]
    Validation {
        from: SyntacticVersion,
        to: SyntacticVersion,
        #[source]
        source: ValidationFailure,
    },
}

/// Ways a republished lineage can rewrite history
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppendOnlyError {
    #[error("lineage name changed from {older:?} to {newer:?}")]
    NameChanged { older: String, newer: String },

    #[error("schema {version} was removed")]
    VersionRemoved { version: SyntacticVersion },

    #[error("schema {version} was altered:\n{diff}")]
    SchemaAltered {
        version: SyntacticVersion,
        diff: String,
    },

    #[error("schema {version} was inserted before the latest published version {latest}")]
    VersionInserted {
        version: SyntacticVersion,
        latest: SyntacticVersion,
    },

    #[error("lens {from} -> {to} was removed")]
    LensRemoved {
        from: SyntacticVersion,
        to: SyntacticVersion,
    },

    #[error("lens {from} -> {to} was altered")]
    LensAltered {
        from: SyntacticVersion,
        to: SyntacticVersion,
    },
}

/// Errors from the JSON / YAML data codecs
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("{document}: invalid JSON: {source}")]
    Json {
        document: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{document}: invalid YAML: {source}")]
    Yaml {
        document: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors from a version multiplexer
#[derive(Error, Debug)]
pub enum MuxError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("data invalid against all versions ({versions}), error against {target}:\n{source}")]
    NoMatchingVersion {
        versions: String,
        target: SyntacticVersion,
        #[source]
        source: ValidationFailure,
    },

    #[error(transparent)]
    Translate(#[from] TranslateError),
}

/// Errors from moving host values in and out of a schema
#[derive(Error, Debug)]
pub enum DataError {
    #[error("could not convert data: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] ValidationFailure),
}
