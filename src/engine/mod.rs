//! Constraint engine seam
//!
//! Lineage binding, validation and translation only ever talk to a
//! [`ConstraintEngine`]. The crate ships [`StructuralEngine`], which
//! evaluates the JSON constraint language in [`constraint`].

pub mod constraint;
pub mod structural;

pub use constraint::{Bounds, Constraint, Field, KindSet, ParseError, StructConstraint};
pub use structural::StructuralEngine;

use serde_json::Value;
use std::fmt;

/// A source position: the document a value came from and where in it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub document: String,
    pub path: String,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.document)
        } else {
            write!(f, "{}:{}", self.document, self.path)
        }
    }
}

/// One operand named by a diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagValue {
    pub text: String,
    pub kinds: KindSet,
}

/// A raw, positioned engine diagnostic.
///
/// `values` holds one operand for one-sided problems (a missing or excess
/// field) and two, schema first, for conflicts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub path: Vec<String>,
    pub values: Vec<DiagValue>,
    pub positions: Vec<Position>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.join("."), self.message)?;
        for v in &self.values {
            write!(f, " `{}`", v.text)?;
        }
        Ok(())
    }
}

/// Why a subsumption check failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subsumption {
    pub path: Vec<String>,
    pub reason: String,
}

impl fmt::Display for Subsumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.reason)
        } else {
            write!(f, "{}: {}", self.path.join("."), self.reason)
        }
    }
}

/// Where a validation happens: the bookkeeping root label prefixed to every
/// diagnostic path, and the names of the two documents involved.
#[derive(Debug, Clone, Copy)]
pub struct Site<'a> {
    pub root: &'a str,
    pub schema_document: &'a str,
    pub data_document: &'a str,
}

/// The capabilities the lineage core consumes from a constraint solver.
pub trait ConstraintEngine: Send + Sync {
    /// Native validity: problems that make the constraint unusable
    /// (empty bounds, explicit bottoms, defaults that violate their field).
    fn check(&self, schema: &Constraint) -> Vec<Diagnostic>;

    /// `Ok` when every concrete instance of `specific` is an instance of
    /// `general`.
    fn subsumes(&self, general: &Constraint, specific: &Constraint) -> Result<(), Subsumption>;

    /// Merge `data` with `schema`, materialising declared defaults for absent
    /// required fields. Never fails; conflicts surface in [`Self::validate`].
    fn unify(&self, schema: &Constraint, data: &Value) -> Value;

    /// Final structural and concreteness check of `data` against `schema`.
    fn validate(&self, schema: &Constraint, data: &Value, site: &Site<'_>) -> Vec<Diagnostic>;

    /// Every declared default, keyed by field path.
    fn defaults(&self, schema: &Constraint) -> Vec<(Vec<String>, Value)>;
}
