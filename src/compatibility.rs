//! Compatibility checking
//!
//! Two kinds of check live here: the pairwise invariant every adjacent pair
//! of schemas in a lineage must satisfy at bind time, and the append-only
//! audit between two publications of the same lineage.

use serde::Serialize;
use similar::{ChangeTag, TextDiff};
use std::collections::BTreeMap;

use crate::engine::{Constraint, ConstraintEngine};
use crate::error::{AppendOnlyError, LineageError, Result};
use crate::lineage::{Lineage, Schema};
use crate::version::SyntacticVersion;

/// Check the compatibility invariant between two adjacent schemas.
///
/// A minor bump must accept every instance of its predecessor. A sequence
/// bump must not, otherwise it should have been a minor bump.
pub(crate) fn check_adjacent(
    engine: &dyn ConstraintEngine,
    (prev, prev_schema): (SyntacticVersion, &Constraint),
    (next, next_schema): (SyntacticVersion, &Constraint),
) -> Result<()> {
    let subsumed = engine.subsumes(next_schema, prev_schema);
    match (prev.same_sequence(&next), subsumed) {
        (true, Err(why)) => Err(LineageError::CompatInvariant {
            predecessor: prev,
            successor: next,
            detail: why.to_string(),
        }),
        (false, Ok(())) => Err(LineageError::CompatInvariant {
            predecessor: prev,
            successor: next,
            detail: "every instance of the predecessor is an instance of the successor".into(),
        }),
        _ => Ok(()),
    }
}

/// Kind of difference between two publications of a lineage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// A schema newer than everything published before
    VersionAppended,
    /// A new explicit lens
    LensAdded,
    NameChanged,
    VersionRemoved,
    SchemaAltered,
    VersionInserted,
    LensRemoved,
    LensAltered,
}

impl ChangeType {
    /// Whether this change rewrites published history
    pub fn rewrites_history(&self) -> bool {
        !matches!(self, ChangeType::VersionAppended | ChangeType::LensAdded)
    }
}

/// A detected change between two publications
#[derive(Debug, Clone, Serialize)]
pub struct LineageChange {
    pub change_type: ChangeType,
    pub description: String,
    /// Set for changes that rewrite history
    #[serde(skip)]
    pub violation: Option<AppendOnlyError>,
}

/// Every difference between two publications of a lineage
#[derive(Debug, Clone, Serialize)]
pub struct AppendOnlyReport {
    pub is_append_only: bool,
    pub changes: Vec<LineageChange>,
    pub summary: String,
}

impl AppendOnlyReport {
    fn new(changes: Vec<LineageChange>) -> Self {
        let violations = changes.iter().filter(|c| c.violation.is_some()).count();
        let summary = match (changes.len(), violations) {
            (0, _) => "No changes detected".to_string(),
            (n, 0) => format!("{} append-only changes detected", n),
            (_, v) => format!("{} changes rewrite published history", v),
        };
        Self {
            is_append_only: violations == 0,
            changes,
            summary,
        }
    }

    /// The history-rewriting changes, in detection order
    pub fn violations(&self) -> impl Iterator<Item = &AppendOnlyError> {
        self.changes.iter().filter_map(|c| c.violation.as_ref())
    }
}

fn change(change_type: ChangeType, violation: Option<AppendOnlyError>, description: String) -> LineageChange {
    LineageChange {
        change_type,
        description,
        violation,
    }
}

fn violation(change_type: ChangeType, err: AppendOnlyError) -> LineageChange {
    let description = err.to_string();
    change(change_type, Some(err), description)
}

/// Compare two publications of a lineage.
pub fn append_only_report(older: &Lineage, newer: &Lineage) -> AppendOnlyReport {
    let mut changes = Vec::new();

    if older.name() != newer.name() {
        changes.push(violation(
            ChangeType::NameChanged,
            AppendOnlyError::NameChanged {
                older: older.name().to_string(),
                newer: newer.name().to_string(),
            },
        ));
    }

    for old in older.schemas() {
        match newer.schema(old.version()) {
            Err(_) => changes.push(violation(
                ChangeType::VersionRemoved,
                AppendOnlyError::VersionRemoved {
                    version: old.version(),
                },
            )),
            Ok(new) if !old.checksum().verify_json(&new.constraint().to_json()) => changes.push(violation(
                ChangeType::SchemaAltered,
                AppendOnlyError::SchemaAltered {
                    version: old.version(),
                    diff: schema_diff(&old, &new),
                },
            )),
            Ok(_) => {}
        }
    }

    let latest = older.latest().version();
    for new in newer.schemas() {
        let v = new.version();
        if older.schema(v).is_ok() {
            continue;
        }
        if v > latest {
            changes.push(change(
                ChangeType::VersionAppended,
                None,
                format!("schema {} appended", v),
            ));
        } else {
            changes.push(violation(
                ChangeType::VersionInserted,
                AppendOnlyError::VersionInserted { version: v, latest },
            ));
        }
    }

    let old_lenses: BTreeMap<_, _> = older.inner().lenses.declared().collect();
    let new_lenses: BTreeMap<_, _> = newer.inner().lenses.declared().collect();
    for (&(from, to), raw) in &old_lenses {
        match new_lenses.get(&(from, to)) {
            None => changes.push(violation(
                ChangeType::LensRemoved,
                AppendOnlyError::LensRemoved { from, to },
            )),
            Some(new_raw) if new_raw != raw => changes.push(violation(
                ChangeType::LensAltered,
                AppendOnlyError::LensAltered { from, to },
            )),
            Some(_) => {}
        }
    }
    for &(from, to) in new_lenses.keys() {
        if !old_lenses.contains_key(&(from, to)) {
            changes.push(change(
                ChangeType::LensAdded,
                None,
                format!("lens {} -> {} added", from, to),
            ));
        }
    }

    AppendOnlyReport::new(changes)
}

/// Check that `newer` only appends to `older`: every published schema is
/// kept unchanged, new schemas come after the latest published one, and
/// every declared lens is kept unchanged.
pub fn is_append_only(older: &Lineage, newer: &Lineage) -> std::result::Result<(), AppendOnlyError> {
    match append_only_report(older, newer).violations().next() {
        Some(err) => Err(err.clone()),
        None => Ok(()),
    }
}

fn pretty(schema: &Schema<'_>) -> String {
    let canonical = schema.constraint().to_json();
    serde_json::to_string_pretty(&canonical).unwrap_or_else(|_| canonical.to_string())
}

/// Line diff of two schemas' canonical forms
fn schema_diff(old: &Schema<'_>, new: &Schema<'_>) -> String {
    let old_text = pretty(old);
    let new_text = pretty(new);
    let diff = TextDiff::from_lines(&old_text, &new_text);

    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        out.push_str(sign);
        out.push_str(change.value());
        if change.missing_newline() {
            out.push('\n');
        }
    }
    out
}
