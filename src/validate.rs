//! Validation failures and the diagnostic classifier
//!
//! The engine reports raw [`Diagnostic`]s. [`classify`] turns each into a
//! [`ValidationError`] with one of four codes, the field path relative to the
//! schema root, and the schema-side and data-side source positions.

use std::fmt;

use crate::engine::{Diagnostic, Position};
use crate::version::SyntacticVersion;

/// Why data failed a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationCode {
    /// The data's value kind is not one the schema admits at all.
    KindConflict,
    /// The kinds agree but the value falls outside the schema's constraints.
    OutOfBounds,
    /// A field the schema requires is absent from the data.
    MissingField,
    /// The data has a field a closed schema does not declare.
    ExcessField,
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::KindConflict => "kind conflict",
            Self::OutOfBounds => "out of bounds",
            Self::MissingField => "missing field",
            Self::ExcessField => "excess field",
        };
        f.write_str(s)
    }
}

/// Which schema and which field a [`ValidationError`] is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coords {
    pub lineage: String,
    pub version: SyntacticVersion,
    pub field_path: Vec<String>,
}

impl fmt::Display for Coords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{}@v{}>.{}",
            self.lineage,
            self.version,
            self.field_path.join(".")
        )
    }
}

/// A single classified validation problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub code: ValidationCode,
    pub coords: Coords,
    pub schema_positions: Vec<Position>,
    pub data_positions: Vec<Position>,
    /// What the schema expected. Absent for excess fields.
    pub schema_value: Option<String>,
    /// What the data contained. Absent for missing fields.
    pub data_value: Option<String>,
}

impl ValidationError {
    /// Dotted path of the offending field, relative to the schema root
    pub fn field_path(&self) -> String {
        self.coords.field_path.join(".")
    }
}

fn write_positions(f: &mut fmt::Formatter<'_>, positions: &[Position]) -> fmt::Result {
    for pos in positions {
        write!(f, "\n\t\t{}", pos)?;
    }
    Ok(())
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: validation failed, data is not an instance:", self.coords)?;
        let sv = self.schema_value.as_deref().unwrap_or("_");
        let dv = self.data_value.as_deref().unwrap_or("_");
        match self.code {
            ValidationCode::MissingField => {
                write!(f, "\n\tschema specifies that field exists with type {}", sv)?;
                write_positions(f, &self.schema_positions)?;
                f.write_str("\n\tbut field was absent from data")?;
                write_positions(f, &self.data_positions)
            }
            ValidationCode::ExcessField => {
                f.write_str("\n\tschema is closed and does not specify field")?;
                write_positions(f, &self.schema_positions)?;
                write!(f, "\n\tbut field exists in data with value {}", dv)?;
                write_positions(f, &self.data_positions)
            }
            ValidationCode::KindConflict | ValidationCode::OutOfBounds => {
                write!(f, "\n\tschema expected `{}`", sv)?;
                write_positions(f, &self.schema_positions)?;
                write!(f, "\n\tbut data contained `{}`", dv)?;
                write_positions(f, &self.data_positions)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Every problem found in one validation; never empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    errors: Vec<ValidationError>,
}

impl ValidationFailure {
    pub(crate) fn new(errors: Vec<ValidationError>) -> Self {
        debug_assert!(!errors.is_empty());
        Self { errors }
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn first(&self) -> &ValidationError {
        &self.errors[0]
    }

    /// True if any error carries `code`
    pub fn has(&self, code: ValidationCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub fn into_errors(self) -> Vec<ValidationError> {
        self.errors
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationFailure {}

/// Classify raw engine diagnostics for `version` of `lineage`.
///
/// Returns `None` when there is nothing to report.
pub fn classify(
    diagnostics: Vec<Diagnostic>,
    lineage: &str,
    version: SyntacticVersion,
) -> Option<ValidationFailure> {
    let errors: Vec<ValidationError> = diagnostics
        .into_iter()
        .map(|d| classify_one(d, lineage, version))
        .collect();
    if errors.is_empty() {
        None
    } else {
        Some(ValidationFailure::new(errors))
    }
}

fn classify_one(d: Diagnostic, lineage: &str, version: SyntacticVersion) -> ValidationError {
    let (schema_positions, data_positions) = split_positions(d.positions);
    let coords = Coords {
        lineage: lineage.to_string(),
        version,
        field_path: trim_path(&d.path),
    };

    let mut values = d.values.into_iter();
    let (code, schema_value, data_value) = match (values.next(), values.next(), values.next()) {
        (Some(only), None, None) if d.message.contains("incomplete") => {
            (ValidationCode::MissingField, Some(only.text), None)
        }
        (Some(only), None, None) if d.message.contains("not allowed") => {
            (ValidationCode::ExcessField, None, Some(only.text))
        }
        (Some(sch), Some(data), None) => {
            let code = if data.kinds.is_any_of(sch.kinds) {
                ValidationCode::OutOfBounds
            } else {
                ValidationCode::KindConflict
            };
            (code, Some(sch.text), Some(data.text))
        }
        // Anything else still means the data is not an instance.
        (sch, data, _) => (
            ValidationCode::KindConflict,
            sch.map(|v| v.text),
            data.map(|v| v.text),
        ),
    };

    ValidationError {
        code,
        coords,
        schema_positions,
        data_positions,
        schema_value,
        data_value,
    }
}

/// Data positions are everything from the first position in the same
/// document as the last position onward.
fn split_positions(mut positions: Vec<Position>) -> (Vec<Position>, Vec<Position>) {
    let split = match positions.last() {
        Some(last) => {
            let data_doc = last.document.clone();
            positions
                .iter()
                .position(|p| p.document == data_doc)
                .unwrap_or(0)
        }
        None => return (Vec::new(), Vec::new()),
    };
    let data = positions.split_off(split);
    (positions, data)
}

/// Strip bookkeeping segments: the leading `#` definition label, or a
/// document prefix `[<lineage>] schemas <index> <key>`. Data fields named
/// `schemas` are left alone.
fn trim_path(parts: &[String]) -> Vec<String> {
    if parts.first().is_some_and(|s| s.starts_with('#')) {
        return parts[1..].to_vec();
    }
    let document_prefix = parts.iter().take(2).position(|s| s == "schemas").filter(|&i| {
        parts
            .get(i + 1)
            .is_some_and(|idx| idx.parse::<usize>().is_ok())
    });
    match document_prefix {
        Some(i) => parts.get(i + 3..).unwrap_or_default().to_vec(),
        None => parts.get(1..).unwrap_or_default().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DiagValue, KindSet};
    use crate::version::sv;

    fn pos(doc: &str, path: &str) -> Position {
        Position {
            document: doc.into(),
            path: path.into(),
        }
    }

    fn val(text: &str, kinds: KindSet) -> DiagValue {
        DiagValue {
            text: text.into(),
            kinds,
        }
    }

    fn diag(message: &str, values: Vec<DiagValue>) -> Diagnostic {
        Diagnostic {
            message: message.into(),
            path: vec!["#thing00".into(), "a".into(), "b".into()],
            values,
            positions: vec![pos("lineage", "#thing00.a.b"), pos("data", "a.b")],
        }
    }

    fn code_of(d: Diagnostic) -> ValidationCode {
        classify(vec![d], "thing", sv(0, 0)).unwrap().first().code
    }

    #[test]
    fn test_classifier_taxonomy() {
        assert_eq!(
            code_of(diag("incomplete value", vec![val("int", KindSet::INT)])),
            ValidationCode::MissingField
        );
        assert_eq!(
            code_of(diag("field not allowed", vec![val("3", KindSet::INT)])),
            ValidationCode::ExcessField
        );
        assert_eq!(
            code_of(diag(
                "out of bounds",
                vec![val("uint8", KindSet::INT), val("300", KindSet::INT)]
            )),
            ValidationCode::OutOfBounds
        );
        assert_eq!(
            code_of(diag(
                "conflicting values",
                vec![val("string", KindSet::STRING), val("1", KindSet::INT)]
            )),
            ValidationCode::KindConflict
        );
        assert_eq!(
            code_of(diag("something else", vec![val("x", KindSet::STRING)])),
            ValidationCode::KindConflict
        );
    }

    #[test]
    fn test_classifier_coords_and_positions() {
        let failure = classify(
            vec![diag(
                "conflicting values",
                vec![val("string", KindSet::STRING), val("1", KindSet::INT)],
            )],
            "thing",
            sv(1, 2),
        )
        .unwrap();
        let e = failure.first();
        assert_eq!(e.coords.to_string(), "<thing@v1.2>.a.b");
        assert_eq!(e.schema_positions, vec![pos("lineage", "#thing00.a.b")]);
        assert_eq!(e.data_positions, vec![pos("data", "a.b")]);

        let msg = e.to_string();
        assert!(msg.contains("schema expected `string`"));
        assert!(msg.contains("but data contained `1`"));
    }

    #[test]
    fn test_trim_path() {
        let s = |v: &[&str]| v.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        assert_eq!(trim_path(&s(&["#x10", "a"])), s(&["a"]));
        assert_eq!(trim_path(&s(&["lin", "schemas", "0", "schema", "f"])), s(&["f"]));
        assert!(trim_path(&s(&["schemas", "0"])).is_empty());
        assert!(trim_path(&[]).is_empty());

        // User data may have a field called `schemas`.
        assert_eq!(trim_path(&s(&["#x00", "schemas", "count"])), s(&["schemas", "count"]));
        assert_eq!(trim_path(&s(&["#x00", "schemas", "0", "schema"])), s(&["schemas", "0", "schema"]));
    }

    #[test]
    fn test_field_named_schemas_keeps_its_path() {
        let lin = crate::bind::bind_lineage(
            &serde_json::json!({"name": "thing", "schemas": [
                {"version": [0, 0], "schema": {"schemas": {"count": "int"}}}
            ]}),
            &crate::runtime::Runtime::structural(),
            crate::bind::BindOptions::new(),
        )
        .unwrap();
        let failure = lin
            .first()
            .validate(&serde_json::json!({"schemas": {"count": "x"}}))
            .unwrap_err();
        assert_eq!(failure.first().code, ValidationCode::KindConflict);
        assert_eq!(failure.first().field_path(), "schemas.count");
    }

    #[test]
    fn test_split_positions_last_document_is_data() {
        let (s, d) = split_positions(vec![
            pos("lineage", "x"),
            pos("data", "a"),
            pos("lineage", "y"),
            pos("data", "b"),
        ]);
        assert_eq!(s.len(), 1);
        assert_eq!(d.len(), 3);
        assert_eq!(split_positions(Vec::new()), (Vec::new(), Vec::new()));
    }

    #[test]
    fn test_empty_diagnostics_classify_to_none() {
        assert!(classify(Vec::new(), "thing", sv(0, 0)).is_none());
    }
}
