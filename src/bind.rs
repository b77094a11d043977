//! Lineage binding
//!
//! [`bind_lineage`] is the only way to get a [`Lineage`]. A candidate passes
//! through these checks in order, stopping at the first failure:
//!
//! 1. existence
//! 2. lineage shape (`name` plus `schemas` or `sequences`)
//! 3. native validity of every schema
//! 4. version concreteness and ordering
//! 5. pairwise compatibility (skippable)
//! 6. lenses, then declared examples
//!
//! The runtime's engine is held exclusively for the whole bind.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use crate::checksum::Checksum;
use crate::compatibility::check_adjacent;
use crate::engine::{Constraint, ConstraintEngine, Site};
use crate::error::{LineageError, Result};
use crate::instance::Instance;
use crate::lacuna::Lacuna;
use crate::lens::{value_at, DeclarativeLens, FnLens, Lens, LensEntry, LensGraph, LensOrigin, LensRegistry};
use crate::lineage::{Lineage, LineageInner, Schema, SchemaNode};
use crate::runtime::Runtime;
use crate::validate::classify;
use crate::version::{SyntacticVersion, VersionIndex};

/// Environment variable forcing compatibility checks on, whatever
/// [`BindOptions::skip_compat_checks`] says. Any non-empty value counts.
pub const FORCE_VERIFY_ENV: &str = "LINEAGE_FORCE_VERIFY";

const LINEAGE_KEYS: [&str; 4] = ["name", "schemas", "sequences", "lenses"];
const SCHEMA_KEYS: [&str; 3] = ["version", "schema", "examples"];
const SEQUENCE_KEYS: [&str; 1] = ["schemas"];

/// Whether [`FORCE_VERIFY_ENV`] is set. Read once per process.
pub fn force_verify_from_env() -> bool {
    static FORCE: OnceLock<bool> = OnceLock::new();
    *FORCE.get_or_init(|| std::env::var_os(FORCE_VERIFY_ENV).is_some_and(|v| !v.is_empty()))
}

#[derive(Clone)]
struct SuppliedLens {
    from: SyntacticVersion,
    to: SyntacticVersion,
    lens: Arc<dyn Lens>,
}

/// Options for [`bind_lineage`]
#[derive(Clone, Default)]
pub struct BindOptions {
    skip_compat_checks: bool,
    force_verify: bool,
    lenses: Vec<SuppliedLens>,
    source_name: Option<String>,
}

impl BindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip the pairwise compatibility checks. Ignored when verification is
    /// forced.
    pub fn skip_compat_checks(mut self) -> Self {
        self.skip_compat_checks = true;
        self
    }

    /// Run every check regardless of other options
    pub fn force_verify(mut self) -> Self {
        self.force_verify = true;
        self
    }

    /// Supply an explicit lens in code for the `from -> to` hop.
    pub fn with_lens(mut self, from: SyntacticVersion, to: SyntacticVersion, lens: impl Lens + 'static) -> Self {
        self.lenses.push(SuppliedLens {
            from,
            to,
            lens: Arc::new(lens),
        });
        self
    }

    /// [`BindOptions::with_lens`] for a plain closure
    pub fn with_lens_fn<F>(self, from: SyntacticVersion, to: SyntacticVersion, f: F) -> Self
    where
        F: Fn(&Instance<'_>, &Schema<'_>) -> (Value, Vec<Lacuna>) + Send + Sync + 'static,
    {
        self.with_lens(from, to, FnLens::new(f))
    }

    /// Document name reported for schema-side positions in diagnostics.
    /// Defaults to the lineage name.
    pub fn source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }

    /// Whether compatibility checks will actually run
    pub fn verifies_compat(&self) -> bool {
        !self.skip_compat_checks || self.force_verify || force_verify_from_env()
    }
}

impl fmt::Debug for BindOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lenses: Vec<String> = self
            .lenses
            .iter()
            .map(|l| format!("{} -> {}", l.from, l.to))
            .collect();
        f.debug_struct("BindOptions")
            .field("skip_compat_checks", &self.skip_compat_checks)
            .field("force_verify", &self.force_verify)
            .field("lenses", &lenses)
            .field("source_name", &self.source_name)
            .finish()
    }
}

/// Bind the lineage found at dotted `path` inside `root`.
pub fn bind_lineage_at(root: &Value, path: &str, runtime: &Arc<Runtime>, opts: BindOptions) -> Result<Lineage> {
    let raw = value_at(root, path).ok_or_else(|| LineageError::ValueNotExist {
        path: Some(path.to_string()),
    })?;
    bind_lineage(raw, runtime, opts)
}

/// Verify `raw` against every lineage invariant and bind it.
pub fn bind_lineage(raw: &Value, runtime: &Arc<Runtime>, opts: BindOptions) -> Result<Lineage> {
    let guard = runtime.exclusive();
    let engine: &dyn ConstraintEngine = &**guard;

    check_exists(raw)?;
    let shape = check_lineage_shape(raw)?;
    debug!(lineage = %shape.name, "candidate has lineage shape");

    let candidates = check_native_validity(engine, &shape)?;
    let (index, candidates) = check_versions(candidates)?;

    if opts.verifies_compat() {
        for pair in candidates.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            check_adjacent(engine, (prev.version, &prev.constraint), (next.version, &next.constraint))?;
        }
        debug!(lineage = %shape.name, "compatibility invariants hold");
    } else {
        warn!(lineage = %shape.name, "skipping lineage compatibility checks");
    }

    let lenses = bind_lenses(&shape, &index, &opts)?;

    let source = opts.source_name.clone().unwrap_or_else(|| shape.name.to_string());
    let schemas = candidates
        .into_iter()
        .map(|c| into_node(c, shape.name))
        .collect::<Vec<_>>();
    check_examples(engine, shape.name, &source, &schemas)?;

    let graph = LensGraph::build(&index, &lenses);
    let latest = schemas.last().map(|n| n.checksum.short()).unwrap_or_default();
    info!(
        lineage = %shape.name,
        versions = index.len(),
        lenses = lenses.len(),
        graph_edges = graph.edge_count(),
        latest,
        "bound lineage"
    );

    Ok(Lineage::from_inner(LineageInner {
        name: shape.name.to_string(),
        source,
        raw: raw.clone(),
        runtime: Arc::clone(runtime),
        index,
        schemas,
        lenses,
        graph,
    }))
}

enum SchemaList<'r> {
    Flat(&'r [Value]),
    Nested(&'r [Value]),
}

struct Shape<'r> {
    name: &'r str,
    schemas: SchemaList<'r>,
    lenses: &'r [Value],
}

/// One schema on its way through binding
struct Candidate<'r> {
    label: String,
    version_raw: Option<Value>,
    version: SyntacticVersion,
    raw: &'r Value,
    constraint: Constraint,
    examples: BTreeMap<String, Value>,
}

fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "struct",
    }
}

fn check_exists(raw: &Value) -> Result<()> {
    if raw.is_null() {
        return Err(LineageError::ValueNotExist { path: None });
    }
    Ok(())
}

fn check_lineage_shape(raw: &Value) -> Result<Shape<'_>> {
    let obj = raw
        .as_object()
        .ok_or_else(|| LineageError::not_a_lineage(format!("expected a struct, found {}", kind_name(raw))))?;

    let name = match obj.get("name") {
        None => return Err(LineageError::not_a_lineage("missing name")),
        Some(Value::String(s)) if !s.is_empty() => s.as_str(),
        Some(_) => return Err(LineageError::invalid("name must be a concrete, non-empty string")),
    };

    let schemas = match (obj.get("schemas"), obj.get("sequences")) {
        (None, None) => return Err(LineageError::not_a_lineage("missing schemas")),
        (Some(_), Some(_)) => {
            return Err(LineageError::invalid("declare either schemas or sequences, not both"))
        }
        (Some(v), None) => SchemaList::Flat(non_empty_list(v, "schemas")?),
        (None, Some(v)) => SchemaList::Nested(non_empty_list(v, "sequences")?),
    };

    if let Some(bad) = obj.keys().find(|k| !LINEAGE_KEYS.contains(&k.as_str())) {
        return Err(LineageError::invalid(format!("field {:?} not allowed in a lineage", bad)));
    }

    let lenses = match obj.get("lenses") {
        None => &[][..],
        Some(Value::Array(items)) => items.as_slice(),
        Some(other) => {
            return Err(LineageError::invalid(format!(
                "lenses must be a list, found {}",
                kind_name(other)
            )))
        }
    };

    Ok(Shape { name, schemas, lenses })
}

fn non_empty_list<'r>(v: &'r Value, field: &str) -> Result<&'r [Value]> {
    match v {
        Value::Array(items) if items.is_empty() => Err(LineageError::invalid(format!(
            "{} must contain at least one entry",
            field
        ))),
        Value::Array(items) => Ok(items.as_slice()),
        other => Err(LineageError::invalid(format!(
            "{} must be a list, found {}",
            field,
            kind_name(other)
        ))),
    }
}

fn expect_struct<'r>(v: &'r Value, label: &str, allowed: &[&str]) -> Result<&'r Map<String, Value>> {
    let obj = v.as_object().ok_or_else(|| {
        LineageError::invalid(format!("{}: expected a struct, found {}", label, kind_name(v)))
    })?;
    if let Some(bad) = obj.keys().find(|k| !allowed.contains(&k.as_str())) {
        return Err(LineageError::invalid(format!("{}: field {:?} not allowed", label, bad)));
    }
    Ok(obj)
}

fn check_native_validity<'r>(engine: &dyn ConstraintEngine, shape: &Shape<'r>) -> Result<Vec<Candidate<'r>>> {
    // (label, declared version, schema, examples)
    let mut entries: Vec<(String, Option<Value>, &'r Value, Option<&'r Value>)> = Vec::new();
    match shape.schemas {
        SchemaList::Flat(items) => {
            for (i, item) in items.iter().enumerate() {
                let label = format!("schemas[{}]", i);
                let obj = expect_struct(item, &label, &SCHEMA_KEYS)?;
                let schema = obj
                    .get("schema")
                    .ok_or_else(|| LineageError::invalid(format!("{}: missing schema", label)))?;
                entries.push((label, obj.get("version").cloned(), schema, obj.get("examples")));
            }
        }
        SchemaList::Nested(sequences) => {
            for (seq, item) in sequences.iter().enumerate() {
                let label = format!("sequences[{}]", seq);
                let obj = expect_struct(item, &label, &SEQUENCE_KEYS)?;
                let schemas = obj
                    .get("schemas")
                    .ok_or_else(|| LineageError::invalid(format!("{}: missing schemas", label)))?;
                for (minor, schema) in non_empty_list(schemas, &label)?.iter().enumerate() {
                    entries.push((
                        format!("{}.schemas[{}]", label, minor),
                        Some(Value::from(vec![seq, minor])),
                        schema,
                        None,
                    ));
                }
            }
        }
    }

    entries
        .into_iter()
        .map(|(label, version_raw, raw, examples)| {
            let constraint = Constraint::parse(raw)
                .map_err(|e| LineageError::invalid(format!("{}: {}", label, e)))?;
            if constraint.as_struct().is_none() {
                return Err(LineageError::invalid(format!(
                    "{}: a schema must be a struct, found {}",
                    label, constraint
                )));
            }

            let problems = engine.check(&constraint);
            if !problems.is_empty() {
                let detail: Vec<String> = problems.iter().map(|d| d.to_string()).collect();
                return Err(LineageError::invalid(format!("{}: {}", label, detail.join("; "))));
            }

            let examples = match examples {
                None => BTreeMap::new(),
                Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                Some(other) => {
                    return Err(LineageError::invalid(format!(
                        "{}: examples must be a struct of named values, found {}",
                        label,
                        kind_name(other)
                    )))
                }
            };

            Ok(Candidate {
                label,
                version_raw,
                version: SyntacticVersion::FIRST,
                raw,
                constraint,
                examples,
            })
        })
        .collect()
}

fn decode_version(v: &Value) -> Option<SyntacticVersion> {
    let pair = v.as_array()?;
    if pair.len() != 2 {
        return None;
    }
    let part = |x: &Value| x.as_u64().and_then(|n| u32::try_from(n).ok());
    Some(SyntacticVersion::new(part(&pair[0])?, part(&pair[1])?))
}

fn check_versions(mut candidates: Vec<Candidate<'_>>) -> Result<(VersionIndex, Vec<Candidate<'_>>)> {
    let mut previous: Option<SyntacticVersion> = None;
    for c in candidates.iter_mut() {
        let version = c.version_raw.as_ref().and_then(decode_version).ok_or_else(|| {
            LineageError::invalid(format!(
                "{}: version must be a concrete [sequence, minor] pair",
                c.label
            ))
        })?;

        match previous {
            None if version != SyntacticVersion::FIRST => {
                return Err(LineageError::out_of_order(format!(
                    "first schema must have version {}, found {}",
                    SyntacticVersion::FIRST,
                    version
                )))
            }
            Some(prev) => {
                let expected: Vec<SyntacticVersion> = [prev.next_minor(), prev.next_sequence()]
                    .into_iter()
                    .flatten()
                    .collect();
                if !expected.contains(&version) {
                    let expected: Vec<String> = expected.iter().map(ToString::to_string).collect();
                    return Err(LineageError::out_of_order(format!(
                        "schema {} follows {}; expected {}",
                        version,
                        prev,
                        if expected.is_empty() {
                            "nothing, the version space is exhausted".to_string()
                        } else {
                            expected.join(" or ")
                        }
                    )));
                }
            }
            _ => {}
        }

        c.version = version;
        previous = Some(version);
    }

    let index = VersionIndex::new(candidates.iter().map(|c| c.version).collect());
    Ok((index, candidates))
}

fn bind_lenses(shape: &Shape<'_>, index: &VersionIndex, opts: &BindOptions) -> Result<LensRegistry> {
    let mut registry = LensRegistry::default();
    for raw in shape.lenses {
        let lens = DeclarativeLens::parse(raw)?;
        let (from, to) = (lens.from(), lens.to());
        registry.register(
            index,
            from,
            to,
            LensEntry {
                lens: Arc::new(lens),
                origin: LensOrigin::Declared(raw.clone()),
            },
        )?;
    }
    for supplied in &opts.lenses {
        registry.register(
            index,
            supplied.from,
            supplied.to,
            LensEntry {
                lens: Arc::clone(&supplied.lens),
                origin: LensOrigin::Supplied,
            },
        )?;
    }
    registry.require_boundaries(index)?;
    debug!(lineage = %shape.name, lenses = registry.len(), "lenses registered");
    Ok(registry)
}

/// Bookkeeping root label for the schema's diagnostics, e.g. `#widget10`
fn def_label(name: &str, v: SyntacticVersion) -> String {
    let clean: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("#{}{}{}", clean, v.sequence, v.minor)
}

fn into_node(c: Candidate<'_>, lineage: &str) -> SchemaNode {
    SchemaNode {
        version: c.version,
        raw: c.raw.clone(),
        checksum: Checksum::from_json(&c.constraint.to_json()),
        def_label: def_label(lineage, c.version),
        constraint: c.constraint,
        examples: c.examples,
    }
}

fn check_examples(engine: &dyn ConstraintEngine, lineage: &str, source: &str, schemas: &[SchemaNode]) -> Result<()> {
    for node in schemas {
        for (name, data) in &node.examples {
            let site = Site {
                root: &node.def_label,
                schema_document: source,
                data_document: name,
            };
            let unified = engine.unify(&node.constraint, data);
            let diagnostics = engine.validate(&node.constraint, &unified, &site);
            if let Some(failure) = classify(diagnostics, lineage, node.version) {
                return Err(LineageError::invalid(format!(
                    "example {:?} is not an instance of schema {}:\n{}",
                    name, node.version, failure
                )));
            }
        }
    }
    Ok(())
}
