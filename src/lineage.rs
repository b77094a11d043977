//! Bound lineages and their schemas
//!
//! A [`Lineage`] only comes out of [`crate::bind_lineage`]; once bound it is
//! immutable and cheap to clone. [`Schema`] is a borrowed view of one version
//! inside it, so it can never outlive the lineage or be built by hand.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::checksum::Checksum;
use crate::config::ValidationConfig;
use crate::engine::{Constraint, Site};
use crate::error::{DataError, LineageError, Result};
use crate::instance::Instance;
use crate::lens::{Hop, Lens, LensGraph, LensRegistry};
use crate::runtime::Runtime;
use crate::validate::{classify, ValidationFailure};
use crate::version::{SyntacticVersion, VersionIndex};

/// Default name for data handed to [`Schema::validate`]
pub const DEFAULT_DATA_NAME: &str = "data";

pub(crate) struct SchemaNode {
    pub(crate) version: SyntacticVersion,
    pub(crate) raw: Value,
    pub(crate) constraint: Constraint,
    /// Bookkeeping root label for diagnostics paths
    pub(crate) def_label: String,
    pub(crate) examples: BTreeMap<String, Value>,
    pub(crate) checksum: Checksum,
}

pub(crate) struct LineageInner {
    pub(crate) name: String,
    /// Document name reported for schema-side positions
    pub(crate) source: String,
    pub(crate) raw: Value,
    pub(crate) runtime: Arc<Runtime>,
    pub(crate) index: VersionIndex,
    /// Parallel to `index`
    pub(crate) schemas: Vec<SchemaNode>,
    pub(crate) lenses: LensRegistry,
    pub(crate) graph: LensGraph,
}

/// A named, ordered history of schemas that has passed every lineage
/// invariant check.
#[derive(Clone)]
pub struct Lineage {
    inner: Arc<LineageInner>,
}

impl Lineage {
    pub(crate) fn from_inner(inner: LineageInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn inner(&self) -> &LineageInner {
        &self.inner
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The raw candidate the lineage was bound from
    pub fn underlying(&self) -> &Value {
        &self.inner.raw
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.inner.runtime
    }

    /// All versions, oldest first
    pub fn versions(&self) -> &[SyntacticVersion] {
        self.inner.index.as_slice()
    }

    /// Schema `0.0`
    pub fn first(&self) -> Schema<'_> {
        Schema { lin: self, idx: 0 }
    }

    pub fn latest(&self) -> Schema<'_> {
        Schema {
            lin: self,
            idx: self.inner.schemas.len() - 1,
        }
    }

    /// Schemas oldest first
    pub fn schemas(&self) -> impl DoubleEndedIterator<Item = Schema<'_>> + ExactSizeIterator + '_ {
        (0..self.inner.schemas.len()).map(move |idx| Schema { lin: self, idx })
    }

    /// Look up the schema with exactly `version`.
    pub fn schema(&self, version: SyntacticVersion) -> Result<Schema<'_>> {
        self.inner
            .index
            .position(version)
            .map(|idx| Schema { lin: self, idx })
            .ok_or_else(|| LineageError::NoSchemaWithVersion {
                lineage: self.name().to_string(),
                version,
            })
    }

    /// Newest version in `sequence`, if the sequence exists
    pub fn latest_version_in_sequence(&self, sequence: u32) -> Option<SyntacticVersion> {
        self.inner.index.latest_in_sequence(sequence)
    }

    /// Validate against each schema oldest first; the first that accepts wins.
    pub fn validate_any(&self, data: &Value) -> Option<Instance<'_>> {
        self.schemas().find_map(|s| s.validate(data).ok())
    }

    /// Validate against each schema newest first; the first that accepts
    /// wins. On total failure the error is the oldest schema's.
    pub fn search_and_validate(&self, data: &Value) -> std::result::Result<Instance<'_>, ValidationFailure> {
        self.first_accepting(self.schemas().rev(), data)
    }

    /// Search in the order `config` asks for. On total failure the error is
    /// that of the last schema tried.
    pub fn search_with(
        &self,
        config: &ValidationConfig,
        data: &Value,
    ) -> std::result::Result<Instance<'_>, ValidationFailure> {
        if config.search_newest_first {
            self.search_and_validate(data)
        } else {
            self.first_accepting(self.schemas(), data)
        }
    }

    fn first_accepting<'a>(
        &'a self,
        schemas: impl Iterator<Item = Schema<'a>>,
        data: &Value,
    ) -> std::result::Result<Instance<'a>, ValidationFailure> {
        let mut last = None;
        for s in schemas {
            match s.validate(data) {
                Ok(inst) => return Ok(inst),
                Err(e) => last = Some(e),
            }
        }
        // Lineages are never empty, so at least one attempt failed.
        Err(last.unwrap_or_else(|| unreachable!("lineage {} has no schemas", self.name())))
    }

    /// Registered explicit lens for exactly `from -> to`
    pub fn lens(&self, from: SyntacticVersion, to: SyntacticVersion) -> Option<Arc<dyn Lens>> {
        self.inner.lenses.get(from, to).cloned()
    }

    /// `(from, to)` of every explicit lens
    pub fn lens_pairs(&self) -> Vec<(SyntacticVersion, SyntacticVersion)> {
        self.inner.lenses.pairs().collect()
    }

    /// Cheapest translation route between two versions, if any
    pub fn route(&self, from: SyntacticVersion, to: SyntacticVersion) -> Option<Vec<Hop>> {
        self.inner.graph.route(from, to)
    }
}

impl fmt::Debug for Lineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lineage")
            .field("name", &self.inner.name)
            .field("versions", &self.inner.index.as_slice())
            .field("lenses", &self.inner.lenses)
            .finish()
    }
}

impl PartialEq for Lineage {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// One version of a [`Lineage`]
#[derive(Clone, Copy)]
pub struct Schema<'a> {
    lin: &'a Lineage,
    idx: usize,
}

impl<'a> Schema<'a> {
    fn node(&self) -> &'a SchemaNode {
        &self.lin.inner.schemas[self.idx]
    }

    fn at(&self, version: SyntacticVersion) -> Option<Schema<'a>> {
        self.lin
            .inner
            .index
            .position(version)
            .map(|idx| Schema { lin: self.lin, idx })
    }

    pub fn version(&self) -> SyntacticVersion {
        self.node().version
    }

    pub fn lineage(&self) -> &'a Lineage {
        self.lin
    }

    pub fn successor(&self) -> Option<Schema<'a>> {
        let next = self.lin.inner.index.successor(self.version())?;
        self.at(next)
    }

    pub fn predecessor(&self) -> Option<Schema<'a>> {
        let prev = self.lin.inner.index.predecessor(self.version())?;
        self.at(prev)
    }

    /// Newest schema in this schema's sequence
    pub fn latest_in_sequence(&self) -> Schema<'a> {
        self.lin
            .inner
            .index
            .latest_in_sequence(self.version().sequence)
            .and_then(|v| self.at(v))
            .unwrap_or(*self)
    }

    /// The schema as authored
    pub fn underlying(&self) -> &'a Value {
        &self.node().raw
    }

    pub fn constraint(&self) -> &'a Constraint {
        &self.node().constraint
    }

    /// Checksum of the schema's canonical form
    pub fn checksum(&self) -> &'a Checksum {
        &self.node().checksum
    }

    /// Named example instances declared with the schema
    pub fn examples(&self) -> &'a BTreeMap<String, Value> {
        &self.node().examples
    }

    /// Fill the schema's declared defaults into `data`.
    pub fn unify(&self, data: &Value) -> Value {
        self.lin.inner.runtime.shared().unify(self.constraint(), data)
    }

    pub(crate) fn defaults(&self) -> Vec<(Vec<String>, Value)> {
        self.lin.inner.runtime.shared().defaults(self.constraint())
    }

    /// Check `data` against this schema.
    pub fn validate(&self, data: &Value) -> std::result::Result<Instance<'a>, ValidationFailure> {
        self.validate_named(data, DEFAULT_DATA_NAME)
    }

    /// Like [`Schema::validate`], naming the data in diagnostics and on the
    /// resulting instance.
    pub fn validate_named(&self, data: &Value, name: &str) -> std::result::Result<Instance<'a>, ValidationFailure> {
        let node = self.node();
        let site = Site {
            root: &node.def_label,
            schema_document: &self.lin.inner.source,
            data_document: name,
        };
        let diagnostics = {
            let engine = self.lin.inner.runtime.shared();
            let unified = engine.unify(&node.constraint, data);
            engine.validate(&node.constraint, &unified, &site)
        };

        match classify(diagnostics, self.lin.name(), node.version) {
            Some(failure) => Err(failure),
            None => Ok(Instance::new(data.clone(), *self, name)),
        }
    }

    /// Serialize `value` and validate the result.
    pub fn validate_value<T: Serialize>(&self, value: &T) -> std::result::Result<Instance<'a>, DataError> {
        let data = serde_json::to_value(value)?;
        Ok(self.validate(&data)?)
    }
}

impl PartialEq for Schema<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.lin == other.lin && self.idx == other.idx
    }
}

impl fmt::Debug for Schema<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Schema({}@{})", self.lin.name(), self.version())
    }
}

impl fmt::Display for Schema<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.lin.name(), self.version())
    }
}

#[cfg(test)]
mod tests {
    use crate::bind::{bind_lineage, BindOptions};
    use crate::runtime::Runtime;
    use crate::validate::ValidationCode;
    use crate::version::sv;
    use serde_json::json;

    fn lineage() -> crate::Lineage {
        let raw = json!({
            "name": "widget",
            "schemas": [
                {"version": [0, 0], "schema": {"title": "string"}},
                {"version": [0, 1], "schema": {"title": "string", "size?": "uint8"}},
                {"version": [1, 0], "schema": {"label": "string"}}
            ],
            "lenses": [
                {"from": [0, 1], "to": [1, 0], "result": {"label": {"$ref": "input.title"}}}
            ]
        });
        bind_lineage(&raw, &Runtime::structural(), BindOptions::new()).unwrap()
    }

    #[test]
    fn test_graph_navigation() {
        let lin = lineage();
        assert_eq!(lin.first().version(), sv(0, 0));
        assert_eq!(lin.latest().version(), sv(1, 0));
        assert_eq!(lin.first().successor().unwrap().version(), sv(0, 1));
        assert!(lin.first().predecessor().is_none());
        assert!(lin.latest().successor().is_none());
        assert_eq!(lin.first().latest_in_sequence().version(), sv(0, 1));
        assert_eq!(lin.latest_version_in_sequence(1), Some(sv(1, 0)));

        for s in lin.schemas() {
            if let Some(next) = s.successor() {
                assert_eq!(next.predecessor(), Some(s));
            }
        }
    }

    #[test]
    fn test_schema_lookup() {
        let lin = lineage();
        assert!(lin.schema(sv(0, 1)).is_ok());
        let err = lin.schema(sv(4, 0)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NoSchemaWithVersion);
    }

    #[test]
    fn test_validate_any_and_search() {
        let lin = lineage();
        let inst = lin.validate_any(&json!({"title": "x", "size": 3})).unwrap();
        assert_eq!(inst.schema().version(), sv(0, 1));

        let inst = lin.search_and_validate(&json!({"title": "x"})).unwrap();
        assert_eq!(inst.schema().version(), sv(0, 1));

        let err = lin.search_and_validate(&json!({"nothing": 1})).unwrap_err();
        assert_eq!(err.first().coords.version, sv(0, 0));
        assert!(err.has(ValidationCode::ExcessField));
    }

    #[test]
    fn test_search_order_follows_config() {
        let lin = lineage();
        let data = json!({"title": "x"});
        let mut config = crate::config::ValidationConfig::default();

        let inst = lin.search_with(&config, &data).unwrap();
        assert_eq!(inst.schema().version(), sv(0, 1));

        config.search_newest_first = false;
        let inst = lin.search_with(&config, &data).unwrap();
        assert_eq!(inst.schema().version(), sv(0, 0));

        let err = lin.search_with(&config, &json!({"nothing": 1})).unwrap_err();
        assert_eq!(err.first().coords.version, sv(1, 0));
    }

    #[test]
    fn test_validate_value_serializes() {
        #[derive(serde::Serialize)]
        struct Widget {
            title: String,
        }
        let lin = lineage();
        let inst = lin
            .first()
            .validate_value(&Widget { title: "w".into() })
            .unwrap();
        assert_eq!(inst.underlying(), &json!({"title": "w"}));
    }
}
