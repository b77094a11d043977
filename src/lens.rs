//! Lenses: mappings between two schema versions
//!
//! Every hop a translation takes goes through a [`Lens`]. Forward hops inside
//! a sequence use [`ImplicitLens`], which is plain unification with the
//! target schema. Everything else needs an explicit lens, either declared in
//! the lineage document ([`DeclarativeLens`]) or supplied in code at bind
//! time.
//!
//! ## Declarative lens format
//!
//! ```json
//! {
//!   "from": [0, 0],
//!   "to": [1, 0],
//!   "result": {"title": {"$ref": "input.name"}, "count": -1},
//!   "lacunas": [{
//!     "sourceFields": ["input.legacy"],
//!     "targetFields": [],
//!     "type": "DroppedField",
//!     "message": "legacy has no successor"
//!   }]
//! }
//! ```
//!
//! `{"$ref": "input.a.b"}` copies the input value at that path and is
//! omitted when absent. The input is read with its schema's defaults filled
//! in. Everything else in `result` is literal. A lacuna is only emitted when
//! every one of its source fields is present in the input.

use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{LineageError, Result};
use crate::instance::Instance;
use crate::lacuna::{FieldRef, Lacuna, LacunaType};
use crate::lineage::Schema;
use crate::version::{SyntacticVersion, VersionIndex};

/// Maps an instance of one schema onto another.
///
/// The returned value is checked against `target` by the caller. A lens
/// reports every gap in its mapping as a [`Lacuna`].
pub trait Lens: Send + Sync {
    fn map(&self, input: &Instance<'_>, target: &Schema<'_>) -> (Value, Vec<Lacuna>);
}

/// Adapter turning a closure into a [`Lens`]
pub struct FnLens<F>(F);

impl<F> FnLens<F>
where
    F: Fn(&Instance<'_>, &Schema<'_>) -> (Value, Vec<Lacuna>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Lens for FnLens<F>
where
    F: Fn(&Instance<'_>, &Schema<'_>) -> (Value, Vec<Lacuna>) + Send + Sync,
{
    fn map(&self, input: &Instance<'_>, target: &Schema<'_>) -> (Value, Vec<Lacuna>) {
        (self.0)(input, target)
    }
}

/// Unification with the target schema. Never emits lacunas.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImplicitLens;

impl Lens for ImplicitLens {
    fn map(&self, input: &Instance<'_>, target: &Schema<'_>) -> (Value, Vec<Lacuna>) {
        (target.unify(input.underlying()), Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LensDecl {
    from: SyntacticVersion,
    to: SyntacticVersion,
    result: Value,
    #[serde(default)]
    lacunas: Vec<LacunaDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LacunaDecl {
    #[serde(default)]
    source_fields: Vec<String>,
    #[serde(default)]
    target_fields: Vec<String>,
    #[serde(rename = "type")]
    kind: LacunaType,
    message: String,
}

/// A lens authored as data in the lineage document
#[derive(Debug, Clone)]
pub struct DeclarativeLens {
    from: SyntacticVersion,
    to: SyntacticVersion,
    result: Value,
    lacunas: Vec<LacunaDecl>,
}

const INPUT_ROOT: &str = "input";

impl DeclarativeLens {
    /// Decode one entry of a lineage's `lenses` list.
    pub fn parse(raw: &Value) -> Result<Self> {
        let decl: LensDecl = serde_json::from_value(raw.clone())
            .map_err(|e| LineageError::invalid(format!("lens: {}", e)))?;

        let mut refs = Vec::new();
        collect_refs(&decl.result, &mut refs);
        let source_paths = decl.lacunas.iter().flat_map(|l| l.source_fields.iter());
        for r in refs.into_iter().chain(source_paths.map(String::as_str)) {
            if input_path(r).is_none() {
                return Err(LineageError::invalid(format!(
                    "lens {} -> {}: reference {:?} must start with \"{}\"",
                    decl.from, decl.to, r, INPUT_ROOT
                )));
            }
        }

        Ok(Self {
            from: decl.from,
            to: decl.to,
            result: decl.result,
            lacunas: decl.lacunas,
        })
    }

    pub fn from(&self) -> SyntacticVersion {
        self.from
    }

    pub fn to(&self) -> SyntacticVersion {
        self.to
    }

    /// The unrendered result template
    pub fn template(&self) -> &Value {
        &self.result
    }
}

impl Lens for DeclarativeLens {
    fn map(&self, input: &Instance<'_>, target: &Schema<'_>) -> (Value, Vec<Lacuna>) {
        let data = &input.hydrate();
        let rendered = render(&self.result, data).unwrap_or(Value::Null);
        let out = target.unify(&rendered);

        let lacunas = self
            .lacunas
            .iter()
            .filter_map(|decl| {
                let mut lac = Lacuna::new(decl.kind, decl.message.clone());
                for path in &decl.source_fields {
                    let found = input_path(path).and_then(|p| value_at(data, p))?;
                    lac.source_fields.push(FieldRef::new(path.clone(), found.clone()));
                }
                for path in &decl.target_fields {
                    let found = value_at(&out, path).cloned().unwrap_or(Value::Null);
                    lac.target_fields.push(FieldRef::new(path.clone(), found));
                }
                Some(lac)
            })
            .collect();

        (out, lacunas)
    }
}

fn as_ref(v: &Value) -> Option<&str> {
    match v {
        Value::Object(map) if map.len() == 1 => map.get("$ref").and_then(Value::as_str),
        _ => None,
    }
}

fn collect_refs<'v>(v: &'v Value, out: &mut Vec<&'v str>) {
    if let Some(r) = as_ref(v) {
        out.push(r);
        return;
    }
    match v {
        Value::Object(map) => map.values().for_each(|x| collect_refs(x, out)),
        Value::Array(items) => items.iter().for_each(|x| collect_refs(x, out)),
        _ => {}
    }
}

/// Path below the input root, or `None` if `r` does not name the input.
fn input_path(r: &str) -> Option<&str> {
    if r == INPUT_ROOT {
        return Some("");
    }
    r.strip_prefix(INPUT_ROOT)?.strip_prefix('.')
}

fn render(template: &Value, input: &Value) -> Option<Value> {
    if let Some(r) = as_ref(template) {
        return input_path(r).and_then(|p| value_at(input, p)).cloned();
    }
    match template {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                if let Some(x) = render(v, input) {
                    out.insert(k.clone(), x);
                }
            }
            Some(Value::Object(out))
        }
        Value::Array(items) => Some(Value::Array(
            items.iter().filter_map(|x| render(x, input)).collect(),
        )),
        literal => Some(literal.clone()),
    }
}

/// Look up a dotted path. Numeric segments index into lists; the empty path
/// is the root itself.
pub(crate) fn value_at<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |cur, seg| match cur {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Where a registered lens came from
#[derive(Debug, Clone)]
pub(crate) enum LensOrigin {
    /// Declared in the lineage document; keeps the authored form.
    Declared(Value),
    /// Supplied in code at bind time
    Supplied,
}

pub(crate) struct LensEntry {
    pub(crate) lens: Arc<dyn Lens>,
    pub(crate) origin: LensOrigin,
}

/// Explicit lenses of a lineage, keyed by `(from, to)`
#[derive(Default)]
pub(crate) struct LensRegistry {
    entries: BTreeMap<(SyntacticVersion, SyntacticVersion), LensEntry>,
}

impl LensRegistry {
    /// Add a lens, enforcing the per-lens rules against `index`.
    pub(crate) fn register(
        &mut self,
        index: &VersionIndex,
        from: SyntacticVersion,
        to: SyntacticVersion,
        entry: LensEntry,
    ) -> Result<()> {
        if from == to {
            return Err(LineageError::invalid(format!(
                "lens {} -> {} maps a schema onto itself",
                from, to
            )));
        }
        for v in [from, to] {
            if !index.contains(v) {
                return Err(LineageError::invalid(format!(
                    "lens {} -> {} references nonexistent schema {}",
                    from, to, v
                )));
            }
        }
        if from.same_sequence(&to) && from < to {
            return Err(LineageError::invalid(format!(
                "lens {} -> {}: forward translation within a sequence is implicit and cannot be overridden",
                from, to
            )));
        }
        if self.entries.contains_key(&(from, to)) {
            return Err(LineageError::invalid(format!(
                "lens {} -> {} declared more than once",
                from, to
            )));
        }
        self.entries.insert((from, to), entry);
        Ok(())
    }

    /// Every forward sequence boundary must be bridged by a lens.
    pub(crate) fn require_boundaries(&self, index: &VersionIndex) -> Result<()> {
        for pair in index.as_slice().windows(2) {
            let (last, first) = (pair[0], pair[1]);
            if !last.same_sequence(&first) && !self.entries.contains_key(&(last, first)) {
                return Err(LineageError::invalid(format!(
                    "no lens declared from {} to {}; crossing a sequence boundary requires an explicit lens",
                    last, first
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn get(&self, from: SyntacticVersion, to: SyntacticVersion) -> Option<&Arc<dyn Lens>> {
        self.entries.get(&(from, to)).map(|e| &e.lens)
    }

    pub(crate) fn pairs(&self) -> impl Iterator<Item = (SyntacticVersion, SyntacticVersion)> + '_ {
        self.entries.keys().copied()
    }

    /// Authored form of each declared lens
    pub(crate) fn declared(&self) -> impl Iterator<Item = ((SyntacticVersion, SyntacticVersion), &Value)> + '_ {
        self.entries.iter().filter_map(|(k, e)| match &e.origin {
            LensOrigin::Declared(raw) => Some((*k, raw)),
            LensOrigin::Supplied => None,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Debug for LensRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.keys().map(|(a, b)| format!("{} -> {}", a, b)))
            .finish()
    }
}

/// How one hop of a route is made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HopKind {
    Implicit,
    Explicit,
}

/// One step of a translation route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hop {
    pub from: SyntacticVersion,
    pub to: SyntacticVersion,
    pub kind: HopKind,
}

/// Explicit hops cost far more than implicit ones, so routes prefer the
/// fewest lenses first and the fewest hops second.
const IMPLICIT_COST: u32 = 1;
const EXPLICIT_COST: u32 = 1_000;

fn hop_cost(kind: HopKind) -> u32 {
    match kind {
        HopKind::Implicit => IMPLICIT_COST,
        HopKind::Explicit => EXPLICIT_COST,
    }
}

/// Versions as nodes; implicit edges between minor neighbours, one explicit
/// edge per registered lens.
#[derive(Debug)]
pub(crate) struct LensGraph {
    graph: DiGraph<SyntacticVersion, HopKind>,
    nodes: BTreeMap<SyntacticVersion, NodeIndex>,
}

impl LensGraph {
    pub(crate) fn build(index: &VersionIndex, registry: &LensRegistry) -> Self {
        let mut graph = DiGraph::new();
        let nodes: BTreeMap<_, _> = index.iter().map(|v| (v, graph.add_node(v))).collect();

        for pair in index.as_slice().windows(2) {
            if pair[0].same_sequence(&pair[1]) {
                graph.add_edge(nodes[&pair[0]], nodes[&pair[1]], HopKind::Implicit);
            }
        }
        for (from, to) in registry.pairs() {
            graph.add_edge(nodes[&from], nodes[&to], HopKind::Explicit);
        }

        Self { graph, nodes }
    }

    /// Cheapest route from `from` to `to`; empty when they are equal.
    pub(crate) fn route(&self, from: SyntacticVersion, to: SyntacticVersion) -> Option<Vec<Hop>> {
        let start = *self.nodes.get(&from)?;
        let goal = *self.nodes.get(&to)?;
        let (_, path) = astar(
            &self.graph,
            start,
            |n| n == goal,
            |e| hop_cost(*e.weight()),
            |_| 0,
        )?;

        path.windows(2)
            .map(|w| {
                let kind = self
                    .graph
                    .edges_connecting(w[0], w[1])
                    .map(|e| *e.weight())
                    .min_by_key(|k| hop_cost(*k))?;
                Some(Hop {
                    from: self.graph[w[0]],
                    to: self.graph[w[1]],
                    kind,
                })
            })
            .collect()
    }

    pub(crate) fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::sv;
    use serde_json::json;

    fn index() -> VersionIndex {
        VersionIndex::new(vec![sv(0, 0), sv(0, 1), sv(1, 0), sv(2, 0), sv(2, 1)])
    }

    fn entry() -> LensEntry {
        LensEntry {
            lens: Arc::new(ImplicitLens),
            origin: LensOrigin::Supplied,
        }
    }

    #[test]
    fn test_render_template() {
        let template = json!({
            "title": {"$ref": "input.name"},
            "nested": {"first": {"$ref": "input.items.0"}, "gone": {"$ref": "input.nope"}},
            "fixed": -1
        });
        let input = json!({"name": "a", "items": [3, 4]});
        assert_eq!(
            render(&template, &input),
            Some(json!({"title": "a", "nested": {"first": 3}, "fixed": -1}))
        );
        assert_eq!(render(&json!({"$ref": "input"}), &input), Some(input.clone()));
    }

    #[test]
    fn test_parse_declarative_lens() {
        let lens = DeclarativeLens::parse(&json!({
            "from": [1, 0],
            "to": [0, 1],
            "result": {"a": {"$ref": "input.b"}},
            "lacunas": [{"sourceFields": ["input.c"], "type": "DroppedField", "message": "c dropped"}]
        }))
        .unwrap();
        assert_eq!((lens.from(), lens.to()), (sv(1, 0), sv(0, 1)));

        let bad_ref = DeclarativeLens::parse(&json!({
            "from": [0, 0], "to": [1, 0], "result": {"a": {"$ref": "output.b"}}
        }));
        assert!(bad_ref.unwrap_err().is_invalid_lineage());

        let unknown_key = DeclarativeLens::parse(&json!({
            "from": [0, 0], "to": [1, 0], "result": {}, "extra": 1
        }));
        assert!(unknown_key.is_err());
    }

    #[test]
    fn test_registry_rules() {
        let idx = index();
        let mut reg = LensRegistry::default();
        assert!(reg.register(&idx, sv(0, 1), sv(0, 1), entry()).is_err());
        assert!(reg.register(&idx, sv(0, 1), sv(7, 0), entry()).is_err());
        assert!(reg.register(&idx, sv(0, 0), sv(0, 1), entry()).is_err());
        reg.register(&idx, sv(0, 1), sv(1, 0), entry()).unwrap();
        assert!(reg.register(&idx, sv(0, 1), sv(1, 0), entry()).is_err());
        reg.register(&idx, sv(0, 1), sv(0, 0), entry()).unwrap();

        let missing = reg.require_boundaries(&idx).unwrap_err();
        assert!(missing.to_string().contains("1.0 to 2.0"));
        reg.register(&idx, sv(1, 0), sv(2, 0), entry()).unwrap();
        assert!(reg.require_boundaries(&idx).is_ok());
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn test_route_prefers_fewest_lenses() {
        let idx = index();
        let mut reg = LensRegistry::default();
        reg.register(&idx, sv(0, 1), sv(1, 0), entry()).unwrap();
        reg.register(&idx, sv(1, 0), sv(2, 0), entry()).unwrap();
        reg.register(&idx, sv(0, 0), sv(2, 0), entry()).unwrap();
        reg.register(&idx, sv(2, 1), sv(1, 0), entry()).unwrap();
        let graph = LensGraph::build(&idx, &reg);
        assert_eq!(graph.edge_count(), 6);

        let route = graph.route(sv(0, 0), sv(2, 1)).unwrap();
        let kinds: Vec<HopKind> = route.iter().map(|h| h.kind).collect();
        assert_eq!(kinds, vec![HopKind::Explicit, HopKind::Implicit]);
        assert_eq!(route[0].to, sv(2, 0));

        let back = graph.route(sv(2, 1), sv(1, 0)).unwrap();
        assert_eq!(back.len(), 1);
        assert!(graph.route(sv(1, 0), sv(0, 0)).is_none());
        assert_eq!(graph.route(sv(0, 1), sv(0, 1)), Some(Vec::new()));
    }

    #[test]
    fn test_value_at() {
        let v = json!({"a": {"b": [1, {"c": true}]}});
        assert_eq!(value_at(&v, "a.b.1.c"), Some(&json!(true)));
        assert_eq!(value_at(&v, ""), Some(&v));
        assert!(value_at(&v, "a.x").is_none());
        assert!(value_at(&v, "a.b.9").is_none());
    }
}
