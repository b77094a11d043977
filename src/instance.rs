//! Validated data and translation between schema versions
//!
//! Translation rules for a single hop:
//!
//! - same version: identity, no lacunas
//! - forward within a sequence: implicit, unification with the target
//! - anything else: the explicit lens registered for exactly that hop
//!
//! [`Instance::translate`] never chains hops. [`Instance::translate_route`]
//! plans a multi-hop route over the lineage's lens graph and walks it.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::TranslateError;
use crate::lacuna::Lacuna;
use crate::lens::{HopKind, ImplicitLens, Lens};
use crate::lineage::Schema;
use crate::version::SyntacticVersion;

/// Data proven valid against a specific schema
#[derive(Debug, Clone)]
pub struct Instance<'a> {
    raw: Value,
    schema: Schema<'a>,
    name: String,
}

impl<'a> Instance<'a> {
    pub(crate) fn new(raw: Value, schema: Schema<'a>, name: &str) -> Self {
        Self {
            raw,
            schema,
            name: name.to_string(),
        }
    }

    /// The data as validated, without defaults filled in
    pub fn underlying(&self) -> &Value {
        &self.raw
    }

    pub fn into_underlying(self) -> Value {
        self.raw
    }

    /// The schema this instance is valid against
    pub fn schema(&self) -> Schema<'a> {
        self.schema
    }

    /// Name of the data, used in diagnostics
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The data with every schema default filled in.
    pub fn hydrate(&self) -> Value {
        self.schema.unify(&self.raw)
    }

    /// The data with every field equal to its schema default removed.
    pub fn dehydrate(&self) -> Value {
        let mut defaults = self.schema.defaults();
        // Deepest first, so a parent emptied by its children can match its
        // own default.
        defaults.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let mut out = self.raw.clone();
        for (path, default) in defaults {
            if path.iter().any(|seg| seg == "[]") {
                continue;
            }
            remove_if_equal(&mut out, &path, &default);
        }
        out
    }

    /// Decode the hydrated data into a host type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.hydrate())
    }

    /// Translate to `to` in a single hop.
    ///
    /// # Panics
    ///
    /// If the lens chosen for the hop produces data the target schema
    /// rejects. Bound lineages guarantee this cannot happen for implicit
    /// hops; for explicit lenses it means the lens is broken.
    pub fn translate(&self, to: SyntacticVersion) -> Result<(Instance<'a>, Vec<Lacuna>), TranslateError> {
        let from = self.schema.version();
        let target = self.target(to)?;

        if to == from {
            return Ok((self.clone(), Vec::new()));
        }

        if from.same_sequence(&to) && from < to {
            debug!(lineage = %self.lineage_name(), %from, %to, "implicit translation");
            return Ok(self.apply(&ImplicitLens, target));
        }

        let lens = self
            .schema
            .lineage()
            .lens(from, to)
            .ok_or_else(|| TranslateError::NoLens {
                lineage: self.lineage_name().to_string(),
                from,
                to,
            })?;
        debug!(lineage = %self.lineage_name(), %from, %to, "explicit translation");
        Ok(self.apply(lens.as_ref(), target))
    }

    /// Translate to `to` through a caller-supplied lens instead of the
    /// lineage's own. The lens is untrusted, so invalid output is an error.
    pub fn translate_with(
        &self,
        to: SyntacticVersion,
        lens: &dyn Lens,
    ) -> Result<(Instance<'a>, Vec<Lacuna>), TranslateError> {
        let from = self.schema.version();
        let target = self.target(to)?;
        let (out, lacunas) = lens.map(self, &target);
        let inst = target
            .validate_named(&out, &self.name)
            .map_err(|source| TranslateError::Validation { from, to, source })?;
        Ok((inst, lacunas))
    }

    /// Translate along the cheapest route in the lineage's lens graph,
    /// concatenating the lacunas of every hop.
    ///
    /// # Panics
    ///
    /// Under the same conditions as [`Instance::translate`].
    pub fn translate_route(&self, to: SyntacticVersion) -> Result<(Instance<'a>, Vec<Lacuna>), TranslateError> {
        let from = self.schema.version();
        self.target(to)?;
        let hops = self
            .schema
            .lineage()
            .route(from, to)
            .ok_or_else(|| TranslateError::NoRoute {
                lineage: self.lineage_name().to_string(),
                from,
                to,
            })?;

        let mut current = self.clone();
        let mut lacunas = Vec::new();
        let mut i = 0;
        while i < hops.len() {
            let mut stop = hops[i].to;
            // Runs of implicit hops collapse into one unification.
            if hops[i].kind == HopKind::Implicit {
                while i + 1 < hops.len() && hops[i + 1].kind == HopKind::Implicit {
                    i += 1;
                    stop = hops[i].to;
                }
            }
            let (next, mut hop_lacunas) = current.translate(stop)?;
            lacunas.append(&mut hop_lacunas);
            current = next;
            i += 1;
        }
        Ok((current, lacunas))
    }

    /// Translate to the next version in the lineage.
    pub fn as_successor(&self) -> Result<(Instance<'a>, Vec<Lacuna>), TranslateError> {
        let next = self.schema.successor().ok_or_else(|| self.no_adjacent("successor"))?;
        self.translate(next.version())
    }

    /// Translate to the previous version in the lineage. Needs an explicit
    /// reverse lens.
    pub fn as_predecessor(&self) -> Result<(Instance<'a>, Vec<Lacuna>), TranslateError> {
        let prev = self.schema.predecessor().ok_or_else(|| self.no_adjacent("predecessor"))?;
        self.translate(prev.version())
    }

    fn lineage_name(&self) -> &'a str {
        self.schema.lineage().name()
    }

    fn target(&self, to: SyntacticVersion) -> Result<Schema<'a>, TranslateError> {
        self.schema
            .lineage()
            .schema(to)
            .map_err(|_| TranslateError::NoSchemaWithVersion {
                lineage: self.lineage_name().to_string(),
                version: to,
            })
    }

    fn no_adjacent(&self, direction: &'static str) -> TranslateError {
        TranslateError::NoAdjacentSchema {
            lineage: self.lineage_name().to_string(),
            version: self.schema.version(),
            direction,
        }
    }

    fn apply(&self, lens: &dyn Lens, target: Schema<'a>) -> (Instance<'a>, Vec<Lacuna>) {
        let (out, lacunas) = lens.map(self, &target);
        match target.validate_named(&out, &self.name) {
            Ok(inst) => (inst, lacunas),
            Err(failure) => panic!(
                "unreachable: translating {} from {} produced an invalid instance of {}:\n{}",
                self.name,
                self.schema,
                target,
                failure
            ),
        }
    }
}

impl PartialEq for Instance<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema && self.raw == other.raw
    }
}

fn remove_if_equal(v: &mut Value, path: &[String], default: &Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cur = v;
    for seg in parents {
        match cur.get_mut(seg.as_str()) {
            Some(next) => cur = next,
            None => return,
        }
    }
    if let Value::Object(map) = cur {
        if map.get(last) == Some(default) {
            map.remove(last);
        }
    }
}
