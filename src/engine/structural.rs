//! Built-in structural constraint engine

use serde_json::{Map, Value};

use super::constraint::{Bounds, Constraint, Field, KindSet, StructConstraint};
use super::{ConstraintEngine, DiagValue, Diagnostic, Position, Site, Subsumption};

const MSG_INCOMPLETE: &str = "incomplete value";
const MSG_NOT_ALLOWED: &str = "field not allowed";
const MSG_CONFLICT: &str = "conflicting values";
const MSG_BOUNDS: &str = "out of bounds";
const MSG_DISJUNCTION: &str = "empty disjunction";

/// Evaluates [`Constraint`]s directly over `serde_json` values.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralEngine;

impl StructuralEngine {
    pub fn new() -> Self {
        Self
    }

    /// Cheap yes/no validation used for disjunction and literal checks.
    fn admits(&self, c: &Constraint, v: &Value) -> bool {
        match (c, v) {
            (Constraint::Top, _) => true,
            (Constraint::Bottom, _) => false,
            (Constraint::Null, Value::Null) => true,
            (Constraint::Bool, Value::Bool(_)) => true,
            (Constraint::String, Value::String(_)) => true,
            (Constraint::Int(b), v) => int_of(v).is_some_and(|i| b.admits(i)),
            (Constraint::Number(b), Value::Number(n)) => n.as_f64().is_some_and(|x| b.admits(x)),
            (Constraint::Literal(l), v) => l == v,
            (Constraint::List(elem), Value::Array(items)) => items.iter().all(|i| self.admits(elem, i)),
            (Constraint::OneOf(branches), v) => branches.iter().any(|b| self.admits(b, v)),
            (Constraint::Struct(s), Value::Object(map)) => {
                let fields_ok = s.fields.iter().all(|(name, field)| match map.get(name) {
                    Some(x) => self.admits(&field.constraint, x),
                    None => field.optional,
                });
                fields_ok && (s.open || map.keys().all(|k| s.fields.contains_key(k)))
            }
            _ => false,
        }
    }

    fn check_into(&self, c: &Constraint, path: &mut Vec<String>, out: &mut Vec<Diagnostic>) {
        match c {
            Constraint::Bottom => out.push(schema_diag(path, "explicit bottom value", c)),
            Constraint::Int(b) if b.is_empty() => out.push(schema_diag(path, "invalid bounds", c)),
            Constraint::Number(b) if b.is_empty() => out.push(schema_diag(path, "invalid bounds", c)),
            Constraint::OneOf(branches) if branches.is_empty() => {
                out.push(schema_diag(path, MSG_DISJUNCTION, c))
            }
            Constraint::OneOf(branches) => {
                // A disjunction is only bottom when every branch is.
                let mut scratch = Vec::new();
                for b in branches {
                    let mut branch_diags = Vec::new();
                    self.check_into(b, path, &mut branch_diags);
                    if branch_diags.is_empty() {
                        return;
                    }
                    scratch.extend(branch_diags);
                }
                out.extend(scratch);
            }
            Constraint::List(elem) => {
                path.push("[]".into());
                self.check_into(elem, path, out);
                path.pop();
            }
            Constraint::Struct(s) => {
                for (name, field) in &s.fields {
                    path.push(name.clone());
                    self.check_into(&field.constraint, path, out);
                    if let Some(d) = &field.default {
                        if !self.admits(&field.constraint, &self.fill(&field.constraint, d)) {
                            out.push(Diagnostic {
                                message: "default value does not satisfy field constraint".into(),
                                path: path.clone(),
                                values: vec![
                                    diag_value_of_constraint(&field.constraint),
                                    diag_value_of_data(d),
                                ],
                                positions: Vec::new(),
                            });
                        }
                    }
                    path.pop();
                }
            }
            _ => {}
        }
    }

    fn subsume(&self, g: &Constraint, s: &Constraint, path: &[String]) -> Result<(), Subsumption> {
        let fail = |reason: String| {
            Err(Subsumption {
                path: path.to_vec(),
                reason,
            })
        };

        match (g, s) {
            (_, Constraint::Bottom) | (Constraint::Top, _) => Ok(()),
            (_, Constraint::OneOf(branches)) => {
                for b in branches {
                    self.subsume(g, b, path)?;
                }
                Ok(())
            }
            (_, Constraint::Literal(v)) => {
                if self.admits(g, v) {
                    Ok(())
                } else {
                    fail(format!("value {} is not an instance of {}", v, g))
                }
            }
            (Constraint::OneOf(branches), _) => {
                if branches.iter().any(|b| self.subsume(b, s, path).is_ok()) {
                    Ok(())
                } else {
                    fail(format!("{} is not an instance of {}", s, g))
                }
            }
            (Constraint::Null, Constraint::Null)
            | (Constraint::Bool, Constraint::Bool)
            | (Constraint::String, Constraint::String) => Ok(()),
            (Constraint::Int(gb), Constraint::Int(sb)) => {
                if gb.contains(sb) {
                    Ok(())
                } else {
                    fail(format!("{} is wider than {}", s, g))
                }
            }
            (Constraint::Number(gb), Constraint::Int(sb)) => {
                let widened = Bounds::new(sb.min.map(|x| x as f64), sb.max.map(|x| x as f64));
                if gb.contains(&widened) {
                    Ok(())
                } else {
                    fail(format!("{} is wider than {}", s, g))
                }
            }
            (Constraint::Number(gb), Constraint::Number(sb)) => {
                if gb.contains(sb) {
                    Ok(())
                } else {
                    fail(format!("{} is wider than {}", s, g))
                }
            }
            (Constraint::List(ge), Constraint::List(se)) => self.subsume(ge, se, &child(path, "[]")),
            (Constraint::Struct(gs), Constraint::Struct(ss)) => self.subsume_struct(gs, ss, path),
            _ => fail(format!("{} is not an instance of {}", s, g)),
        }
    }

    fn subsume_struct(&self, g: &StructConstraint, s: &StructConstraint, path: &[String]) -> Result<(), Subsumption> {
        if s.open && !g.open {
            return Err(Subsumption {
                path: path.to_vec(),
                reason: "struct was closed".into(),
            });
        }

        for (name, gf) in &g.fields {
            let field_path = child(path, name);
            // A required field with a default is satisfied by unification even
            // when older data lacks it.
            let guaranteed = gf.optional || gf.default.is_some();
            match s.fields.get(name) {
                Some(sf) if sf.optional && !guaranteed => {
                    return Err(Subsumption {
                        path: field_path,
                        reason: "optional field became required".into(),
                    });
                }
                Some(sf) => self.subsume(&gf.constraint, &sf.constraint, &field_path)?,
                None if !guaranteed => {
                    return Err(Subsumption {
                        path: field_path,
                        reason: "required field added without a default".into(),
                    });
                }
                // Older data may already carry anything under this key.
                None if s.open && !matches!(gf.constraint, Constraint::Top) => {
                    return Err(Subsumption {
                        path: field_path,
                        reason: "field may already hold arbitrary data in open predecessor".into(),
                    });
                }
                None => {}
            }
        }

        if !g.open {
            if let Some(removed) = s.fields.keys().find(|k| !g.fields.contains_key(*k)) {
                return Err(Subsumption {
                    path: child(path, removed),
                    reason: "field was removed".into(),
                });
            }
        }
        Ok(())
    }

    fn fill(&self, c: &Constraint, v: &Value) -> Value {
        match (c, v) {
            (Constraint::Struct(s), Value::Object(map)) => {
                let mut out = map.clone();
                for (name, field) in &s.fields {
                    match map.get(name) {
                        Some(existing) => {
                            out.insert(name.clone(), self.fill(&field.constraint, existing));
                        }
                        None if !field.optional => {
                            if let Some(d) = &field.default {
                                out.insert(name.clone(), self.fill(&field.constraint, d));
                            }
                        }
                        None => {}
                    }
                }
                Value::Object(out)
            }
            (Constraint::List(elem), Value::Array(items)) => {
                Value::Array(items.iter().map(|i| self.fill(elem, i)).collect())
            }
            (Constraint::OneOf(branches), v) => {
                // Fill from the first branch the datum actually satisfies once
                // filled; a kind match alone may pick a sibling it fails.
                let kind = KindSet::of_value(v);
                branches
                    .iter()
                    .filter(|b| b.kinds().is_any_of(kind))
                    .map(|b| (b, self.fill(b, v)))
                    .find(|(b, filled)| self.admits(b, filled))
                    .map(|(_, filled)| filled)
                    .unwrap_or_else(|| v.clone())
            }
            _ => v.clone(),
        }
    }

    fn walk(&self, c: &Constraint, v: &Value, cx: &mut Walk<'_>) {
        match c {
            Constraint::Top => {}
            Constraint::Bottom => cx.conflict(MSG_CONFLICT, c, v),
            Constraint::Null | Constraint::Bool | Constraint::String => {
                if !self.admits(c, v) {
                    cx.conflict(MSG_CONFLICT, c, v);
                }
            }
            Constraint::Int(b) => match int_of(v) {
                Some(i) if !b.admits(i) => cx.conflict(MSG_BOUNDS, c, v),
                Some(_) => {}
                None => cx.conflict(MSG_CONFLICT, c, v),
            },
            Constraint::Number(b) => match v.as_f64() {
                Some(x) if !b.admits(x) => cx.conflict(MSG_BOUNDS, c, v),
                Some(_) => {}
                None => cx.conflict(MSG_CONFLICT, c, v),
            },
            Constraint::Literal(l) => {
                if l != v {
                    cx.conflict(MSG_CONFLICT, c, v);
                }
            }
            Constraint::List(elem) => match v {
                Value::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        cx.enter(i.to_string());
                        self.walk(elem, item, cx);
                        cx.leave();
                    }
                }
                _ => cx.conflict(MSG_CONFLICT, c, v),
            },
            Constraint::Struct(s) => match v {
                Value::Object(map) => self.walk_struct(s, map, cx),
                _ => cx.conflict(MSG_CONFLICT, c, v),
            },
            Constraint::OneOf(branches) => {
                if branches.iter().any(|b| self.admits(b, v)) {
                    return;
                }
                let kind = KindSet::of_value(v);
                let mut matching = branches.iter().filter(|b| b.kinds().is_any_of(kind));
                match (matching.next(), matching.next()) {
                    // One branch of the right kind: report its precise problem.
                    (Some(only), None) => self.walk(only, v, cx),
                    _ => cx.conflict(MSG_DISJUNCTION, c, v),
                }
            }
        }
    }

    fn walk_struct(&self, s: &StructConstraint, map: &Map<String, Value>, cx: &mut Walk<'_>) {
        for (name, field) in &s.fields {
            cx.enter(name.clone());
            match map.get(name) {
                Some(x) => self.walk(&field.constraint, x, cx),
                None if !field.optional => cx.incomplete(field),
                None => {}
            }
            cx.leave();
        }
        if !s.open {
            for (key, x) in map {
                if !s.fields.contains_key(key) {
                    cx.enter(key.clone());
                    cx.not_allowed(x);
                    cx.leave();
                }
            }
        }
    }

    fn defaults_into(&self, c: &Constraint, path: &mut Vec<String>, out: &mut Vec<(Vec<String>, Value)>) {
        match c {
            Constraint::Struct(s) => {
                for (name, field) in &s.fields {
                    path.push(name.clone());
                    if let Some(d) = &field.default {
                        out.push((path.clone(), d.clone()));
                    }
                    self.defaults_into(&field.constraint, path, out);
                    path.pop();
                }
            }
            Constraint::List(elem) => {
                path.push("[]".into());
                self.defaults_into(elem, path, out);
                path.pop();
            }
            _ => {}
        }
    }
}

impl ConstraintEngine for StructuralEngine {
    fn check(&self, schema: &Constraint) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        self.check_into(schema, &mut Vec::new(), &mut out);
        out
    }

    fn subsumes(&self, general: &Constraint, specific: &Constraint) -> Result<(), Subsumption> {
        self.subsume(general, specific, &[])
    }

    fn unify(&self, schema: &Constraint, data: &Value) -> Value {
        self.fill(schema, data)
    }

    fn validate(&self, schema: &Constraint, data: &Value, site: &Site<'_>) -> Vec<Diagnostic> {
        let mut cx = Walk {
            site,
            path: Vec::new(),
            out: Vec::new(),
        };
        self.walk(schema, data, &mut cx);
        cx.out
    }

    fn defaults(&self, schema: &Constraint) -> Vec<(Vec<String>, Value)> {
        let mut out = Vec::new();
        self.defaults_into(schema, &mut Vec::new(), &mut out);
        out
    }
}

/// Traversal state for one validation
struct Walk<'s> {
    site: &'s Site<'s>,
    path: Vec<String>,
    out: Vec<Diagnostic>,
}

impl Walk<'_> {
    fn enter(&mut self, seg: String) {
        self.path.push(seg);
    }

    fn leave(&mut self) {
        self.path.pop();
    }

    fn full_path(&self) -> Vec<String> {
        let mut p = Vec::with_capacity(self.path.len() + 1);
        p.push(self.site.root.to_string());
        p.extend(self.path.iter().cloned());
        p
    }

    fn schema_pos(&self) -> Position {
        Position {
            document: self.site.schema_document.to_string(),
            path: self.full_path().join("."),
        }
    }

    fn data_pos(&self, path: &[String]) -> Position {
        Position {
            document: self.site.data_document.to_string(),
            path: path.join("."),
        }
    }

    fn conflict(&mut self, message: &str, c: &Constraint, v: &Value) {
        let diag = Diagnostic {
            message: message.into(),
            path: self.full_path(),
            values: vec![diag_value_of_constraint(c), diag_value_of_data(v)],
            positions: vec![self.schema_pos(), self.data_pos(&self.path)],
        };
        self.out.push(diag);
    }

    fn incomplete(&mut self, field: &Field) {
        // The field itself is absent; point the data side at its parent.
        let parent = &self.path[..self.path.len().saturating_sub(1)];
        let diag = Diagnostic {
            message: MSG_INCOMPLETE.into(),
            path: self.full_path(),
            values: vec![diag_value_of_constraint(&field.constraint)],
            positions: vec![self.schema_pos(), self.data_pos(parent)],
        };
        self.out.push(diag);
    }

    fn not_allowed(&mut self, v: &Value) {
        let parent = self.full_path();
        let schema_pos = Position {
            document: self.site.schema_document.to_string(),
            path: parent[..parent.len() - 1].join("."),
        };
        let diag = Diagnostic {
            message: MSG_NOT_ALLOWED.into(),
            path: parent,
            values: vec![diag_value_of_data(v)],
            positions: vec![schema_pos, self.data_pos(&self.path)],
        };
        self.out.push(diag);
    }
}

fn schema_diag(path: &[String], message: &str, c: &Constraint) -> Diagnostic {
    Diagnostic {
        message: message.into(),
        path: path.to_vec(),
        values: vec![diag_value_of_constraint(c)],
        positions: Vec::new(),
    }
}

fn diag_value_of_constraint(c: &Constraint) -> DiagValue {
    DiagValue {
        text: c.to_string(),
        kinds: c.kinds(),
    }
}

fn diag_value_of_data(v: &Value) -> DiagValue {
    DiagValue {
        text: v.to_string(),
        kinds: KindSet::of_value(v),
    }
}

fn child(path: &[String], seg: &str) -> Vec<String> {
    let mut p = path.to_vec();
    p.push(seg.to_string());
    p
}

fn int_of(v: &Value) -> Option<i128> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn c(v: Value) -> Constraint {
        Constraint::parse(&v).unwrap()
    }

    fn site() -> Site<'static> {
        Site {
            root: "#test00",
            schema_document: "lineage",
            data_document: "data",
        }
    }

    #[test]
    fn test_subsumes_optional_field_addition() {
        let engine = StructuralEngine::new();
        let old = c(json!({"a": "string"}));
        let new = c(json!({"a": "string", "b?": "int"}));
        assert!(engine.subsumes(&new, &old).is_ok());
        assert!(engine.subsumes(&old, &new).is_err());
    }

    #[test]
    fn test_subsumes_defaulted_required_field() {
        let engine = StructuralEngine::new();
        let old = c(json!({"a": "string"}));
        let defaulted = c(json!({"a": "string", "b": {"$type": "int", "$default": 3}}));
        let bare = c(json!({"a": "string", "b": "int"}));
        assert!(engine.subsumes(&defaulted, &old).is_ok());
        let err = engine.subsumes(&bare, &old).unwrap_err();
        assert_eq!(err.path, vec!["b".to_string()]);
    }

    #[test]
    fn test_subsumes_rejects_typed_field_in_open_predecessor() {
        let engine = StructuralEngine::new();
        let old = c(json!({"a": "string", "...": true}));
        let optional = c(json!({"a": "string", "b?": "int", "...": true}));
        let defaulted = c(json!({"a": "string", "b": {"$type": "int", "$default": 0}, "...": true}));
        let anything = c(json!({"a": "string", "b?": "_", "...": true}));

        let err = engine.subsumes(&optional, &old).unwrap_err();
        assert_eq!(err.path, vec!["b".to_string()]);
        assert!(err.reason.contains("open predecessor"));
        assert!(engine.subsumes(&defaulted, &old).is_err());
        assert!(engine.subsumes(&anything, &old).is_ok());
    }

    #[test]
    fn test_subsumes_numeric_widening() {
        let engine = StructuralEngine::new();
        assert!(engine.subsumes(&c(json!("int64")), &c(json!("int32"))).is_ok());
        assert!(engine.subsumes(&c(json!("int32")), &c(json!("int64"))).is_err());
        assert!(engine.subsumes(&c(json!("number")), &c(json!("int"))).is_ok());
        assert!(engine.subsumes(&c(json!("string | null")), &c(json!("string"))).is_ok());
        assert!(engine.subsumes(&c(json!("string")), &c(json!({"$const": "x"}))).is_ok());
    }

    #[test]
    fn test_unify_fills_nested_defaults() {
        let engine = StructuralEngine::new();
        let schema = c(json!({
            "name": "string",
            "opts": {"$type": {"level": {"$type": "int", "$default": 2}}, "$default": {}},
            "maybe?": {"$type": "int", "$default": 9}
        }));
        let out = engine.unify(&schema, &json!({"name": "x"}));
        assert_eq!(out, json!({"name": "x", "opts": {"level": 2}}));
    }

    #[test]
    fn test_validate_reports_each_problem() {
        let engine = StructuralEngine::new();
        let schema = c(json!({"a": "string", "b": "uint8", "c": "int"}));
        let diags = engine.validate(&schema, &json!({"a": 1, "b": 300, "d": true}), &site());

        let messages: Vec<&str> = diags.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![MSG_CONFLICT, MSG_BOUNDS, MSG_INCOMPLETE, MSG_NOT_ALLOWED]
        );
        assert_eq!(diags[0].path, vec!["#test00".to_string(), "a".to_string()]);
        assert_eq!(diags[0].positions.last().unwrap().document, "data");
    }

    #[test]
    fn test_validate_disjunction_narrows_to_matching_branch() {
        let engine = StructuralEngine::new();
        let schema = c(json!({"v": {"$oneOf": [{"x": "int"}, "string"]}}));
        let diags = engine.validate(&schema, &json!({"v": {"x": "no"}}), &site());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, MSG_CONFLICT);
        assert_eq!(diags[0].path.last().unwrap(), "x");

        let diags = engine.validate(&schema, &json!({"v": true}), &site());
        assert_eq!(diags[0].message, MSG_DISJUNCTION);
    }

    #[test]
    fn test_unify_fills_from_the_branch_the_datum_satisfies() {
        let engine = StructuralEngine::new();
        let schema = c(json!({"v": {"$oneOf": [
            {"a": "string", "d": {"$type": "int", "$default": 1}},
            {"b": "string"}
        ]}}));

        let data = json!({"v": {"b": "x"}});
        assert_eq!(engine.unify(&schema, &data), data);
        assert!(engine.validate(&schema, &engine.unify(&schema, &data), &site()).is_empty());

        let out = engine.unify(&schema, &json!({"v": {"a": "y"}}));
        assert_eq!(out, json!({"v": {"a": "y", "d": 1}}));

        // No branch fits: the datum passes through untouched.
        let stray = json!({"v": {"c": 1}});
        assert_eq!(engine.unify(&schema, &stray), stray);
    }

    #[test]
    fn test_check_finds_bottoms() {
        let engine = StructuralEngine::new();
        assert!(engine.check(&c(json!({"a": "string"}))).is_empty());
        assert_eq!(engine.check(&c(json!({"a": "_|_"}))).len(), 1);
        assert_eq!(engine.check(&c(json!({"a": {"$type": "int", "$min": 5, "$max": 1}}))).len(), 1);
        assert_eq!(engine.check(&c(json!({"a": {"$type": "int", "$default": "x"}}))).len(), 1);
        assert!(engine.check(&c(json!({"a": {"$oneOf": ["string", "_|_"]}}))).is_empty());
    }

    #[test]
    fn test_defaults_extraction() {
        let engine = StructuralEngine::new();
        let schema = c(json!({"a": {"$type": "int", "$default": 1}, "b": {"c": {"$type": "bool", "$default": false}}}));
        let defaults = engine.defaults(&schema);
        assert_eq!(defaults.len(), 2);
        assert_eq!(defaults[1].0, vec!["b".to_string(), "c".to_string()]);
    }
}
