//! Constraint values: the structural schema language understood by the
//! built-in engine.
//!
//! Constraints are authored as JSON. A plain object is a closed struct whose
//! keys may end in `?` (optional) and which may contain `"...": true` to
//! accept unknown fields. Strings name types (`"string"`, `"int32"`,
//! `"string | null"`), other scalars are literals, and `$`-prefixed meta
//! objects express everything else:
//!
//! ```json
//! {
//!   "title": "string",
//!   "count": {"$type": "uint8", "$default": 1},
//!   "tags?": {"$list": "string"},
//!   "mode": {"$enum": ["light", "dark"]}
//! }
//! ```

use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Set of value kinds a constraint admits (or a datum has)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KindSet(u8);

impl KindSet {
    pub const NONE: KindSet = KindSet(0);
    pub const NULL: KindSet = KindSet(1);
    pub const BOOL: KindSet = KindSet(1 << 1);
    pub const INT: KindSet = KindSet(1 << 2);
    pub const FLOAT: KindSet = KindSet(1 << 3);
    pub const STRING: KindSet = KindSet(1 << 4);
    pub const LIST: KindSet = KindSet(1 << 5);
    pub const STRUCT: KindSet = KindSet(1 << 6);
    pub const NUMBER: KindSet = KindSet(Self::INT.0 | Self::FLOAT.0);
    pub const ALL: KindSet = KindSet(0x7f);

    const NAMES: [(KindSet, &'static str); 7] = [
        (Self::NULL, "null"),
        (Self::BOOL, "bool"),
        (Self::INT, "int"),
        (Self::FLOAT, "float"),
        (Self::STRING, "string"),
        (Self::LIST, "list"),
        (Self::STRUCT, "struct"),
    ];

    pub fn union(self, other: KindSet) -> KindSet {
        KindSet(self.0 | other.0)
    }

    /// True when the two sets share at least one kind
    pub fn is_any_of(self, other: KindSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Kind of a concrete datum
    pub fn of_value(v: &Value) -> KindSet {
        match v {
            Value::Null => Self::NULL,
            Value::Bool(_) => Self::BOOL,
            Value::Number(n) if n.is_f64() => Self::FLOAT,
            Value::Number(_) => Self::INT,
            Value::String(_) => Self::STRING,
            Value::Array(_) => Self::LIST,
            Value::Object(_) => Self::STRUCT,
        }
    }
}

impl fmt::Display for KindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::ALL {
            return f.write_str("_");
        }
        if self.is_empty() {
            return f.write_str("_|_");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(k, _)| self.is_any_of(*k))
            .map(|(_, n)| *n)
            .collect();
        f.write_str(&names.join("|"))
    }
}

/// Inclusive numeric bounds
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bounds<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T: PartialOrd + Copy> Bounds<T> {
    pub const fn new(min: Option<T>, max: Option<T>) -> Self {
        Self { min, max }
    }

    pub fn admits(&self, x: T) -> bool {
        self.min.map_or(true, |m| x >= m) && self.max.map_or(true, |m| x <= m)
    }

    /// Every value admitted by `other` is admitted by `self`
    pub fn contains(&self, other: &Bounds<T>) -> bool {
        let lower = match (self.min, other.min) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => b >= a,
        };
        let upper = match (self.max, other.max) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => b <= a,
        };
        lower && upper
    }

    pub fn is_empty(&self) -> bool {
        matches!((self.min, self.max), (Some(lo), Some(hi)) if lo > hi)
    }
}

const INT_ALIASES: [(&str, i128, i128); 8] = [
    ("int8", i8::MIN as i128, i8::MAX as i128),
    ("int16", i16::MIN as i128, i16::MAX as i128),
    ("int32", i32::MIN as i128, i32::MAX as i128),
    ("int64", i64::MIN as i128, i64::MAX as i128),
    ("uint8", 0, u8::MAX as i128),
    ("uint16", 0, u16::MAX as i128),
    ("uint32", 0, u32::MAX as i128),
    ("uint64", 0, u64::MAX as i128),
];

const FLOAT32_MAX: f64 = f32::MAX as f64;

/// A structural constraint over JSON-shaped data
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Admits anything (`_`)
    Top,
    /// Admits nothing (`_|_`)
    Bottom,
    Null,
    Bool,
    String,
    Int(Bounds<i128>),
    /// Any number, ints included
    Number(Bounds<f64>),
    /// Exactly this value
    Literal(Value),
    List(Box<Constraint>),
    Struct(StructConstraint),
    OneOf(Vec<Constraint>),
}

/// A struct constraint; closed unless `open`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructConstraint {
    pub fields: BTreeMap<String, Field>,
    pub open: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub constraint: Constraint,
    pub optional: bool,
    pub default: Option<Value>,
}

impl Field {
    pub fn required(constraint: Constraint) -> Self {
        Self {
            constraint,
            optional: false,
            default: None,
        }
    }

    pub fn optional(constraint: Constraint) -> Self {
        Self {
            constraint,
            optional: true,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Failure to decode the authoring form of a constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub path: Vec<String>,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path.join("."), self.message)
        }
    }
}

impl std::error::Error for ParseError {}

const META_KEYS: [&str; 8] = [
    "$type", "$list", "$oneOf", "$const", "$enum", "$default", "$min", "$max",
];

impl Constraint {
    /// Decode the JSON authoring form.
    pub fn parse(raw: &Value) -> Result<Constraint, ParseError> {
        let mut path = Vec::new();
        let (c, default) = parse_expr(raw, &mut path)?;
        if default.is_some() {
            return Err(err(&path, "defaults are only allowed on struct fields"));
        }
        Ok(c)
    }

    /// Kinds this constraint can admit
    pub fn kinds(&self) -> KindSet {
        match self {
            Constraint::Top => KindSet::ALL,
            Constraint::Bottom => KindSet::NONE,
            Constraint::Null => KindSet::NULL,
            Constraint::Bool => KindSet::BOOL,
            Constraint::String => KindSet::STRING,
            Constraint::Int(_) => KindSet::INT,
            Constraint::Number(_) => KindSet::NUMBER,
            Constraint::Literal(v) => KindSet::of_value(v),
            Constraint::List(_) => KindSet::LIST,
            Constraint::Struct(_) => KindSet::STRUCT,
            Constraint::OneOf(branches) => branches
                .iter()
                .fold(KindSet::NONE, |acc, b| acc.union(b.kinds())),
        }
    }

    pub fn as_struct(&self) -> Option<&StructConstraint> {
        match self {
            Constraint::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Canonical JSON form. Structurally equal constraints produce equal
    /// values, which is what schema checksums are computed over.
    pub fn to_json(&self) -> Value {
        match self {
            Constraint::Top => Value::from("_"),
            Constraint::Bottom => Value::from("_|_"),
            Constraint::Null => Value::from("null"),
            Constraint::Bool => Value::from("bool"),
            Constraint::String => Value::from("string"),
            Constraint::Int(b) => match int_alias(b) {
                Some(name) => Value::from(name),
                None => bounded_json("int", b.min.map(number_i128), b.max.map(number_i128)),
            },
            Constraint::Number(b) => match float_alias(b) {
                Some(name) => Value::from(name),
                None => bounded_json("number", b.min.map(number_f64), b.max.map(number_f64)),
            },
            Constraint::Literal(v) => match v {
                Value::String(_) | Value::Array(_) | Value::Object(_) => {
                    single("$const", v.clone())
                }
                other => other.clone(),
            },
            Constraint::List(elem) => single("$list", elem.to_json()),
            Constraint::OneOf(branches) => {
                single("$oneOf", Value::Array(branches.iter().map(|b| b.to_json()).collect()))
            }
            Constraint::Struct(s) => {
                let mut map = Map::new();
                for (name, field) in &s.fields {
                    let key = if field.optional {
                        format!("{}?", name)
                    } else {
                        name.clone()
                    };
                    let mut body = field.constraint.to_json();
                    if let Some(d) = &field.default {
                        let mut meta = Map::new();
                        meta.insert("$type".into(), body);
                        meta.insert("$default".into(), d.clone());
                        body = Value::Object(meta);
                    }
                    map.insert(key, body);
                }
                if s.open {
                    map.insert("...".into(), Value::Bool(true));
                }
                Value::Object(map)
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Top => f.write_str("_"),
            Constraint::Bottom => f.write_str("_|_"),
            Constraint::Null => f.write_str("null"),
            Constraint::Bool => f.write_str("bool"),
            Constraint::String => f.write_str("string"),
            Constraint::Int(b) => match int_alias(b) {
                Some(name) => f.write_str(name),
                None => write_bounded(f, "int", b),
            },
            Constraint::Number(b) => match float_alias(b) {
                Some(name) => f.write_str(name),
                None => write_bounded(f, "number", b),
            },
            Constraint::Literal(v) => write!(f, "{}", v),
            Constraint::List(elem) => write!(f, "[...{}]", elem),
            Constraint::OneOf(branches) => {
                let parts: Vec<String> = branches.iter().map(|b| b.to_string()).collect();
                f.write_str(&parts.join(" | "))
            }
            Constraint::Struct(s) => {
                f.write_str("{")?;
                for (i, (name, field)) in s.fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    let marker = if field.optional { "?" } else { "" };
                    write!(f, "{}{}: {}", name, marker, field.constraint)?;
                }
                if s.open {
                    f.write_str(if s.fields.is_empty() { "..." } else { ", ..." })?;
                }
                f.write_str("}")
            }
        }
    }
}

fn write_bounded<T: fmt::Display>(f: &mut fmt::Formatter<'_>, base: &str, b: &Bounds<T>) -> fmt::Result {
    f.write_str(base)?;
    if let Some(min) = &b.min {
        write!(f, " & >={}", min)?;
    }
    if let Some(max) = &b.max {
        write!(f, " & <={}", max)?;
    }
    Ok(())
}

fn int_alias(b: &Bounds<i128>) -> Option<&'static str> {
    match (b.min, b.max) {
        (None, None) => Some("int"),
        (Some(0), None) => Some("uint"),
        (Some(lo), Some(hi)) => INT_ALIASES
            .iter()
            .find(|(_, a, z)| *a == lo && *z == hi)
            .map(|(name, _, _)| *name),
        _ => None,
    }
}

fn float_alias(b: &Bounds<f64>) -> Option<&'static str> {
    match (b.min, b.max) {
        (None, None) => Some("number"),
        (Some(lo), Some(hi)) if lo == -FLOAT32_MAX && hi == FLOAT32_MAX => Some("float32"),
        _ => None,
    }
}

fn number_i128(x: i128) -> Value {
    if let Ok(i) = i64::try_from(x) {
        Value::from(i)
    } else if let Ok(u) = u64::try_from(x) {
        Value::from(u)
    } else {
        Value::from(x as f64)
    }
}

fn number_f64(x: f64) -> Value {
    Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
}

fn bounded_json(base: &str, min: Option<Value>, max: Option<Value>) -> Value {
    let mut meta = Map::new();
    meta.insert("$type".into(), Value::from(base));
    if let Some(min) = min {
        meta.insert("$min".into(), min);
    }
    if let Some(max) = max {
        meta.insert("$max".into(), max);
    }
    Value::Object(meta)
}

fn single(key: &str, v: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.into(), v);
    Value::Object(map)
}

fn err(path: &[String], message: impl Into<String>) -> ParseError {
    ParseError {
        path: path.to_vec(),
        message: message.into(),
    }
}

fn parse_type_name(name: &str, path: &[String]) -> Result<Constraint, ParseError> {
    let name = name.trim();
    if name == "_|_" {
        return Ok(Constraint::Bottom);
    }
    if name.contains('|') {
        let branches = name
            .split('|')
            .map(|part| parse_type_name(part, path))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Constraint::OneOf(branches));
    }
    if let Some((_, lo, hi)) = INT_ALIASES.iter().find(|(n, _, _)| *n == name) {
        return Ok(Constraint::Int(Bounds::new(Some(*lo), Some(*hi))));
    }
    let c = match name {
        "_" => Constraint::Top,
        "null" => Constraint::Null,
        "bool" => Constraint::Bool,
        "string" => Constraint::String,
        "int" => Constraint::Int(Bounds::default()),
        "uint" => Constraint::Int(Bounds::new(Some(0), None)),
        "number" | "float" | "float64" => Constraint::Number(Bounds::default()),
        "float32" => Constraint::Number(Bounds::new(Some(-FLOAT32_MAX), Some(FLOAT32_MAX))),
        other => return Err(err(path, format!("unknown type {:?}", other))),
    };
    Ok(c)
}

/// Parse an expression in field position, returning any declared default.
fn parse_expr(raw: &Value, path: &mut Vec<String>) -> Result<(Constraint, Option<Value>), ParseError> {
    match raw {
        Value::String(name) => Ok((parse_type_name(name, path)?, None)),
        Value::Array(_) => Err(err(path, "lists must be declared with {\"$list\": <element>}")),
        Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => parse_meta(map, path),
        Value::Object(map) => Ok((Constraint::Struct(parse_struct(map, path)?), None)),
        scalar => Ok((Constraint::Literal(scalar.clone()), None)),
    }
}

fn parse_struct(map: &Map<String, Value>, path: &mut Vec<String>) -> Result<StructConstraint, ParseError> {
    let mut out = StructConstraint::default();
    for (key, value) in map {
        if key == "..." {
            match value {
                Value::Bool(open) => out.open = *open,
                _ => return Err(err(path, "\"...\" must be a boolean")),
            }
            continue;
        }
        let (name, optional) = match key.strip_suffix('?') {
            Some(stripped) => (stripped.to_string(), true),
            None => (key.clone(), false),
        };
        if name.is_empty() {
            return Err(err(path, "empty field name"));
        }
        if out.fields.contains_key(&name) {
            return Err(err(path, format!("field {:?} declared twice", name)));
        }
        path.push(name.clone());
        let (constraint, default) = parse_expr(value, path)?;
        path.pop();
        out.fields.insert(
            name,
            Field {
                constraint,
                optional,
                default,
            },
        );
    }
    Ok(out)
}

fn parse_meta(map: &Map<String, Value>, path: &mut Vec<String>) -> Result<(Constraint, Option<Value>), ParseError> {
    if let Some(bad) = map.keys().find(|k| !META_KEYS.contains(&k.as_str())) {
        return Err(err(path, format!("unexpected key {:?} in constraint", bad)));
    }

    let bases: Vec<&str> = ["$type", "$list", "$oneOf", "$const", "$enum"]
        .into_iter()
        .filter(|k| map.contains_key(*k))
        .collect();
    if bases.len() != 1 {
        return Err(err(
            path,
            "a constraint object needs exactly one of $type, $list, $oneOf, $const, $enum",
        ));
    }

    let mut c = match (bases[0], &map[bases[0]]) {
        ("$type", inner) => {
            let (c, nested_default) = parse_expr(inner, path)?;
            if nested_default.is_some() {
                return Err(err(path, "nested $default"));
            }
            c
        }
        ("$list", elem) => {
            path.push("[]".into());
            let elem = Constraint::parse_at(elem, path)?;
            path.pop();
            Constraint::List(Box::new(elem))
        }
        ("$oneOf", Value::Array(items)) => {
            let mut branches = Vec::with_capacity(items.len());
            for item in items {
                branches.push(Constraint::parse_at(item, path)?);
            }
            Constraint::OneOf(branches)
        }
        ("$const", v) => Constraint::Literal(v.clone()),
        ("$enum", Value::Array(items)) => {
            Constraint::OneOf(items.iter().cloned().map(Constraint::Literal).collect())
        }
        (key, _) => return Err(err(path, format!("{} expects a list", key))),
    };

    if map.contains_key("$min") || map.contains_key("$max") {
        c = apply_bounds(c, map.get("$min"), map.get("$max"), path)?;
    }

    Ok((c, map.get("$default").cloned()))
}

impl Constraint {
    fn parse_at(raw: &Value, path: &mut Vec<String>) -> Result<Constraint, ParseError> {
        let (c, default) = parse_expr(raw, path)?;
        if default.is_some() {
            return Err(err(path, "defaults are only allowed on struct fields"));
        }
        Ok(c)
    }
}

fn apply_bounds(c: Constraint, min: Option<&Value>, max: Option<&Value>, path: &[String]) -> Result<Constraint, ParseError> {
    match c {
        Constraint::Int(mut b) => {
            let as_int = |v: &Value| -> Result<i128, ParseError> {
                v.as_i64()
                    .map(i128::from)
                    .or_else(|| v.as_u64().map(i128::from))
                    .ok_or_else(|| err(path, format!("int bound must be an integer, got {}", v)))
            };
            if let Some(v) = min {
                let lo = as_int(v)?;
                b.min = Some(b.min.map_or(lo, |m| m.max(lo)));
            }
            if let Some(v) = max {
                let hi = as_int(v)?;
                b.max = Some(b.max.map_or(hi, |m| m.min(hi)));
            }
            Ok(Constraint::Int(b))
        }
        Constraint::Number(mut b) => {
            let as_num = |v: &Value| -> Result<f64, ParseError> {
                v.as_f64()
                    .ok_or_else(|| err(path, format!("number bound must be numeric, got {}", v)))
            };
            if let Some(v) = min {
                let lo = as_num(v)?;
                b.min = Some(b.min.map_or(lo, |m| m.max(lo)));
            }
            if let Some(v) = max {
                let hi = as_num(v)?;
                b.max = Some(b.max.map_or(hi, |m| m.min(hi)));
            }
            Ok(Constraint::Number(b))
        }
        other => Err(err(path, format!("$min/$max only apply to numeric types, not {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_struct_with_optional_and_default() {
        let c = Constraint::parse(&json!({
            "title": "string",
            "count?": "int32",
            "mode": {"$type": "string", "$default": "light"}
        }))
        .unwrap();

        let s = c.as_struct().unwrap();
        assert!(!s.open);
        assert!(!s.fields["title"].optional);
        assert!(s.fields["count"].optional);
        assert_eq!(s.fields["mode"].default, Some(json!("light")));
        assert_eq!(c.to_string(), "{count?: int32, mode: string, title: string}");
    }

    #[test]
    fn test_parse_disjunction_and_literals() {
        let c = Constraint::parse(&json!("string | null")).unwrap();
        assert_eq!(c, Constraint::OneOf(vec![Constraint::String, Constraint::Null]));
        assert_eq!(c.kinds(), KindSet::STRING.union(KindSet::NULL));

        let e = Constraint::parse(&json!({"$enum": ["a", "b"]})).unwrap();
        assert_eq!(e.to_string(), "\"a\" | \"b\"");
    }

    #[test]
    fn test_parse_bounds_narrow() {
        let c = Constraint::parse(&json!({"$type": "uint8", "$max": 10})).unwrap();
        assert_eq!(c, Constraint::Int(Bounds::new(Some(0), Some(10))));
        assert_eq!(c.to_string(), "int & >=0 & <=10");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Constraint::parse(&json!("strang")).is_err());
        assert!(Constraint::parse(&json!(["string"])).is_err());
        assert!(Constraint::parse(&json!({"$type": "string", "name": "int"})).is_err());
        assert!(Constraint::parse(&json!({"$type": "string", "$min": 1})).is_err());
        assert!(Constraint::parse(&json!({"$type": "int", "$default": 1})).is_err());

        let nested = Constraint::parse(&json!({"a": {"b": "nope"}})).unwrap_err();
        assert_eq!(nested.path, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_to_json_is_canonical() {
        let authored = Constraint::parse(&json!({"n": {"$type": "int", "$min": -128, "$max": 127}})).unwrap();
        let aliased = Constraint::parse(&json!({"n": "int8"})).unwrap();
        assert_eq!(authored, aliased);
        assert_eq!(authored.to_json(), json!({"n": "int8"}));
        assert_eq!(Constraint::parse(&authored.to_json()).unwrap(), authored);
    }

    #[test]
    fn test_kindset_display() {
        assert_eq!(KindSet::NUMBER.to_string(), "int|float");
        assert_eq!(KindSet::ALL.to_string(), "_");
        assert!(KindSet::INT.is_any_of(KindSet::NUMBER));
        assert!(!KindSet::STRING.is_any_of(KindSet::INT));
    }
}
