//! Dynamically typed values.
//!
//! [`Value`] is the tree every configuration, plan and state travels in. Besides
//! the usual primitives and collections it carries two markers: [`Value::Null`]
//! (absent) and [`Value::Unknown`] (known only after apply). Null is distinct
//! from an empty collection and from a primitive zero value.
//!
//! [`WireType`] is the structural type the engine exchanges with the provider.
//! [`WireType::coerce`] converts untyped input into the typed shape.
//!
//! # Equality
//!
//! `PartialEq` is raw structural equality: unknown equals unknown, numbers
//! compare numerically, and sets compare without regard to order. Use
//! [`Value::equals`] for the three-valued comparison that yields `None` when
//! either side is not wholly known.

use crate::path::AttributePath;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Number;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A value in a resource's value tree.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// No value.
    #[default]
    Null,
    /// A value that will only be known after apply.
    Unknown,
    /// A boolean.
    Bool(bool),
    /// A number (integer or float).
    Number(Number),
    /// A string.
    String(String),
    /// An ordered list.
    List(Vec<Value>),
    /// An unordered set. Elements are kept sorted by equivalence key once the
    /// value has been normalized against a schema.
    Set(Vec<Value>),
    /// A map with string keys and homogeneous values.
    Map(BTreeMap<String, Value>),
    /// An object with a fixed set of attributes.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Create a string value.
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Create an integer value.
    pub fn int(n: i64) -> Self {
        Self::Number(Number::from(n))
    }

    /// Create a float value. Non-finite floats become null.
    pub fn float(n: f64) -> Self {
        Number::from_f64(n).map(Self::Number).unwrap_or(Self::Null)
    }

    /// Create a list value.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Create a set value, keeping the first element of each
    /// [`canonical_string`](Self::canonical_string). Schema sets with a custom
    /// equivalence key are deduplicated again by [`crate::walk::sort_set`].
    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        let mut seen = std::collections::BTreeSet::new();
        Self::Set(
            items
                .into_iter()
                .filter(|item| seen.insert(item.canonical_string()))
                .collect(),
        )
    }

    /// Create a map value.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Create an object value.
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// An object with no attributes.
    pub fn empty_object() -> Self {
        Self::Object(BTreeMap::new())
    }

    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// True for [`Value::Unknown`] at the top level.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// True when the value is neither null nor unknown.
    pub fn is_present(&self) -> bool {
        !self.is_null() && !self.is_unknown()
    }

    /// True when no unknown appears anywhere in the tree.
    pub fn is_wholly_known(&self) -> bool {
        match self {
            Self::Unknown => false,
            Self::List(items) | Self::Set(items) => items.iter().all(Value::is_wholly_known),
            Self::Map(entries) | Self::Object(entries) => {
                entries.values().all(Value::is_wholly_known)
            },
            _ => true,
        }
    }

    /// True for collections.
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::List(_) | Self::Set(_) | Self::Map(_))
    }

    /// True when the value equals the zero value of its own type: `false`,
    /// `0`, `""` or an empty collection. Null and unknown are not zero.
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Bool(b) => !b,
            Self::Number(n) => n.as_f64() == Some(0.0),
            Self::String(s) => s.is_empty(),
            Self::List(items) | Self::Set(items) => items.is_empty(),
            Self::Map(entries) => entries.is_empty(),
            _ => false,
        }
    }

    /// The string, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The value as an integer, if it is an integral number.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            }),
            _ => None,
        }
    }

    /// The value as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// The boolean, if this is a bool value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Elements of a list or set.
    pub fn as_elements(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) | Self::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Entries of a map or object.
    pub fn as_entries(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(entries) | Self::Object(entries) => Some(entries),
            _ => None,
        }
    }

    /// Mutable entries of a map or object.
    pub fn as_entries_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Self::Map(entries) | Self::Object(entries) => Some(entries),
            _ => None,
        }
    }

    /// An attribute of an object (or entry of a map).
    pub fn get_attr(&self, name: &str) -> Option<&Value> {
        self.as_entries().and_then(|entries| entries.get(name))
    }

    /// Number of elements or entries; zero for everything else.
    pub fn len(&self) -> usize {
        match self {
            Self::List(items) | Self::Set(items) => items.len(),
            Self::Map(entries) | Self::Object(entries) => entries.len(),
            _ => 0,
        }
    }

    /// True when [`Value::len`] is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Three-valued equality: `None` when either side contains an unknown.
    pub fn equals(&self, other: &Value) -> Option<bool> {
        if !self.is_wholly_known() || !other.is_wholly_known() {
            return None;
        }
        Some(self == other)
    }

    /// Replace every unknown in the tree with null.
    pub fn unknown_as_null(self) -> Value {
        match self {
            Self::Unknown => Self::Null,
            Self::List(items) => Self::List(items.into_iter().map(Value::unknown_as_null).collect()),
            Self::Set(items) => Self::Set(items.into_iter().map(Value::unknown_as_null).collect()),
            Self::Map(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, v.unknown_as_null()))
                    .collect(),
            ),
            Self::Object(entries) => Self::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, v.unknown_as_null()))
                    .collect(),
            ),
            other => other,
        }
    }

    /// A deterministic string rendering of the value, used as the default
    /// set equivalence key.
    pub fn canonical_string(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Unknown => "~".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => canonical_number(n),
            Self::String(s) => {
                serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
            },
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::canonical_string).collect();
                format!("[{}]", parts.join(","))
            },
            Self::Set(items) => {
                let mut parts: Vec<String> = items.iter().map(Value::canonical_string).collect();
                parts.sort();
                format!("<{}>", parts.join(","))
            },
            Self::Map(entries) | Self::Object(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k, v.canonical_string()))
                    .collect();
                format!("{{{}}}", parts.join(","))
            },
        }
    }

    /// Build an untyped value from JSON. Arrays become lists, objects become
    /// objects.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Value::from_json).collect())
            },
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
            },
        }
    }

    /// Convert to JSON. Unknown values cannot be represented and fail with a
    /// [`TypeError`] at their path.
    pub fn to_json(&self) -> Result<serde_json::Value, TypeError> {
        to_json_at(self, &AttributePath::root())
    }
}

fn to_json_at(value: &Value, path: &AttributePath) -> Result<serde_json::Value, TypeError> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Unknown => {
            return Err(TypeError::new(
                path.clone(),
                "unknown values cannot be converted to JSON",
            ))
        },
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Value::Number(n.clone()),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::List(items) | Value::Set(items) => serde_json::Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| to_json_at(v, &path.index(i)))
                .collect::<Result<_, _>>()?,
        ),
        Value::Map(entries) | Value::Object(entries) => {
            let mut map = serde_json::Map::new();
            for (k, v) in entries {
                map.insert(k.clone(), to_json_at(v, &path.key(k.clone()))?);
            }
            serde_json::Value::Object(map)
        },
    })
}

fn canonical_number(n: &Number) -> String {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                return format!("{}", f as i64);
            }
        }
    }
    n.to_string()
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) | (Self::Unknown, Self::Unknown) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => numbers_equal(a, b),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Set(a), Self::Set(b)) => {
                a.len() == b.len()
                    && a.iter().all(|x| b.contains(x))
                    && b.iter().all(|y| a.contains(y))
            },
            (Self::Map(a), Self::Map(b)) | (Self::Object(a), Self::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("(known after apply)"),
            Self::String(s) => f.write_str(s),
            other => f.write_str(&other.canonical_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::float(n)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Self::from_json(json)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from_json)
    }
}

/// A value failed to conform to a wire type.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct TypeError {
    /// Where the mismatch occurred.
    pub path: AttributePath,
    /// What went wrong.
    pub message: String,
}

impl TypeError {
    /// Create a type error at `path`.
    pub fn new(path: AttributePath, message: impl Into<String>) -> Self {
        Self {
            path,
            message: message.into(),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// The structural type of a value on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireType {
    /// A boolean.
    Bool,
    /// A number.
    Number,
    /// A string.
    String,
    /// A list of a single element type.
    List(Box<WireType>),
    /// A set of a single element type.
    Set(Box<WireType>),
    /// A map of a single element type.
    Map(Box<WireType>),
    /// An object with named attribute types.
    Object(BTreeMap<String, WireType>),
    /// Any type; values pass through untouched.
    Dynamic,
}

impl WireType {
    /// A list type.
    pub fn list(elem: WireType) -> Self {
        Self::List(Box::new(elem))
    }

    /// A set type.
    pub fn set(elem: WireType) -> Self {
        Self::Set(Box::new(elem))
    }

    /// A map type.
    pub fn map(elem: WireType) -> Self {
        Self::Map(Box::new(elem))
    }

    /// An object type.
    pub fn object<K: Into<String>>(attrs: impl IntoIterator<Item = (K, WireType)>) -> Self {
        Self::Object(attrs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// The zero value of the type. Objects and dynamic values have none and
    /// yield null.
    pub fn zero_value(&self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::Number => Value::int(0),
            Self::String => Value::String(String::new()),
            Self::List(_) => Value::List(Vec::new()),
            Self::Set(_) => Value::Set(Vec::new()),
            Self::Map(_) => Value::Map(BTreeMap::new()),
            Self::Object(_) | Self::Dynamic => Value::Null,
        }
    }

    /// Convert `value` into this type.
    pub fn coerce(&self, value: &Value) -> Result<Value, TypeError> {
        self.coerce_at(value, &AttributePath::root())
    }

    /// Convert `value` into this type, reporting errors relative to `path`.
    pub fn coerce_at(&self, value: &Value, path: &AttributePath) -> Result<Value, TypeError> {
        if matches!(value, Value::Null | Value::Unknown) || *self == Self::Dynamic {
            return Ok(value.clone());
        }
        match self {
            Self::Bool => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(s) if s == "true" || s == "1" => Ok(Value::Bool(true)),
                Value::String(s) if s == "false" || s == "0" => Ok(Value::Bool(false)),
                other => Err(mismatch(path, "bool", other)),
            },
            Self::Number => match value {
                Value::Number(_) => Ok(value.clone()),
                Value::String(s) => parse_number(s)
                    .map(Value::Number)
                    .ok_or_else(|| {
                        TypeError::new(path.clone(), format!("a number is required, got {:?}", s))
                    }),
                other => Err(mismatch(path, "number", other)),
            },
            Self::String => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                other => Err(mismatch(path, "string", other)),
            },
            Self::List(elem) => match value {
                Value::List(items) | Value::Set(items) => Ok(Value::List(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, v)| elem.coerce_at(v, &path.index(i)))
                        .collect::<Result<_, _>>()?,
                )),
                other => Err(mismatch(path, "list", other)),
            },
            Self::Set(elem) => match value {
                Value::List(items) | Value::Set(items) => {
                    let coerced = items
                        .iter()
                        .enumerate()
                        .map(|(i, v)| elem.coerce_at(v, &path.index(i)))
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Value::set(coerced))
                },
                other => Err(mismatch(path, "set", other)),
            },
            Self::Map(elem) => match value {
                Value::Map(entries) | Value::Object(entries) => Ok(Value::Map(
                    entries
                        .iter()
                        .map(|(k, v)| -> Result<(String, Value), TypeError> {
                            Ok((k.clone(), elem.coerce_at(v, &path.key(k.clone()))?))
                        })
                        .collect::<Result<_, _>>()?,
                )),
                other => Err(mismatch(path, "map", other)),
            },
            Self::Object(attrs) => match value {
                Value::Map(entries) | Value::Object(entries) => {
                    if let Some(extra) = entries.keys().find(|k| !attrs.contains_key(*k)) {
                        return Err(TypeError::new(
                            path.attribute(extra.clone()),
                            "unsupported attribute",
                        ));
                    }
                    let mut out = BTreeMap::new();
                    for (name, ty) in attrs {
                        let v = entries.get(name).unwrap_or(&Value::Null);
                        out.insert(name.clone(), ty.coerce_at(v, &path.attribute(name.clone()))?);
                    }
                    Ok(Value::Object(out))
                },
                other => Err(mismatch(path, "object", other)),
            },
            Self::Dynamic => Ok(value.clone()),
        }
    }

    /// Drop object attributes that this type does not declare, recursively.
    pub fn remove_undeclared(&self, value: Value) -> Value {
        match (self, value) {
            (Self::Object(attrs), Value::Object(entries) | Value::Map(entries)) => Value::Object(
                entries
                    .into_iter()
                    .filter_map(|(k, v)| attrs.get(&k).map(|ty| (k, ty.remove_undeclared(v))))
                    .collect(),
            ),
            (Self::List(elem), Value::List(items)) => {
                Value::List(items.into_iter().map(|v| elem.remove_undeclared(v)).collect())
            },
            (Self::List(elem) | Self::Set(elem), Value::Set(items)) => {
                Value::Set(items.into_iter().map(|v| elem.remove_undeclared(v)).collect())
            },
            (Self::Set(elem), Value::List(items)) => {
                Value::List(items.into_iter().map(|v| elem.remove_undeclared(v)).collect())
            },
            (Self::Map(elem), Value::Map(entries)) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, elem.remove_undeclared(v)))
                    .collect(),
            ),
            (_, other) => other,
        }
    }
}

fn parse_number(s: &str) -> Option<Number> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Number::from(i));
    }
    s.parse::<f64>().ok().and_then(Number::from_f64)
}

fn mismatch(path: &AttributePath, expected: &str, got: &Value) -> TypeError {
    TypeError::new(
        path.clone(),
        format!("{} required, got {}", expected, type_name(got)),
    )
}

/// Human-readable name of a value's kind.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Unknown => "unknown",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::List(_) => "list",
        Value::Set(_) => "set",
        Value::Map(_) => "map",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_is_not_zero() {
        assert!(!Value::Null.is_zero());
        assert!(Value::string("").is_zero());
        assert!(Value::int(0).is_zero());
        assert!(Value::Bool(false).is_zero());
        assert!(Value::List(vec![]).is_zero());
        assert_ne!(Value::Null, Value::List(vec![]));
        assert_ne!(Value::Null, Value::string(""));
    }

    #[test]
    fn test_numbers_compare_numerically() {
        assert_eq!(Value::int(2), Value::float(2.0));
        assert_ne!(Value::int(2), Value::float(2.5));
    }

    #[test]
    fn test_sets_ignore_order() {
        let a = Value::set(vec![Value::from("a"), Value::from("b")]);
        let b = Value::set(vec![Value::from("b"), Value::from("a")]);
        assert_eq!(a, b);
        assert_ne!(
            Value::list(vec![Value::from("a"), Value::from("b")]),
            Value::list(vec![Value::from("b"), Value::from("a")])
        );
    }

    #[test]
    fn test_set_dedupes_by_canonical_key() {
        let set = Value::set(vec![
            Value::map([("port", Value::int(80))]),
            Value::object([("port", Value::float(80.0))]),
            Value::int(1),
            Value::float(1.0),
        ]);
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.as_elements().unwrap()[0],
            Value::map([("port", Value::int(80))])
        );

        let coerced = WireType::set(WireType::Number)
            .coerce(&Value::list(vec![Value::int(1), Value::from("1"), Value::int(2)]))
            .unwrap();
        assert_eq!(coerced.len(), 2);
    }

    #[test]
    fn test_three_valued_equality() {
        assert_eq!(Value::Unknown, Value::Unknown);
        assert_eq!(Value::Unknown.equals(&Value::Unknown), None);
        assert_eq!(Value::from("a").equals(&Value::from("a")), Some(true));
        assert_eq!(Value::from("a").equals(&Value::from("b")), Some(false));
        let partial = Value::list(vec![Value::from("a"), Value::Unknown]);
        assert_eq!(partial.equals(&Value::list(vec![])), None);
    }

    #[test]
    fn test_coerce_primitives() {
        assert_eq!(WireType::Number.coerce(&Value::from("42")).unwrap(), Value::int(42));
        assert_eq!(WireType::String.coerce(&Value::int(7)).unwrap(), Value::from("7"));
        assert_eq!(WireType::Bool.coerce(&Value::from("true")).unwrap(), Value::Bool(true));
        assert!(WireType::Number.coerce(&Value::from("forty")).is_err());
        assert_eq!(WireType::String.coerce(&Value::Unknown).unwrap(), Value::Unknown);
    }

    #[test]
    fn test_coerce_object_fills_nulls_and_rejects_extras() {
        let ty = WireType::object([("name", WireType::String), ("size", WireType::Number)]);
        let coerced = ty.coerce(&Value::from(json!({"name": "x"}))).unwrap();
        assert_eq!(coerced, Value::object([("name", Value::from("x")), ("size", Value::Null)]));

        let err = ty.coerce(&Value::from(json!({"name": "x", "bogus": 1}))).unwrap_err();
        assert_eq!(err.path.to_string(), "bogus");
    }

    #[test]
    fn test_coerce_nested_error_path() {
        let ty = WireType::object([("ports", WireType::list(WireType::Number))]);
        let err = ty.coerce(&Value::from(json!({"ports": [1, "two"]}))).unwrap_err();
        assert_eq!(err.path.to_string(), "ports.1");
        assert!(err.to_string().starts_with("ports.1: "));
    }

    #[test]
    fn test_remove_undeclared() {
        let ty = WireType::object([("keep", WireType::String)]);
        let v = ty.remove_undeclared(Value::from(json!({"keep": "a", "drop": "b"})));
        assert_eq!(v, Value::object([("keep", Value::from("a"))]));
    }

    #[test]
    fn test_json_conversion() {
        let v = Value::from(json!({"a": [1, 2], "b": null}));
        assert_eq!(v.to_json().unwrap(), json!({"a": [1, 2], "b": null}));

        let err = Value::object([("x", Value::Unknown)]).to_json().unwrap_err();
        assert_eq!(err.path.to_string(), "x");
    }

    #[test]
    fn test_unknown_as_null() {
        let v = Value::object([("a", Value::Unknown), ("b", Value::list(vec![Value::Unknown]))]);
        assert_eq!(
            v.unknown_as_null(),
            Value::object([("a", Value::Null), ("b", Value::list(vec![Value::Null]))])
        );
    }

    #[test]
    fn test_canonical_string_is_order_independent_for_sets() {
        let a = Value::set(vec![Value::int(1), Value::int(2)]);
        let b = Value::set(vec![Value::int(2), Value::int(1)]);
        assert_eq!(a.canonical_string(), b.canonical_string());
        assert_eq!(Value::float(3.0).canonical_string(), Value::int(3).canonical_string());
    }
}
