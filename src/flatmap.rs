//! Legacy flatmap state codec.
//!
//! Old state files store attributes as a flat `String -> String` map. Nested
//! values use dotted keys; lists and sets carry a `<name>.#` count entry and
//! maps a `<name>.%` count entry. A value not yet known is stored as
//! [`UNKNOWN_VALUE`]. Decoding needs the wire type the state was written
//! with, since the flat form carries no type information.

use crate::value::{Value, WireType};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Sentinel stored for values that were unknown when the state was written.
pub const UNKNOWN_VALUE: &str = "74D93920-ED26-11E3-AC10-0800200C9A66";

/// A flatmap attribute map.
pub type Flatmap = BTreeMap<String, String>;

/// Errors decoding a flatmap.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlatmapError {
    /// A count entry did not hold a number.
    #[error("invalid count {value:?} at {key}")]
    InvalidCount {
        /// The count key.
        key: String,
        /// The stored value.
        value: String,
    },
    /// A bool entry did not hold `true` or `false`.
    #[error("invalid bool {value:?} at {key}")]
    InvalidBool {
        /// The attribute key.
        key: String,
        /// The stored value.
        value: String,
    },
    /// A number entry did not parse.
    #[error("invalid number {value:?} at {key}")]
    InvalidNumber {
        /// The attribute key.
        key: String,
        /// The stored value.
        value: String,
    },
    /// Only object types can be decoded at the top level.
    #[error("flatmap state must decode into an object type")]
    NotAnObject,
}

/// Decode a flatmap into a value of the given object type.
pub fn decode(map: &Flatmap, ty: &WireType) -> Result<Value, FlatmapError> {
    let WireType::Object(attrs) = ty else {
        return Err(FlatmapError::NotAnObject);
    };
    let mut out = BTreeMap::new();
    for (name, attr_ty) in attrs {
        out.insert(name.clone(), decode_value(map, name, attr_ty)?);
    }
    Ok(Value::Object(out))
}

fn decode_value(map: &Flatmap, key: &str, ty: &WireType) -> Result<Value, FlatmapError> {
    match ty {
        WireType::Bool | WireType::Number | WireType::String | WireType::Dynamic => {
            decode_primitive(map, key, ty)
        },
        WireType::List(elem) => {
            let Some(count) = read_count(map, &format!("{}.#", key))? else {
                return Ok(Value::Null);
            };
            let Some(count) = count else {
                return Ok(Value::Unknown);
            };
            let mut items = Vec::with_capacity(count);
            for i in 0..count {
                items.push(decode_value(map, &format!("{}.{}", key, i), elem)?);
            }
            Ok(Value::List(items))
        },
        WireType::Set(elem) => {
            let Some(count) = read_count(map, &format!("{}.#", key))? else {
                return Ok(Value::Null);
            };
            if count.is_none() {
                return Ok(Value::Unknown);
            }
            let mut items = Vec::new();
            for sub in child_segments(map, key, "#") {
                let item = decode_value(map, &format!("{}.{}", key, sub), elem)?;
                if !items.contains(&item) {
                    items.push(item);
                }
            }
            Ok(Value::Set(items))
        },
        WireType::Map(elem) => {
            let count = match read_count(map, &format!("{}.%", key))? {
                Some(count) => count,
                None => match read_count(map, &format!("{}.#", key))? {
                    Some(count) => count,
                    None => return Ok(Value::Null),
                },
            };
            if count.is_none() {
                return Ok(Value::Unknown);
            }
            let prefix = format!("{}.", key);
            let mut entries = BTreeMap::new();
            if is_primitive(elem) {
                for (k, _) in map.range(prefix.clone()..) {
                    let Some(rest) = k.strip_prefix(&prefix) else {
                        break;
                    };
                    if rest == "%" || rest == "#" {
                        continue;
                    }
                    entries.insert(rest.to_string(), decode_primitive(map, k, elem)?);
                }
            } else {
                for sub in child_segments(map, key, "%") {
                    if sub == "#" {
                        continue;
                    }
                    let v = decode_value(map, &format!("{}.{}", key, sub), elem)?;
                    entries.insert(sub, v);
                }
            }
            Ok(Value::Map(entries))
        },
        WireType::Object(attrs) => {
            let prefix = format!("{}.", key);
            let present = map
                .range(prefix.clone()..)
                .next()
                .is_some_and(|(k, _)| k.starts_with(&prefix));
            if !present {
                return Ok(Value::Null);
            }
            let mut out = BTreeMap::new();
            for (name, attr_ty) in attrs {
                out.insert(name.clone(), decode_value(map, &format!("{}.{}", key, name), attr_ty)?);
            }
            Ok(Value::Object(out))
        },
    }
}

fn is_primitive(ty: &WireType) -> bool {
    matches!(ty, WireType::Bool | WireType::Number | WireType::String | WireType::Dynamic)
}

fn decode_primitive(map: &Flatmap, key: &str, ty: &WireType) -> Result<Value, FlatmapError> {
    let Some(raw) = map.get(key) else {
        return Ok(Value::Null);
    };
    if raw == UNKNOWN_VALUE {
        return Ok(Value::Unknown);
    }
    match ty {
        WireType::Bool => match raw.as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(FlatmapError::InvalidBool {
                key: key.to_string(),
                value: raw.clone(),
            }),
        },
        WireType::Number => WireType::Number
            .coerce(&Value::String(raw.clone()))
            .map_err(|_| FlatmapError::InvalidNumber {
                key: key.to_string(),
                value: raw.clone(),
            }),
        _ => Ok(Value::String(raw.clone())),
    }
}

/// Read a count entry. `Ok(None)` when absent, `Ok(Some(None))` when unknown.
fn read_count(map: &Flatmap, key: &str) -> Result<Option<Option<usize>>, FlatmapError> {
    match map.get(key) {
        None => Ok(None),
        Some(raw) if raw == UNKNOWN_VALUE => Ok(Some(None)),
        Some(raw) => raw
            .parse::<usize>()
            .map(|n| Some(Some(n)))
            .map_err(|_| FlatmapError::InvalidCount {
                key: key.to_string(),
                value: raw.clone(),
            }),
    }
}

/// Distinct first segments of the keys under `key.`, excluding the count
/// marker.
fn child_segments(map: &Flatmap, key: &str, marker: &str) -> BTreeSet<String> {
    let prefix = format!("{}.", key);
    let mut out = BTreeSet::new();
    for (k, _) in map.range(prefix.clone()..) {
        let Some(rest) = k.strip_prefix(&prefix) else {
            break;
        };
        let segment = rest.split('.').next().unwrap_or(rest);
        if segment != marker {
            out.insert(segment.to_string());
        }
    }
    out
}

/// Encode a value of the given object type into a flatmap. Null values are
/// omitted.
pub fn encode(value: &Value, ty: &WireType) -> Flatmap {
    let mut out = Flatmap::new();
    if let (WireType::Object(attrs), Some(entries)) = (ty, value.as_entries()) {
        for (name, attr_ty) in attrs {
            if let Some(v) = entries.get(name) {
                encode_value(&mut out, name, v, attr_ty);
            }
        }
    }
    out
}

fn encode_value(out: &mut Flatmap, key: &str, value: &Value, ty: &WireType) {
    match value {
        Value::Null => {},
        Value::Unknown => match ty {
            WireType::List(_) | WireType::Set(_) => {
                out.insert(format!("{}.#", key), UNKNOWN_VALUE.to_string());
            },
            WireType::Map(_) => {
                out.insert(format!("{}.%", key), UNKNOWN_VALUE.to_string());
            },
            WireType::Object(_) => {},
            _ => {
                out.insert(key.to_string(), UNKNOWN_VALUE.to_string());
            },
        },
        Value::Bool(b) => {
            out.insert(key.to_string(), b.to_string());
        },
        Value::Number(n) => {
            out.insert(key.to_string(), n.to_string());
        },
        Value::String(s) => {
            out.insert(key.to_string(), s.clone());
        },
        Value::List(items) | Value::Set(items) => {
            let elem = match ty {
                WireType::List(elem) | WireType::Set(elem) => elem.as_ref(),
                _ => &WireType::Dynamic,
            };
            out.insert(format!("{}.#", key), items.len().to_string());
            for (i, item) in items.iter().enumerate() {
                encode_value(out, &format!("{}.{}", key, i), item, elem);
            }
        },
        Value::Map(entries) | Value::Object(entries) => match ty {
            WireType::Object(attrs) => {
                for (name, attr_ty) in attrs {
                    if let Some(v) = entries.get(name) {
                        encode_value(out, &format!("{}.{}", key, name), v, attr_ty);
                    }
                }
            },
            _ => {
                let elem = match ty {
                    WireType::Map(elem) => elem.as_ref(),
                    _ => &WireType::Dynamic,
                };
                out.insert(format!("{}.%", key), entries.len().to_string());
                for (k, v) in entries {
                    encode_value(out, &format!("{}.{}", key, k), v, elem);
                }
            },
        },
    }
}
