//! Schema-guided traversal of value trees.
//!
//! Plain [`Value`] trees cannot tell a set element from a list element or a
//! map key from an attribute name. These helpers walk the value and the
//! schema side by side so every step is resolved against the right node.
//! Paths passed in may be dotted; they are resolved on the way down.

use crate::path::{AttributePath, PathStep};
use crate::schema::{Attribute, AttributeType, Block, Elem, SchemaNode};
use crate::value::{type_name, TypeError, Value};
use std::collections::BTreeMap;

static UNKNOWN: Value = Value::Unknown;

/// Coerce a value against a block. Unexpected attributes are rejected,
/// absent ones become null, and sets are ordered by equivalence key with
/// duplicate keys collapsed.
pub fn normalize_block(block: &Block, value: &Value) -> Result<Value, TypeError> {
    normalize_node(SchemaNode::Block(block), value, &AttributePath::root())
}

/// Coerce a value against a single attribute, reporting errors at `path`.
pub fn normalize_attribute(
    attr: &Attribute,
    value: &Value,
    path: &AttributePath,
) -> Result<Value, TypeError> {
    normalize_node(SchemaNode::Attribute(attr), value, path)
}

/// Coerce a value against any schema node.
pub fn normalize_node(
    node: SchemaNode<'_>,
    value: &Value,
    path: &AttributePath,
) -> Result<Value, TypeError> {
    if matches!(value, Value::Null | Value::Unknown) {
        return Ok(value.clone());
    }
    let attr = match node {
        SchemaNode::Block(block) => return normalize_object(block, value, path),
        SchemaNode::Attribute(attr) => attr,
    };
    match attr.attr_type {
        AttributeType::Bool | AttributeType::Int | AttributeType::Float | AttributeType::String => {
            attr.wire_type().coerce_at(value, path)
        },
        AttributeType::Object => match attr.elem_block() {
            Some(block) => normalize_object(block, value, path),
            None => Ok(value.clone()),
        },
        AttributeType::List | AttributeType::Set => {
            let items = value.as_elements().ok_or_else(|| {
                TypeError::new(
                    path.clone(),
                    format!("{} required, got {}", list_kind(attr), type_name(value)),
                )
            })?;
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                out.push(normalize_elem(attr, item, &path.index(i))?);
            }
            if attr.attr_type == AttributeType::List {
                Ok(Value::List(out))
            } else {
                Ok(Value::Set(sort_set(attr, out)))
            }
        },
        AttributeType::Map => {
            let entries = value.as_entries().ok_or_else(|| {
                TypeError::new(path.clone(), format!("map required, got {}", type_name(value)))
            })?;
            let mut out = BTreeMap::new();
            for (k, v) in entries {
                out.insert(k.clone(), normalize_elem(attr, v, &path.key(k.clone()))?);
            }
            Ok(Value::Map(out))
        },
    }
}

fn list_kind(attr: &Attribute) -> &'static str {
    if attr.attr_type == AttributeType::Set {
        "set"
    } else {
        "list"
    }
}

fn normalize_elem(attr: &Attribute, value: &Value, path: &AttributePath) -> Result<Value, TypeError> {
    match &attr.elem {
        Some(Elem::Attribute(inner)) => normalize_node(SchemaNode::Attribute(inner), value, path),
        Some(Elem::Block(block)) => normalize_node(SchemaNode::Block(block), value, path),
        None => Ok(value.clone()),
    }
}

fn normalize_object(block: &Block, value: &Value, path: &AttributePath) -> Result<Value, TypeError> {
    let entries = value.as_entries().ok_or_else(|| {
        TypeError::new(path.clone(), format!("object required, got {}", type_name(value)))
    })?;
    if let Some(extra) = entries.keys().find(|k| !block.attributes.contains_key(*k)) {
        return Err(TypeError::new(
            path.attribute(extra.clone()),
            "unsupported attribute",
        ));
    }
    let mut out = BTreeMap::new();
    for (name, attr) in &block.attributes {
        let v = entries.get(name).unwrap_or(&Value::Null);
        out.insert(
            name.clone(),
            normalize_node(SchemaNode::Attribute(attr), v, &path.attribute(name.clone()))?,
        );
    }
    Ok(Value::Object(out))
}

/// Order set elements by equivalence key, keeping the first element of each
/// bucket.
pub fn sort_set(attr: &Attribute, items: Vec<Value>) -> Vec<Value> {
    let mut keyed: Vec<(String, Value)> = items
        .into_iter()
        .map(|item| (attr.set_key_of(&item), item))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.dedup_by(|later, earlier| later.0 == earlier.0);
    keyed.into_iter().map(|(_, item)| item).collect()
}

/// Elements of a set keyed by equivalence key.
pub fn set_elements_by_key<'v>(attr: &Attribute, value: &'v Value) -> BTreeMap<String, &'v Value> {
    let mut out = BTreeMap::new();
    if let Some(items) = value.as_elements() {
        for item in items {
            out.entry(attr.set_key_of(item)).or_insert(item);
        }
    }
    out
}

/// Read the value at `path`. Children of an unknown value are unknown;
/// missing intermediate values yield `None`.
pub fn value_at<'v>(block: &Block, root: &'v Value, path: &AttributePath) -> Option<&'v Value> {
    value_at_node(SchemaNode::Block(block), root, path)
}

/// Like [`value_at`], starting from any schema node.
pub fn value_at_node<'v>(
    mut node: SchemaNode<'_>,
    root: &'v Value,
    path: &AttributePath,
) -> Option<&'v Value> {
    let mut cur = root;
    for step in path.steps() {
        if cur.is_unknown() {
            return Some(&UNKNOWN);
        }
        let (next, resolved) = node.child(step)?;
        cur = match (&resolved, cur) {
            (PathStep::Attribute(name), Value::Object(entries) | Value::Map(entries)) => {
                entries.get(name)?
            },
            (PathStep::Index(i), Value::List(items) | Value::Set(items)) => items.get(*i)?,
            (PathStep::Key(key), Value::Map(entries) | Value::Object(entries)) => entries.get(key)?,
            (PathStep::Key(key), Value::Set(items) | Value::List(items)) => {
                let attr = node.attribute()?;
                items.iter().find(|item| attr.set_key_of(item) == *key)?
            },
            _ => return None,
        };
        node = next;
    }
    Some(cur)
}

/// Write `new` at `path`, creating intermediate objects and collections as
/// needed. Set elements are re-sorted after the write. A list index may be at
/// most the current length, which appends.
pub fn set_value_at(
    block: &Block,
    root: &mut Value,
    path: &AttributePath,
    new: Value,
) -> Result<(), TypeError> {
    set_in(SchemaNode::Block(block), root, path.steps(), new, path)
}

fn set_in(
    node: SchemaNode<'_>,
    cur: &mut Value,
    steps: &[PathStep],
    new: Value,
    full: &AttributePath,
) -> Result<(), TypeError> {
    let Some((step, rest)) = steps.split_first() else {
        *cur = new;
        return Ok(());
    };
    let invalid = || TypeError::new(full.clone(), "invalid address");
    let (child, resolved) = node.child(step).ok_or_else(invalid)?;
    match resolved {
        PathStep::Attribute(name) => {
            if matches!(cur, Value::Null | Value::Unknown) {
                *cur = Value::empty_object();
            }
            let entries = cur.as_entries_mut().ok_or_else(invalid)?;
            let slot = entries.entry(name).or_insert(Value::Null);
            set_in(child, slot, rest, new, full)
        },
        PathStep::Index(i) => {
            if matches!(cur, Value::Null | Value::Unknown) {
                *cur = Value::List(Vec::new());
            }
            let Value::List(items) = cur else {
                return Err(invalid());
            };
            if i > items.len() {
                return Err(TypeError::new(
                    full.clone(),
                    format!("list index {} out of range for {} elements", i, items.len()),
                ));
            }
            if i == items.len() {
                items.push(Value::Null);
            }
            set_in(child, &mut items[i], rest, new, full)
        },
        PathStep::Key(key) => {
            let attr = node.attribute().ok_or_else(invalid)?;
            if attr.attr_type == AttributeType::Map {
                if matches!(cur, Value::Null | Value::Unknown) {
                    *cur = Value::Map(BTreeMap::new());
                }
                let entries = cur.as_entries_mut().ok_or_else(invalid)?;
                let slot = entries.entry(key).or_insert(Value::Null);
                return set_in(child, slot, rest, new, full);
            }
            if matches!(cur, Value::Null | Value::Unknown) {
                *cur = Value::Set(Vec::new());
            }
            let items = match cur {
                Value::Set(items) | Value::List(items) => items,
                _ => return Err(invalid()),
            };
            let pos = match items.iter().position(|item| attr.set_key_of(item) == key) {
                Some(pos) => pos,
                None => {
                    items.push(Value::Null);
                    items.len() - 1
                },
            };
            set_in(child, &mut items[pos], rest, new, full)?;
            let sorted = sort_set(attr, std::mem::take(items));
            *items = sorted;
            Ok(())
        },
    }
}

/// Remove the value at `path`. Object attributes become null; list
/// elements, map entries and set elements are removed.
pub fn remove_value_at(block: &Block, root: &mut Value, path: &AttributePath) {
    remove_in(SchemaNode::Block(block), root, path.steps());
}

fn remove_in(node: SchemaNode<'_>, cur: &mut Value, steps: &[PathStep]) {
    let Some((step, rest)) = steps.split_first() else {
        return;
    };
    let Some((child, resolved)) = node.child(step) else {
        return;
    };
    let last = rest.is_empty();
    match (resolved, cur) {
        (PathStep::Attribute(name), Value::Object(entries) | Value::Map(entries)) => {
            if let Some(slot) = entries.get_mut(&name) {
                if last {
                    *slot = Value::Null;
                } else {
                    remove_in(child, slot, rest);
                }
            }
        },
        (PathStep::Index(i), Value::List(items)) if i < items.len() => {
            if last {
                items.remove(i);
            } else {
                remove_in(child, &mut items[i], rest);
            }
        },
        (PathStep::Key(key), Value::Map(entries)) => {
            if last {
                entries.remove(&key);
            } else if let Some(slot) = entries.get_mut(&key) {
                remove_in(child, slot, rest);
            }
        },
        (PathStep::Key(key), Value::Set(items)) => {
            let Some(attr) = node.attribute() else {
                return;
            };
            if last {
                items.retain(|item| attr.set_key_of(item) != key);
            } else if let Some(pos) = items.iter().position(|item| attr.set_key_of(item) == key) {
                remove_in(child, &mut items[pos], rest);
            }
        },
        _ => {},
    }
}

/// The zero value of the node at `path`, or null when the path is invalid.
pub fn zero_value_at(block: &Block, path: &AttributePath) -> Value {
    block
        .resolve(path)
        .map(|(node, _)| node.wire_type().zero_value())
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeMode;
    use serde_json::json;

    fn schema() -> Block {
        Block::new()
            .with_attribute("name", Attribute::optional_string())
            .with_attribute("labels", Attribute::map(AttributeType::String, AttributeMode::Optional))
            .with_attribute(
                "rule",
                Attribute::list_of_blocks(
                    Block::new()
                        .with_attribute("port", Attribute::required_int())
                        .with_attribute("proto", Attribute::optional_string()),
                ),
            )
            .with_attribute(
                "member",
                Attribute::set_of_blocks(
                    Block::new()
                        .with_attribute("user", Attribute::required_string())
                        .with_attribute("role", Attribute::optional_string()),
                )
                .with_set_key(|v| {
                    v.get_attr("user")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                }),
            )
    }

    #[test]
    fn test_normalize_sorts_sets_and_fills_nulls() {
        let block = schema();
        let input = Value::from(json!({
            "member": [{"user": "zed"}, {"user": "amy", "role": "admin"}, {"user": "zed", "role": "dup"}]
        }));
        let out = normalize_block(&block, &input).unwrap();
        let members = out.get_attr("member").unwrap().as_elements().unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].get_attr("user"), Some(&Value::from("amy")));
        assert_eq!(members[1].get_attr("role"), Some(&Value::Null));
        assert_eq!(out.get_attr("name"), Some(&Value::Null));
    }

    #[test]
    fn test_normalize_reports_nested_path() {
        let block = schema();
        let input = Value::from(json!({"rule": [{"port": 80}, {"port": "http"}]}));
        let err = normalize_block(&block, &input).unwrap_err();
        assert_eq!(err.path.to_string(), "rule.1.port");
    }

    #[test]
    fn test_value_at_resolves_set_keys() {
        let block = schema();
        let v = normalize_block(
            &block,
            &Value::from(json!({
                "labels": {"env": "prod"},
                "member": [{"user": "amy", "role": "admin"}]
            })),
        )
        .unwrap();
        assert_eq!(
            value_at(&block, &v, &AttributePath::parse("labels.env")),
            Some(&Value::from("prod"))
        );
        assert_eq!(
            value_at(&block, &v, &AttributePath::parse("member.amy.role")),
            Some(&Value::from("admin"))
        );
        assert_eq!(value_at(&block, &v, &AttributePath::parse("member.bob")), None);
    }

    #[test]
    fn test_value_at_under_unknown_is_unknown() {
        let block = schema();
        let v = Value::object([("rule", Value::Unknown)]);
        assert_eq!(
            value_at(&block, &v, &AttributePath::parse("rule.0.port")),
            Some(&Value::Unknown)
        );
    }

    #[test]
    fn test_set_value_creates_intermediates() {
        let block = schema();
        let mut v = Value::Null;
        set_value_at(&block, &mut v, &AttributePath::parse("rule.0.port"), Value::int(80)).unwrap();
        set_value_at(&block, &mut v, &AttributePath::parse("rule.1.port"), Value::int(443)).unwrap();
        let rules = v.get_attr("rule").unwrap().as_elements().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].get_attr("port"), Some(&Value::int(80)));
        assert_eq!(rules[1].get_attr("port"), Some(&Value::int(443)));

        set_value_at(&block, &mut v, &AttributePath::parse("labels.team"), Value::from("core"))
            .unwrap();
        assert_eq!(
            v.get_attr("labels"),
            Some(&Value::map([("team", Value::from("core"))]))
        );

        let err = set_value_at(&block, &mut v, &AttributePath::parse("nope"), Value::Null);
        assert!(err.is_err());
    }

    #[test]
    fn test_set_value_rejects_index_past_end() {
        let block = schema();
        let mut v = Value::Null;
        set_value_at(&block, &mut v, &AttributePath::parse("rule.0.port"), Value::int(80)).unwrap();
        let before = v.clone();

        let err = set_value_at(
            &block,
            &mut v,
            &AttributePath::parse("rule.4000000000.port"),
            Value::int(443),
        )
        .unwrap_err();
        assert_eq!(err.path, AttributePath::parse("rule.4000000000.port"));
        assert!(err.message.contains("out of range"));
        assert_eq!(v, before);
    }

    #[test]
    fn test_remove_value() {
        let block = schema();
        let mut v = normalize_block(
            &block,
            &Value::from(json!({
                "name": "x",
                "labels": {"a": "1", "b": "2"},
                "rule": [{"port": 1}, {"port": 2}],
                "member": [{"user": "amy"}, {"user": "bob"}]
            })),
        )
        .unwrap();
        remove_value_at(&block, &mut v, &AttributePath::parse("labels.a"));
        remove_value_at(&block, &mut v, &AttributePath::parse("rule.0"));
        remove_value_at(&block, &mut v, &AttributePath::parse("member.bob"));
        remove_value_at(&block, &mut v, &AttributePath::parse("name"));

        assert_eq!(v.get_attr("labels").unwrap().len(), 1);
        assert_eq!(v.get_attr("rule").unwrap().len(), 1);
        assert_eq!(v.get_attr("member").unwrap().len(), 1);
        assert_eq!(v.get_attr("name"), Some(&Value::Null));
    }

    #[test]
    fn test_zero_value_at() {
        let block = schema();
        assert_eq!(zero_value_at(&block, &AttributePath::parse("name")), Value::from(""));
        assert_eq!(zero_value_at(&block, &AttributePath::parse("rule")), Value::List(vec![]));
        assert_eq!(zero_value_at(&block, &AttributePath::parse("bogus")), Value::Null);
    }
}
