//! Null and unknown reconciliation for values leaving the provider.
//!
//! Provider callbacks work on a lossy view: an empty collection and a null
//! one look alike, and unknown placeholders of the plan are gone by the time
//! the callback returns. [`normalize_null_values`] puts the shape of the
//! engine's value (`src`) back onto what the provider produced (`dst`).

use crate::diagnostic::Diagnostic;
use crate::path::AttributePath;
use crate::schema::{Attribute, AttributeType, Block, Elem};
use crate::value::Value;
use std::collections::BTreeMap;

/// Reconcile `dst` against `src`.
///
/// During plan (`apply == false`) unknowns of `src` always survive, and extra
/// map keys of `dst` are kept. During apply `src` wins
/// null-versus-empty disagreements, wholly known sets and primitives of `src`
/// fill nulls of `dst`, and map keys missing from `src` are dropped. A zero
/// value in `dst` is never treated as null.
pub fn normalize_null_values(dst: &Value, src: &Value, apply: bool) -> Value {
    if src.is_unknown() {
        return if apply { dst.clone() } else { src.clone() };
    }

    if apply && (dst.is_collection() || src.is_collection()) {
        let dst_empty = dst.is_collection() && dst.is_empty();
        let src_empty = src.is_collection() && src.is_empty();
        if (src.is_null() && dst_empty) || (src_empty && dst.is_null()) {
            return src.clone();
        }
    }

    if src.is_null() || dst.is_unknown() {
        return dst.clone();
    }

    match src {
        Value::Map(src_entries) => normalize_map(dst, src_entries, apply),
        Value::Object(src_entries) => normalize_object(dst, src_entries, apply),
        Value::Set(_) => {
            if src.is_wholly_known() && apply {
                return src.clone();
            }
            dst.clone()
        },
        Value::List(src_items) => normalize_list(dst, src, src_items, apply),
        Value::String(s) if s.is_empty() && dst.is_null() => src.clone(),
        _ => {
            if dst.is_null() && apply {
                return src.clone();
            }
            dst.clone()
        },
    }
}

fn normalize_map(dst: &Value, src_entries: &BTreeMap<String, Value>, apply: bool) -> Value {
    let mut out = dst.as_entries().cloned().unwrap_or_default();
    if apply {
        out.retain(|key, _| src_entries.contains_key(key));
    }
    for (key, src_value) in src_entries {
        if let Some(dst_value) = out.get(key) {
            let merged = normalize_null_values(dst_value, src_value, apply);
            out.insert(key.clone(), merged);
        }
    }
    if out.is_empty() {
        return dst.clone();
    }
    for (key, src_value) in src_entries {
        if src_value.is_present() {
            if let Some(slot) = out.get_mut(key) {
                if slot.is_unknown() {
                    *slot = src_value.clone();
                }
            }
        }
    }
    Value::Map(out)
}

fn normalize_object(dst: &Value, src_entries: &BTreeMap<String, Value>, apply: bool) -> Value {
    let mut out = dst.as_entries().cloned().unwrap_or_default();
    for (key, src_value) in src_entries {
        let dst_value = out.get(key).unwrap_or(&Value::Null);
        let merged = normalize_null_values(dst_value, src_value, apply);
        out.insert(key.clone(), merged);
    }
    if out.is_empty() {
        if dst.is_null() && apply {
            return Value::Object(src_entries.clone());
        }
        return dst.clone();
    }
    Value::Object(out)
}

fn normalize_list(dst: &Value, src: &Value, src_items: &[Value], apply: bool) -> Value {
    if dst.is_null() {
        if !apply && src.is_wholly_known() && src_items.is_empty() {
            return src.clone();
        }
        if !apply && src_items.iter().all(Value::is_unknown) {
            return src.clone();
        }
        return dst.clone();
    }
    match dst {
        Value::List(dst_items) if dst_items.len() == src_items.len() && !src_items.is_empty() => {
            Value::List(
                dst_items
                    .iter()
                    .zip(src_items)
                    .map(|(d, s)| normalize_null_values(d, s, apply))
                    .collect(),
            )
        },
        _ => dst.clone(),
    }
}

/// Null every write-only attribute in `value`, nested blocks included.
pub fn set_write_only_nullvalues(value: &Value, block: &Block) -> Value {
    let Some(entries) = value.as_entries() else {
        return value.clone();
    };
    Value::Object(
        entries
            .iter()
            .map(|(name, v)| {
                let v = match block.get(name) {
                    Some(attr) if attr.write_only => Value::Null,
                    Some(attr) => null_write_only_in(attr, v),
                    None => v.clone(),
                };
                (name.clone(), v)
            })
            .collect(),
    )
}

fn null_write_only_in(attr: &Attribute, value: &Value) -> Value {
    match (&attr.elem, value) {
        (Some(Elem::Block(block)), Value::Object(_)) if attr.attr_type == AttributeType::Object => {
            set_write_only_nullvalues(value, block)
        },
        (Some(Elem::Block(block)), Value::List(items)) => Value::List(
            items
                .iter()
                .map(|item| set_write_only_nullvalues(item, block))
                .collect(),
        ),
        (Some(Elem::Block(block)), Value::Set(items)) => Value::Set(
            items
                .iter()
                .map(|item| set_write_only_nullvalues(item, block))
                .collect(),
        ),
        _ => value.clone(),
    }
}

/// Copy the `timeouts` attribute of `from` into `to`. Values without a
/// `timeouts` attribute are returned unchanged.
pub fn copy_timeout_values(to: Value, from: &Value) -> Value {
    let Value::Object(mut entries) = to else {
        return to;
    };
    if let Some(slot) = entries.get_mut("timeouts") {
        *slot = from.get_attr("timeouts").cloned().unwrap_or_default();
    }
    Value::Object(entries)
}

/// Report null elements in configured lists and sets. Null map values are
/// allowed.
pub fn validate_config_nulls(value: &Value, path: &AttributePath) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    match value {
        Value::List(items) | Value::Set(items) => {
            let is_list = matches!(value, Value::List(_));
            for (i, item) in items.iter().enumerate() {
                let item_path = if is_list { path.index(i) } else { path.clone() };
                if item.is_null() {
                    diags.push(
                        Diagnostic::error("Null value found in list")
                            .with_detail("Null values are not allowed for this attribute value.")
                            .with_attribute(item_path),
                    );
                    continue;
                }
                diags.extend(validate_config_nulls(item, &item_path));
            }
        },
        Value::Map(entries) => {
            for (key, item) in entries {
                diags.extend(validate_config_nulls(item, &path.key(key.clone())));
            }
        },
        Value::Object(entries) => {
            for (name, item) in entries {
                diags.extend(validate_config_nulls(item, &path.attribute(name.clone())));
            }
        },
        _ => {},
    }
    diags
}
