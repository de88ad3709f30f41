//! Configuration validation.
//!
//! [`validate`] checks a configuration value against a [`Block`]: types,
//! required and computed-only attributes, collection sizes and the
//! attributes' own validation functions. Unknown values are accepted
//! anywhere; they are checked again once known.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_runtime::schema::{Attribute, Block};
//! use hemmer_provider_runtime::validation::validate;
//! use hemmer_provider_runtime::Value;
//! use serde_json::json;
//!
//! let block = Block::new()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("count", Attribute::optional_int());
//!
//! let diagnostics = validate(&block, &Value::from(json!({"name": "test", "count": 42})));
//! assert!(diagnostics.is_empty());
//!
//! let diagnostics = validate(&block, &Value::from(json!({"count": "not a number"})));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute.as_ref().map(|p| p.to_string()), Some("count".to_string()));
//! ```

use crate::diagnostic::Diagnostic;
use crate::error::ProviderError;
use crate::path::AttributePath;
use crate::schema::{Attribute, AttributeType, Block, Elem};
use crate::value::Value;
use crate::walk::normalize_block;

/// Validate a configuration value against a block.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - The value must conform to the block's types
/// - Required attributes must be present and non-null
/// - Computed-only attributes must not be set
/// - Lists and sets must respect their min/max item counts
/// - Attribute validation functions run on known values
pub fn validate(block: &Block, value: &Value) -> Vec<Diagnostic> {
    let normalized = match normalize_block(block, value) {
        Ok(v) => v,
        Err(err) => return vec![Diagnostic::from(ProviderError::from(err))],
    };
    validate_normalized(block, &normalized)
}

/// Validate a value already normalized against `block`.
pub fn validate_normalized(block: &Block, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(block, value, &AttributePath::root(), &mut diagnostics);
    diagnostics
}

/// Validate a configuration value, returning Ok if valid or Err with diagnostics.
pub fn validate_result(block: &Block, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(block, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a configuration value is valid against a block.
pub fn is_valid(block: &Block, value: &Value) -> bool {
    validate(block, value).is_empty()
}

/// Report every write-only attribute set in `value`. Used when the engine
/// does not support write-only attributes.
pub fn validate_write_only(block: &Block, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    write_only_in_block(block, value, &AttributePath::root(), &mut diagnostics);
    diagnostics
}

fn validate_block(block: &Block, value: &Value, path: &AttributePath, diagnostics: &mut Vec<Diagnostic>) {
    let Some(entries) = value.as_entries() else {
        return;
    };
    for (name, attr) in &block.attributes {
        let attr_path = path.attribute(name.clone());
        validate_attribute(attr, entries.get(name).unwrap_or(&Value::Null), &attr_path, diagnostics);
    }
}

fn validate_attribute(attr: &Attribute, value: &Value, path: &AttributePath, diagnostics: &mut Vec<Diagnostic>) {
    if attr.is_computed_only() {
        if !value.is_null() {
            diagnostics.push(
                Diagnostic::error(format!("Computed attribute '{}' cannot be set", path))
                    .with_detail("This attribute is set by the provider")
                    .with_attribute(path),
            );
        }
        return;
    }

    match value {
        Value::Null => {
            if attr.is_required() {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
            return;
        },
        Value::Unknown => return,
        _ => {},
    }

    if matches!(attr.attr_type, AttributeType::List | AttributeType::Set) {
        let len = value.len();
        if attr.min_items > 0 && len < attr.min_items {
            diagnostics.push(
                Diagnostic::error(format!(
                    "Attribute '{}' requires at least {} item(s), got {}",
                    path, attr.min_items, len
                ))
                .with_attribute(path),
            );
        }
        if attr.max_items > 0 && len > attr.max_items {
            diagnostics.push(
                Diagnostic::error(format!(
                    "Attribute '{}' allows at most {} item(s), got {}",
                    path, attr.max_items, len
                ))
                .with_attribute(path),
            );
        }
    }

    if let Some(validate) = &attr.validate {
        if value.is_wholly_known() {
            diagnostics.extend(validate(value, path));
        }
    }

    match (&attr.elem, value) {
        (Some(Elem::Block(block)), Value::Object(_)) => validate_block(block, value, path, diagnostics),
        (Some(elem), Value::List(items) | Value::Set(items)) => {
            for (i, item) in items.iter().enumerate() {
                validate_elem(elem, item, &path.index(i), diagnostics);
            }
        },
        (Some(elem), Value::Map(entries)) => {
            for (key, item) in entries {
                validate_elem(elem, item, &path.key(key.clone()), diagnostics);
            }
        },
        _ => {},
    }
}

fn validate_elem(elem: &Elem, value: &Value, path: &AttributePath, diagnostics: &mut Vec<Diagnostic>) {
    match elem {
        Elem::Block(block) => validate_block(block, value, path, diagnostics),
        Elem::Attribute(inner) => {
            if value.is_wholly_known() && !value.is_null() {
                if let Some(validate) = &inner.validate {
                    diagnostics.extend(validate(value, path));
                }
            }
        },
    }
}

fn write_only_in_block(block: &Block, value: &Value, path: &AttributePath, diagnostics: &mut Vec<Diagnostic>) {
    let Some(entries) = value.as_entries() else {
        return;
    };
    for (name, attr) in &block.attributes {
        let attr_path = path.attribute(name.clone());
        let v = entries.get(name).unwrap_or(&Value::Null);
        if v.is_null() {
            continue;
        }
        if attr.write_only {
            diagnostics.push(
                Diagnostic::error("Write-only Attribute Not Allowed")
                    .with_detail(format!(
                        "The resource contains a non-null value for write-only attribute \"{}\". \
                         Write-only attributes are only supported by clients that declare support for them.",
                        name
                    ))
                    .with_attribute(attr_path),
            );
            continue;
        }
        let Some(nested) = attr.elem_block() else {
            continue;
        };
        match v {
            Value::Object(_) => write_only_in_block(nested, v, &attr_path, diagnostics),
            Value::List(items) | Value::Set(items) => {
                for (i, item) in items.iter().enumerate() {
                    write_only_in_block(nested, item, &attr_path.index(i), diagnostics);
                }
            },
            _ => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeMode;
    use serde_json::json;

    fn paths(diagnostics: &[Diagnostic]) -> Vec<String> {
        diagnostics
            .iter()
            .filter_map(|d| d.attribute.as_ref().map(|p| p.to_string()))
            .collect()
    }

    #[test]
    fn test_validate_required_string() {
        let block = Block::new().with_attribute("name", Attribute::required_string());

        assert!(validate(&block, &Value::from(json!({"name": "test"}))).is_empty());

        let diags = validate(&block, &Value::from(json!({})));
        assert_eq!(diags.len(), 1);
        assert!(diags[0].summary.contains("Missing required attribute 'name'"));

        let diags = validate(&block, &Value::from(json!({"name": null})));
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_unknown_satisfies_required() {
        let block = Block::new().with_attribute("name", Attribute::required_string());
        let value = Value::object([("name", Value::Unknown)]);
        assert!(validate(&block, &value).is_empty());
    }

    #[test]
    fn test_computed_only_cannot_be_set() {
        let block = Block::new()
            .with_attribute("arn", Attribute::computed_string())
            .with_attribute("zone", Attribute::optional_computed_string());

        assert!(validate(&block, &Value::from(json!({"zone": "a"}))).is_empty());
        let diags = validate(&block, &Value::from(json!({"arn": "x"})));
        assert_eq!(paths(&diags), vec!["arn"]);
    }

    #[test]
    fn test_type_mismatch() {
        let block = Block::new().with_attribute("count", Attribute::optional_int());

        let diags = validate(&block, &Value::from(json!({"count": "not a number"})));
        assert_eq!(diags.len(), 1);
        assert_eq!(paths(&diags), vec!["count"]);

        // Strings holding numbers are coerced
        assert!(validate(&block, &Value::from(json!({"count": "42"}))).is_empty());

        let diags = validate(&block, &Value::from(json!({"other": 1})));
        assert_eq!(paths(&diags), vec!["other"]);
    }

    #[test]
    fn test_min_max_items() {
        let block = Block::new().with_attribute(
            "ports",
            Attribute::list(AttributeType::Int, AttributeMode::Optional)
                .with_min_items(1)
                .with_max_items(2),
        );

        assert!(validate(&block, &Value::from(json!({"ports": [80]}))).is_empty());

        let diags = validate(&block, &Value::from(json!({"ports": []})));
        assert!(diags[0].summary.contains("at least 1"));

        let diags = validate(&block, &Value::from(json!({"ports": [1, 2, 3]})));
        assert!(diags[0].summary.contains("at most 2"));
    }

    #[test]
    fn test_nested_blocks() {
        let block = Block::new().with_attribute(
            "rule",
            Attribute::list_of_blocks(
                Block::new()
                    .with_attribute("port", Attribute::required_int())
                    .with_attribute("proto", Attribute::optional_string()),
            ),
        );

        let diags = validate(
            &block,
            &Value::from(json!({"rule": [{"port": 80}, {"proto": "tcp"}]})),
        );
        assert_eq!(paths(&diags), vec!["rule.1.port"]);
    }

    #[test]
    fn test_validate_func() {
        let block = Block::new().with_attribute(
            "size",
            Attribute::optional_int().with_validate(|value, path| match value.as_i64() {
                Some(n) if n > 0 => Vec::new(),
                _ => vec![Diagnostic::error("size must be positive").with_attribute(path.clone())],
            }),
        );

        assert!(validate(&block, &Value::from(json!({"size": 3}))).is_empty());
        let diags = validate(&block, &Value::from(json!({"size": -1})));
        assert_eq!(diags[0].summary, "size must be positive");
        assert_eq!(paths(&diags), vec!["size"]);

        // Unknown values are not validated yet
        assert!(validate(&block, &Value::object([("size", Value::Unknown)])).is_empty());
    }

    #[test]
    fn test_write_only_check() {
        let block = Block::new()
            .with_attribute("password", Attribute::optional_string().with_write_only())
            .with_attribute(
                "login",
                Attribute::list_of_blocks(
                    Block::new().with_attribute("token", Attribute::optional_string().with_write_only()),
                ),
            );

        let value = Value::from(json!({"password": null, "login": null}));
        assert!(validate_write_only(&block, &value).is_empty());

        let value = Value::from(json!({"password": "hunter2", "login": [{"token": "t"}]}));
        let diags = validate_write_only(&block, &value);
        assert_eq!(diags.len(), 2);
        assert!(diags.iter().all(|d| d.summary == "Write-only Attribute Not Allowed"));
        assert_eq!(paths(&diags), vec!["login.0.token", "password"]);
    }

    #[test]
    fn test_helpers() {
        let block = Block::new().with_attribute("name", Attribute::required_string());
        assert!(is_valid(&block, &Value::from(json!({"name": "x"}))));
        assert!(!is_valid(&block, &Value::from(json!({}))));
        assert!(validate_result(&block, &Value::from(json!({}))).is_err());
    }
}
