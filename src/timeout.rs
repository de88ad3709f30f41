//! Per-operation timeouts.
//!
//! A resource declares the timeouts it supports with [`ResourceTimeout`]; the
//! configuration may override them through a `timeouts` block whose values
//! are duration strings such as `"10m"` or `"1h30m"`.

use crate::error::ProviderError;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors parsing a duration string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationParseError {
    /// The input was empty.
    #[error("empty duration")]
    Empty,

    /// A unit was not preceded by a number.
    #[error("expected a number in {0:?}")]
    ExpectedNumber(String),

    /// A number was not followed by a unit.
    #[error("missing unit in {0:?}")]
    MissingUnit(String),

    /// The unit is not one of ns, us, ms, s, m, h.
    #[error("unknown unit {unit:?} in {input:?}")]
    InvalidUnit {
        /// The offending unit.
        unit: String,
        /// The whole input.
        input: String,
    },

    /// Negative durations are meaningless for timeouts.
    #[error("negative duration {0:?}")]
    Negative(String),

    /// The duration does not fit.
    #[error("duration {0:?} overflows")]
    Overflow(String),
}

/// Parse a duration such as `"90s"`, `"1h30m"` or `"1.5h"`.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationParseError::Empty);
    }
    if s.starts_with('-') {
        return Err(DurationParseError::Negative(input.to_string()));
    }
    let s = s.strip_prefix('+').unwrap_or(s);
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return Err(DurationParseError::ExpectedNumber(input.to_string()));
        }
        let number: f64 = rest[..num_len]
            .parse()
            .map_err(|_| DurationParseError::ExpectedNumber(input.to_string()))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        if unit_len == 0 {
            return Err(DurationParseError::MissingUnit(input.to_string()));
        }
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let nanos_per_unit: f64 = match unit {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => {
                return Err(DurationParseError::InvalidUnit {
                    unit: unit.to_string(),
                    input: input.to_string(),
                })
            },
        };
        let nanos = number * nanos_per_unit;
        if !nanos.is_finite() || nanos > u64::MAX as f64 {
            return Err(DurationParseError::Overflow(input.to_string()));
        }
        total = total
            .checked_add(Duration::from_nanos(nanos.round() as u64))
            .ok_or_else(|| DurationParseError::Overflow(input.to_string()))?;
    }
    Ok(total)
}

/// An operation a timeout applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKey {
    /// Resource creation.
    Create,
    /// Resource refresh.
    Read,
    /// In-place update.
    Update,
    /// Deletion.
    Delete,
    /// Fallback for any operation without its own timeout.
    Default,
}

impl TimeoutKey {
    /// All keys, in the order they appear in configuration.
    pub const ALL: [TimeoutKey; 5] = [
        Self::Create,
        Self::Read,
        Self::Update,
        Self::Delete,
        Self::Default,
    ];

    /// The configuration attribute name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Default => "default",
        }
    }
}

/// Timeouts for each resource operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTimeout {
    /// Timeout for create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<Duration>,
    /// Timeout for read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<Duration>,
    /// Timeout for update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Duration>,
    /// Timeout for delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<Duration>,
    /// Fallback timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Duration>,
}

impl ResourceTimeout {
    /// No timeouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the create timeout.
    pub fn with_create(mut self, d: Duration) -> Self {
        self.create = Some(d);
        self
    }

    /// Set the read timeout.
    pub fn with_read(mut self, d: Duration) -> Self {
        self.read = Some(d);
        self
    }

    /// Set the update timeout.
    pub fn with_update(mut self, d: Duration) -> Self {
        self.update = Some(d);
        self
    }

    /// Set the delete timeout.
    pub fn with_delete(mut self, d: Duration) -> Self {
        self.delete = Some(d);
        self
    }

    /// Set the default timeout.
    pub fn with_default(mut self, d: Duration) -> Self {
        self.default = Some(d);
        self
    }

    /// The timeout for one key, without fallback.
    pub fn get(&self, key: TimeoutKey) -> Option<Duration> {
        match key {
            TimeoutKey::Create => self.create,
            TimeoutKey::Read => self.read,
            TimeoutKey::Update => self.update,
            TimeoutKey::Delete => self.delete,
            TimeoutKey::Default => self.default,
        }
    }

    fn slot(&mut self, key: TimeoutKey) -> &mut Option<Duration> {
        match key {
            TimeoutKey::Create => &mut self.create,
            TimeoutKey::Read => &mut self.read,
            TimeoutKey::Update => &mut self.update,
            TimeoutKey::Delete => &mut self.delete,
            TimeoutKey::Default => &mut self.default,
        }
    }

    /// Keys that carry a timeout.
    pub fn configured_keys(&self) -> Vec<TimeoutKey> {
        TimeoutKey::ALL
            .into_iter()
            .filter(|key| self.get(*key).is_some())
            .collect()
    }

    /// True when no timeout is set.
    pub fn is_empty(&self) -> bool {
        self.configured_keys().is_empty()
    }

    /// Read overrides from a `timeouts` configuration value. Null and unknown
    /// entries are skipped.
    pub fn from_config(value: &Value) -> Result<Self, ProviderError> {
        let mut out = Self::default();
        let Some(entries) = value.as_entries() else {
            return Ok(out);
        };
        for key in TimeoutKey::ALL {
            if let Some(Value::String(raw)) = entries.get(key.as_str()) {
                *out.slot(key) = Some(parse_duration(raw)?);
            }
        }
        Ok(out)
    }

    /// The timeout for an operation: this value's own entry, then its
    /// default, then the fallback's entry, then the fallback's default, then
    /// zero.
    pub fn effective(&self, key: TimeoutKey, fallback: Option<&ResourceTimeout>) -> Duration {
        self.get(key)
            .or(self.default)
            .or_else(|| fallback.and_then(|f| f.get(key).or(f.default)))
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_errors() {
        assert_eq!(parse_duration(""), Err(DurationParseError::Empty));
        assert!(matches!(parse_duration("10"), Err(DurationParseError::MissingUnit(_))));
        assert!(matches!(parse_duration("m"), Err(DurationParseError::ExpectedNumber(_))));
        assert!(matches!(parse_duration("5d"), Err(DurationParseError::InvalidUnit { .. })));
        assert!(matches!(parse_duration("-5m"), Err(DurationParseError::Negative(_))));
    }

    #[test]
    fn test_from_config() {
        let value = Value::from(json!({"create": "10m", "delete": null}));
        let t = ResourceTimeout::from_config(&value).unwrap();
        assert_eq!(t.create, Some(Duration::from_secs(600)));
        assert_eq!(t.delete, None);
        assert_eq!(t.configured_keys(), vec![TimeoutKey::Create]);

        let bad = Value::from(json!({"create": "soon"}));
        assert!(ResourceTimeout::from_config(&bad).is_err());
        assert!(ResourceTimeout::from_config(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_effective_precedence() {
        let resource = ResourceTimeout::new()
            .with_create(Duration::from_secs(30))
            .with_default(Duration::from_secs(20));
        let request = ResourceTimeout::new().with_default(Duration::from_secs(5));

        // Request default beats the resource's specific timeout.
        assert_eq!(
            request.effective(TimeoutKey::Create, Some(&resource)),
            Duration::from_secs(5)
        );

        let empty = ResourceTimeout::new();
        assert_eq!(
            empty.effective(TimeoutKey::Create, Some(&resource)),
            Duration::from_secs(30)
        );
        assert_eq!(
            empty.effective(TimeoutKey::Delete, Some(&resource)),
            Duration::from_secs(20)
        );
        assert_eq!(empty.effective(TimeoutKey::Read, None), Duration::ZERO);
    }
}
