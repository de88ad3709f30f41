//! State and identity upgrade pipeline.
//!
//! Stored state arrives either as a legacy flatmap or as JSON, tagged with the
//! schema version it was written at. Upgrading runs in four steps:
//!
//! 1. flatmap state older than the first versioned upgrader goes through the
//!    legacy [`MigrateStateFn`], one version at a time;
//! 2. the blob is decoded, using the wire type of the upgrader registered for
//!    the stored version when there is one;
//! 3. every [`StateUpgrader`] from the stored version onward runs in order;
//! 4. the result is coerced into the current schema, attributes the schema no
//!    longer declares are dropped and write-only attributes are nulled.
//!
//! Identity values run through the same pipeline against the identity schema.

use crate::context::CallContext;
use crate::diagnostic::{has_errors, Diagnostic};
use crate::error::ProviderError;
use crate::flatmap::{self, Flatmap};
use crate::normalize::set_write_only_nullvalues;
use crate::schema::Block;
use crate::value::{Value, WireType};
use crate::walk::normalize_block;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// JSON object view of a state, as seen by map upgraders.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Map transform from one schema version to the next.
pub type MapUpgradeFn = Arc<dyn Fn(&CallContext, JsonMap) -> Result<JsonMap, ProviderError> + Send + Sync>;

/// Typed transform from one schema version to the next.
pub type TypedUpgradeFn = Arc<dyn Fn(&CallContext, Value) -> Result<Value, ProviderError> + Send + Sync>;

/// Map transform that reports diagnostics instead of failing.
pub type DiagnosticUpgradeFn = Arc<dyn Fn(&CallContext, JsonMap) -> (JsonMap, Vec<Diagnostic>) + Send + Sync>;

/// Legacy monolithic migration. Called once per version step with the
/// version it starts from.
pub type MigrateStateFn =
    Arc<dyn Fn(&CallContext, u64, LegacyState) -> Result<LegacyState, ProviderError> + Send + Sync>;

/// Stored state as it arrives from the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawState {
    /// JSON encoded state.
    Json(Vec<u8>),
    /// Legacy flatmap state.
    Flatmap(Flatmap),
}

impl RawState {
    /// Encode a JSON value as raw state.
    pub fn from_json(value: &serde_json::Value) -> Self {
        Self::Json(value.to_string().into_bytes())
    }

    /// True when there is nothing to upgrade.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Json(bytes) => bytes.is_empty(),
            Self::Flatmap(map) => map.is_empty(),
        }
    }
}

/// The flatmap state handed to a legacy migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyState {
    /// The resource id.
    pub id: String,
    /// The flat attributes.
    pub attributes: Flatmap,
}

/// How a [`StateUpgrader`] transforms the state.
#[derive(Clone)]
pub enum UpgradeFn {
    /// Operates on the JSON object.
    Map(MapUpgradeFn),
    /// Operates on the value decoded with the upgrader's wire type.
    Typed(TypedUpgradeFn),
    /// Operates on the JSON object and returns diagnostics. An error
    /// diagnostic aborts the upgrade.
    WithDiagnostics(DiagnosticUpgradeFn),
}

impl fmt::Debug for UpgradeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Map(_) => f.write_str("UpgradeFn::Map"),
            Self::Typed(_) => f.write_str("UpgradeFn::Typed"),
            Self::WithDiagnostics(_) => f.write_str("UpgradeFn::WithDiagnostics"),
        }
    }
}

/// One step of a versioned upgrade chain.
#[derive(Debug, Clone)]
pub struct StateUpgrader {
    /// The version this step upgrades from.
    pub version: u64,
    /// The wire type of state stored at `version`.
    pub wire_type: WireType,
    /// The transform.
    pub upgrade: UpgradeFn,
}

impl StateUpgrader {
    /// A step operating on the JSON object.
    pub fn map<F>(version: u64, wire_type: WireType, f: F) -> Self
    where
        F: Fn(&CallContext, JsonMap) -> Result<JsonMap, ProviderError> + Send + Sync + 'static,
    {
        Self {
            version,
            wire_type,
            upgrade: UpgradeFn::Map(Arc::new(f)),
        }
    }

    /// A step operating on typed values.
    pub fn typed<F>(version: u64, wire_type: WireType, f: F) -> Self
    where
        F: Fn(&CallContext, Value) -> Result<Value, ProviderError> + Send + Sync + 'static,
    {
        Self {
            version,
            wire_type,
            upgrade: UpgradeFn::Typed(Arc::new(f)),
        }
    }

    /// A step that reports diagnostics.
    pub fn with_diagnostics<F>(version: u64, wire_type: WireType, f: F) -> Self
    where
        F: Fn(&CallContext, JsonMap) -> (JsonMap, Vec<Diagnostic>) + Send + Sync + 'static,
    {
        Self {
            version,
            wire_type,
            upgrade: UpgradeFn::WithDiagnostics(Arc::new(f)),
        }
    }

    fn run(
        &self,
        ctx: &CallContext,
        map: JsonMap,
        diags: &mut Vec<Diagnostic>,
    ) -> Result<JsonMap, ProviderError> {
        match &self.upgrade {
            UpgradeFn::Map(f) => f(ctx, map),
            UpgradeFn::Typed(f) => {
                let value = Value::from_json(serde_json::Value::Object(map));
                let value = self
                    .wire_type
                    .coerce(&self.wire_type.remove_undeclared(value))?;
                into_json_map(&f(ctx, value)?)
            },
            UpgradeFn::WithDiagnostics(f) => {
                let (map, produced) = f(ctx, map);
                diags.extend(produced);
                Ok(map)
            },
        }
    }
}

/// Everything the pipeline needs to know about the value being upgraded.
#[derive(Clone, Copy)]
pub struct UpgradeTarget<'a> {
    /// Resource type name, for error messages.
    pub type_name: &'a str,
    /// The current schema version.
    pub version: u64,
    /// The current schema.
    pub block: &'a Block,
    /// The versioned chain, in ascending order.
    pub upgraders: &'a [StateUpgrader],
    /// The legacy migration, if any.
    pub migrate: Option<&'a MigrateStateFn>,
    /// Keep integer precision of JSON numbers.
    pub use_json_number: bool,
}

/// Upgrade `raw`, stored at `stored_version`, to the current schema.
///
/// Returns `None` for an empty blob or when an upgrader reported an error.
pub fn upgrade_value(
    ctx: &CallContext,
    target: &UpgradeTarget<'_>,
    stored_version: u64,
    raw: &RawState,
) -> (Option<Value>, Vec<Diagnostic>) {
    let mut diags = Vec::new();
    if raw.is_empty() {
        debug!(resource_type = target.type_name, "No state provided to upgrade");
        return (None, diags);
    }
    match try_upgrade(ctx, target, stored_version, raw, &mut diags) {
        Ok(value) => (value, diags),
        Err(err) => {
            diags.push(Diagnostic::from(err));
            (None, diags)
        },
    }
}

fn try_upgrade(
    ctx: &CallContext,
    target: &UpgradeTarget<'_>,
    stored_version: u64,
    raw: &RawState,
    diags: &mut Vec<Diagnostic>,
) -> Result<Option<Value>, ProviderError> {
    let (mut map, mut version) = match raw {
        RawState::Flatmap(flat) => upgrade_flatmap(ctx, target, stored_version, flat)?,
        RawState::Json(bytes) => (serde_json::from_slice::<JsonMap>(bytes)?, stored_version),
    };
    if !target.use_json_number {
        map = numbers_as_floats(map);
    }

    for upgrader in target.upgraders {
        if upgrader.version != version {
            continue;
        }
        trace!(resource_type = target.type_name, version, "Running state upgrader");
        map = upgrader
            .run(ctx, map, diags)
            .map_err(|err| migration_error(target, version, err))?;
        if has_errors(diags) {
            debug!(resource_type = target.type_name, version, "State upgrader reported errors");
            return Ok(None);
        }
        version += 1;
    }

    let ty = target.block.implied_type();
    let value = ty.remove_undeclared(Value::from_json(serde_json::Value::Object(map)));
    let value = normalize_block(target.block, &value)?;
    Ok(Some(set_write_only_nullvalues(&value, target.block)))
}

fn upgrade_flatmap(
    ctx: &CallContext,
    target: &UpgradeTarget<'_>,
    version: u64,
    flat: &Flatmap,
) -> Result<(JsonMap, u64), ProviderError> {
    let first = target.upgraders.first();
    let migrate_until = first.map_or(target.version, |u| u.version);
    let mut flat = flat.clone();
    let mut upgraded = version;
    let mut ty = target.block.implied_type();

    if version < migrate_until {
        match target.migrate {
            Some(migrate) => {
                let mut state = LegacyState {
                    id: flat.get("id").cloned().unwrap_or_default(),
                    attributes: flat,
                };
                for step in version..migrate_until {
                    debug!(resource_type = target.type_name, version = step, "Running legacy state migration");
                    state = migrate(ctx, step, state).map_err(|err| migration_error(target, step, err))?;
                }
                flat = state.attributes;
                flat.insert("id".to_string(), state.id);
            },
            None => {
                return Err(migration_error(
                    target,
                    version,
                    ProviderError::Sdk("no state migration is registered for this version".to_string()),
                ));
            },
        }
        upgraded = migrate_until;
        if let Some(first) = first {
            ty = first.wire_type.clone();
        }
    } else if let Some(upgrader) = target.upgraders.iter().find(|u| u.version == version) {
        ty = upgrader.wire_type.clone();
    }

    let value = flatmap::decode(&flat, &ty)?.unknown_as_null();
    Ok((into_json_map(&value)?, upgraded))
}

fn into_json_map(value: &Value) -> Result<JsonMap, ProviderError> {
    match value.to_json()? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(ProviderError::Sdk(format!(
            "upgraded state must be an object, got {}",
            other
        ))),
    }
}

fn migration_error(target: &UpgradeTarget<'_>, version: u64, err: ProviderError) -> ProviderError {
    ProviderError::Migration {
        resource_type: target.type_name.to_string(),
        version,
        message: err.message(),
    }
}

fn numbers_as_floats(map: JsonMap) -> JsonMap {
    map.into_iter().map(|(k, v)| (k, float_numbers(v))).collect()
}

fn float_numbers(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Number(n) => n
            .as_f64()
            .and_then(serde_json::Number::from_f64)
            .map_or(serde_json::Value::Number(n), serde_json::Value::Number),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(float_numbers).collect())
        },
        serde_json::Value::Object(map) => serde_json::Value::Object(numbers_as_floats(map)),
        other => other,
    }
}
