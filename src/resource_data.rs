//! The read/write view provider callbacks work with.
//!
//! [`ResourceData`] layers three values, newest first:
//!
//! - [`Layer::Set`]: top-level attributes written during this request,
//! - [`Layer::Diff`]: the prior state with the planned diff applied,
//! - [`Layer::State`]: the prior state.
//!
//! A write copies the whole top-level attribute into the set layer before
//! changing it, so the layers below are never touched. Reads stop at the
//! first layer that holds the top-level attribute.

use crate::diff::InstanceDiff;
use crate::error::ProviderError;
use crate::path::AttributePath;
use crate::schema::{Block, SchemaNode};
use crate::timeout::{ResourceTimeout, TimeoutKey};
use crate::value::{TypeError, Value};
use crate::walk::{normalize_node, set_value_at, value_at, value_at_node, zero_value_at};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// The persisted state of one resource instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceState {
    /// The instance id. Empty means the instance does not exist.
    pub id: String,
    /// Schema version the attributes conform to.
    #[serde(default)]
    pub schema_version: u64,
    /// The attribute value tree.
    pub attributes: Value,
    /// The identity value tree, for resources with an identity schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Value>,
    /// Schema version of the identity.
    #[serde(default)]
    pub identity_version: u64,
    /// Connection details for provisioners. Never persisted.
    #[serde(skip)]
    pub conn_info: BTreeMap<String, String>,
    /// Timeouts configured for the instance.
    #[serde(default)]
    pub timeouts: ResourceTimeout,
}

impl InstanceState {
    /// A state for `attributes`, taking the id from its `id` attribute.
    pub fn new(attributes: Value) -> Self {
        let id = attributes
            .get_attr("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            id,
            attributes,
            ..Default::default()
        }
    }
}

/// A value layer of [`ResourceData`], oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Layer {
    /// The prior state.
    State,
    /// The prior state with the planned diff applied.
    Diff,
    /// Writes made during the request.
    Set,
}

/// Read/write access to a resource's identity.
#[derive(Debug, Clone)]
pub struct IdentityData {
    schema: Arc<Block>,
    value: Value,
}

impl IdentityData {
    /// Identity data over `value`.
    pub fn new(schema: Arc<Block>, value: Value) -> Self {
        Self { schema, value }
    }

    /// The value at `path`, or the zero value of its type.
    pub fn get(&self, path: impl Into<AttributePath>) -> Value {
        let path = path.into();
        value_at(&self.schema, &self.value, &path)
            .filter(|v| !v.is_null())
            .cloned()
            .unwrap_or_else(|| zero_value_at(&self.schema, &path))
    }

    /// Write `value` at `path`, coercing it to the attribute's type.
    pub fn set(&mut self, path: impl Into<AttributePath>, value: impl Into<Value>) -> Result<(), ProviderError> {
        let path = path.into();
        let (node, resolved) = self
            .schema
            .resolve(&path)
            .ok_or_else(|| TypeError::new(path.clone(), "invalid identity address"))?;
        let value = normalize_node(node, &value.into(), &resolved)?;
        set_value_at(&self.schema, &mut self.value, &resolved, value)?;
        Ok(())
    }

    /// The whole identity value.
    pub fn raw(&self) -> &Value {
        &self.value
    }

    /// Consume into the identity value.
    pub fn into_value(self) -> Value {
        self.value
    }
}

/// Request-scoped view of a resource instance.
#[derive(Debug, Clone)]
pub struct ResourceData {
    schema: Arc<Block>,
    identity_schema: Option<Arc<Block>>,
    timeouts: Option<ResourceTimeout>,
    request_timeouts: ResourceTimeout,
    schema_version: u64,
    identity_version: u64,
    state: Option<InstanceState>,
    diff: Option<InstanceDiff>,
    planned: Option<Value>,
    overlay: BTreeMap<String, Value>,
    conn_info: BTreeMap<String, String>,
    raw_config: Value,
    raw_state: Value,
    raw_plan: Value,
    identity: Option<IdentityData>,
    new_resource: bool,
}

impl ResourceData {
    /// An empty view over `schema`.
    pub fn new(schema: Arc<Block>) -> Self {
        Self {
            schema,
            identity_schema: None,
            timeouts: None,
            request_timeouts: ResourceTimeout::default(),
            schema_version: 0,
            identity_version: 0,
            state: None,
            diff: None,
            planned: None,
            overlay: BTreeMap::new(),
            conn_info: BTreeMap::new(),
            raw_config: Value::Null,
            raw_state: Value::Null,
            raw_plan: Value::Null,
            identity: None,
            new_resource: false,
        }
    }

    /// Set the prior state. Call before [`ResourceData::with_diff`].
    pub fn with_state(mut self, state: InstanceState) -> Self {
        self.conn_info = state.conn_info.clone();
        self.raw_state = state.attributes.clone();
        self.request_timeouts = state.timeouts;
        self.identity_version = state.identity_version;
        self.state = Some(state);
        self
    }

    /// Set the planned diff, applying it to the prior state.
    pub fn with_diff(mut self, diff: InstanceDiff) -> Result<Self, ProviderError> {
        let prior = self.state_layer();
        let planned = diff.apply(prior, &self.schema)?;
        if self.raw_plan.is_null() {
            self.raw_plan = planned.clone();
        }
        self.planned = Some(planned);
        self.diff = Some(diff);
        Ok(self)
    }

    /// Set the identity schema, enabling [`ResourceData::identity`].
    pub fn with_identity_schema(mut self, schema: Option<Arc<Block>>, version: u64) -> Self {
        self.identity_schema = schema;
        self.identity_version = version;
        self
    }

    /// Set the timeouts the resource declares.
    pub fn with_timeouts(mut self, timeouts: Option<ResourceTimeout>) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the timeouts configured for this request.
    pub fn with_request_timeouts(mut self, timeouts: ResourceTimeout) -> Self {
        self.request_timeouts = timeouts;
        self
    }

    /// Set the schema version written into [`ResourceData::state`].
    pub fn with_schema_version(mut self, version: u64) -> Self {
        self.schema_version = version;
        self
    }

    /// Set the configuration as received.
    pub fn with_raw_config(mut self, config: Value) -> Self {
        self.raw_config = config;
        self
    }

    /// Set the planned value as received.
    pub fn with_raw_plan(mut self, plan: Value) -> Self {
        self.raw_plan = plan;
        self
    }

    /// The schema the data is read against.
    pub fn schema(&self) -> &Block {
        &self.schema
    }

    fn state_layer(&self) -> &Value {
        self.state.as_ref().map_or(&Value::Null, |s| &s.attributes)
    }

    /// Resolve `path` through the layers, newest first, starting at `newest`.
    pub fn resolve(&self, path: &AttributePath, newest: Layer) -> Option<&Value> {
        if newest >= Layer::Set {
            if let Some(root) = path.root_attribute() {
                if let Some(value) = self.overlay.get(root) {
                    let rest = AttributePath::from_steps(path.steps()[1..].to_vec());
                    let attr = self.schema.get(root)?;
                    return value_at_node(SchemaNode::Attribute(attr), value, &rest);
                }
            }
        }
        if newest >= Layer::Diff {
            if let Some(planned) = &self.planned {
                return value_at(&self.schema, planned, path);
            }
        }
        value_at(&self.schema, self.state_layer(), path)
    }

    fn fallback(&self, path: &AttributePath) -> Value {
        if let Some((SchemaNode::Attribute(attr), _)) = self.schema.resolve(path) {
            if !attr.is_computed() {
                if let Ok(Some(default)) = attr.default_value() {
                    return default;
                }
            }
        }
        zero_value_at(&self.schema, path)
    }

    /// The value at `path`.
    ///
    /// Falls back to the schema default when no layer holds a value and the
    /// attribute is not computed, then to the zero value of the type. Sets
    /// are returned as lists ordered by equivalence key.
    pub fn get(&self, path: impl Into<AttributePath>) -> Value {
        let path = path.into();
        match self.resolve(&path, Layer::Set) {
            Some(value) if !value.is_null() => set_as_list(value.clone()),
            _ => self.fallback(&path),
        }
    }

    /// The value at `path` and whether it is set to something other than the
    /// zero value of its type.
    ///
    /// An explicitly configured zero value reports `false`, exactly like an
    /// unset attribute. Use [`ResourceData::get_ok_exists`] to tell them
    /// apart.
    pub fn get_ok(&self, path: impl Into<AttributePath>) -> (Value, bool) {
        let path = path.into();
        match self.resolve(&path, Layer::Set) {
            Some(value) if value.is_present() => {
                let ok = !value.is_zero();
                (set_as_list(value.clone()), ok)
            },
            _ => (self.fallback(&path), false),
        }
    }

    /// The value at `path` and whether any layer holds a known, non-null
    /// value for it.
    #[deprecated(note = "cannot tell unset from zero for computed attributes; prefer get_raw_config_at")]
    pub fn get_ok_exists(&self, path: impl Into<AttributePath>) -> (Value, bool) {
        let path = path.into();
        let exists = self
            .resolve(&path, Layer::Set)
            .is_some_and(Value::is_present);
        (self.get(path), exists)
    }

    /// The prior and planned values at `path`.
    pub fn get_change(&self, path: impl Into<AttributePath>) -> (Value, Value) {
        let path = path.into();
        let old = self.resolve(&path, Layer::State).cloned().unwrap_or_default();
        let new = self.resolve(&path, Layer::Diff).cloned().unwrap_or_default();
        (old, new)
    }

    /// True when the planned value at `path` differs from the prior one.
    pub fn has_change(&self, path: impl Into<AttributePath>) -> bool {
        let (old, new) = self.get_change(path);
        old != new
    }

    /// True when any of `paths` has a change.
    pub fn has_changes<P: Into<AttributePath>>(&self, paths: impl IntoIterator<Item = P>) -> bool {
        paths.into_iter().any(|p| self.has_change(p))
    }

    /// True when a top-level attribute other than `key` has a change.
    pub fn has_change_except(&self, key: &str) -> bool {
        self.has_changes_except(&[key])
    }

    /// True when a top-level attribute not in `keys` has a change.
    pub fn has_changes_except(&self, keys: &[&str]) -> bool {
        let Some(diff) = &self.diff else {
            return false;
        };
        diff.changed_roots()
            .iter()
            .filter(|root| !keys.contains(&root.as_str()))
            .any(|root| self.has_change(root.as_str()))
    }

    /// Write `value` at `path`, coercing it to the attribute's type. Sets are
    /// re-keyed.
    pub fn set(&mut self, path: impl Into<AttributePath>, value: impl Into<Value>) -> Result<(), ProviderError> {
        let path = path.into();
        let (node, resolved) = self
            .schema
            .resolve(&path)
            .ok_or_else(|| TypeError::new(path.clone(), "invalid address"))?;
        let Some(root) = resolved.root_attribute().map(str::to_string) else {
            return Err(TypeError::new(path, "cannot set the whole object").into());
        };
        let value = normalize_node(node, &value.into(), &resolved)?;

        if !self.overlay.contains_key(&root) {
            let current = self
                .resolve(&AttributePath::root().attribute(root.clone()), Layer::Diff)
                .cloned()
                .unwrap_or_default();
            self.overlay.insert(root.clone(), current);
        }
        let mut object = Value::Object(std::mem::take(&mut self.overlay));
        let result = set_value_at(&self.schema, &mut object, &resolved, value);
        if let Value::Object(entries) = object {
            self.overlay = entries;
        }
        result.map_err(ProviderError::from)
    }

    /// The instance id. Empty when the instance does not exist.
    pub fn id(&self) -> String {
        self.resolve(&AttributePath::root().attribute("id"), Layer::Set)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// Set the instance id. An empty id marks the instance as gone.
    pub fn set_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        let value = if id.is_empty() {
            Value::Null
        } else {
            Value::String(id)
        };
        self.overlay.insert("id".to_string(), value);
    }

    /// Connection details for provisioners.
    pub fn conn_info(&self) -> &BTreeMap<String, String> {
        &self.conn_info
    }

    /// Replace the connection details.
    pub fn set_conn_info(&mut self, info: BTreeMap<String, String>) {
        self.conn_info = info;
    }

    /// The configuration as received, write-only attributes included.
    pub fn get_raw_config(&self) -> &Value {
        &self.raw_config
    }

    /// The configuration value at `path`, or null.
    pub fn get_raw_config_at(&self, path: impl Into<AttributePath>) -> Value {
        value_at(&self.schema, &self.raw_config, &path.into())
            .cloned()
            .unwrap_or_default()
    }

    /// The prior state as received.
    pub fn get_raw_state(&self) -> &Value {
        &self.raw_state
    }

    /// The planned value as received.
    pub fn get_raw_plan(&self) -> &Value {
        &self.raw_plan
    }

    /// The instance identity.
    ///
    /// Seeded on first use from the planned identity, then the prior state's
    /// identity, and kept for the rest of the request.
    pub fn identity(&mut self) -> Result<&mut IdentityData, ProviderError> {
        let schema = self
            .identity_schema
            .clone()
            .ok_or(ProviderError::NoIdentitySchema)?;
        if self.identity.is_none() {
            let seed = self
                .diff
                .as_ref()
                .and_then(|d| d.identity.clone())
                .or_else(|| self.state.as_ref().and_then(|s| s.identity.clone()))
                .unwrap_or_default();
            self.identity = Some(IdentityData::new(schema, seed));
        }
        self.identity.as_mut().ok_or(ProviderError::NoIdentitySchema)
    }

    /// The effective timeout for an operation.
    pub fn timeout(&self, key: TimeoutKey) -> Duration {
        self.request_timeouts.effective(key, self.timeouts.as_ref())
    }

    /// True while creating the instance.
    pub fn is_new_resource(&self) -> bool {
        self.new_resource
    }

    /// Mark the instance as being created.
    pub fn mark_new_resource(&mut self) {
        self.new_resource = true;
    }

    /// Every layer merged into one object.
    fn materialize(&self) -> BTreeMap<String, Value> {
        let base = self.planned.as_ref().unwrap_or_else(|| self.state_layer());
        let mut out = base.as_entries().cloned().unwrap_or_default();
        for (name, value) in &self.overlay {
            out.insert(name.clone(), value.clone());
        }
        for name in self.schema.attributes.keys() {
            out.entry(name.clone()).or_insert(Value::Null);
        }
        out
    }

    /// The merged value with unknowns nulled, regardless of the id.
    pub fn state_value(&self) -> Value {
        Value::Object(self.materialize()).unknown_as_null()
    }

    /// The new instance state, or `None` when the id is empty.
    pub fn state(&self) -> Option<InstanceState> {
        let attributes = self.state_value();
        let id = attributes
            .get_attr("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if id.is_empty() {
            return None;
        }
        let identity = match &self.identity {
            Some(identity) => Some(identity.raw().clone()),
            None => self.state.as_ref().and_then(|s| s.identity.clone()),
        };
        Some(InstanceState {
            id,
            schema_version: self.schema_version,
            attributes,
            identity,
            identity_version: self.identity_version,
            conn_info: self.conn_info.clone(),
            timeouts: self.request_timeouts,
        })
    }
}

fn set_as_list(value: Value) -> Value {
    match value {
        Value::Set(items) => Value::List(items),
        other => other,
    }
}
