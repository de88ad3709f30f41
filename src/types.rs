//! Request and response types of the orchestrator operations.
//!
//! Values travel as [`Value`] trees; a transport adapter decodes the
//! engine's wire encoding into them against the resource's implied type.

use crate::diagnostic::Diagnostic;
use crate::path::AttributePath;
use crate::schema::Schema;
use crate::timeout::ResourceTimeout;
use crate::upgrade::RawState;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Private metadata key holding the configured timeouts.
pub const TIMEOUTS_META_KEY: &str = "e2bfb730-ecaa-11e6-8f88-34363bc7c4c0";

/// Private metadata key holding the schema version.
pub const SCHEMA_VERSION_META_KEY: &str = "schema_version";

/// What the engine supports for this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClientCapabilities {
    /// The engine accepts deferred responses.
    pub deferral_allowed: bool,
    /// The engine supports write-only attributes.
    pub write_only_attributes_allowed: bool,
}

impl ClientCapabilities {
    /// Capabilities allowing deferral.
    pub fn with_deferral() -> Self {
        Self {
            deferral_allowed: true,
            ..Default::default()
        }
    }
}

/// Why an operation was deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeferredReason {
    /// No reason given.
    #[default]
    Unknown,
    /// The resource configuration holds unknown values.
    ResourceConfigUnknown,
    /// The provider configuration holds unknown values.
    ProviderConfigUnknown,
    /// A prerequisite is missing.
    AbsentPrereq,
}

/// Marks a response as deferred to a later run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Deferred {
    /// Why the operation was deferred.
    pub reason: DeferredReason,
}

impl Deferred {
    /// A deferral with `reason`.
    pub fn new(reason: DeferredReason) -> Self {
        Self { reason }
    }
}

/// Opaque per-instance data kept by the engine between plan and apply.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivateState(pub BTreeMap<String, serde_json::Value>);

impl PrivateState {
    /// Decode private bytes. Empty input is an empty map.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(bytes)
    }

    /// Encode to bytes. An empty map encodes to no bytes.
    pub fn encode(&self) -> Vec<u8> {
        if self.0.is_empty() {
            return Vec::new();
        }
        serde_json::to_vec(&self.0).unwrap_or_default()
    }

    /// The timeouts stored by the last plan.
    pub fn timeouts(&self) -> Option<ResourceTimeout> {
        self.0
            .get(TIMEOUTS_META_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Store the timeouts; empty timeouts remove the entry.
    pub fn set_timeouts(&mut self, timeouts: &ResourceTimeout) {
        if timeouts.is_empty() {
            self.0.remove(TIMEOUTS_META_KEY);
            return;
        }
        if let Ok(value) = serde_json::to_value(timeouts) {
            self.0.insert(TIMEOUTS_META_KEY.to_string(), value);
        }
    }

    /// Store the schema version.
    pub fn set_schema_version(&mut self, version: u64) {
        self.0
            .insert(SCHEMA_VERSION_META_KEY.to_string(), serde_json::Value::from(version.to_string()));
    }
}

/// Provider metadata returned by `get_metadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// List of resource type names.
    pub resources: Vec<String>,
    /// List of data source type names.
    pub data_sources: Vec<String>,
    /// Server capabilities.
    pub capabilities: ServerCapabilities,
}

/// Server capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    /// Whether the provider supports planning destroy operations.
    pub plan_destroy: bool,
    /// The engine may skip `get_provider_schema` once cached.
    pub get_provider_schema_optional: bool,
}

/// Response of `get_provider_schema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetProviderSchemaResponse {
    /// The provider configuration schema.
    pub provider: Schema,
    /// Resource schemas by type name.
    pub resources: BTreeMap<String, Schema>,
    /// Data source schemas by type name.
    pub data_sources: BTreeMap<String, Schema>,
    /// Problems found while describing the schemas.
    pub diagnostics: Vec<Diagnostic>,
}

/// Response of `get_resource_identity_schemas`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IdentitySchemasResponse {
    /// Identity schemas by resource type name.
    pub identity_schemas: BTreeMap<String, Schema>,
    /// Problems found while describing the schemas.
    pub diagnostics: Vec<Diagnostic>,
}

/// Request of the three config validation operations.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidateConfigRequest {
    /// Resource or data source type; ignored for the provider.
    pub type_name: String,
    /// The configuration.
    pub config: Value,
    /// What the engine supports.
    pub client_capabilities: ClientCapabilities,
}

impl ValidateConfigRequest {
    /// A request for `type_name` with default capabilities.
    pub fn new(type_name: impl Into<String>, config: Value) -> Self {
        Self {
            type_name: type_name.into(),
            config,
            client_capabilities: ClientCapabilities::default(),
        }
    }
}

/// Response of a config validation operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidateConfigResponse {
    /// Validation problems.
    pub diagnostics: Vec<Diagnostic>,
}

/// Request of `configure_provider`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigureProviderRequest {
    /// The provider configuration.
    pub config: Value,
    /// What the engine supports.
    pub client_capabilities: ClientCapabilities,
}

/// Response of `configure_provider`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigureProviderResponse {
    /// Configuration problems.
    pub diagnostics: Vec<Diagnostic>,
}

/// Request of `upgrade_resource_state`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeResourceStateRequest {
    /// Resource type.
    pub type_name: String,
    /// Schema version the stored state was written with.
    pub version: u64,
    /// The stored state.
    pub raw_state: RawState,
}

/// Response of `upgrade_resource_state`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpgradeResourceStateResponse {
    /// The state in the current schema's shape; `None` for empty input or on
    /// error.
    pub upgraded_state: Option<Value>,
    /// Upgrade problems.
    pub diagnostics: Vec<Diagnostic>,
}

/// Request of `upgrade_resource_identity`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeResourceIdentityRequest {
    /// Resource type.
    pub type_name: String,
    /// Identity schema version the stored identity was written with.
    pub version: u64,
    /// The stored identity.
    pub raw_identity: RawState,
}

/// Response of `upgrade_resource_identity`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpgradeResourceIdentityResponse {
    /// The identity in the current identity schema's shape.
    pub upgraded_identity: Option<Value>,
    /// Upgrade problems.
    pub diagnostics: Vec<Diagnostic>,
}

/// Request of `read_resource`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResourceRequest {
    /// Resource type.
    pub type_name: String,
    /// The state to refresh.
    pub current_state: Value,
    /// The current identity.
    pub current_identity: Option<Value>,
    /// Private metadata from the last apply.
    pub private: Vec<u8>,
    /// What the engine supports.
    pub client_capabilities: ClientCapabilities,
}

/// Response of `read_resource`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadResourceResponse {
    /// The refreshed state; null when the resource is gone.
    pub new_state: Value,
    /// The refreshed identity.
    pub new_identity: Option<Value>,
    /// Private metadata, echoed.
    pub private: Vec<u8>,
    /// Read problems.
    pub diagnostics: Vec<Diagnostic>,
    /// Set when the read was deferred.
    pub deferred: Option<Deferred>,
}

/// Request of `plan_resource_change`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanResourceChangeRequest {
    /// Resource type.
    pub type_name: String,
    /// The prior state; null on create.
    pub prior_state: Value,
    /// The engine's proposed new state.
    pub proposed_new_state: Value,
    /// The configuration.
    pub config: Value,
    /// The prior identity.
    pub prior_identity: Option<Value>,
    /// Private metadata from the last apply.
    pub prior_private: Vec<u8>,
    /// What the engine supports.
    pub client_capabilities: ClientCapabilities,
}

/// Response of `plan_resource_change`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlanResourceChangeResponse {
    /// The planned state.
    pub planned_state: Value,
    /// The planned identity.
    pub planned_identity: Option<Value>,
    /// Paths whose change forces replacement.
    pub requires_replace: Vec<AttributePath>,
    /// Private metadata handed to apply.
    pub planned_private: Vec<u8>,
    /// Plan problems.
    pub diagnostics: Vec<Diagnostic>,
    /// Set when the plan was deferred.
    pub deferred: Option<Deferred>,
}

/// Request of `apply_resource_change`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyResourceChangeRequest {
    /// Resource type.
    pub type_name: String,
    /// The prior state; null on create.
    pub prior_state: Value,
    /// The planned state; null on destroy.
    pub planned_state: Value,
    /// The configuration.
    pub config: Value,
    /// The planned identity.
    pub planned_identity: Option<Value>,
    /// Private metadata from plan.
    pub planned_private: Vec<u8>,
}

/// Response of `apply_resource_change`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApplyResourceChangeResponse {
    /// The new state; null after a destroy.
    pub new_state: Value,
    /// The new identity.
    pub new_identity: Option<Value>,
    /// Private metadata to keep.
    pub private: Vec<u8>,
    /// Apply problems.
    pub diagnostics: Vec<Diagnostic>,
}

/// Response of `stop_provider`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StopProviderResponse {
    /// Set when stopping failed.
    pub error: Option<String>,
}

/// Request of `import_resource_state`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportResourceStateRequest {
    /// Resource type.
    pub type_name: String,
    /// The id to import.
    pub id: String,
    /// The identity to import.
    pub identity: Option<Value>,
    /// What the engine supports.
    pub client_capabilities: ClientCapabilities,
}

/// An imported resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The imported state.
    pub state: Value,
    /// The imported identity.
    pub identity: Option<Value>,
    /// Private metadata.
    pub private: Vec<u8>,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
            identity: None,
            private: Vec::new(),
        }
    }
}

/// Response of `import_resource_state`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImportResourceStateResponse {
    /// The imported resources.
    pub imported_resources: Vec<ImportedResource>,
    /// Import problems.
    pub diagnostics: Vec<Diagnostic>,
    /// Set when the import was deferred.
    pub deferred: Option<Deferred>,
}

/// Request of `read_data_source`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadDataSourceRequest {
    /// Data source type.
    pub type_name: String,
    /// The configuration.
    pub config: Value,
    /// What the engine supports.
    pub client_capabilities: ClientCapabilities,
}

/// Response of `read_data_source`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadDataSourceResponse {
    /// The data source state.
    pub state: Value,
    /// Read problems.
    pub diagnostics: Vec<Diagnostic>,
    /// Set when the read was deferred.
    pub deferred: Option<Deferred>,
}
