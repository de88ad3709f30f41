//! Managed resources and data sources.
//!
//! A [`Resource`] bundles a schema with the callbacks that act on it. The
//! same type describes data sources; they only use
//! [`ResourceHandler::read`].
//!
//! ```
//! use hemmer_provider_runtime::resource::{Resource, ResourceHandler};
//! use hemmer_provider_runtime::resource_data::ResourceData;
//! use hemmer_provider_runtime::schema::{Attribute, Block};
//! use hemmer_provider_runtime::{async_trait, CallContext, ProviderError};
//!
//! struct Bucket;
//!
//! #[async_trait]
//! impl ResourceHandler for Bucket {
//!     async fn create(&self, _ctx: &CallContext, data: &mut ResourceData) -> Result<(), ProviderError> {
//!         let name = data.get("name");
//!         data.set_id(name.as_str().unwrap_or_default());
//!         Ok(())
//!     }
//!
//!     async fn read(&self, _ctx: &CallContext, _data: &mut ResourceData) -> Result<(), ProviderError> {
//!         Ok(())
//!     }
//!
//!     async fn delete(&self, _ctx: &CallContext, _data: &mut ResourceData) -> Result<(), ProviderError> {
//!         Ok(())
//!     }
//! }
//!
//! let resource = Resource::new(
//!     Block::new().with_attribute("name", Attribute::required_string().with_force_new()),
//!     Bucket,
//! );
//! assert!(resource.core_schema().get("id").is_some());
//! ```

use crate::context::CallContext;
use crate::diagnostic::Diagnostic;
use crate::diff::CustomizeDiff;
use crate::error::ProviderError;
use crate::resource_data::ResourceData;
use crate::schema::{Attribute, AttributeMode, Block, SchemaError, SchemaKind};
use crate::timeout::ResourceTimeout;
use crate::types::ClientCapabilities;
use crate::upgrade::{LegacyState, MigrateStateFn, StateUpgrader, UpgradeTarget};
use crate::value::{Value, WireType};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Validates configuration before it is shimmed into the schema's shape.
pub type ValidateRawConfigFn =
    Arc<dyn Fn(&CallContext, &Value, &ClientCapabilities) -> Vec<Diagnostic> + Send + Sync>;

/// Lifecycle callbacks of a resource.
///
/// Only `read` is mandatory. A resource without `update` can still change
/// attributes that force replacement.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Create the remote object and set the id.
    async fn create(&self, ctx: &CallContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let _ = (ctx, data);
        Err(ProviderError::Unimplemented(
            "this resource does not support create".to_string(),
        ))
    }

    /// Refresh the data from the remote object. Clearing the id reports the
    /// object as gone.
    async fn read(&self, ctx: &CallContext, data: &mut ResourceData) -> Result<(), ProviderError>;

    /// Update the remote object in place.
    async fn update(&self, ctx: &CallContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let _ = (ctx, data);
        Err(ProviderError::Unimplemented(
            "this resource does not support update".to_string(),
        ))
    }

    /// Delete the remote object.
    async fn delete(&self, ctx: &CallContext, data: &mut ResourceData) -> Result<(), ProviderError> {
        let _ = (ctx, data);
        Err(ProviderError::Unimplemented(
            "this resource does not support delete".to_string(),
        ))
    }

    /// Turn an import request into one or more instances. `data` carries the
    /// requested id and identity. The default imports `data` unchanged.
    async fn import(&self, ctx: &CallContext, data: ResourceData) -> Result<Vec<ResourceData>, ProviderError> {
        let _ = ctx;
        Ok(vec![data])
    }
}

/// How a resource handles import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Importer {
    /// Use the requested id as is; `read` fills in the rest.
    Passthrough,
    /// Call [`ResourceHandler::import`].
    Custom,
}

/// The identity schema of a resource and its upgrade chain.
#[derive(Debug, Clone)]
pub struct ResourceIdentity {
    /// Current identity schema version.
    pub version: u64,
    /// The identity schema.
    pub schema: Arc<Block>,
    /// Upgraders for older identity versions.
    pub upgraders: Vec<StateUpgrader>,
}

impl ResourceIdentity {
    /// An identity schema at version 0.
    pub fn new(schema: Block) -> Self {
        Self {
            version: 0,
            schema: Arc::new(schema),
            upgraders: Vec::new(),
        }
    }

    /// Set the version.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Add an upgrader.
    pub fn with_upgrader(mut self, upgrader: StateUpgrader) -> Self {
        self.upgraders.push(upgrader);
        self
    }
}

/// A managed resource or data source.
#[derive(Clone)]
pub struct Resource {
    /// The user-facing schema, without `id` and `timeouts`.
    pub schema: Block,
    /// Current schema version.
    pub schema_version: u64,
    /// Operation timeouts; also adds a `timeouts` block to the schema.
    pub timeouts: Option<ResourceTimeout>,
    /// Versioned upgrade chain, ascending.
    pub state_upgraders: Vec<StateUpgrader>,
    /// Legacy flatmap migration for versions before the chain.
    pub migrate_state: Option<MigrateStateFn>,
    /// Identity schema.
    pub identity: Option<ResourceIdentity>,
    /// Lifecycle callbacks.
    pub handler: Arc<dyn ResourceHandler>,
    /// Import support.
    pub importer: Option<Importer>,
    /// Plan customization, run in order.
    pub customize_diff: Vec<Arc<dyn CustomizeDiff>>,
    /// Raw configuration validators, run in order.
    pub validate_raw_config: Vec<ValidateRawConfigFn>,
    /// Keep integer precision of numbers handed to upgraders.
    pub use_json_number: bool,
    /// Plan normally while the provider is deferred.
    pub plan_modification_when_deferred: bool,
    /// Human-readable description.
    pub description: Option<String>,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("schema", &self.schema)
            .field("schema_version", &self.schema_version)
            .field("timeouts", &self.timeouts)
            .field("state_upgraders", &self.state_upgraders)
            .field("identity", &self.identity)
            .field("importer", &self.importer)
            .field("customize_diff", &self.customize_diff.len())
            .finish_non_exhaustive()
    }
}

impl Resource {
    /// A resource with the given schema and callbacks.
    pub fn new(schema: Block, handler: impl ResourceHandler + 'static) -> Self {
        Self {
            schema,
            schema_version: 0,
            timeouts: None,
            state_upgraders: Vec::new(),
            migrate_state: None,
            identity: None,
            handler: Arc::new(handler),
            importer: None,
            customize_diff: Vec::new(),
            validate_raw_config: Vec::new(),
            use_json_number: false,
            plan_modification_when_deferred: false,
            description: None,
        }
    }

    /// Set the schema version.
    pub fn with_schema_version(mut self, version: u64) -> Self {
        self.schema_version = version;
        self
    }

    /// Set the operation timeouts.
    pub fn with_timeouts(mut self, timeouts: ResourceTimeout) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Add a state upgrader.
    pub fn with_state_upgrader(mut self, upgrader: StateUpgrader) -> Self {
        self.state_upgraders.push(upgrader);
        self
    }

    /// Set the legacy migration.
    pub fn with_migrate_state<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallContext, u64, LegacyState) -> Result<LegacyState, ProviderError> + Send + Sync + 'static,
    {
        self.migrate_state = Some(Arc::new(f));
        self
    }

    /// Set the identity schema.
    pub fn with_identity(mut self, identity: ResourceIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Enable import.
    pub fn with_importer(mut self, importer: Importer) -> Self {
        self.importer = Some(importer);
        self
    }

    /// Append a plan customization.
    pub fn with_customize_diff(mut self, customize: Arc<dyn CustomizeDiff>) -> Self {
        self.customize_diff.push(customize);
        self
    }

    /// Append a raw configuration validator.
    pub fn with_validate_raw_config<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallContext, &Value, &ClientCapabilities) -> Vec<Diagnostic> + Send + Sync + 'static,
    {
        self.validate_raw_config.push(Arc::new(f));
        self
    }

    /// Keep integer precision of numbers handed to upgraders.
    pub fn with_json_numbers(mut self) -> Self {
        self.use_json_number = true;
        self
    }

    /// Plan normally while the provider is deferred.
    pub fn with_plan_modification_when_deferred(mut self) -> Self {
        self.plan_modification_when_deferred = true;
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The schema exchanged with the engine: the user schema plus an
    /// optional computed `id` and, when timeouts are declared, a `timeouts`
    /// block with one attribute per configured operation.
    pub fn core_schema(&self) -> Block {
        let mut block = self.schema.clone();
        block
            .attributes
            .entry("id".to_string())
            .or_insert_with(Attribute::optional_computed_string);
        if let Some(timeouts) = self.timeouts.filter(|t| !t.is_empty()) {
            let keys = timeouts
                .configured_keys()
                .into_iter()
                .fold(Block::new(), |b, key| {
                    b.with_attribute(key.as_str(), Attribute::optional_string())
                });
            block
                .attributes
                .insert("timeouts".to_string(), Attribute::object(keys, AttributeMode::Optional));
        }
        if block.description.is_none() {
            block.description = self.description.clone();
        }
        block
    }

    /// The wire type of the core schema.
    pub fn implied_type(&self) -> WireType {
        self.core_schema().implied_type()
    }

    /// The upgrade target for state of this resource.
    pub fn state_upgrade_target<'a>(&'a self, type_name: &'a str, core: &'a Block) -> UpgradeTarget<'a> {
        UpgradeTarget {
            type_name,
            version: self.schema_version,
            block: core,
            upgraders: &self.state_upgraders,
            migrate: self.migrate_state.as_ref(),
            use_json_number: self.use_json_number,
        }
    }

    /// The upgrade target for the identity of this resource.
    pub fn identity_upgrade_target<'a>(&'a self, type_name: &'a str) -> Option<UpgradeTarget<'a>> {
        self.identity.as_ref().map(|identity| UpgradeTarget {
            type_name,
            version: identity.version,
            block: &identity.schema,
            upgraders: &identity.upgraders,
            migrate: None,
            use_json_number: self.use_json_number,
        })
    }

    /// Check the resource for registration mistakes.
    pub fn internal_validate(&self, name: &str, kind: SchemaKind) -> Result<(), SchemaError> {
        self.core_schema().validate(kind)?;
        validate_chain(name, "state", &self.state_upgraders, self.schema_version)?;
        if let Some(identity) = &self.identity {
            if kind == SchemaKind::DataSource {
                return Err(invalid(name, "data sources cannot declare an identity"));
            }
            identity.schema.validate(SchemaKind::Identity)?;
            validate_chain(name, "identity", &identity.upgraders, identity.version)?;
        }
        if kind == SchemaKind::DataSource {
            if self.importer.is_some() {
                return Err(invalid(name, "data sources cannot be imported"));
            }
            if !self.state_upgraders.is_empty() || self.migrate_state.is_some() {
                return Err(invalid(name, "data sources cannot upgrade state"));
            }
        }
        Ok(())
    }
}

fn invalid(name: &str, message: impl Into<String>) -> SchemaError {
    SchemaError::InvalidResource {
        resource: name.to_string(),
        message: message.into(),
    }
}

fn validate_chain(
    name: &str,
    what: &str,
    upgraders: &[StateUpgrader],
    current: u64,
) -> Result<(), SchemaError> {
    let mut last: Option<u64> = None;
    for upgrader in upgraders {
        if let Some(last) = last {
            if upgrader.version <= last {
                return Err(invalid(
                    name,
                    format!("{} upgraders are out of order at version {}", what, upgrader.version),
                ));
            }
            if upgrader.version - last > 1 {
                return Err(invalid(
                    name,
                    format!("missing {} upgrader between versions {} and {}", what, last, upgrader.version),
                ));
            }
        }
        if upgrader.version >= current {
            return Err(invalid(
                name,
                format!(
                    "{} upgrader version {} must be below the current version {}",
                    what, upgrader.version, current
                ),
            ));
        }
        if !matches!(upgrader.wire_type, WireType::Object(_)) {
            return Err(invalid(
                name,
                format!("{} upgrader {} must declare an object type", what, upgrader.version),
            ));
        }
        last = Some(upgrader.version);
    }
    if let Some(last) = last {
        if last + 1 != current {
            return Err(invalid(
                name,
                format!("missing {} upgrader between versions {} and {}", what, last, current),
            ));
        }
    }
    Ok(())
}
