//! Provider registration.

use crate::context::{CallContext, Meta};
use crate::diagnostic::Diagnostic;
use crate::error::ProviderError;
use crate::resource::Resource;
use crate::resource_data::ResourceData;
use crate::schema::{Block, SchemaError, SchemaKind};
use crate::types::Deferred;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What provider configuration produced.
#[derive(Default)]
pub struct ConfigureOutcome {
    /// Provider-wide value handed to every later callback.
    pub meta: Option<Meta>,
    /// Defer every resource and data source operation.
    pub deferred: Option<Deferred>,
    /// Warnings or errors raised while configuring.
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Debug for ConfigureOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigureOutcome")
            .field("has_meta", &self.meta.is_some())
            .field("deferred", &self.deferred)
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}

impl ConfigureOutcome {
    /// An outcome carrying `meta`.
    pub fn with_meta<T: Send + Sync + 'static>(meta: T) -> Self {
        Self {
            meta: Some(Arc::new(meta)),
            ..Default::default()
        }
    }

    /// An outcome deferring all operations.
    pub fn deferred(deferred: Deferred) -> Self {
        Self {
            deferred: Some(deferred),
            ..Default::default()
        }
    }

    /// Add a diagnostic.
    pub fn with_diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostics.push(diagnostic);
        self
    }
}

/// Configures the provider from its configuration block.
#[async_trait]
pub trait ConfigureProvider: Send + Sync {
    /// Build the provider meta. `deferral_allowed` tells whether the engine
    /// accepts a deferred outcome.
    async fn configure(
        &self,
        ctx: &CallContext,
        config: &ResourceData,
        deferral_allowed: bool,
    ) -> Result<ConfigureOutcome, ProviderError>;
}

/// A provider: its configuration schema and the resources and data sources
/// it serves.
#[derive(Clone, Default)]
pub struct Provider {
    /// The provider configuration schema.
    pub schema: Block,
    /// Managed resources by type name.
    pub resources: BTreeMap<String, Resource>,
    /// Data sources by type name.
    pub data_sources: BTreeMap<String, Resource>,
    /// Configuration callback.
    pub configure: Option<Arc<dyn ConfigureProvider>>,
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("schema", &self.schema)
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("data_sources", &self.data_sources.keys().collect::<Vec<_>>())
            .field("has_configure", &self.configure.is_some())
            .finish()
    }
}

impl Provider {
    /// An empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration schema.
    pub fn with_schema(mut self, schema: Block) -> Self {
        self.schema = schema;
        self
    }

    /// Register a managed resource.
    pub fn with_resource(mut self, name: impl Into<String>, resource: Resource) -> Self {
        self.resources.insert(name.into(), resource);
        self
    }

    /// Register a data source.
    pub fn with_data_source(mut self, name: impl Into<String>, data_source: Resource) -> Self {
        self.data_sources.insert(name.into(), data_source);
        self
    }

    /// Set the configuration callback.
    pub fn with_configure(mut self, configure: impl ConfigureProvider + 'static) -> Self {
        self.configure = Some(Arc::new(configure));
        self
    }

    /// Check the provider and everything it registers for mistakes.
    pub fn internal_validate(&self) -> Result<(), SchemaError> {
        self.schema.validate(SchemaKind::Provider)?;
        for (name, resource) in &self.resources {
            resource.internal_validate(name, SchemaKind::Resource)?;
        }
        for (name, data_source) in &self.data_sources {
            data_source.internal_validate(name, SchemaKind::DataSource)?;
        }
        Ok(())
    }
}
