//! The lifecycle orchestrator.
//!
//! [`ProviderServer`] turns the engine's requests into calls on a
//! [`Provider`]'s resources and data sources. A transport adapter decodes
//! requests into the types of [`crate::types`] and encodes the responses;
//! errors never escape an operation, they come back as diagnostics.
//!
//! # Stopping
//!
//! Every operation runs with a [`CallContext`] derived from the server's
//! [`StopSignal`]. [`ProviderServer::stop_provider`]:
//! 1. Cancels the contexts of every in-flight operation
//! 2. Waits for them to finish (bounded by [`ServerOptions::stop_timeout`])
//! 3. Re-arms the signal so later requests run normally

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::context::{CallContext, Meta};
use crate::diagnostic::{has_errors, Diagnostic};
use crate::diff::{run_customize_chain, schema_diff, InstanceDiff, ResourceDiff};
use crate::error::ProviderError;
use crate::normalize::{
    copy_timeout_values, normalize_null_values, set_write_only_nullvalues, validate_config_nulls,
};
use crate::path::AttributePath;
use crate::provider::Provider;
use crate::resource::{Importer, Resource};
use crate::resource_data::{InstanceState, ResourceData};
use crate::schema::{Block, Schema, SchemaError};
use crate::stop::StopSignal;
use crate::timeout::{ResourceTimeout, TimeoutKey};
use crate::types::{
    ApplyResourceChangeRequest, ApplyResourceChangeResponse, ConfigureProviderRequest,
    ConfigureProviderResponse, Deferred, GetProviderSchemaResponse, IdentitySchemasResponse,
    ImportResourceStateRequest, ImportResourceStateResponse, ImportedResource,
    PlanResourceChangeRequest, PlanResourceChangeResponse, PrivateState, ProviderMetadata,
    ReadDataSourceRequest, ReadDataSourceResponse, ReadResourceRequest, ReadResourceResponse,
    ServerCapabilities, StopProviderResponse, UpgradeResourceIdentityRequest,
    UpgradeResourceIdentityResponse, UpgradeResourceStateRequest, UpgradeResourceStateResponse,
    ValidateConfigRequest, ValidateConfigResponse,
};
use crate::upgrade::upgrade_value;
use crate::validation::{validate_normalized, validate_write_only};
use crate::value::Value;
use crate::walk::normalize_block;

/// Summary of the diagnostic returned for a deferral the engine did not
/// allow.
pub const INVALID_DEFERRAL_SUMMARY: &str = "Invalid Deferred Provider Response";

const INVALID_DEFERRAL_DETAIL: &str = "Provider configured a deferred response for all resources and data sources but the Terraform request did not indicate support for deferred actions. This is an issue with the provider and should be reported to the provider developers.";

/// Options for the orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// How long `stop_provider` waits for in-flight operations to return.
    /// Default: 30 seconds.
    pub stop_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerOptions {
    /// Create new server options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stop timeout.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

/// Serves one provider.
///
/// Operations on different instances may run concurrently; the server keeps
/// no per-instance state.
pub struct ProviderServer {
    provider: Provider,
    provider_schema: Arc<Block>,
    resource_schemas: BTreeMap<String, Arc<Block>>,
    data_source_schemas: BTreeMap<String, Arc<Block>>,
    meta: RwLock<Option<Meta>>,
    deferred: RwLock<Option<Deferred>>,
    stop: StopSignal,
    options: ServerOptions,
}

impl std::fmt::Debug for ProviderServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderServer")
            .field("provider", &self.provider)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ProviderServer {
    /// Validate `provider` and build a server for it.
    pub fn new(provider: Provider) -> Result<Self, SchemaError> {
        provider.internal_validate()?;
        let resource_schemas = provider
            .resources
            .iter()
            .map(|(name, r)| (name.clone(), Arc::new(r.core_schema())))
            .collect();
        let data_source_schemas = provider
            .data_sources
            .iter()
            .map(|(name, r)| (name.clone(), Arc::new(r.core_schema())))
            .collect();
        info!(
            resources = provider.resources.len(),
            data_sources = provider.data_sources.len(),
            "Provider registered"
        );
        Ok(Self {
            provider_schema: Arc::new(provider.schema.clone()),
            provider,
            resource_schemas,
            data_source_schemas,
            meta: RwLock::new(None),
            deferred: RwLock::new(None),
            stop: StopSignal::new(),
            options: ServerOptions::default(),
        })
    }

    /// Replace the server options.
    pub fn with_options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// The provider being served.
    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    fn resource(&self, type_name: &str) -> Result<(&Resource, &Arc<Block>), ProviderError> {
        match (
            self.provider.resources.get(type_name),
            self.resource_schemas.get(type_name),
        ) {
            (Some(resource), Some(schema)) => Ok((resource, schema)),
            _ => Err(ProviderError::UnknownResource(type_name.to_string())),
        }
    }

    /// Every state a resource operation returns passes through here.
    fn strip_write_only(&self, type_name: &str, value: &Value) -> Value {
        match self.resource(type_name) {
            Ok((_, schema)) => set_write_only_nullvalues(value, schema),
            Err(_) => value.clone(),
        }
    }

    fn data_source(&self, type_name: &str) -> Result<(&Resource, &Arc<Block>), ProviderError> {
        match (
            self.provider.data_sources.get(type_name),
            self.data_source_schemas.get(type_name),
        ) {
            (Some(data_source), Some(schema)) => Ok((data_source, schema)),
            _ => Err(ProviderError::UnknownResource(type_name.to_string())),
        }
    }

    async fn context(&self, type_name: &str) -> CallContext {
        let in_flight = self.stop.derive(&CancellationToken::new()).await;
        let meta = self.meta.read().await.clone();
        CallContext::from_in_flight(type_name, in_flight, meta)
    }

    async fn provider_deferred(&self) -> Option<Deferred> {
        *self.deferred.read().await
    }

    fn resource_data(resource: &Resource, schema: &Arc<Block>) -> ResourceData {
        let identity = resource.identity.as_ref();
        ResourceData::new(Arc::clone(schema))
            .with_timeouts(resource.timeouts)
            .with_schema_version(resource.schema_version)
            .with_identity_schema(
                identity.map(|i| Arc::clone(&i.schema)),
                identity.map_or(0, |i| i.version),
            )
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Names of the registered resources and data sources.
    #[instrument(skip(self), name = "provider.get_metadata")]
    pub fn get_metadata(&self) -> ProviderMetadata {
        debug!("GetMetadata called");
        let metadata = ProviderMetadata {
            resources: self.provider.resources.keys().cloned().collect(),
            data_sources: self.provider.data_sources.keys().cloned().collect(),
            capabilities: ServerCapabilities {
                plan_destroy: false,
                get_provider_schema_optional: true,
            },
        };
        info!(
            resources = metadata.resources.len(),
            data_sources = metadata.data_sources.len(),
            "GetMetadata completed"
        );
        metadata
    }

    /// Schemas of the provider, its resources and data sources.
    #[instrument(skip(self), name = "provider.get_provider_schema")]
    pub fn get_provider_schema(&self) -> GetProviderSchemaResponse {
        debug!("GetProviderSchema called");
        let describe = |schemas: &BTreeMap<String, Arc<Block>>, registry: &BTreeMap<String, Resource>| {
            schemas
                .iter()
                .map(|(name, block)| {
                    let version = registry.get(name).map_or(0, |r| r.schema_version);
                    (
                        name.clone(),
                        Schema {
                            version,
                            block: block.describe(),
                        },
                    )
                })
                .collect::<BTreeMap<_, _>>()
        };
        let response = GetProviderSchemaResponse {
            provider: Schema {
                version: 0,
                block: self.provider_schema.describe(),
            },
            resources: describe(&self.resource_schemas, &self.provider.resources),
            data_sources: describe(&self.data_source_schemas, &self.provider.data_sources),
            diagnostics: Vec::new(),
        };
        info!(
            resources = response.resources.len(),
            data_sources = response.data_sources.len(),
            "GetProviderSchema completed"
        );
        response
    }

    /// Identity schemas of the resources that declare one.
    #[instrument(skip(self), name = "provider.get_resource_identity_schemas")]
    pub fn get_resource_identity_schemas(&self) -> IdentitySchemasResponse {
        debug!("GetResourceIdentitySchemas called");
        let identity_schemas: BTreeMap<String, Schema> = self
            .provider
            .resources
            .iter()
            .filter_map(|(name, resource)| {
                resource.identity.as_ref().map(|identity| {
                    (
                        name.clone(),
                        Schema {
                            version: identity.version,
                            block: identity.schema.describe(),
                        },
                    )
                })
            })
            .collect();
        info!(identities = identity_schemas.len(), "GetResourceIdentitySchemas completed");
        IdentitySchemasResponse {
            identity_schemas,
            diagnostics: Vec::new(),
        }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider configuration.
    #[instrument(skip(self, req), name = "provider.validate_provider_config")]
    pub async fn validate_provider_config(&self, req: ValidateConfigRequest) -> ValidateConfigResponse {
        debug!("ValidateProviderConfig called");
        let diagnostics = validate_config(&self.provider_schema, &req.config);
        log_outcome("ValidateProviderConfig", &diagnostics);
        ValidateConfigResponse { diagnostics }
    }

    /// Configure the provider. The meta and deferral produced are kept for
    /// every later operation.
    #[instrument(skip(self, req), name = "provider.configure_provider")]
    pub async fn configure_provider(&self, req: ConfigureProviderRequest) -> ConfigureProviderResponse {
        debug!("ConfigureProvider called");
        let mut resp = ConfigureProviderResponse::default();
        if let Err(err) = self.configure_inner(req, &mut resp).await {
            error!(error = %err, "ConfigureProvider failed");
            resp.diagnostics.push(Diagnostic::from(err));
        }
        log_outcome("ConfigureProvider", &resp.diagnostics);
        resp
    }

    async fn configure_inner(
        &self,
        req: ConfigureProviderRequest,
        resp: &mut ConfigureProviderResponse,
    ) -> Result<(), ProviderError> {
        let Some(configure) = self.provider.configure.as_ref() else {
            return Ok(());
        };
        let config = normalize_block(&self.provider_schema, &req.config)?;
        let diff = schema_diff(&self.provider_schema, None, &config)?;
        let data = ResourceData::new(Arc::clone(&self.provider_schema))
            .with_raw_config(req.config.clone())
            .with_diff(diff)?;

        let ctx = self.context("provider").await;
        let deferral_allowed = req.client_capabilities.deferral_allowed;
        let outcome = configure.configure(&ctx, &data, deferral_allowed).await?;
        resp.diagnostics.extend(outcome.diagnostics);

        if let Some(deferred) = outcome.deferred {
            if !deferral_allowed {
                warn!("Provider deferred without client support");
                resp.diagnostics.push(invalid_deferral());
                return Ok(());
            }
            debug!(reason = ?deferred.reason, "Provider deferred all operations");
            *self.deferred.write().await = Some(deferred);
        }
        if has_errors(&resp.diagnostics) {
            return Ok(());
        }
        if let Some(meta) = outcome.meta {
            *self.meta.write().await = Some(meta);
        }
        Ok(())
    }

    /// Cancel every in-flight operation, wait for them, then re-arm.
    #[instrument(skip(self), name = "provider.stop_provider")]
    pub async fn stop_provider(&self) -> StopProviderResponse {
        debug!("StopProvider called");
        self.stop.stop(self.options.stop_timeout).await;
        info!("StopProvider completed");
        StopProviderResponse::default()
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Validate a resource configuration.
    #[instrument(skip(self, req), fields(resource_type = %req.type_name), name = "provider.validate_resource_config")]
    pub async fn validate_resource_config(&self, req: ValidateConfigRequest) -> ValidateConfigResponse {
        debug!("ValidateResourceConfig called");
        let mut diagnostics = Vec::new();
        match self.resource(&req.type_name) {
            Ok((resource, schema)) => {
                if !req.client_capabilities.write_only_attributes_allowed {
                    diagnostics.extend(validate_write_only(schema, &req.config));
                }
                if !resource.validate_raw_config.is_empty() {
                    let ctx = self.context(&req.type_name).await;
                    for validator in &resource.validate_raw_config {
                        diagnostics.extend(validator(&ctx, &req.config, &req.client_capabilities));
                    }
                }
                diagnostics.extend(validate_config(schema, &req.config));
            },
            Err(err) => diagnostics.push(Diagnostic::from(err)),
        }
        log_outcome("ValidateResourceConfig", &diagnostics);
        ValidateConfigResponse { diagnostics }
    }

    /// Validate a data source configuration.
    #[instrument(skip(self, req), fields(resource_type = %req.type_name), name = "provider.validate_data_source_config")]
    pub async fn validate_data_source_config(&self, req: ValidateConfigRequest) -> ValidateConfigResponse {
        debug!("ValidateDataSourceConfig called");
        let diagnostics = match self.data_source(&req.type_name) {
            Ok((_, schema)) => validate_config(schema, &req.config),
            Err(err) => vec![Diagnostic::from(err)],
        };
        log_outcome("ValidateDataSourceConfig", &diagnostics);
        ValidateConfigResponse { diagnostics }
    }

    // =========================================================================
    // Upgrades
    // =========================================================================

    /// Bring stored state up to the resource's current schema.
    #[instrument(skip(self, req), fields(resource_type = %req.type_name, version = req.version), name = "provider.upgrade_resource_state")]
    pub async fn upgrade_resource_state(&self, req: UpgradeResourceStateRequest) -> UpgradeResourceStateResponse {
        debug!("UpgradeResourceState called");
        let resp = match self.resource(&req.type_name) {
            Ok((resource, schema)) => {
                let ctx = self.context(&req.type_name).await;
                let target = resource.state_upgrade_target(&req.type_name, schema);
                let (upgraded_state, diagnostics) = upgrade_value(&ctx, &target, req.version, &req.raw_state);
                UpgradeResourceStateResponse {
                    upgraded_state,
                    diagnostics,
                }
            },
            Err(err) => UpgradeResourceStateResponse {
                upgraded_state: None,
                diagnostics: vec![Diagnostic::from(err)],
            },
        };
        log_outcome("UpgradeResourceState", &resp.diagnostics);
        resp
    }

    /// Bring a stored identity up to the resource's current identity schema.
    #[instrument(skip(self, req), fields(resource_type = %req.type_name, version = req.version), name = "provider.upgrade_resource_identity")]
    pub async fn upgrade_resource_identity(
        &self,
        req: UpgradeResourceIdentityRequest,
    ) -> UpgradeResourceIdentityResponse {
        debug!("UpgradeResourceIdentity called");
        let target = self.resource(&req.type_name).and_then(|(resource, _)| {
            resource.identity_upgrade_target(&req.type_name).ok_or_else(|| {
                ProviderError::Sdk(format!(
                    "resource {} does not declare an identity schema",
                    req.type_name
                ))
            })
        });
        let resp = match target {
            Ok(target) => {
                let ctx = self.context(&req.type_name).await;
                let (upgraded_identity, diagnostics) = upgrade_value(&ctx, &target, req.version, &req.raw_identity);
                UpgradeResourceIdentityResponse {
                    upgraded_identity,
                    diagnostics,
                }
            },
            Err(err) => UpgradeResourceIdentityResponse {
                upgraded_identity: None,
                diagnostics: vec![Diagnostic::from(err)],
            },
        };
        log_outcome("UpgradeResourceIdentity", &resp.diagnostics);
        resp
    }

    // =========================================================================
    // Resource Lifecycle
    // =========================================================================

    /// Refresh a resource from its remote object.
    #[instrument(skip(self, req), fields(resource_type = %req.type_name), name = "provider.read_resource")]
    pub async fn read_resource(&self, req: ReadResourceRequest) -> ReadResourceResponse {
        debug!("ReadResource called");
        let type_name = req.type_name.clone();
        let mut resp = ReadResourceResponse {
            new_state: req.current_state.clone(),
            new_identity: req.current_identity.clone(),
            private: req.private.clone(),
            ..Default::default()
        };
        if let Err(err) = self.read_inner(req, &mut resp).await {
            error!(error = %err, "ReadResource failed");
            resp.diagnostics.push(Diagnostic::from(err));
        }
        resp.new_state = self.strip_write_only(&type_name, &resp.new_state);
        log_outcome("ReadResource", &resp.diagnostics);
        resp
    }

    async fn read_inner(&self, req: ReadResourceRequest, resp: &mut ReadResourceResponse) -> Result<(), ProviderError> {
        let (resource, schema) = self.resource(&req.type_name)?;
        if let Some(deferred) = self.provider_deferred().await {
            if !req.client_capabilities.deferral_allowed {
                resp.diagnostics.push(invalid_deferral());
            } else {
                debug!("Read deferred, returning current state");
                resp.deferred = Some(deferred);
            }
            return Ok(());
        }
        if !req.current_state.is_present() {
            return Ok(());
        }

        let current = normalize_block(schema, &req.current_state)?;
        let private = PrivateState::decode(&req.private)?;
        let mut state = InstanceState::new(current.clone());
        state.schema_version = resource.schema_version;
        state.identity = req.current_identity.clone();
        state.identity_version = resource.identity.as_ref().map_or(0, |i| i.version);
        state.timeouts = private.timeouts().unwrap_or_default();
        let mut data = Self::resource_data(resource, schema).with_state(state);

        let ctx = self.context(&req.type_name).await.with_timeout(data.timeout(TimeoutKey::Read));
        if let Err(err) = resource.handler.read(&ctx, &mut data).await {
            error!(error = %err, "Read callback failed");
            resp.diagnostics.push(Diagnostic::from(err));
            return Ok(());
        }

        let Some(new_state) = data.state() else {
            debug!("Resource no longer exists");
            resp.new_state = Value::Null;
            resp.new_identity = None;
            return Ok(());
        };
        let value = normalize_null_values(&new_state.attributes, &current, false);
        resp.new_state = copy_timeout_values(value, &current);
        resp.new_identity = new_state.identity;
        Ok(())
    }

    /// Plan the change from the prior state to the configuration.
    #[instrument(skip(self, req), fields(resource_type = %req.type_name), name = "provider.plan_resource_change")]
    pub async fn plan_resource_change(&self, req: PlanResourceChangeRequest) -> PlanResourceChangeResponse {
        debug!("PlanResourceChange called");
        let type_name = req.type_name.clone();
        let mut resp = PlanResourceChangeResponse::default();
        if let Err(err) = self.plan_inner(req, &mut resp).await {
            error!(error = %err, "PlanResourceChange failed");
            resp.diagnostics.push(Diagnostic::from(err));
        }
        resp.planned_state = self.strip_write_only(&type_name, &resp.planned_state);
        log_outcome("PlanResourceChange", &resp.diagnostics);
        resp
    }

    async fn plan_inner(
        &self,
        req: PlanResourceChangeRequest,
        resp: &mut PlanResourceChangeResponse,
    ) -> Result<(), ProviderError> {
        let (resource, schema) = self.resource(&req.type_name)?;

        // Destroy plans are the engine's business.
        if req.proposed_new_state.is_null() {
            resp.planned_state = Value::Null;
            resp.planned_private = req.prior_private;
            resp.planned_identity = req.prior_identity;
            return Ok(());
        }

        if let Some(deferred) = self.provider_deferred().await {
            if !req.client_capabilities.deferral_allowed {
                resp.diagnostics.push(invalid_deferral());
                return Ok(());
            }
            resp.deferred = Some(deferred);
            if !resource.plan_modification_when_deferred {
                debug!("Plan deferred, returning proposed state");
                resp.planned_state = req.proposed_new_state;
                resp.planned_private = req.prior_private;
                resp.planned_identity = req.prior_identity;
                return Ok(());
            }
        }

        let create = !req.prior_state.is_present();
        let prior = normalize_block(schema, &req.prior_state)?;
        let proposed = normalize_block(schema, &req.proposed_new_state)?;
        let config = normalize_block(schema, &req.config)?;

        resp.diagnostics.extend(validate_config_nulls(&config, &AttributePath::root()));
        if has_errors(&resp.diagnostics) {
            return Ok(());
        }

        let mut private = PrivateState::decode(&req.prior_private)?;
        let timeouts = ResourceTimeout::from_config(config.get_attr("timeouts").unwrap_or(&Value::Null))?;

        let ctx = self.context(&req.type_name).await;
        let diff = schema_diff(schema, (!create).then_some(&prior), &config)?;
        let mut customized = ResourceDiff::new(schema, &prior, &config, diff)?;
        resp.diagnostics
            .extend(run_customize_chain(&ctx, &resource.customize_diff, &mut customized).await);
        if has_errors(&resp.diagnostics) {
            return Ok(());
        }
        let diff = customized.finish()?;

        if diff.is_empty() && !create {
            debug!("No changes planned");
            resp.planned_state = req.prior_state;
            resp.planned_private = req.prior_private;
            resp.planned_identity = req.prior_identity;
            return Ok(());
        }

        let planned = diff.apply(&prior, schema)?;
        let planned = normalize_null_values(&planned, &proposed, false);
        let mut planned = copy_timeout_values(planned, &proposed);

        let mut force_no_changes = false;
        if !create && planned == prior {
            planned = prior.clone();
            force_no_changes = true;
        }

        let mut requires_replace = diff.requires_replace();
        let id_unknown = planned
            .get_attr("id")
            .map_or(true, |id| id.is_null() || id.is_unknown());
        if !force_no_changes && (!requires_replace.is_empty() || id_unknown) {
            requires_replace.push(AttributePath::root().attribute("id"));
        }

        private.set_timeouts(&timeouts);
        private.set_schema_version(resource.schema_version);

        resp.planned_state = planned;
        resp.requires_replace = requires_replace;
        resp.planned_private = private.encode();
        resp.planned_identity = match req.prior_identity {
            Some(identity) => Some(identity),
            None if create && resource.identity.is_some() => Some(Value::Unknown),
            None => None,
        };
        Ok(())
    }

    /// Apply a planned change: create, update, replace or delete.
    #[instrument(skip(self, req), fields(resource_type = %req.type_name), name = "provider.apply_resource_change")]
    pub async fn apply_resource_change(&self, req: ApplyResourceChangeRequest) -> ApplyResourceChangeResponse {
        debug!("ApplyResourceChange called");
        let type_name = req.type_name.clone();
        let mut resp = ApplyResourceChangeResponse {
            new_state: req.prior_state.clone(),
            private: req.planned_private.clone(),
            ..Default::default()
        };
        if let Err(err) = self.apply_inner(req, &mut resp).await {
            error!(error = %err, "ApplyResourceChange failed");
            resp.diagnostics.push(Diagnostic::from(err));
        }
        resp.new_state = self.strip_write_only(&type_name, &resp.new_state);
        log_outcome("ApplyResourceChange", &resp.diagnostics);
        resp
    }

    async fn apply_inner(
        &self,
        req: ApplyResourceChangeRequest,
        resp: &mut ApplyResourceChangeResponse,
    ) -> Result<(), ProviderError> {
        let (resource, schema) = self.resource(&req.type_name)?;
        let create = !req.prior_state.is_present();
        let destroy = req.planned_state.is_null();

        let prior = normalize_block(schema, &req.prior_state)?;
        let planned = normalize_block(schema, &req.planned_state)?;
        let config = normalize_block(schema, &req.config)?;
        let mut private = PrivateState::decode(&req.planned_private)?;
        let timeouts = private.timeouts().unwrap_or_default();

        let mut diff = if destroy {
            InstanceDiff::destroy()
        } else {
            schema_diff(schema, (!create).then_some(&prior), &planned)?
        };
        diff.identity = req.planned_identity.clone();

        let base = Self::resource_data(resource, schema)
            .with_raw_config(config)
            .with_raw_plan(planned.clone());
        let mut data = if create {
            base.clone().with_request_timeouts(timeouts)
        } else {
            let mut state = InstanceState::new(prior.clone());
            state.schema_version = resource.schema_version;
            state.identity = req.planned_identity.clone();
            state.timeouts = timeouts;
            base.clone().with_state(state)
        };

        let ctx = self.context(&req.type_name).await;
        if diff.destroy || diff.requires_new() {
            if !data.id().is_empty() {
                let delete_ctx = ctx.with_timeout(data.timeout(TimeoutKey::Delete));
                if let Err(err) = resource.handler.delete(&delete_ctx, &mut data).await {
                    error!(error = %err, "Delete callback failed");
                    resp.diagnostics.push(Diagnostic::from(err));
                    return Ok(());
                }
                debug!("Resource deleted");
            }
            if diff.destroy {
                resp.new_state = Value::Null;
                resp.new_identity = None;
                resp.private = Vec::new();
                return Ok(());
            }
            data = base.with_request_timeouts(timeouts);
        }

        let mut data = data.with_diff(diff)?;
        let result = if data.id().is_empty() {
            data.mark_new_resource();
            let create_ctx = ctx.with_timeout(data.timeout(TimeoutKey::Create));
            resource.handler.create(&create_ctx, &mut data).await
        } else {
            let update_ctx = ctx.with_timeout(data.timeout(TimeoutKey::Update));
            resource.handler.update(&update_ctx, &mut data).await
        };
        if let Err(err) = result {
            error!(error = %err, "Apply callback failed");
            resp.diagnostics.push(Diagnostic::from(err));
        }

        // A failed create leaves no state; a failed update keeps what the
        // callback managed to record.
        let Some(new_state) = data.state() else {
            resp.new_state = Value::Null;
            resp.new_identity = None;
            return Ok(());
        };
        let value = normalize_null_values(&new_state.attributes, &planned, true);
        resp.new_state = copy_timeout_values(value, &planned);
        resp.new_identity = new_state
            .identity
            .or_else(|| req.planned_identity.filter(Value::is_wholly_known));
        private.set_schema_version(resource.schema_version);
        resp.private = private.encode();
        Ok(())
    }

    /// Import existing remote objects.
    #[instrument(skip(self, req), fields(resource_type = %req.type_name, id = %req.id), name = "provider.import_resource_state")]
    pub async fn import_resource_state(&self, req: ImportResourceStateRequest) -> ImportResourceStateResponse {
        debug!("ImportResourceState called");
        let mut resp = ImportResourceStateResponse::default();
        if let Err(err) = self.import_inner(req, &mut resp).await {
            error!(error = %err, "ImportResourceState failed");
            resp.diagnostics.push(Diagnostic::from(err));
        }
        log_outcome("ImportResourceState", &resp.diagnostics);
        resp
    }

    async fn import_inner(
        &self,
        req: ImportResourceStateRequest,
        resp: &mut ImportResourceStateResponse,
    ) -> Result<(), ProviderError> {
        let (resource, schema) = self.resource(&req.type_name)?;
        if let Some(deferred) = self.provider_deferred().await {
            if !req.client_capabilities.deferral_allowed {
                resp.diagnostics.push(invalid_deferral());
                return Ok(());
            }
            debug!("Import deferred, returning unknown state");
            resp.imported_resources
                .push(ImportedResource::new(req.type_name.clone(), Value::Unknown));
            resp.deferred = Some(deferred);
            return Ok(());
        }
        let importer = resource.importer.ok_or_else(|| {
            ProviderError::Unimplemented(format!("resource {} doesn't support import", req.type_name))
        })?;

        let mut data = Self::resource_data(resource, schema);
        data.set_id(req.id.clone());
        if let Some(identity) = req.identity.as_ref().and_then(Value::as_entries) {
            let target = data.identity()?;
            for (name, value) in identity {
                target.set(name.as_str(), value.clone())?;
            }
        }

        let ctx = self.context(&req.type_name).await;
        let imported = match importer {
            Importer::Passthrough => vec![data],
            Importer::Custom => resource.handler.import(&ctx, data).await?,
        };

        let mut private = PrivateState::default();
        private.set_schema_version(resource.schema_version);
        for data in imported {
            let Some(state) = data.state() else {
                resp.diagnostics.push(
                    Diagnostic::error("Missing imported resource")
                        .with_detail("The provider returned a missing resource during ImportResourceState."),
                );
                continue;
            };
            let value = normalize_block(schema, &state.attributes)?;
            let value = copy_timeout_values(value, &Value::Null);
            resp.imported_resources.push(ImportedResource {
                resource_type: req.type_name.clone(),
                state: set_write_only_nullvalues(&value, schema),
                identity: state.identity,
                private: private.encode(),
            });
        }
        info!(imported = resp.imported_resources.len(), "Import produced resources");
        Ok(())
    }

    // =========================================================================
    // Data Sources
    // =========================================================================

    /// Read a data source.
    #[instrument(skip(self, req), fields(resource_type = %req.type_name), name = "provider.read_data_source")]
    pub async fn read_data_source(&self, req: ReadDataSourceRequest) -> ReadDataSourceResponse {
        debug!("ReadDataSource called");
        let mut resp = ReadDataSourceResponse::default();
        if let Err(err) = self.read_data_source_inner(req, &mut resp).await {
            error!(error = %err, "ReadDataSource failed");
            resp.diagnostics.push(Diagnostic::from(err));
        }
        log_outcome("ReadDataSource", &resp.diagnostics);
        resp
    }

    async fn read_data_source_inner(
        &self,
        req: ReadDataSourceRequest,
        resp: &mut ReadDataSourceResponse,
    ) -> Result<(), ProviderError> {
        let (data_source, schema) = self.data_source(&req.type_name)?;
        if let Some(deferred) = self.provider_deferred().await {
            if !req.client_capabilities.deferral_allowed {
                resp.diagnostics.push(invalid_deferral());
                return Ok(());
            }
            debug!("Data source read deferred, returning unknown state");
            resp.state = Value::Unknown;
            resp.deferred = Some(deferred);
            return Ok(());
        }

        let config = normalize_block(schema, &req.config)?;
        let timeouts = ResourceTimeout::from_config(config.get_attr("timeouts").unwrap_or(&Value::Null))?;
        let diff = schema_diff(schema, None, &config)?;
        let mut data = Self::resource_data(data_source, schema)
            .with_request_timeouts(timeouts)
            .with_raw_config(config.clone())
            .with_diff(diff)?;

        let ctx = self.context(&req.type_name).await.with_timeout(data.timeout(TimeoutKey::Read));
        if let Err(err) = data_source.handler.read(&ctx, &mut data).await {
            error!(error = %err, "Read callback failed");
            resp.diagnostics.push(Diagnostic::from(err));
            return Ok(());
        }
        resp.state = copy_timeout_values(data.state_value(), &config);
        Ok(())
    }
}

fn validate_config(schema: &Block, config: &Value) -> Vec<Diagnostic> {
    let normalized = match normalize_block(schema, config) {
        Ok(v) => v,
        Err(err) => return vec![Diagnostic::from(ProviderError::from(err))],
    };
    let mut diagnostics = validate_config_nulls(&normalized, &AttributePath::root());
    diagnostics.extend(validate_normalized(schema, &normalized));
    diagnostics
}

fn invalid_deferral() -> Diagnostic {
    Diagnostic::error(INVALID_DEFERRAL_SUMMARY).with_detail(INVALID_DEFERRAL_DETAIL)
}

fn log_outcome(operation: &str, diagnostics: &[Diagnostic]) {
    if has_errors(diagnostics) {
        warn!(diagnostics = diagnostics.len(), "{} completed with errors", operation);
    } else {
        info!("{} completed", operation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::customize_diff_fn;
    use crate::provider::{ConfigureOutcome, ConfigureProvider};
    use crate::resource::{ResourceHandler, ResourceIdentity};
    use crate::schema::{Attribute, AttributeMode, AttributeType};
    use crate::types::{ClientCapabilities, DeferredReason};
    use crate::upgrade::{RawState, StateUpgrader};
    use crate::value::WireType;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    type Calls = Arc<Mutex<Vec<&'static str>>>;

    struct Thing {
        calls: Calls,
    }

    #[async_trait]
    impl ResourceHandler for Thing {
        async fn create(&self, _ctx: &CallContext, data: &mut ResourceData) -> Result<(), ProviderError> {
            self.calls.lock().unwrap().push("create");
            let name = data.get("name");
            data.set_id(format!("thing-{}", name.as_str().unwrap_or_default()));
            data.set("arn", format!("arn:{}", name.as_str().unwrap_or_default()))?;
            Ok(())
        }

        async fn read(&self, _ctx: &CallContext, data: &mut ResourceData) -> Result<(), ProviderError> {
            self.calls.lock().unwrap().push("read");
            if data.get("name").as_str() == Some("gone") {
                data.set_id("");
            }
            Ok(())
        }

        async fn update(&self, _ctx: &CallContext, _data: &mut ResourceData) -> Result<(), ProviderError> {
            self.calls.lock().unwrap().push("update");
            Ok(())
        }

        async fn delete(&self, _ctx: &CallContext, _data: &mut ResourceData) -> Result<(), ProviderError> {
            self.calls.lock().unwrap().push("delete");
            Ok(())
        }

        async fn import(&self, _ctx: &CallContext, data: ResourceData) -> Result<Vec<ResourceData>, ProviderError> {
            self.calls.lock().unwrap().push("import");
            let mut second = data.clone();
            second.set_id(format!("{}-replica", data.id()));
            Ok(vec![data, second])
        }
    }

    struct Panicking;

    #[async_trait]
    impl ResourceHandler for Panicking {
        async fn read(&self, _ctx: &CallContext, _data: &mut ResourceData) -> Result<(), ProviderError> {
            panic!("read must not be called while deferred");
        }
    }

    struct Blocking {
        started: Arc<Notify>,
    }

    #[async_trait]
    impl ResourceHandler for Blocking {
        async fn read(&self, ctx: &CallContext, _data: &mut ResourceData) -> Result<(), ProviderError> {
            self.started.notify_one();
            ctx.cancelled().await;
            Err(ProviderError::Cancelled("read interrupted".to_string()))
        }
    }

    struct EchoData;

    #[async_trait]
    impl ResourceHandler for EchoData {
        async fn read(&self, _ctx: &CallContext, data: &mut ResourceData) -> Result<(), ProviderError> {
            let filter = data.get("filter");
            data.set("result", format!("found:{}", filter.as_str().unwrap_or_default()))?;
            Ok(())
        }
    }

    struct Deferring;

    #[async_trait]
    impl ConfigureProvider for Deferring {
        async fn configure(
            &self,
            _ctx: &CallContext,
            _config: &ResourceData,
            _deferral_allowed: bool,
        ) -> Result<ConfigureOutcome, ProviderError> {
            Ok(ConfigureOutcome::deferred(Deferred::new(DeferredReason::ProviderConfigUnknown)))
        }
    }

    fn thing_schema() -> Block {
        Block::new()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("size", Attribute::optional_int().with_force_new())
            .with_attribute("arn", Attribute::computed_string())
            .with_attribute("password", Attribute::optional_string().with_write_only())
            .with_attribute("tags", Attribute::map(AttributeType::String, AttributeMode::Optional))
    }

    fn thing(calls: &Calls) -> Resource {
        Resource::new(thing_schema(), Thing { calls: Arc::clone(calls) })
            .with_importer(Importer::Custom)
            .with_timeouts(ResourceTimeout::new().with_create(Duration::from_secs(600)))
    }

    fn server(calls: &Calls) -> ProviderServer {
        let provider = Provider::new()
            .with_resource("test_thing", thing(calls))
            .with_resource(
                "test_plain",
                Resource::new(thing_schema(), Thing { calls: Arc::clone(calls) })
                    .with_importer(Importer::Passthrough),
            )
            .with_data_source(
                "test_lookup",
                Resource::new(
                    Block::new()
                        .with_attribute("id", Attribute::required_string())
                        .with_attribute("filter", Attribute::optional_string())
                        .with_attribute("result", Attribute::computed_string()),
                    EchoData,
                ),
            );
        ProviderServer::new(provider).unwrap()
    }

    fn state(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    fn existing() -> Value {
        state(json!({
            "id": "thing-a", "name": "a", "size": 5, "arn": "arn:a",
            "password": null, "tags": null, "timeouts": null
        }))
    }

    fn plan_request(prior: Value, config: Value, proposed: Value) -> PlanResourceChangeRequest {
        PlanResourceChangeRequest {
            type_name: "test_thing".to_string(),
            prior_state: prior,
            proposed_new_state: proposed,
            config,
            prior_identity: None,
            prior_private: Vec::new(),
            client_capabilities: ClientCapabilities::default(),
        }
    }

    #[test]
    fn test_new_rejects_invalid_provider() {
        let calls = Calls::default();
        let provider = Provider::new().with_resource(
            "test_thing",
            thing(&calls).with_schema_version(1).with_state_upgrader(StateUpgrader::map(
                1,
                WireType::object([("id", WireType::String)]),
                |_, m| Ok(m),
            )),
        );
        assert!(ProviderServer::new(provider).is_err());
    }

    #[test]
    fn test_schema_includes_id_and_timeouts() {
        let server = server(&Calls::default());
        let metadata = server.get_metadata();
        assert_eq!(metadata.resources, vec!["test_plain", "test_thing"]);
        assert_eq!(metadata.data_sources, vec!["test_lookup"]);

        let schema = server.get_provider_schema();
        let thing = &schema.resources["test_thing"].block;
        assert!(thing.attributes.iter().any(|a| a.name == "id"));
        assert!(thing.block_types.iter().any(|b| b.type_name == "timeouts"));
        let plain = &schema.resources["test_plain"].block;
        assert!(plain.block_types.is_empty());
    }

    #[tokio::test]
    async fn test_plan_force_new_replaces() {
        let calls = Calls::default();
        let server = server(&calls);
        let config = state(json!({"name": "a", "size": 10}));
        let proposed = state(json!({
            "id": "thing-a", "name": "a", "size": 10, "arn": "arn:a",
            "password": null, "tags": null, "timeouts": null
        }));

        let resp = server
            .plan_resource_change(plan_request(existing(), config, proposed))
            .await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert_eq!(
            resp.requires_replace,
            vec![AttributePath::parse("size"), AttributePath::parse("id")]
        );
        assert_eq!(resp.planned_state.get_attr("id"), Some(&Value::Unknown));
        assert_eq!(resp.planned_state.get_attr("arn"), Some(&Value::Unknown));
        assert_eq!(resp.planned_state.get_attr("size"), Some(&Value::int(10)));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_plan_without_changes_returns_prior() {
        let server = server(&Calls::default());
        let config = state(json!({"name": "a", "size": 5}));
        let resp = server
            .plan_resource_change(plan_request(existing(), config, existing()))
            .await;
        assert!(resp.diagnostics.is_empty());
        assert_eq!(resp.planned_state, existing());
        assert!(resp.requires_replace.is_empty());
    }

    #[tokio::test]
    async fn test_plan_create() {
        let server = server(&Calls::default());
        let config = state(json!({"name": "a", "password": "hunter2", "timeouts": {"create": "10m"}}));
        let proposed = state(json!({
            "id": null, "name": "a", "size": null, "arn": null,
            "password": "hunter2", "tags": null, "timeouts": {"create": "10m"}
        }));
        let resp = server
            .plan_resource_change(plan_request(Value::Null, config, proposed))
            .await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert_eq!(resp.planned_state.get_attr("id"), Some(&Value::Unknown));
        assert_eq!(resp.planned_state.get_attr("password"), Some(&Value::Null));
        assert_eq!(resp.requires_replace, vec![AttributePath::parse("id")]);

        let private = PrivateState::decode(&resp.planned_private).unwrap();
        assert_eq!(
            private.timeouts().and_then(|t| t.create),
            Some(Duration::from_secs(600))
        );
    }

    #[tokio::test]
    async fn test_plan_customization_error_is_reported() {
        let calls = Calls::default();
        let resource = thing(&calls).with_customize_diff(customize_diff_fn(|_, diff| {
            diff.set_new("name", "renamed")
        }));
        let server = ProviderServer::new(Provider::new().with_resource("test_thing", resource)).unwrap();
        let config = state(json!({"name": "b", "size": 5}));
        let resp = server
            .plan_resource_change(plan_request(existing(), config.clone(), config))
            .await;
        assert!(has_errors(&resp.diagnostics));
        assert!(resp.diagnostics[0]
            .detail
            .as_deref()
            .unwrap_or_default()
            .contains("only operates on computed keys"));
    }

    #[tokio::test]
    async fn test_apply_create_update_and_replace() {
        let calls = Calls::default();
        let server = server(&calls);

        let planned = state(json!({
            "id": null, "name": "a", "size": 5, "arn": null,
            "password": null, "tags": null, "timeouts": null
        }));
        let mut planned = planned;
        if let Some(entries) = planned.as_entries_mut() {
            entries.insert("id".to_string(), Value::Unknown);
            entries.insert("arn".to_string(), Value::Unknown);
        }
        let resp = server
            .apply_resource_change(ApplyResourceChangeRequest {
                type_name: "test_thing".to_string(),
                prior_state: Value::Null,
                planned_state: planned.clone(),
                config: state(json!({"name": "a", "size": 5})),
                planned_identity: None,
                planned_private: Vec::new(),
            })
            .await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert_eq!(resp.new_state, existing());
        assert_eq!(*calls.lock().unwrap(), vec!["create"]);

        // Replacement deletes the old object before creating the new one.
        calls.lock().unwrap().clear();
        let mut replaced = planned;
        if let Some(entries) = replaced.as_entries_mut() {
            entries.insert("size".to_string(), Value::int(10));
        }
        let resp = server
            .apply_resource_change(ApplyResourceChangeRequest {
                type_name: "test_thing".to_string(),
                prior_state: existing(),
                planned_state: replaced,
                config: state(json!({"name": "a", "size": 10})),
                planned_identity: None,
                planned_private: Vec::new(),
            })
            .await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert_eq!(*calls.lock().unwrap(), vec!["delete", "create"]);
        assert_eq!(resp.new_state.get_attr("size"), Some(&Value::int(10)));
        assert_eq!(resp.new_state.get_attr("id"), Some(&Value::from("thing-a")));

        // Destroy only deletes.
        calls.lock().unwrap().clear();
        let resp = server
            .apply_resource_change(ApplyResourceChangeRequest {
                type_name: "test_thing".to_string(),
                prior_state: existing(),
                planned_state: Value::Null,
                config: Value::Null,
                planned_identity: None,
                planned_private: Vec::new(),
            })
            .await;
        assert!(resp.diagnostics.is_empty());
        assert_eq!(resp.new_state, Value::Null);
        assert_eq!(*calls.lock().unwrap(), vec!["delete"]);
    }

    #[tokio::test]
    async fn test_read_removes_gone_resource() {
        let calls = Calls::default();
        let server = server(&calls);
        let mut current = existing();
        if let Some(entries) = current.as_entries_mut() {
            entries.insert("name".to_string(), Value::from("gone"));
        }
        let resp = server
            .read_resource(ReadResourceRequest {
                type_name: "test_thing".to_string(),
                current_state: current,
                current_identity: None,
                private: b"{}".to_vec(),
                client_capabilities: ClientCapabilities::default(),
            })
            .await;
        assert!(resp.diagnostics.is_empty());
        assert_eq!(resp.new_state, Value::Null);

        let resp = server
            .read_resource(ReadResourceRequest {
                type_name: "test_thing".to_string(),
                current_state: existing(),
                current_identity: None,
                private: b"{}".to_vec(),
                client_capabilities: ClientCapabilities::default(),
            })
            .await;
        assert_eq!(resp.new_state, existing());
        assert_eq!(resp.private, b"{}".to_vec());
        assert_eq!(*calls.lock().unwrap(), vec!["read", "read"]);
    }

    #[tokio::test]
    async fn test_unknown_resource_type() {
        let server = server(&Calls::default());
        let resp = server
            .read_resource(ReadResourceRequest {
                type_name: "test_missing".to_string(),
                current_state: existing(),
                current_identity: None,
                private: Vec::new(),
                client_capabilities: ClientCapabilities::default(),
            })
            .await;
        assert_eq!(resp.diagnostics[0].summary, "Unknown resource type");
    }

    #[tokio::test]
    async fn test_data_source_keeps_configured_id() {
        let server = server(&Calls::default());
        let resp = server
            .read_data_source(ReadDataSourceRequest {
                type_name: "test_lookup".to_string(),
                config: state(json!({"id": "test-id", "filter": "x"})),
                client_capabilities: ClientCapabilities::default(),
            })
            .await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert_eq!(resp.state.get_attr("id"), Some(&Value::from("test-id")));
        assert_eq!(resp.state.get_attr("result"), Some(&Value::from("found:x")));
    }

    #[tokio::test]
    async fn test_deferred_read_skips_callback() {
        let provider = Provider::new()
            .with_configure(Deferring)
            .with_resource("test_thing", Resource::new(thing_schema(), Panicking));
        let server = ProviderServer::new(provider).unwrap();
        let resp = server
            .configure_provider(ConfigureProviderRequest {
                config: Value::empty_object(),
                client_capabilities: ClientCapabilities::with_deferral(),
            })
            .await;
        assert!(resp.diagnostics.is_empty());

        let resp = server
            .read_resource(ReadResourceRequest {
                type_name: "test_thing".to_string(),
                current_state: existing(),
                current_identity: None,
                private: Vec::new(),
                client_capabilities: ClientCapabilities::with_deferral(),
            })
            .await;
        assert!(resp.diagnostics.is_empty());
        assert_eq!(resp.new_state, existing());
        assert_eq!(
            resp.deferred,
            Some(Deferred::new(DeferredReason::ProviderConfigUnknown))
        );

        // Without client support the deferral is an error.
        let resp = server
            .read_resource(ReadResourceRequest {
                type_name: "test_thing".to_string(),
                current_state: existing(),
                current_identity: None,
                private: Vec::new(),
                client_capabilities: ClientCapabilities::default(),
            })
            .await;
        assert_eq!(resp.diagnostics[0].summary, INVALID_DEFERRAL_SUMMARY);
    }

    fn with_password(value: Value) -> Value {
        let mut value = value;
        if let Some(entries) = value.as_entries_mut() {
            entries.insert("password".to_string(), Value::from("hunter2"));
        }
        value
    }

    async fn deferred_server(calls: &Calls) -> ProviderServer {
        let provider = Provider::new()
            .with_configure(Deferring)
            .with_resource("test_thing", thing(calls));
        let server = ProviderServer::new(provider).unwrap();
        server
            .configure_provider(ConfigureProviderRequest {
                config: Value::empty_object(),
                client_capabilities: ClientCapabilities::with_deferral(),
            })
            .await;
        server
    }

    #[tokio::test]
    async fn test_deferred_read_nulls_write_only() {
        let calls = Calls::default();
        let server = deferred_server(&calls).await;
        let resp = server
            .read_resource(ReadResourceRequest {
                type_name: "test_thing".to_string(),
                current_state: with_password(existing()),
                current_identity: None,
                private: Vec::new(),
                client_capabilities: ClientCapabilities::with_deferral(),
            })
            .await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert!(resp.deferred.is_some());
        assert_eq!(resp.new_state, existing());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deferred_plan_nulls_write_only() {
        let server = deferred_server(&Calls::default()).await;
        let config = state(json!({"name": "a", "size": 5, "password": "hunter2"}));
        let mut req = plan_request(existing(), config, with_password(existing()));
        req.client_capabilities = ClientCapabilities::with_deferral();

        let resp = server.plan_resource_change(req).await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert_eq!(
            resp.deferred,
            Some(Deferred::new(DeferredReason::ProviderConfigUnknown))
        );
        assert_eq!(resp.planned_state.get_attr("password"), Some(&Value::Null));
        assert_eq!(resp.planned_state, existing());
    }

    #[tokio::test]
    async fn test_unchanged_plan_nulls_write_only() {
        let server = server(&Calls::default());
        let config = state(json!({"name": "a", "size": 5, "password": "hunter2"}));
        let resp = server
            .plan_resource_change(plan_request(
                with_password(existing()),
                config,
                with_password(existing()),
            ))
            .await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert!(resp.requires_replace.is_empty());
        assert_eq!(resp.planned_state, existing());
    }

    #[tokio::test]
    async fn test_configure_deferral_without_support() {
        let provider = Provider::new().with_configure(Deferring);
        let server = ProviderServer::new(provider).unwrap();
        let resp = server
            .configure_provider(ConfigureProviderRequest {
                config: Value::empty_object(),
                client_capabilities: ClientCapabilities::default(),
            })
            .await;
        assert_eq!(resp.diagnostics.len(), 1);
        assert_eq!(resp.diagnostics[0].summary, INVALID_DEFERRAL_SUMMARY);
        assert!(resp.diagnostics[0]
            .detail
            .as_deref()
            .unwrap_or_default()
            .contains("did not indicate support for deferred actions"));
        assert!(server.provider_deferred().await.is_none());
    }

    #[tokio::test]
    async fn test_import_custom_and_passthrough() {
        let calls = Calls::default();
        let server = server(&calls);

        let resp = server
            .import_resource_state(ImportResourceStateRequest {
                type_name: "test_thing".to_string(),
                id: "thing-a".to_string(),
                identity: None,
                client_capabilities: ClientCapabilities::default(),
            })
            .await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        let ids: Vec<_> = resp
            .imported_resources
            .iter()
            .map(|r| r.state.get_attr("id").cloned().unwrap_or_default())
            .collect();
        assert_eq!(ids, vec![Value::from("thing-a"), Value::from("thing-a-replica")]);
        assert_eq!(
            resp.imported_resources[0].state.get_attr("timeouts"),
            Some(&Value::Null)
        );

        let resp = server
            .import_resource_state(ImportResourceStateRequest {
                type_name: "test_plain".to_string(),
                id: "plain-1".to_string(),
                identity: None,
                client_capabilities: ClientCapabilities::default(),
            })
            .await;
        assert_eq!(resp.imported_resources.len(), 1);
        assert_eq!(*calls.lock().unwrap(), vec!["import"]);
    }

    #[tokio::test]
    async fn test_import_with_identity() {
        let resource = Resource::new(thing_schema(), Thing { calls: Calls::default() })
            .with_importer(Importer::Passthrough)
            .with_identity(ResourceIdentity::new(
                Block::new().with_attribute("name", Attribute::required_for_import(AttributeType::String)),
            ));
        let server = ProviderServer::new(Provider::new().with_resource("test_thing", resource)).unwrap();
        let resp = server
            .import_resource_state(ImportResourceStateRequest {
                type_name: "test_thing".to_string(),
                id: "thing-a".to_string(),
                identity: Some(state(json!({"name": "a"}))),
                client_capabilities: ClientCapabilities::default(),
            })
            .await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert_eq!(
            resp.imported_resources[0].identity,
            Some(state(json!({"name": "a"})))
        );

        let schemas = server.get_resource_identity_schemas();
        assert!(schemas.identity_schemas.contains_key("test_thing"));
    }

    #[tokio::test]
    async fn test_validate_resource_config() {
        let calls = Calls::default();
        let resource = thing(&calls).with_validate_raw_config(|_, config, _| match config.get_attr("name") {
            Some(Value::String(name)) if name.contains(' ') => {
                vec![Diagnostic::error("name must not contain spaces").with_attribute("name")]
            },
            _ => Vec::new(),
        });
        let server = ProviderServer::new(Provider::new().with_resource("test_thing", resource)).unwrap();

        let resp = server
            .validate_resource_config(ValidateConfigRequest::new(
                "test_thing",
                state(json!({"name": "a b", "password": "x"})),
            ))
            .await;
        let summaries: Vec<_> = resp.diagnostics.iter().map(|d| d.summary.as_str()).collect();
        assert_eq!(
            summaries,
            vec!["Write-only Attribute Not Allowed", "name must not contain spaces"]
        );

        let mut req = ValidateConfigRequest::new("test_thing", state(json!({"name": "a", "password": "x"})));
        req.client_capabilities.write_only_attributes_allowed = true;
        assert!(server.validate_resource_config(req).await.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_resource_state() {
        let calls = Calls::default();
        let resource = thing(&calls).with_schema_version(1).with_state_upgrader(StateUpgrader::map(
            0,
            WireType::object([("id", WireType::String), ("title", WireType::String)]),
            |_, mut m| {
                if let Some(title) = m.remove("title") {
                    m.insert("name".to_string(), title);
                }
                Ok(m)
            },
        ));
        let server = ProviderServer::new(Provider::new().with_resource("test_thing", resource)).unwrap();
        let resp = server
            .upgrade_resource_state(UpgradeResourceStateRequest {
                type_name: "test_thing".to_string(),
                version: 0,
                raw_state: RawState::from_json(&json!({"id": "thing-a", "title": "a"})),
            })
            .await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        let upgraded = resp.upgraded_state.unwrap();
        assert_eq!(upgraded.get_attr("name"), Some(&Value::from("a")));
        assert_eq!(upgraded.get_attr("id"), Some(&Value::from("thing-a")));
    }

    #[tokio::test]
    async fn test_two_stop_cycles() {
        let started = Arc::new(Notify::new());
        let provider = Provider::new().with_resource(
            "test_thing",
            Resource::new(thing_schema(), Blocking { started: Arc::clone(&started) }),
        );
        let server = Arc::new(
            ProviderServer::new(provider)
                .unwrap()
                .with_options(ServerOptions::new().with_stop_timeout(Duration::from_secs(5))),
        );

        for _ in 0..2 {
            let in_flight = {
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    server
                        .read_resource(ReadResourceRequest {
                            type_name: "test_thing".to_string(),
                            current_state: existing(),
                            current_identity: None,
                            private: Vec::new(),
                            client_capabilities: ClientCapabilities::default(),
                        })
                        .await
                })
            };
            started.notified().await;
            server.stop_provider().await;

            let resp = in_flight.await.unwrap();
            assert_eq!(resp.diagnostics[0].summary, "Operation cancelled");

            let fresh = server.context("test_thing").await;
            assert!(!fresh.is_cancelled());
        }
    }
}
