//! Testing utilities for provider implementations.
//!
//! [`ProviderTester`] drives a [`ProviderServer`] the way the engine would,
//! without a transport. Configurations are plain JSON; the tester builds the
//! proposed states the engine would send.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_provider_runtime::testing::ProviderTester;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_bucket() {
//!     let tester = ProviderTester::new(my_provider()).unwrap();
//!     tester.configure(json!({"region": "us-east-1"})).await.unwrap();
//!
//!     let state = tester.lifecycle_create("test_bucket", json!({"name": "logs"})).await.unwrap();
//!     assert_eq!(state.get_attr("name").and_then(|v| v.as_str()), Some("logs"));
//! }
//! ```

use crate::diagnostic::{has_errors, Diagnostic, DiagnosticSeverity};
use crate::provider::Provider;
use crate::resource::Resource;
use crate::schema::{Block, SchemaError};
use crate::server::ProviderServer;
use crate::types::{
    ApplyResourceChangeRequest, ClientCapabilities, ConfigureProviderRequest,
    ImportResourceStateRequest, ImportedResource, PlanResourceChangeRequest,
    PlanResourceChangeResponse, ReadDataSourceRequest, ReadResourceRequest, ValidateConfigRequest,
};
use crate::value::Value;
use crate::walk::normalize_block;
use std::collections::BTreeMap;

/// A test harness around a [`ProviderServer`].
#[derive(Debug)]
pub struct ProviderTester {
    server: ProviderServer,
    capabilities: ClientCapabilities,
}

impl ProviderTester {
    /// Validate `provider` and wrap it in a server.
    pub fn new(provider: Provider) -> Result<Self, TestError> {
        Ok(Self {
            server: ProviderServer::new(provider)?,
            capabilities: ClientCapabilities::default(),
        })
    }

    /// Send `capabilities` with every request.
    pub fn with_capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// The server under test.
    pub fn server(&self) -> &ProviderServer {
        &self.server
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider configuration.
    pub async fn validate_provider_config(&self, config: serde_json::Value) -> Result<(), TestError> {
        let mut req = ValidateConfigRequest::new("provider", Value::from(config));
        req.client_capabilities = self.capabilities;
        check_diagnostics(self.server.validate_provider_config(req).await.diagnostics)
    }

    /// Configure the provider.
    pub async fn configure(&self, config: serde_json::Value) -> Result<(), TestError> {
        let resp = self
            .server
            .configure_provider(ConfigureProviderRequest {
                config: Value::from(config),
                client_capabilities: self.capabilities,
            })
            .await;
        check_diagnostics(resp.diagnostics)
    }

    /// Stop in-flight operations.
    pub async fn stop(&self) {
        self.server.stop_provider().await;
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: serde_json::Value,
    ) -> Result<(), TestError> {
        let mut req = ValidateConfigRequest::new(resource_type, Value::from(config));
        req.client_capabilities = self.capabilities;
        check_diagnostics(self.server.validate_resource_config(req).await.diagnostics)
    }

    /// Plan creating a resource.
    pub async fn plan_create(
        &self,
        resource_type: &str,
        config: serde_json::Value,
    ) -> Result<PlanResourceChangeResponse, TestError> {
        self.plan(resource_type, Value::Null, Value::from(config)).await
    }

    /// Plan updating `prior` to `config`.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior: Value,
        config: serde_json::Value,
    ) -> Result<PlanResourceChangeResponse, TestError> {
        self.plan(resource_type, prior, Value::from(config)).await
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior: Value,
        config: Value,
    ) -> Result<PlanResourceChangeResponse, TestError> {
        let proposed = self.proposed_new_state(resource_type, &prior, &config)?;
        let resp = self
            .server
            .plan_resource_change(PlanResourceChangeRequest {
                type_name: resource_type.to_string(),
                prior_state: prior,
                proposed_new_state: proposed,
                config,
                prior_identity: None,
                prior_private: Vec::new(),
                client_capabilities: self.capabilities,
            })
            .await;
        if has_errors(&resp.diagnostics) {
            return Err(TestError::Diagnostics(resp.diagnostics));
        }
        Ok(resp)
    }

    /// Apply a plan produced by [`ProviderTester::plan_create`] or
    /// [`ProviderTester::plan_update`].
    pub async fn apply(
        &self,
        resource_type: &str,
        prior: Value,
        plan: &PlanResourceChangeResponse,
        config: serde_json::Value,
    ) -> Result<Value, TestError> {
        let resp = self
            .server
            .apply_resource_change(ApplyResourceChangeRequest {
                type_name: resource_type.to_string(),
                prior_state: prior,
                planned_state: plan.planned_state.clone(),
                config: Value::from(config),
                planned_identity: plan.planned_identity.clone(),
                planned_private: plan.planned_private.clone(),
            })
            .await;
        check_diagnostics(resp.diagnostics)?;
        Ok(resp.new_state)
    }

    /// Destroy a resource.
    pub async fn delete(&self, resource_type: &str, state: Value) -> Result<(), TestError> {
        let resp = self
            .server
            .apply_resource_change(ApplyResourceChangeRequest {
                type_name: resource_type.to_string(),
                prior_state: state,
                planned_state: Value::Null,
                config: Value::Null,
                planned_identity: None,
                planned_private: Vec::new(),
            })
            .await;
        check_diagnostics(resp.diagnostics)
    }

    /// Refresh a resource. Null when the remote object is gone.
    pub async fn read(&self, resource_type: &str, state: Value) -> Result<Value, TestError> {
        let resp = self
            .server
            .read_resource(ReadResourceRequest {
                type_name: resource_type.to_string(),
                current_state: state,
                current_identity: None,
                private: Vec::new(),
                client_capabilities: self.capabilities,
            })
            .await;
        check_diagnostics(resp.diagnostics)?;
        Ok(resp.new_state)
    }

    /// Import a resource by id.
    pub async fn import_resource(&self, resource_type: &str, id: &str) -> Result<Vec<ImportedResource>, TestError> {
        let resp = self
            .server
            .import_resource_state(ImportResourceStateRequest {
                type_name: resource_type.to_string(),
                id: id.to_string(),
                identity: None,
                client_capabilities: self.capabilities,
            })
            .await;
        check_diagnostics(resp.diagnostics)?;
        Ok(resp.imported_resources)
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Validate a data source configuration.
    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: serde_json::Value,
    ) -> Result<(), TestError> {
        let mut req = ValidateConfigRequest::new(data_source_type, Value::from(config));
        req.client_capabilities = self.capabilities;
        check_diagnostics(self.server.validate_data_source_config(req).await.diagnostics)
    }

    /// Read a data source.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: serde_json::Value,
    ) -> Result<Value, TestError> {
        let resp = self
            .server
            .read_data_source(ReadDataSourceRequest {
                type_name: data_source_type.to_string(),
                config: Value::from(config),
                client_capabilities: self.capabilities,
            })
            .await;
        check_diagnostics(resp.diagnostics)?;
        Ok(resp.state)
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Plan, create, then read back.
    pub async fn lifecycle_create(&self, resource_type: &str, config: serde_json::Value) -> Result<Value, TestError> {
        let plan = self.plan_create(resource_type, config.clone()).await?;
        let created = self.apply(resource_type, Value::Null, &plan, config).await?;
        self.read(resource_type, created).await
    }

    /// Plan, update, then read back.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior: Value,
        config: serde_json::Value,
    ) -> Result<Value, TestError> {
        let plan = self.plan_update(resource_type, prior.clone(), config.clone()).await?;
        let updated = self.apply(resource_type, prior, &plan, config).await?;
        self.read(resource_type, updated).await
    }

    /// Create, update, then delete. Returns the state after the update.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial: serde_json::Value,
        updated: serde_json::Value,
    ) -> Result<Value, TestError> {
        let created = self.lifecycle_create(resource_type, initial).await?;
        let updated = self.lifecycle_update(resource_type, created, updated).await?;
        self.delete(resource_type, updated.clone()).await?;
        Ok(updated)
    }

    /// The proposed state the engine would send: configuration values, with
    /// unset computed attributes keeping their prior values.
    fn proposed_new_state(&self, resource_type: &str, prior: &Value, config: &Value) -> Result<Value, TestError> {
        let schema = self
            .server
            .provider()
            .resources
            .get(resource_type)
            .map(Resource::core_schema)
            .ok_or_else(|| TestError::UnknownType(resource_type.to_string()))?;
        let config = normalize_block(&schema, config)
            .map_err(|err| TestError::Diagnostics(vec![Diagnostic::error(err.to_string())]))?;
        Ok(merge_computed(&schema, prior, &config))
    }
}

fn merge_computed(schema: &Block, prior: &Value, config: &Value) -> Value {
    let Some(entries) = config.as_entries() else {
        return config.clone();
    };
    let merged: BTreeMap<String, Value> = entries
        .iter()
        .map(|(name, value)| {
            let computed = schema.attributes.get(name).is_some_and(|a| a.is_computed());
            let value = match prior.get_attr(name) {
                Some(old) if computed && value.is_null() => old.clone(),
                _ => value.clone(),
            };
            (name.clone(), value)
        })
        .collect();
    Value::Object(merged)
}

/// Error type for test operations.
#[derive(Debug)]
pub enum TestError {
    /// The operation returned error diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The provider failed registration checks.
    Schema(SchemaError),
    /// No resource of that type is registered.
    UnknownType(String),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Schema(err) => write!(f, "Invalid provider: {}", err),
            TestError::UnknownType(name) => write!(f, "Unknown resource type: {}", name),
        }
    }
}

impl std::error::Error for TestError {}

impl From<SchemaError> for TestError {
    fn from(e: SchemaError) -> Self {
        TestError::Schema(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan replaces the resource.
///
/// # Panics
///
/// Panics if no attribute requires replacement.
pub fn assert_plan_replaces(plan: &PlanResourceChangeResponse) {
    assert!(
        !plan.requires_replace.is_empty(),
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan updates the resource in place.
///
/// # Panics
///
/// Panics if the plan requires replacement or destroys the resource.
pub fn assert_plan_updates_in_place(plan: &PlanResourceChangeResponse) {
    assert!(
        plan.requires_replace.is_empty(),
        "Expected plan to update in place, but it replaces: {:?}",
        plan.requires_replace.iter().map(|p| p.to_string()).collect::<Vec<_>>()
    );
    assert!(!plan.planned_state.is_null(), "Expected plan to update in place, but it destroys");
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();
    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain at least one error.
///
/// # Panics
///
/// Panics if there are no error diagnostics.
pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    assert!(has_errors(diagnostics), "Expected at least one error, but got none");
}

/// Assert that an error diagnostic's summary or detail contains `substring`.
///
/// # Panics
///
/// Panics if no error diagnostic matches.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let matches = diagnostics.iter().any(|d| {
        matches!(d.severity, DiagnosticSeverity::Error)
            && (d.summary.contains(substring) || d.detail.as_deref().is_some_and(|s| s.contains(substring)))
    });
    assert!(
        matches,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}
