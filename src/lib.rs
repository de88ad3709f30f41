//! Hemmer Provider Runtime
//!
//! The resource state lifecycle engine behind Hemmer providers. A transport
//! adapter decodes the engine's requests into the types of [`types`] and hands
//! them to a [`ProviderServer`]; the runtime validates, diffs, upgrades and
//! normalizes the values and calls the provider's resource callbacks.
//!
//! # Overview
//!
//! - **Schema**: attributes and nested blocks, validated at registration ([`schema`])
//! - **Values**: a typed value tree with null and unknown markers ([`value`], [`path`])
//! - **Resource data**: the layered read/write view handed to callbacks ([`resource_data`])
//! - **Diffs**: attribute-level plans with force-new and customization hooks ([`diff`])
//! - **Upgrades**: legacy flatmap migration and versioned upgraders ([`upgrade`], [`flatmap`])
//! - **Normalization**: null/unknown reconciliation of plans and applies ([`normalize`])
//! - **Orchestration**: validate, plan, apply, read, import, deferral and stop ([`server`])
//!
//! # Quick Start
//!
//! ```
//! use hemmer_provider_runtime::{
//!     async_trait, Attribute, Block, CallContext, Provider, ProviderError, ProviderServer,
//!     Resource, ResourceData, ResourceHandler,
//! };
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
//! let provider = Provider::new().with_resource(
//!     "example_bucket",
//!     Resource::new(
//!         Block::new().with_attribute("name", Attribute::required_string().with_force_new()),
//!         Bucket,
//!     ),
//! );
//! let server = ProviderServer::new(provider).unwrap();
//! assert_eq!(server.get_metadata().resources, vec!["example_bucket"]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod diagnostic;
pub mod diff;
pub mod error;
pub mod flatmap;
pub mod logging;
pub mod normalize;
pub mod path;
pub mod provider;
pub mod resource;
pub mod resource_data;
pub mod schema;
pub mod server;
pub mod stop;
pub mod testing;
pub mod timeout;
pub mod types;
pub mod upgrade;
pub mod validation;
pub mod value;
pub mod walk;

// Re-export main types at crate root
pub use context::CallContext;
pub use diagnostic::{Diagnostic, DiagnosticSeverity};
pub use diff::{customize_diff_fn, CustomizeDiff, InstanceDiff, ResourceDiff};
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use path::AttributePath;
pub use provider::{ConfigureOutcome, ConfigureProvider, Provider};
pub use resource::{Importer, Resource, ResourceHandler, ResourceIdentity};
pub use resource_data::{InstanceState, ResourceData};
pub use schema::{Attribute, AttributeMode, AttributeType, Block, Schema, SchemaError};
pub use server::{ProviderServer, ServerOptions};
pub use timeout::{ResourceTimeout, TimeoutKey};
pub use types::{ClientCapabilities, Deferred, DeferredReason, ImportedResource};
pub use upgrade::{RawState, StateUpgrader, UpgradeFn};
pub use validation::{is_valid, validate, validate_result};
pub use value::{TypeError, Value, WireType};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tonic;
pub use tracing;
