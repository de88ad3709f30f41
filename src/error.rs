//! Error types for the provider runtime.
//!
//! [`ProviderError`] is what provider callbacks return and what the runtime
//! raises internally. The orchestrator never lets one escape a request: each
//! is converted into a [`Diagnostic`](crate::diagnostic::Diagnostic) on the
//! response. Registration problems are [`SchemaError`]s and are fatal.

use crate::flatmap::FlatmapError;
use crate::path::AttributePath;
use crate::schema::SchemaError;
use crate::timeout::DurationParseError;
use crate::value::TypeError;
use thiserror::Error;

/// Message returned when a resource without an identity schema asks for its
/// identity.
pub const NO_IDENTITY_SCHEMA_MESSAGE: &str = "Resource does not have Identity schema. Please set one in order to use Identity(). This is always a problem in the provider code.";

/// Errors that can occur when implementing a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An internal runtime error occurred.
    #[error("SDK error: {0}")]
    Sdk(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A value did not match its schema type.
    #[error("Type error: {0}")]
    Type(#[from] TypeError),

    /// The schema itself is malformed.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Legacy flatmap state could not be decoded.
    #[error("Flatmap error: {0}")]
    Flatmap(#[from] FlatmapError),

    /// A timeout string could not be parsed.
    #[error("Invalid duration: {0}")]
    Duration(#[from] DurationParseError),

    /// A state or identity upgrade step failed.
    #[error("Migration error for {resource_type} at version {version}: {message}")]
    Migration {
        /// The resource type being upgraded.
        resource_type: String,
        /// The version the failing step starts from.
        version: u64,
        /// What went wrong.
        message: String,
    },

    /// The resource asked for its identity but declares no identity schema.
    #[error("{}", NO_IDENTITY_SCHEMA_MESSAGE)]
    NoIdentitySchema,

    /// The operation was cancelled by a stop request.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),
}

impl ProviderError {
    /// Get the error message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Validation(msg)
            | Self::Sdk(msg)
            | Self::UnknownResource(msg)
            | Self::Cancelled(msg)
            | Self::Unimplemented(msg) => msg.clone(),
            Self::Serialization(err) => err.to_string(),
            Self::Type(err) => err.message.clone(),
            Self::Schema(err) => err.to_string(),
            Self::Flatmap(err) => err.to_string(),
            Self::Duration(err) => err.to_string(),
            Self::Migration {
                resource_type,
                version,
                message,
            } => format!(
                "Failed to upgrade {} state from schema version {}: {}",
                resource_type, version, message
            ),
            Self::NoIdentitySchema => NO_IDENTITY_SCHEMA_MESSAGE.to_string(),
        }
    }

    /// Short summary used when the error becomes a diagnostic.
    pub fn summary(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Invalid configuration",
            Self::Sdk(_) => "Internal provider error",
            Self::UnknownResource(_) => "Unknown resource type",
            Self::Serialization(_) => "Serialization error",
            Self::Type(_) => "Incorrect attribute value type",
            Self::Schema(_) => "Invalid provider schema",
            Self::Flatmap(_) => "Invalid legacy state",
            Self::Duration(_) => "Invalid timeout value",
            Self::Migration { .. } => "State upgrade failed",
            Self::NoIdentitySchema => "Missing identity schema",
            Self::Cancelled(_) => "Operation cancelled",
            Self::Unimplemented(_) => "Unimplemented",
        }
    }

    /// The attribute the error is scoped to, if any.
    pub fn attribute_path(&self) -> Option<AttributePath> {
        match self {
            Self::Type(err) if !err.path.is_empty() => Some(err.path.clone()),
            _ => None,
        }
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::Sdk(msg) => tonic::Status::internal(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            },
            ProviderError::Type(err) => tonic::Status::invalid_argument(err.to_string()),
            ProviderError::Flatmap(err) => tonic::Status::invalid_argument(err.to_string()),
            ProviderError::Duration(err) => tonic::Status::invalid_argument(err.to_string()),
            ProviderError::Schema(err) => tonic::Status::internal(err.to_string()),
            err @ ProviderError::Migration { .. } => tonic::Status::failed_precondition(err.message()),
            ProviderError::NoIdentitySchema => tonic::Status::internal(NO_IDENTITY_SCHEMA_MESSAGE),
            ProviderError::Cancelled(msg) => tonic::Status::cancelled(msg),
            ProviderError::Unimplemented(msg) => tonic::Status::unimplemented(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::Cancelled("stop requested".to_string());
        assert_eq!(format!("{}", err), "Cancelled: stop requested");

        let err = ProviderError::Validation("invalid input".to_string());
        assert_eq!(format!("{}", err), "Validation error: invalid input");

        let err = ProviderError::UnknownResource("custom_resource".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: custom_resource");
    }

    #[test]
    fn test_error_to_status() {
        let err = ProviderError::UnknownResource("test_missing".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let err = ProviderError::Validation("test".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let err = ProviderError::Cancelled("stop requested".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::Cancelled);

        let err = ProviderError::Migration {
            resource_type: "test_thing".to_string(),
            version: 1,
            message: "boom".to_string(),
        };
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
    }

    #[test]
    fn test_migration_message_names_resource_and_version() {
        let err = ProviderError::Migration {
            resource_type: "test_instance".to_string(),
            version: 2,
            message: "bad data".to_string(),
        };
        let msg = err.message();
        assert!(msg.contains("test_instance"));
        assert!(msg.contains("version 2"));
        assert_eq!(err.summary(), "State upgrade failed");
    }

    #[test]
    fn test_no_identity_schema_message() {
        let err = ProviderError::NoIdentitySchema;
        assert_eq!(err.to_string(), NO_IDENTITY_SCHEMA_MESSAGE);
        assert_eq!(err.message(), NO_IDENTITY_SCHEMA_MESSAGE);
    }

    #[test]
    fn test_type_error_carries_path() {
        let err = ProviderError::from(TypeError::new(AttributePath::parse("size"), "bad"));
        assert_eq!(err.attribute_path(), Some(AttributePath::parse("size")));
        assert_eq!(err.message(), "bad");

        let err = ProviderError::Validation("x".to_string());
        assert_eq!(err.attribute_path(), None);
    }

    #[test]
    fn test_message_method() {
        let err = ProviderError::UnknownResource("test_missing".to_string());
        assert_eq!(err.message(), "test_missing");

        let err = ProviderError::Unimplemented("no import".to_string());
        assert_eq!(err.message(), "no import");
        assert_eq!(format!("{}", err), "Unimplemented: no import");
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::Unimplemented);
    }
}
