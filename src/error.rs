//! Error types for the ONVIF client.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = OnvifError> = std::result::Result<T, E>;

/// Client-facing ONVIF errors.
///
/// Every failure a caller can observe is one of these variants. Transport
/// level causes are carried as [`TransportError`] sources and never leak
/// as their own top-level type.
#[derive(Error, Debug)]
pub enum OnvifError {
    #[error("Unknown service: {name}")]
    UnknownService { name: String },

    #[error("Definition file not found: {}", path.display())]
    DefinitionNotFound { path: PathBuf },

    #[error("Device doesn't support service: {name}")]
    UnsupportedService { name: String },

    #[error("Service '{name}' has not been created")]
    ServiceNotCreated { name: String },

    #[error("Failed to construct service '{service}': {source}")]
    ConstructionFailed {
        service: String,
        #[source]
        source: TransportError,
    },

    #[error("Operation {service}.{operation} failed: {source}")]
    RemoteOperation {
        service: String,
        operation: String,
        #[source]
        source: TransportError,
    },

    #[error("Service '{service}' has no type named '{type_name}'")]
    UnknownType { service: String, type_name: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OnvifError {
    /// Wrap a transport failure raised while calling `service.operation`.
    pub fn remote(
        service: impl Into<String>,
        operation: impl Into<String>,
        source: TransportError,
    ) -> Self {
        Self::RemoteOperation {
            service: service.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownService { .. } => ErrorKind::UnknownService,
            Self::DefinitionNotFound { .. } => ErrorKind::DefinitionNotFound,
            Self::UnsupportedService { .. } => ErrorKind::UnsupportedService,
            Self::ServiceNotCreated { .. } => ErrorKind::ServiceNotCreated,
            Self::ConstructionFailed { .. } => ErrorKind::ConstructionFailed,
            Self::RemoteOperation { .. } => ErrorKind::RemoteOperation,
            Self::UnknownType { .. } => ErrorKind::UnknownType,
            Self::Config(_) | Self::Io(_) => ErrorKind::Config,
        }
    }

    /// The transport cause, for remote and construction failures.
    pub fn transport_cause(&self) -> Option<&TransportError> {
        match self {
            Self::RemoteOperation { source, .. } | Self::ConstructionFailed { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

/// Error kinds, one per [`OnvifError`] variant family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Name not present in the service registry
    UnknownService,
    /// Definition file missing on disk
    DefinitionNotFound,
    /// Device did not advertise an endpoint for the service
    UnsupportedService,
    /// Lookup-only request for a service that is not cached
    ServiceNotCreated,
    /// Transport or binding setup failed
    ConstructionFailed,
    /// A remote call failed
    RemoteOperation,
    /// Request type not declared by the binding schema
    UnknownType,
    /// Invalid configuration
    Config,
}

impl ErrorKind {
    /// Get the string code for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownService => "UNKNOWN_SERVICE",
            Self::DefinitionNotFound => "DEFINITION_NOT_FOUND",
            Self::UnsupportedService => "UNSUPPORTED_SERVICE",
            Self::ServiceNotCreated => "SERVICE_NOT_CREATED",
            Self::ConstructionFailed => "CONSTRUCTION_FAILED",
            Self::RemoteOperation => "REMOTE_OPERATION_ERROR",
            Self::UnknownType => "UNKNOWN_TYPE",
            Self::Config => "CONFIG",
        }
    }
}

/// Failures raised by a SOAP transport implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Request timed out")]
    Timeout,

    #[error("SOAP fault [{code}]: {reason}")]
    Fault { code: String, reason: String },

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Response decoding error: {0}")]
    Decode(String),

    #[error("Operation '{0}' is not declared by the binding")]
    UnknownOperation(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Binding definition error: {0}")]
    Definition(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_as_str() {
        assert_eq!(ErrorKind::UnknownService.as_str(), "UNKNOWN_SERVICE");
        assert_eq!(ErrorKind::RemoteOperation.as_str(), "REMOTE_OPERATION_ERROR");
    }

    #[test]
    fn test_remote_error_carries_context() {
        let err = OnvifError::remote(
            "devicemgmt",
            "GetHostname",
            TransportError::Fault {
                code: "env:Sender".to_string(),
                reason: "Not authorized".to_string(),
            },
        );
        assert_eq!(err.kind(), ErrorKind::RemoteOperation);
        let msg = err.to_string();
        assert!(msg.contains("devicemgmt.GetHostname"));
        assert!(msg.contains("Not authorized"));
        assert!(matches!(
            err.transport_cause(),
            Some(TransportError::Fault { .. })
        ));
    }

    #[test]
    fn test_unsupported_service_message() {
        let err = OnvifError::UnsupportedService {
            name: "ptz".to_string(),
        };
        assert_eq!(err.to_string(), "Device doesn't support service: ptz");
        assert!(err.transport_cause().is_none());
    }
}
