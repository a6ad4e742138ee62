//! SOAP transport collaborator.
//!
//! The client never serialises envelopes itself. A [`SoapTransport`] binds a
//! definition file and binding name to an endpoint, producing a
//! [`ServiceBinding`] that can invoke any operation the binding declares.

use crate::auth::SecurityHeader;
use crate::error::TransportError;
use crate::record::Record;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use url::Url;

/// Everything a transport needs to bind one service.
#[derive(Debug, Clone, Copy)]
pub struct BindingTarget<'a> {
    /// Logical service name, for diagnostics
    pub service: &'a str,
    /// Definition (WSDL) file, already checked to exist
    pub definition: &'a Path,
    /// Binding target namespace
    pub namespace: &'a str,
    /// Binding local name
    pub binding_id: &'a str,
    /// Initial endpoint address
    pub endpoint: &'a Url,
}

/// Factory for service bindings.
pub trait SoapTransport: Send + Sync {
    fn bind(&self, target: &BindingTarget<'_>) -> Result<Box<dyn ServiceBinding>, TransportError>;
}

/// One bound service endpoint.
#[async_trait]
pub trait ServiceBinding: Send + Sync {
    /// Operation names declared by the binding.
    fn operations(&self) -> Vec<String>;

    fn supports(&self, operation: &str) -> bool {
        self.operations().iter().any(|op| op == operation)
    }

    /// Field names of the operation's request element, when the schema declares them.
    fn input_fields(&self, operation: &str) -> Option<Vec<String>>;

    /// A record with every field of the named request type set to null.
    fn empty_element(&self, type_name: &str) -> Option<Record>;

    /// Current endpoint address.
    fn location(&self) -> Url;

    /// Repoint the binding. Type information is kept.
    fn set_location(&self, endpoint: Url);

    /// Send one request and decode its response.
    async fn invoke(
        &self,
        operation: &str,
        params: Record,
        security: SecurityHeader,
    ) -> Result<Value, TransportError>;
}
