//! Authenticated client for a single ONVIF service.
//!
//! Operations are not declared one by one: whatever the binding definition
//! declares can be called by name through [`ServiceClient::call`].
//!
//! ```ignore
//! let devicemgmt = device.get_service("devicemgmt").await?;
//! let info = devicemgmt.call("GetHostname", ()).await?;
//! devicemgmt.call("SetHostname", json!({"Name": "newhostname"})).await?;
//!
//! let mut params = devicemgmt.create_type("SetHostname")?;
//! params.insert("Name".into(), "newhostname".into());
//! devicemgmt.call("SetHostname", params).await?;
//! ```

use crate::auth::{Credential, UsernameToken};
use crate::error::{OnvifError, Result, TransportError};
use crate::record::{self, Record};
use crate::registry::{self, ServiceDescriptor};
use crate::transport::{BindingTarget, ServiceBinding, SoapTransport};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;

/// One service bound to one endpoint.
pub struct ServiceClient {
    name: String,
    descriptor: &'static ServiceDescriptor,
    definition: PathBuf,
    token: UsernameToken,
    binding: Box<dyn ServiceBinding>,
}

impl ServiceClient {
    /// Build a client for a registry service.
    pub fn new(
        name: &str,
        endpoint: Url,
        definitions_dir: &Path,
        credential: &Credential,
        transport: &dyn SoapTransport,
    ) -> Result<Self> {
        let descriptor = registry::lookup(name)?;
        Self::with_descriptor(
            descriptor,
            endpoint,
            definitions_dir.join(descriptor.definition_file),
            credential,
            transport,
        )
    }

    /// Build a client from an already resolved descriptor and definition path.
    pub fn with_descriptor(
        descriptor: &'static ServiceDescriptor,
        endpoint: Url,
        definition: PathBuf,
        credential: &Credential,
        transport: &dyn SoapTransport,
    ) -> Result<Self> {
        if !definition.is_file() {
            return Err(OnvifError::DefinitionNotFound { path: definition });
        }

        let binding = transport
            .bind(&BindingTarget {
                service: descriptor.name,
                definition: &definition,
                namespace: descriptor.namespace,
                binding_id: descriptor.binding_id,
                endpoint: &endpoint,
            })
            .map_err(|source| OnvifError::ConstructionFailed {
                service: descriptor.name.to_string(),
                source,
            })?;

        debug!(
            service = descriptor.name,
            endpoint = %endpoint,
            digest = credential.use_digest,
            "Service client created"
        );

        Ok(Self {
            name: descriptor.name.to_string(),
            descriptor,
            definition,
            token: UsernameToken::new(credential.clone()),
            binding,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &'static ServiceDescriptor {
        self.descriptor
    }

    pub fn definition(&self) -> &Path {
        &self.definition
    }

    pub fn credential(&self) -> &Credential {
        self.token.credential()
    }

    /// Current endpoint address.
    pub fn endpoint(&self) -> Url {
        self.binding.location()
    }

    /// Operation names the binding declares.
    pub fn operations(&self) -> Vec<String> {
        self.binding.operations()
    }

    /// Repoint the client without rebuilding its binding.
    pub fn update_endpoint(&self, endpoint: Url) {
        debug!(service = %self.name, endpoint = %endpoint, "Endpoint updated");
        self.binding.set_location(endpoint);
    }

    /// Zero-valued request record for `type_name`, to be filled field by field.
    pub fn create_type(&self, type_name: &str) -> Result<Record> {
        self.binding
            .empty_element(type_name)
            .ok_or_else(|| OnvifError::UnknownType {
                service: self.name.clone(),
                type_name: type_name.to_string(),
            })
    }

    /// Plain record view of a response value.
    pub fn to_record(value: &Value) -> Record {
        record::to_record(value)
    }

    /// Call `operation` with `params`.
    ///
    /// `params` may be a serde struct, a JSON map or record, or `()` for
    /// operations without arguments. Every failure is reported as
    /// [`OnvifError::RemoteOperation`].
    pub async fn call<P: Serialize>(&self, operation: &str, params: P) -> Result<Value> {
        let fail = |source: TransportError| OnvifError::remote(&self.name, operation, source);

        if !self.binding.supports(operation) {
            return Err(fail(TransportError::UnknownOperation(operation.to_string())));
        }

        let fields = self.binding.input_fields(operation);
        let params = record::normalize_params(params, fields.as_deref()).map_err(fail)?;

        debug!(service = %self.name, operation = %operation, "Calling operation");
        match self.binding.invoke(operation, params, self.token.header()).await {
            Ok(value) => Ok(value),
            Err(source) => {
                warn!(
                    service = %self.name,
                    operation = %operation,
                    error = %source,
                    "Operation failed"
                );
                Err(fail(source))
            }
        }
    }

    /// Call `operation` and deserialise the response.
    pub async fn call_as<P: Serialize, R: DeserializeOwned>(
        &self,
        operation: &str,
        params: P,
    ) -> Result<R> {
        let value = self.call(operation, params).await?;
        serde_json::from_value(value).map_err(|e| {
            OnvifError::remote(&self.name, operation, TransportError::Decode(e.to_string()))
        })
    }
}

impl fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClient")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint().as_str())
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}
