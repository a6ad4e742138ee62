//! HTTP implementation of the SOAP transport.

use crate::auth::SecurityHeader;
use crate::config::{SoapVersion, TransportConfig};
use crate::envelope::{read_response, write_request};
use crate::error::TransportError;
use crate::record::Record;
use crate::transport::{BindingTarget, ServiceBinding, SoapTransport};
use crate::wsdl::WsdlDocument;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, trace, warn};
use url::Url;

/// SOAP over HTTP, one shared connection pool for every binding.
pub struct HttpTransport {
    client: reqwest::Client,
    version: SoapVersion,
    /// Parsed definition files, keyed by path
    documents: Mutex<HashMap<PathBuf, Arc<WsdlDocument>>>,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout());
        if config.bypass_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build().map_err(http_error)?;

        Ok(Self {
            client,
            version: config.soap_version,
            documents: Mutex::new(HashMap::new()),
        })
    }

    fn document(&self, path: &Path) -> Result<Arc<WsdlDocument>, TransportError> {
        let mut documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(doc) = documents.get(path) {
            return Ok(doc.clone());
        }
        let doc = Arc::new(WsdlDocument::load(path)?);
        debug!(definition = %path.display(), "Loaded definition file");
        documents.insert(path.to_path_buf(), doc.clone());
        Ok(doc)
    }
}

impl SoapTransport for HttpTransport {
    fn bind(&self, target: &BindingTarget<'_>) -> Result<Box<dyn ServiceBinding>, TransportError> {
        let document = self.document(target.definition)?;
        if document.binding(target.binding_id).is_none() {
            let mut available: Vec<_> = document.binding_names().collect();
            available.sort_unstable();
            return Err(TransportError::Definition(format!(
                "binding '{}' not found in {} (available: {})",
                target.binding_id,
                target.definition.display(),
                available.join(", ")
            )));
        }
        if let Some(ns) = document.target_namespace.as_deref() {
            if ns != target.namespace {
                warn!(
                    definition = %target.definition.display(),
                    expected = target.namespace,
                    found = ns,
                    "Definition target namespace differs from service namespace"
                );
            }
        }

        Ok(Box::new(HttpBinding {
            client: self.client.clone(),
            version: self.version,
            document,
            binding_id: target.binding_id.to_string(),
            namespace: target.namespace.to_string(),
            location: RwLock::new(target.endpoint.clone()),
        }))
    }
}

struct HttpBinding {
    client: reqwest::Client,
    version: SoapVersion,
    document: Arc<WsdlDocument>,
    binding_id: String,
    namespace: String,
    location: RwLock<Url>,
}

impl HttpBinding {
    fn soap_action(&self, operation: &str) -> Option<String> {
        self.document
            .binding(&self.binding_id)?
            .iter()
            .find(|op| op.name == operation)?
            .soap_action
            .clone()
    }
}

#[async_trait]
impl ServiceBinding for HttpBinding {
    fn operations(&self) -> Vec<String> {
        self.document
            .binding(&self.binding_id)
            .map(|ops| ops.iter().map(|op| op.name.clone()).collect())
            .unwrap_or_default()
    }

    fn input_fields(&self, operation: &str) -> Option<Vec<String>> {
        self.document.fields(operation).map(<[String]>::to_vec)
    }

    fn empty_element(&self, type_name: &str) -> Option<Record> {
        self.document.empty_element(type_name)
    }

    fn location(&self) -> Url {
        self.location
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_location(&self, endpoint: Url) {
        *self.location.write().unwrap_or_else(|e| e.into_inner()) = endpoint;
    }

    async fn invoke(
        &self,
        operation: &str,
        params: Record,
        security: SecurityHeader,
    ) -> Result<Value, TransportError> {
        let body = write_request(self.version, &security, &self.namespace, operation, &params)?;
        let action = self.soap_action(operation);
        let endpoint = self.location();

        let mut request = self.client.post(endpoint.clone());
        request = match (self.version, action) {
            (SoapVersion::Soap12, Some(action)) => request.header(
                CONTENT_TYPE,
                format!("{}; action=\"{}\"", self.version.content_type(), action),
            ),
            (SoapVersion::Soap11, Some(action)) => request
                .header(CONTENT_TYPE, self.version.content_type())
                .header("SOAPAction", format!("\"{}\"", action)),
            (_, None) => request.header(CONTENT_TYPE, self.version.content_type()),
        };

        trace!(endpoint = %endpoint, operation = %operation, "Sending SOAP request");
        let response = request.body(body).send().await.map_err(http_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(http_error)?;

        // Faults arrive with 4xx/5xx; prefer the decoded fault over the status.
        match read_response(&bytes) {
            Ok(value) if status.is_success() => Ok(value),
            Err(fault @ TransportError::Fault { .. }) => Err(fault),
            Ok(_) => Err(TransportError::Http(format!("HTTP status {}", status))),
            Err(_) if !status.is_success() => {
                Err(TransportError::Http(format!("HTTP status {}", status)))
            }
            Err(e) => Err(e),
        }
    }
}

fn http_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Http(e.to_string())
    }
}
