//! In-memory transport.
//!
//! Scripted responses per operation and a log of every bind and invocation.
//! Used by the test suites and for exercising device logic without a camera.

use crate::auth::SecurityHeader;
use crate::error::TransportError;
use crate::record::Record;
use crate::transport::{BindingTarget, ServiceBinding, SoapTransport};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use url::Url;

/// A bind performed through the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRecord {
    pub service: String,
    pub binding_id: String,
    pub endpoint: Url,
}

/// A request sent through a memory binding.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub service: String,
    pub binding_id: String,
    pub endpoint: Url,
    pub operation: String,
    pub params: Record,
    pub security: SecurityHeader,
}

#[derive(Default)]
struct MemoryState {
    /// binding id -> (operation, request fields)
    operations: HashMap<String, Vec<(String, Vec<String>)>>,
    responses: HashMap<String, Result<Value, TransportError>>,
    failing_binds: HashMap<String, TransportError>,
    binds: Vec<BindRecord>,
    invocations: Vec<Invocation>,
}

/// Transport answering from scripted responses.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport preloaded with the common ONVIF operations of each binding.
    pub fn onvif() -> Self {
        let transport = Self::new();
        transport
            .operation("DeviceBinding", "GetSystemDateAndTime", &[])
            .operation("DeviceBinding", "GetCapabilities", &["Category"])
            .operation("DeviceBinding", "GetServices", &["IncludeCapability"])
            .operation("DeviceBinding", "GetDeviceInformation", &[])
            .operation("DeviceBinding", "GetHostname", &[])
            .operation("DeviceBinding", "SetHostname", &["Name"])
            .operation("MediaBinding", "GetProfiles", &[])
            .operation("MediaBinding", "GetStreamUri", &["StreamSetup", "ProfileToken"])
            .operation("PTZBinding", "GetConfigurations", &[])
            .operation(
                "PTZBinding",
                "ContinuousMove",
                &["ProfileToken", "Velocity", "Timeout"],
            )
            .operation("ImagingBinding", "GetImagingSettings", &["VideoSourceToken"])
            .operation("EventBinding", "GetEventProperties", &[])
            .operation(
                "EventBinding",
                "CreatePullPointSubscription",
                &["Filter", "InitialTerminationTime", "SubscriptionPolicy"],
            )
            .operation(
                "PullPointSubscriptionBinding",
                "PullMessages",
                &["Timeout", "MessageLimit"],
            );
        transport
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Declare an operation on a binding.
    pub fn operation(&self, binding_id: &str, operation: &str, fields: &[&str]) -> &Self {
        self.lock()
            .operations
            .entry(binding_id.to_string())
            .or_default()
            .push((
                operation.to_string(),
                fields.iter().map(|f| f.to_string()).collect(),
            ));
        self
    }

    /// Answer every call to `operation` with `value`.
    pub fn respond(&self, operation: &str, value: Value) -> &Self {
        self.lock()
            .responses
            .insert(operation.to_string(), Ok(value));
        self
    }

    /// Fail every call to `operation`.
    pub fn fail(&self, operation: &str, error: TransportError) -> &Self {
        self.lock()
            .responses
            .insert(operation.to_string(), Err(error));
        self
    }

    /// Fail every bind of `binding_id`.
    pub fn fail_bind(&self, binding_id: &str, error: TransportError) -> &Self {
        self.lock()
            .failing_binds
            .insert(binding_id.to_string(), error);
        self
    }

    pub fn binds(&self) -> Vec<BindRecord> {
        self.lock().binds.clone()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.lock().invocations.clone()
    }

    /// Number of invocations of `operation`.
    pub fn calls(&self, operation: &str) -> usize {
        self.lock()
            .invocations
            .iter()
            .filter(|i| i.operation == operation)
            .count()
    }

    pub fn clear_log(&self) {
        let mut state = self.lock();
        state.binds.clear();
        state.invocations.clear();
    }
}

impl SoapTransport for MemoryTransport {
    fn bind(&self, target: &BindingTarget<'_>) -> Result<Box<dyn ServiceBinding>, TransportError> {
        let mut state = self.lock();
        if let Some(error) = state.failing_binds.get(target.binding_id) {
            return Err(error.clone());
        }
        state.binds.push(BindRecord {
            service: target.service.to_string(),
            binding_id: target.binding_id.to_string(),
            endpoint: target.endpoint.clone(),
        });
        let operations = state
            .operations
            .get(target.binding_id)
            .cloned()
            .unwrap_or_default();

        Ok(Box::new(MemoryBinding {
            service: target.service.to_string(),
            binding_id: target.binding_id.to_string(),
            operations,
            location: RwLock::new(target.endpoint.clone()),
            transport: self.clone(),
        }))
    }
}

struct MemoryBinding {
    service: String,
    binding_id: String,
    operations: Vec<(String, Vec<String>)>,
    location: RwLock<Url>,
    transport: MemoryTransport,
}

impl MemoryBinding {
    fn fields(&self, name: &str) -> Option<&Vec<String>> {
        self.operations
            .iter()
            .find(|(op, _)| op == name)
            .map(|(_, fields)| fields)
    }
}

#[async_trait]
impl ServiceBinding for MemoryBinding {
    fn operations(&self) -> Vec<String> {
        self.operations.iter().map(|(op, _)| op.clone()).collect()
    }

    fn input_fields(&self, operation: &str) -> Option<Vec<String>> {
        self.fields(operation).cloned()
    }

    fn empty_element(&self, type_name: &str) -> Option<Record> {
        self.fields(type_name)
            .map(|fields| fields.iter().map(|f| (f.clone(), Value::Null)).collect())
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
        let endpoint = self.location();
        let mut state = self.transport.lock();
        state.invocations.push(Invocation {
            service: self.service.clone(),
            binding_id: self.binding_id.clone(),
            endpoint,
            operation: operation.to_string(),
            params,
            security,
        });
        state
            .responses
            .get(operation)
            .cloned()
            .unwrap_or(Ok(Value::Null))
    }
}
