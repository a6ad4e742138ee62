//! ONVIF device facade.
//!
//! Owns the device address and credentials, discovers service endpoints
//! through `GetCapabilities` and caches one [`ServiceClient`] per service.
//!
//! ```ignore
//! let device = Device::builder("192.168.0.112", 80, "admin", "12345")
//!     .adjust_time(true)
//!     .build(Arc::new(HttpTransport::new(&TransportConfig::default())?));
//! device.bootstrap().await?;
//! let media = device.get_service("media").await?;
//! let profiles = media.call("GetProfiles", ()).await?;
//! ```

use crate::auth::Credential;
use crate::config::DeviceConfig;
use crate::error::{OnvifError, Result, TransportError};
use crate::http::HttpTransport;
use crate::record::{self, Record};
use crate::registry::{self, DEVICE_MGMT, PULL_POINT_SUBSCRIPTION};
use crate::service::ServiceClient;
use crate::transport::SoapTransport;
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use url::Url;

/// Fixed device management path.
pub const DEVICE_SERVICE_PATH: &str = "/onvif/device_service";

/// Discovery state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No capability map; only devicemgmt can be created
    Unbootstrapped,
    /// Discovery in progress
    Bootstrapping,
    /// Capability map populated
    Ready,
}

/// Outcome of resolving a service name against the current device state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub endpoint: Url,
    pub definition_file: PathBuf,
    /// `{namespace}BindingId`
    pub binding_name: String,
}

/// Everything guarded by the device lock.
struct DeviceState {
    host: String,
    port: u16,
    credential: Credential,
    phase: Phase,
    services: HashMap<String, Arc<ServiceClient>>,
    /// capability key (namespace) -> endpoint
    xaddrs: HashMap<String, Url>,
}

impl DeviceState {
    fn resolve(
        &self,
        definitions_dir: &std::path::Path,
        name: &str,
        sub_port_type: Option<&str>,
    ) -> Result<Resolution> {
        let descriptor = registry::lookup(name)?;

        let endpoint = if descriptor.name == DEVICE_MGMT {
            device_service_url(&self.host, self.port)?
        } else {
            self.xaddrs
                .get(&descriptor.capability_key(sub_port_type))
                .cloned()
                .ok_or_else(|| OnvifError::UnsupportedService {
                    name: descriptor.name.to_string(),
                })?
        };

        Ok(Resolution {
            endpoint,
            definition_file: definitions_dir.join(descriptor.definition_file),
            binding_name: descriptor.binding_name(),
        })
    }

    /// Replace the clock skew. Cached clients carry the old credential, so
    /// they are dropped and rebuilt on next use.
    fn set_clock_skew(&mut self, clock_skew: Option<Duration>) {
        if self.credential.clock_skew != clock_skew {
            self.credential = self.credential.with_clock_skew(clock_skew);
            self.services.clear();
        }
    }
}

/// `http://host:port/onvif/device_service`, keeping any scheme given in `host`.
pub fn device_service_url(host: &str, port: u16) -> Result<Url> {
    let host = host.trim_end_matches('/');
    let base = if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    };
    let address = format!("{}:{}{}", base, port, DEVICE_SERVICE_PATH);
    Url::parse(&address)
        .map_err(|e| OnvifError::Config(format!("invalid device address '{}': {}", address, e)))
}

/// One ONVIF device and its service clients.
pub struct Device {
    definitions_dir: PathBuf,
    adjust_time: bool,
    transport: Arc<dyn SoapTransport>,
    span: Span,
    state: Mutex<DeviceState>,
}

/// Builder for [`Device`].
pub struct DeviceBuilder {
    config: DeviceConfig,
    span: Option<Span>,
}

impl DeviceBuilder {
    pub fn definitions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.definitions_dir = dir.into();
        self
    }

    pub fn use_digest(mut self, use_digest: bool) -> Self {
        self.config.use_digest = use_digest;
        self
    }

    pub fn adjust_time(mut self, adjust_time: bool) -> Self {
        self.config.adjust_time = adjust_time;
        self
    }

    /// Span that every log event of the device is recorded in.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self, transport: Arc<dyn SoapTransport>) -> Device {
        let span = self.span.unwrap_or_else(|| default_span(&self.config));
        Device::with_span(self.config, transport, span)
    }
}

fn default_span(config: &DeviceConfig) -> Span {
    info_span!("onvif", host = %config.host, port = config.port)
}

impl Device {
    pub fn builder(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> DeviceBuilder {
        DeviceBuilder {
            config: DeviceConfig {
                host: host.into(),
                port,
                username: username.into(),
                password: password.into(),
                ..Default::default()
            },
            span: None,
        }
    }

    pub fn new(config: DeviceConfig, transport: Arc<dyn SoapTransport>) -> Self {
        let span = default_span(&config);
        Self::with_span(config, transport, span)
    }

    /// Device using the HTTP transport described by `config.transport`.
    pub fn connect(config: DeviceConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config.transport).map_err(|source| {
            OnvifError::ConstructionFailed {
                service: DEVICE_MGMT.to_string(),
                source,
            }
        })?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    fn with_span(config: DeviceConfig, transport: Arc<dyn SoapTransport>, span: Span) -> Self {
        let state = DeviceState {
            host: config.host,
            port: config.port,
            credential: Credential::new(config.username, config.password, config.use_digest),
            phase: Phase::Unbootstrapped,
            services: HashMap::new(),
            xaddrs: HashMap::new(),
        };
        Self {
            definitions_dir: config.definitions_dir,
            adjust_time: config.adjust_time,
            transport,
            span,
            state: Mutex::new(state),
        }
    }

    /// Discover the device's services.
    ///
    /// Builds devicemgmt, optionally measures the device clock, fetches all
    /// capabilities and tries to open a pull-point subscription. On failure
    /// the capability map is cleared and the device is left unbootstrapped.
    pub async fn bootstrap(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.phase = Phase::Bootstrapping;

        let result = self.discover(&mut state).instrument(self.span.clone()).await;
        self.finish(&mut state, result)
    }

    async fn discover(&self, state: &mut DeviceState) -> Result<()> {
        state.set_clock_skew(None);
        let mut devicemgmt = self.build_service(state, DEVICE_MGMT)?;

        if self.adjust_time {
            let skew = measure_clock_skew(&devicemgmt).await?;
            info!(skew_ms = skew.num_milliseconds(), "Adjusting for device clock skew");
            state.set_clock_skew(Some(skew));
            devicemgmt = self.build_service(state, DEVICE_MGMT)?;
        }

        state.xaddrs = fetch_capabilities(&devicemgmt).await?;
        info!(services = state.xaddrs.len(), "Capabilities discovered");

        self.open_pull_point(state).await;
        Ok(())
    }

    /// Best effort: not every device supports pull-point subscriptions.
    async fn open_pull_point(&self, state: &mut DeviceState) {
        let events = match self.build_service(state, "events") {
            Ok(events) => events,
            Err(e) => {
                debug!(error = %e, "Events service unavailable, skipping pull-point subscription");
                return;
            }
        };

        let address = match events.call("CreatePullPointSubscription", ()).await {
            Ok(response) => record::get_path(&response, &["SubscriptionReference", "Address"])
                .and_then(record::text)
                .and_then(|address| Url::parse(&address).ok()),
            Err(e) => {
                debug!(error = %e, "Pull-point subscription failed");
                return;
            }
        };

        match address {
            Some(url) => {
                debug!(address = %url, "Pull-point subscription created");
                state.xaddrs.insert(PULL_POINT_SUBSCRIPTION.to_string(), url);
            }
            None => debug!("Pull-point subscription response carried no usable address"),
        }
    }

    /// Move the device to a new host and/or port.
    ///
    /// No-op when neither differs. Otherwise capabilities are fetched again
    /// and every cached client is repointed in place.
    pub async fn refresh_location(&self, host: Option<&str>, port: Option<u16>) -> Result<()> {
        let mut state = self.state.lock().await;

        let new_host = host.unwrap_or(state.host.as_str()).to_string();
        let new_port = port.unwrap_or(state.port);
        if new_host == state.host && new_port == state.port {
            debug!(parent: &self.span, "Location unchanged");
            return Ok(());
        }

        // A rejected address leaves the device where it was.
        let device_url = device_service_url(&new_host, new_port).map_err(|e| {
            warn!(
                parent: &self.span,
                host = %new_host,
                port = new_port,
                error = %e,
                "Rejected new device location"
            );
            e
        })?;
        state.host = new_host;
        state.port = new_port;

        state.phase = Phase::Bootstrapping;
        let result = self
            .relocate(&mut state, device_url)
            .instrument(self.span.clone())
            .await;
        self.finish(&mut state, result)
    }

    async fn relocate(&self, state: &mut DeviceState, device_url: Url) -> Result<()> {
        info!(endpoint = %device_url, "Device location changed");

        let cached = state.services.get(DEVICE_MGMT).cloned();
        let devicemgmt = match cached {
            Some(client) => {
                client.update_endpoint(device_url);
                client
            }
            None => self.build_service(state, DEVICE_MGMT)?,
        };

        let xaddrs = fetch_capabilities(&devicemgmt).await?;

        let DeviceState {
            services,
            xaddrs: current,
            ..
        } = state;
        *current = xaddrs;
        for (name, client) in services.iter() {
            if name == DEVICE_MGMT {
                continue;
            }
            match current.get(&client.descriptor().capability_key(None)) {
                Some(url) => client.update_endpoint(url.clone()),
                None => warn!(
                    service = %name,
                    "Service no longer advertised, keeping previous endpoint"
                ),
            }
        }
        Ok(())
    }

    fn finish(&self, state: &mut DeviceState, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                state.phase = Phase::Ready;
                Ok(())
            }
            Err(e) => {
                warn!(parent: &self.span, error = %e, "Discovery failed, capability map cleared");
                state.xaddrs.clear();
                state.phase = Phase::Unbootstrapped;
                Err(e)
            }
        }
    }

    /// Cached client for `name`, created on first use.
    pub async fn get_service(&self, name: &str) -> Result<Arc<ServiceClient>> {
        self.get_service_with(name, true).await
    }

    /// Cached client for `name`. With `create_if_absent == false` a cache miss
    /// fails with [`OnvifError::ServiceNotCreated`] and nothing is built.
    pub async fn get_service_with(
        &self,
        name: &str,
        create_if_absent: bool,
    ) -> Result<Arc<ServiceClient>> {
        let key = name.to_ascii_lowercase();
        let mut state = self.state.lock().await;
        if let Some(client) = state.services.get(&key) {
            return Ok(client.clone());
        }
        if !create_if_absent {
            return Err(OnvifError::ServiceNotCreated { name: key });
        }
        let _entered = self.span.enter();
        self.build_service(&mut state, &key)
    }

    /// Build a new client for `name`, replacing any cached one.
    pub async fn create_service(&self, name: &str) -> Result<Arc<ServiceClient>> {
        let mut state = self.state.lock().await;
        let _entered = self.span.enter();
        self.build_service(&mut state, &name.to_ascii_lowercase())
    }

    fn build_service(&self, state: &mut DeviceState, name: &str) -> Result<Arc<ServiceClient>> {
        let descriptor = registry::lookup(name)?;
        let resolution = state.resolve(&self.definitions_dir, descriptor.name, None)?;
        let client = Arc::new(ServiceClient::with_descriptor(
            descriptor,
            resolution.endpoint,
            resolution.definition_file,
            &state.credential,
            self.transport.as_ref(),
        )?);
        state
            .services
            .insert(client.name().to_string(), client.clone());
        info!(
            service = client.name(),
            endpoint = %client.endpoint(),
            definition = %client.definition().display(),
            operations = client.operations().len(),
            "Service created"
        );
        Ok(client)
    }

    /// Endpoint, definition file and binding for `name`, without building anything.
    pub async fn resolve_definition(
        &self,
        name: &str,
        sub_port_type: Option<&str>,
    ) -> Result<Resolution> {
        let state = self.state.lock().await;
        state.resolve(&self.definitions_dir, name, sub_port_type)
    }

    /// Call `operation` on service `name`, creating the client if needed.
    pub async fn call<P: Serialize>(&self, name: &str, operation: &str, params: P) -> Result<Value> {
        let service = self.get_service(name).await?;
        service.call(operation, params).await
    }

    /// Replace the credentials. Cached clients are dropped.
    pub async fn update_credentials(&self, username: impl Into<String>, password: impl Into<String>) {
        let mut state = self.state.lock().await;
        let mut credential = Credential::new(username, password, state.credential.use_digest);
        credential.clock_skew = state.credential.clock_skew;
        state.credential = credential;
        state.services.clear();
    }

    pub async fn host(&self) -> String {
        self.state.lock().await.host.clone()
    }

    pub async fn port(&self) -> u16 {
        self.state.lock().await.port
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    pub async fn clock_skew(&self) -> Option<Duration> {
        self.state.lock().await.credential.clock_skew
    }

    /// Snapshot of the capability map.
    pub async fn xaddrs(&self) -> HashMap<String, Url> {
        self.state.lock().await.xaddrs.clone()
    }

    /// Registry names of every service the device advertised, sorted.
    pub async fn supported_services(&self) -> Vec<&'static str> {
        let state = self.state.lock().await;
        let mut names: Vec<_> = state
            .xaddrs
            .keys()
            .filter_map(|ns| registry::name_for_namespace(ns))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Names of the currently cached clients, sorted.
    pub async fn cached_services(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<_> = state.services.keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

/// Device clock minus local clock, from `GetSystemDateAndTime`.
async fn measure_clock_skew(devicemgmt: &ServiceClient) -> Result<Duration> {
    const OPERATION: &str = "GetSystemDateAndTime";

    let response = devicemgmt.call(OPERATION, ()).await?;
    let utc = record::field(&response, "UTCDateTime").ok_or_else(|| {
        OnvifError::remote(
            DEVICE_MGMT,
            OPERATION,
            TransportError::Decode("response has no UTCDateTime".to_string()),
        )
    })?;

    let part = |path: [&str; 2]| record::get_path(utc, &path).and_then(record::integer);
    let device_time = (|| {
        let date = NaiveDate::from_ymd_opt(
            i32::try_from(part(["Date", "Year"])?).ok()?,
            u32::try_from(part(["Date", "Month"])?).ok()?,
            u32::try_from(part(["Date", "Day"])?).ok()?,
        )?;
        date.and_hms_opt(
            u32::try_from(part(["Time", "Hour"])?).ok()?,
            u32::try_from(part(["Time", "Minute"])?).ok()?,
            u32::try_from(part(["Time", "Second"])?).ok()?,
        )
    })()
    .ok_or_else(|| {
        OnvifError::remote(
            DEVICE_MGMT,
            OPERATION,
            TransportError::Decode("malformed UTCDateTime".to_string()),
        )
    })?;

    Ok(device_time.and_utc() - Utc::now())
}

/// Fetch all capabilities and map each known service's namespace to its XAddr.
///
/// Entries nested under `Extension` are flattened one level. A malformed
/// entry is logged and skipped.
async fn fetch_capabilities(devicemgmt: &ServiceClient) -> Result<HashMap<String, Url>> {
    const OPERATION: &str = "GetCapabilities";

    let response = devicemgmt
        .call(OPERATION, json!({"Category": "All"}))
        .await?;
    let entries = match response {
        Value::Null => Record::new(),
        Value::Object(map) => map,
        other => {
            return Err(OnvifError::remote(
                DEVICE_MGMT,
                OPERATION,
                TransportError::Decode(format!("unexpected capabilities value: {}", other)),
            ))
        }
    };

    let mut xaddrs = HashMap::new();
    for (name, capability) in flatten_extension(&entries) {
        match capability_xaddr(name, capability) {
            Ok(Some((key, url))) => {
                debug!(capability = %name, endpoint = %url, "Recorded service endpoint");
                xaddrs.insert(key, url);
            }
            Ok(None) => {}
            Err(reason) => warn!(
                capability = %name,
                reason = %reason,
                "Skipping malformed capability entry"
            ),
        }
    }
    Ok(xaddrs)
}

fn flatten_extension(entries: &Record) -> Vec<(&str, &Value)> {
    let mut flat = Vec::new();
    for (name, value) in entries {
        if name == "Extension" {
            if let Some(nested) = value.as_object() {
                flat.extend(nested.iter().map(|(n, v)| (n.as_str(), v)));
                continue;
            }
        }
        flat.push((name.as_str(), value));
    }
    flat
}

/// `Ok(None)` for services outside the registry and null entries.
fn capability_xaddr(name: &str, capability: &Value) -> std::result::Result<Option<(String, Url)>, String> {
    let descriptor = match registry::find(name) {
        Some(descriptor) => descriptor,
        None => return Ok(None),
    };
    if capability.is_null() {
        return Ok(None);
    }

    let xaddr = record::field(capability, "XAddr")
        .and_then(record::text)
        .ok_or_else(|| "missing XAddr".to_string())?;
    let url = Url::parse(&xaddr).map_err(|e| format!("invalid XAddr '{}': {}", xaddr, e))?;
    Ok(Some((descriptor.capability_key(None), url)))
}
