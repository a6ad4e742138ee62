//! ONVIF client for IP cameras and video devices
//!
//! Discovers which ONVIF services a device exposes, binds a client to each
//! service endpoint and dispatches named SOAP operations with a WS-Security
//! UsernameToken attached to every request.
//!
//! # Features
//!
//! - Capability discovery (`GetCapabilities`) with per-service endpoint map
//! - Lazily built, cached service clients
//! - Endpoint refresh when the device moves to a new host or port
//! - PasswordDigest tokens with optional device clock-skew compensation
//! - Pluggable SOAP transport, with an HTTP implementation included
//!
//! # Example
//!
//! ```ignore
//! use onvif_client::{Device, DeviceConfig};
//!
//! let device = Device::connect(DeviceConfig::load("device.yaml".as_ref())?)?;
//! device.bootstrap().await?;
//!
//! let media = device.get_service("media").await?;
//! let profiles = media.call("GetProfiles", ()).await?;
//! ```

pub mod auth;
pub mod config;
pub mod device;
pub mod envelope;
pub mod error;
pub mod http;
pub mod memory;
pub mod record;
pub mod registry;
pub mod service;
pub mod transport;
pub mod wsdl;

pub use auth::{Credential, SecurityHeader, UsernameToken};
pub use config::{DeviceConfig, SoapVersion, TransportConfig};
pub use device::{Device, DeviceBuilder, Phase, Resolution};
pub use error::{ErrorKind, OnvifError, Result, TransportError};
pub use http::HttpTransport;
pub use memory::MemoryTransport;
pub use record::Record;
pub use service::ServiceClient;
pub use transport::{ServiceBinding, SoapTransport};
