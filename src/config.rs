//! Configuration types for the ONVIF client.

use crate::error::{OnvifError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection settings for one ONVIF device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device host name or address, optionally with an `http(s)://` scheme
    pub host: String,

    /// Device management port
    pub port: u16,

    /// WS-Security user name
    pub username: String,

    /// WS-Security password
    pub password: String,

    /// Directory holding the WSDL definition files
    pub definitions_dir: PathBuf,

    /// Send a PasswordDigest instead of a clear text password
    pub use_digest: bool,

    /// Measure the device clock during bootstrap and fold the offset into tokens
    pub adjust_time: bool,

    /// Transport settings
    pub transport: TransportConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 80,
            username: String::new(),
            password: String::new(),
            definitions_dir: PathBuf::from("wsdl"),
            use_digest: true,
            adjust_time: false,
            transport: TransportConfig::default(),
        }
    }
}

impl DeviceConfig {
    /// Parse a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| OnvifError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(OnvifError::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(OnvifError::Config("port must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Ignore any proxy configured in the environment
    pub bypass_proxy: bool,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// SOAP envelope version used for requests
    pub soap_version: SoapVersion,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bypass_proxy: false,
            timeout_secs: 30,
            soap_version: SoapVersion::Soap12,
        }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// SOAP versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoapVersion {
    /// SOAP 1.1 (namespace: http://schemas.xmlsoap.org/soap/envelope/)
    #[serde(rename = "1.1")]
    Soap11,
    /// SOAP 1.2 (namespace: http://www.w3.org/2003/05/soap-envelope)
    #[serde(rename = "1.2")]
    Soap12,
}

impl SoapVersion {
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Soap11 => crate::envelope::SOAP_11_NS,
            Self::Soap12 => crate::envelope::SOAP_12_NS,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Soap11 => "text/xml; charset=utf-8",
            Self::Soap12 => "application/soap+xml; charset=utf-8",
        }
    }
}
