//! Static table of the ONVIF services this client knows how to bind.

use crate::error::{OnvifError, Result};

/// Where a logical service lives in the ONVIF definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Logical service name (lower case)
    pub name: &'static str,
    /// Target namespace of the binding
    pub namespace: &'static str,
    /// WSDL file name, relative to the definitions directory
    pub definition_file: &'static str,
    /// Binding local name within `namespace`
    pub binding_id: &'static str,
    /// Suffix appended to the namespace to form the capability key
    pub sub_port_type: Option<&'static str>,
}

impl ServiceDescriptor {
    /// Qualified binding name in Clark notation: `{namespace}binding`.
    pub fn binding_name(&self) -> String {
        format!("{{{}}}{}", self.namespace, self.binding_id)
    }

    /// Key under which this service's endpoint is stored in a capability map.
    pub fn capability_key(&self, sub_port_type: Option<&str>) -> String {
        match sub_port_type.or(self.sub_port_type) {
            Some(port_type) => format!("{}/{}", self.namespace, port_type),
            None => self.namespace.to_string(),
        }
    }
}

macro_rules! service {
    ($name:literal, $ns:literal, $wsdl:literal, $binding:literal) => {
        service!($name, $ns, $wsdl, $binding, None)
    };
    ($name:literal, $ns:literal, $wsdl:literal, $binding:literal, $port:expr) => {
        ServiceDescriptor {
            name: $name,
            namespace: concat!("http://www.onvif.org/", $ns),
            definition_file: $wsdl,
            binding_id: $binding,
            sub_port_type: $port,
        }
    };
}

/// All known services.
pub static SERVICES: [ServiceDescriptor; 14] = [
    service!("devicemgmt", "ver10/device/wsdl", "devicemgmt.wsdl", "DeviceBinding"),
    service!("media", "ver10/media/wsdl", "media.wsdl", "MediaBinding"),
    service!("ptz", "ver20/ptz/wsdl", "ptz.wsdl", "PTZBinding"),
    service!("imaging", "ver20/imaging/wsdl", "imaging.wsdl", "ImagingBinding"),
    service!("deviceio", "ver10/deviceIO/wsdl", "deviceio.wsdl", "DeviceIOBinding"),
    service!("events", "ver10/events/wsdl", "events.wsdl", "EventBinding"),
    service!(
        "pullpoint",
        "ver10/events/wsdl",
        "events.wsdl",
        "PullPointSubscriptionBinding",
        Some("PullPointSubscription")
    ),
    service!("notification", "ver10/events/wsdl", "events.wsdl", "NotificationProducerBinding"),
    service!("subscription", "ver10/events/wsdl", "events.wsdl", "SubscriptionManagerBinding"),
    service!("analytics", "ver20/analytics/wsdl", "analytics.wsdl", "AnalyticsEngineBinding"),
    service!("recording", "ver10/recording/wsdl", "recording.wsdl", "RecordingBinding"),
    service!("search", "ver10/search/wsdl", "search.wsdl", "SearchBinding"),
    service!("replay", "ver10/replay/wsdl", "replay.wsdl", "ReplayBinding"),
    service!("receiver", "ver10/receiver/wsdl", "receiver.wsdl", "ReceiverBinding"),
];

/// Service whose endpoint is derived from host and port alone.
pub const DEVICE_MGMT: &str = "devicemgmt";

/// Capability-map key under which bootstrap records the pull-point subscription address.
pub const PULL_POINT_SUBSCRIPTION: &str =
    "http://www.onvif.org/ver10/events/wsdl/PullPointSubscription";

/// Look up a service by name, ignoring case.
pub fn lookup(name: &str) -> Result<&'static ServiceDescriptor> {
    find(name).ok_or_else(|| OnvifError::UnknownService {
        name: name.to_string(),
    })
}

/// Like [`lookup`], without the error.
pub fn find(name: &str) -> Option<&'static ServiceDescriptor> {
    SERVICES
        .iter()
        .find(|service| service.name.eq_ignore_ascii_case(name))
}

/// First service name declared for a namespace or capability key.
pub fn name_for_namespace(namespace: &str) -> Option<&'static str> {
    SERVICES
        .iter()
        .find(|service| service.capability_key(None) == namespace)
        .or_else(|| SERVICES.iter().find(|service| service.namespace == namespace))
        .map(|service| service.name)
}

/// Names of every known service.
pub fn names() -> impl Iterator<Item = &'static str> {
    SERVICES.iter().map(|service| service.name)
}
