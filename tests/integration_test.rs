//! Integration tests for the onvif-client crate.
//!
//! These tests exercise the public API surface end-to-end: the device facade
//! on top of the in-memory transport, and the HTTP transport against a local
//! listener speaking SOAP.

use chrono::{TimeZone, Utc};
use onvif_client::auth::{password_digest, Credential, UsernameToken};
use onvif_client::config::{DeviceConfig, TransportConfig};
use onvif_client::device::{Device, Phase};
use onvif_client::error::{ErrorKind, OnvifError, TransportError};
use onvif_client::memory::MemoryTransport;
use onvif_client::registry::{self, PULL_POINT_SUBSCRIPTION};
use onvif_client::service::ServiceClient;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

const MEDIA_NS: &str = "http://www.onvif.org/ver10/media/wsdl";
const PTZ_NS: &str = "http://www.onvif.org/ver20/ptz/wsdl";
const EVENTS_NS: &str = "http://www.onvif.org/ver10/events/wsdl";

// ============================================================================
// Helpers: fixture definitions, a device on the memory transport, and a
// capabilities response as the device would report it
// ============================================================================

fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/wsdl")
}

fn device_on(transport: &MemoryTransport, host: &str) -> Device {
    Device::builder(host, 80, "admin", "12345")
        .definitions_dir(fixture_dir())
        .build(Arc::new(transport.clone()))
}

fn capabilities(host: &str) -> Value {
    let xaddr = |path: &str| json!({"XAddr": format!("http://{}/onvif/{}", host, path)});
    json!({
        "Analytics": xaddr("analytics_service"),
        "Device": xaddr("device_service"),
        "Events": xaddr("event_service"),
        "Imaging": xaddr("imaging_service"),
        "Media": xaddr("media_service"),
        "PTZ": xaddr("ptz_service"),
        "Extension": {
            "DeviceIO": xaddr("deviceio_service"),
            "Recording": xaddr("recording_service"),
            "Search": xaddr("search_service"),
            "Replay": xaddr("replay_service")
        }
    })
}

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn system_date_and_time(at: chrono::DateTime<Utc>) -> Value {
    json!({
        "DateTimeType": "NTP",
        "DaylightSavings": "false",
        "UTCDateTime": {
            "Time": {
                "Hour": at.format("%H").to_string(),
                "Minute": at.format("%M").to_string(),
                "Second": at.format("%S").to_string()
            },
            "Date": {
                "Year": at.format("%Y").to_string(),
                "Month": at.format("%m").to_string(),
                "Day": at.format("%d").to_string()
            }
        }
    })
}

// ============================================================================
// Service registry
// ============================================================================

#[test]
fn test_e2e_every_registry_name_resolves() {
    let names: Vec<_> = registry::names().collect();
    assert_eq!(names.len(), 14);
    for name in names {
        let descriptor = registry::lookup(name).unwrap();
        assert!(!descriptor.namespace.is_empty());
        assert!(!descriptor.definition_file.is_empty());
        assert!(!descriptor.binding_id.is_empty());
        assert!(fixture_dir().join(descriptor.definition_file).is_file());
    }
}

#[test]
fn test_e2e_unknown_name_never_resolves() {
    for name in ["", "display", "device", "media2", "pull point"] {
        let err = registry::lookup(name).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownService);
    }
}

// ============================================================================
// Service resolution before discovery
// ============================================================================

#[tokio::test]
async fn test_e2e_devicemgmt_without_capabilities() {
    let transport = MemoryTransport::onvif();
    let device = device_on(&transport, "192.168.0.112");

    let devicemgmt = device.get_service("devicemgmt").await.unwrap();
    assert_eq!(
        devicemgmt.endpoint(),
        url("http://192.168.0.112/onvif/device_service")
    );
    assert!(device.xaddrs().await.is_empty());
    assert_eq!(device.phase().await, Phase::Unbootstrapped);
}

#[tokio::test]
async fn test_e2e_media_unsupported_before_bootstrap() {
    let transport = MemoryTransport::onvif();
    let device = device_on(&transport, "192.168.0.112");

    let err = device.get_service("media").await.unwrap_err();
    assert!(matches!(err, OnvifError::UnsupportedService { ref name } if name == "media"));
    assert_eq!(err.to_string(), "Device doesn't support service: media");
    assert!(transport.binds().is_empty());
}

#[tokio::test]
async fn test_e2e_get_service_without_create() {
    let transport = MemoryTransport::onvif();
    let device = device_on(&transport, "192.168.0.112");

    let err = device.get_service_with("devicemgmt", false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceNotCreated);
    assert!(transport.binds().is_empty());

    // Unknown names are reported as not created too: nothing is looked up
    let err = device.get_service_with("display", false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceNotCreated);

    let created = device.get_service("devicemgmt").await.unwrap();
    let cached = device.get_service_with("DeviceMgmt", false).await.unwrap();
    assert!(Arc::ptr_eq(&created, &cached));
}

#[tokio::test]
async fn test_e2e_missing_definition_directory() {
    let transport = MemoryTransport::onvif();
    let device = Device::builder("192.168.0.112", 80, "admin", "12345")
        .definitions_dir("/nonexistent/wsdl")
        .build(Arc::new(transport.clone()));

    let err = device.get_service("devicemgmt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DefinitionNotFound);
    assert!(device.cached_services().await.is_empty());
}

// ============================================================================
// Bootstrap / capability discovery
// ============================================================================

#[tokio::test]
async fn test_e2e_bootstrap_records_endpoints() {
    let transport = MemoryTransport::onvif();
    transport.respond("GetCapabilities", capabilities("192.168.0.112"));
    let device = device_on(&transport, "192.168.0.112");

    device.bootstrap().await.unwrap();
    assert_eq!(device.phase().await, Phase::Ready);

    let xaddrs = device.xaddrs().await;
    assert_eq!(
        xaddrs.get(MEDIA_NS),
        Some(&url("http://192.168.0.112/onvif/media_service"))
    );

    let media = device.get_service("media").await.unwrap();
    assert_eq!(media.endpoint(), xaddrs[MEDIA_NS]);

    let capability_calls: Vec<_> = transport
        .invocations()
        .into_iter()
        .filter(|i| i.operation == "GetCapabilities")
        .collect();
    assert_eq!(capability_calls.len(), 1);
    assert_eq!(capability_calls[0].params.get("Category"), Some(&json!("All")));

    let supported = device.supported_services().await;
    for name in ["analytics", "deviceio", "events", "imaging", "media", "ptz", "recording", "replay", "search"] {
        assert!(supported.contains(&name), "missing {}", name);
    }
}

#[tokio::test]
async fn test_e2e_bootstrap_skips_malformed_capability() {
    let mut response = capabilities("192.168.0.112");
    response["Extension"]["Receiver"] = json!({"XAddr": "::not a url::"});

    let transport = MemoryTransport::onvif();
    transport.respond("GetCapabilities", response);
    let device = device_on(&transport, "192.168.0.112");

    device.bootstrap().await.unwrap();

    let xaddrs = device.xaddrs().await;
    assert_eq!(xaddrs.len(), 9);
    assert!(!xaddrs.contains_key("http://www.onvif.org/ver10/receiver/wsdl"));
    assert!(device.get_service("receiver").await.is_err());
    assert!(device.get_service("ptz").await.is_ok());
}

#[tokio::test]
async fn test_e2e_bootstrap_failure_clears_state() {
    let transport = MemoryTransport::onvif();
    transport.respond("GetCapabilities", capabilities("192.168.0.112"));
    let device = device_on(&transport, "192.168.0.112");
    device.bootstrap().await.unwrap();
    assert!(!device.xaddrs().await.is_empty());

    transport.fail("GetCapabilities", TransportError::Timeout);
    let err = device.bootstrap().await.unwrap_err();
    assert!(matches!(
        err,
        OnvifError::RemoteOperation { ref operation, source: TransportError::Timeout, .. }
            if operation == "GetCapabilities"
    ));
    assert!(device.xaddrs().await.is_empty());
    assert_eq!(device.phase().await, Phase::Unbootstrapped);
}

#[tokio::test]
async fn test_e2e_bootstrap_opens_pull_point() {
    let transport = MemoryTransport::onvif();
    transport
        .respond("GetCapabilities", capabilities("192.168.0.112"))
        .respond(
            "CreatePullPointSubscription",
            json!({
                "SubscriptionReference": {
                    "Address": "http://192.168.0.112/onvif/pullpoint/7"
                },
                "CurrentTime": "2024-01-02T03:04:05Z",
                "TerminationTime": "2024-01-02T03:05:05Z"
            }),
        );
    let device = device_on(&transport, "192.168.0.112");
    device.bootstrap().await.unwrap();

    let pull_point = url("http://192.168.0.112/onvif/pullpoint/7");
    assert_eq!(device.xaddrs().await.get(PULL_POINT_SUBSCRIPTION), Some(&pull_point));

    let resolution = device.resolve_definition("pullpoint", None).await.unwrap();
    assert_eq!(resolution.endpoint, pull_point);
    assert_eq!(resolution.definition_file, fixture_dir().join("events.wsdl"));
    assert_eq!(
        resolution.binding_name,
        format!("{{{}}}PullPointSubscriptionBinding", EVENTS_NS)
    );

    let subscription = device.get_service("pullpoint").await.unwrap();
    subscription
        .call("PullMessages", json!({"Timeout": "PT5S", "MessageLimit": 10}))
        .await
        .unwrap();
    let last = transport.invocations().pop().unwrap();
    assert_eq!(last.binding_id, "PullPointSubscriptionBinding");
    assert_eq!(last.endpoint, pull_point);
}

#[tokio::test]
async fn test_e2e_pull_point_failure_is_swallowed() {
    let transport = MemoryTransport::onvif();
    transport
        .respond("GetCapabilities", capabilities("192.168.0.112"))
        .fail(
            "CreatePullPointSubscription",
            TransportError::Fault {
                code: "ter:ActionNotSupported".to_string(),
                reason: "not supported".to_string(),
            },
        );
    let device = device_on(&transport, "192.168.0.112");

    device.bootstrap().await.unwrap();
    assert_eq!(device.phase().await, Phase::Ready);
    assert!(!device.xaddrs().await.contains_key(PULL_POINT_SUBSCRIPTION));
    assert_eq!(
        device.get_service("pullpoint").await.unwrap_err().kind(),
        ErrorKind::UnsupportedService
    );
}

#[tokio::test]
async fn test_e2e_bootstrap_adjusts_clock_skew() {
    let device_now = Utc::now() + chrono::Duration::minutes(10);
    let transport = MemoryTransport::onvif();
    transport
        .respond("GetCapabilities", capabilities("192.168.0.112"))
        .respond("GetSystemDateAndTime", system_date_and_time(device_now));
    let device = Device::builder("192.168.0.112", 80, "admin", "12345")
        .definitions_dir(fixture_dir())
        .adjust_time(true)
        .build(Arc::new(transport.clone()));

    device.bootstrap().await.unwrap();

    let skew = device.clock_skew().await.unwrap();
    assert!((skew.num_seconds() - 600).abs() <= 2, "skew {}", skew);

    // The capability fetch already runs with the adjusted credential
    let capability_call = transport
        .invocations()
        .into_iter()
        .find(|i| i.operation == "GetCapabilities")
        .unwrap();
    let created = capability_call.security.created.unwrap();
    let created = chrono::DateTime::parse_from_rfc3339(&created).unwrap();
    assert!((created.with_timezone(&Utc) - Utc::now()).num_seconds() >= 590);
}

#[tokio::test]
async fn test_e2e_clock_skew_rebuilds_cached_clients() {
    let transport = MemoryTransport::onvif();
    transport
        .respond("GetCapabilities", capabilities("192.168.0.112"))
        .respond(
            "GetSystemDateAndTime",
            system_date_and_time(Utc::now() + chrono::Duration::minutes(5)),
        );
    let device = Device::builder("192.168.0.112", 80, "admin", "12345")
        .definitions_dir(fixture_dir())
        .adjust_time(true)
        .build(Arc::new(transport.clone()));

    device.bootstrap().await.unwrap();
    let media = device.get_service("media").await.unwrap();
    assert!(media.credential().clock_skew.is_some());

    transport.respond(
        "GetSystemDateAndTime",
        system_date_and_time(Utc::now() - chrono::Duration::minutes(5)),
    );
    device.bootstrap().await.unwrap();

    let rebuilt = device.get_service("media").await.unwrap();
    assert!(!Arc::ptr_eq(&media, &rebuilt));
    assert_eq!(rebuilt.credential().clock_skew, device.clock_skew().await);
    assert!(rebuilt.credential().clock_skew.unwrap().num_seconds() < 0);

    // The dropped client is untouched: its credential is never patched
    assert!(media.credential().clock_skew.unwrap().num_seconds() > 0);
}

// ============================================================================
// Location refresh
// ============================================================================

#[tokio::test]
async fn test_e2e_refresh_same_location_is_noop() {
    let transport = MemoryTransport::onvif();
    transport.respond("GetCapabilities", capabilities("192.168.0.112"));
    let device = device_on(&transport, "192.168.0.112");
    device.bootstrap().await.unwrap();
    let media = device.get_service("media").await.unwrap();
    let before = device.xaddrs().await;
    transport.clear_log();

    device.refresh_location(Some("192.168.0.112"), Some(80)).await.unwrap();
    device.refresh_location(None, None).await.unwrap();

    assert_eq!(transport.calls("GetCapabilities"), 0);
    assert!(transport.binds().is_empty());
    assert_eq!(device.xaddrs().await, before);
    assert!(Arc::ptr_eq(&media, &device.get_service("media").await.unwrap()));
}

#[tokio::test]
async fn test_e2e_refresh_new_host_repoints_clients() {
    let transport = MemoryTransport::onvif();
    transport.respond("GetCapabilities", capabilities("192.168.0.112"));
    let device = device_on(&transport, "192.168.0.112");
    device.bootstrap().await.unwrap();

    let devicemgmt = device.get_service("devicemgmt").await.unwrap();
    let media = device.get_service("media").await.unwrap();
    let ptz = device.get_service("ptz").await.unwrap();

    transport.clear_log();
    transport.respond("GetCapabilities", capabilities("10.1.1.20"));
    device.refresh_location(Some("10.1.1.20"), None).await.unwrap();

    assert_eq!(transport.calls("GetCapabilities"), 1);
    assert!(transport.binds().is_empty(), "clients must not be rebuilt");
    assert_eq!(device.host().await, "10.1.1.20");
    assert_eq!(device.phase().await, Phase::Ready);

    let xaddrs = device.xaddrs().await;
    assert_eq!(media.endpoint(), xaddrs[MEDIA_NS]);
    assert_eq!(ptz.endpoint(), xaddrs[PTZ_NS]);
    assert_eq!(media.endpoint(), url("http://10.1.1.20/onvif/media_service"));
    assert_eq!(
        devicemgmt.endpoint(),
        url("http://10.1.1.20/onvif/device_service")
    );

    // Capability fetch went to the new address
    let fetch = transport.invocations().pop().unwrap();
    assert_eq!(fetch.endpoint, url("http://10.1.1.20/onvif/device_service"));

    assert!(Arc::ptr_eq(&media, &device.get_service("media").await.unwrap()));
    assert!(Arc::ptr_eq(&ptz, &device.get_service("ptz").await.unwrap()));
    assert!(Arc::ptr_eq(&devicemgmt, &device.get_service("devicemgmt").await.unwrap()));
}

#[tokio::test]
async fn test_e2e_refresh_keeps_unadvertised_endpoint() {
    let transport = MemoryTransport::onvif();
    transport.respond("GetCapabilities", capabilities("192.168.0.112"));
    let device = device_on(&transport, "192.168.0.112");
    device.bootstrap().await.unwrap();
    let ptz = device.get_service("ptz").await.unwrap();

    let mut moved = capabilities("10.1.1.20");
    moved.as_object_mut().unwrap().remove("PTZ");
    transport.respond("GetCapabilities", moved);
    device.refresh_location(None, Some(8080)).await.unwrap();

    assert_eq!(ptz.endpoint(), url("http://192.168.0.112/onvif/ptz_service"));
    assert_eq!(device.port().await, 8080);
    assert!(!device.xaddrs().await.contains_key(PTZ_NS));
}

#[tokio::test]
async fn test_e2e_refresh_rejects_invalid_host() {
    let transport = MemoryTransport::onvif();
    transport.respond("GetCapabilities", capabilities("192.168.0.112"));
    let device = device_on(&transport, "192.168.0.112");
    device.bootstrap().await.unwrap();
    let media = device.get_service("media").await.unwrap();
    let before = device.xaddrs().await;
    transport.clear_log();

    let err = device
        .refresh_location(Some("bad host"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    assert_eq!(device.host().await, "192.168.0.112");
    assert_eq!(device.port().await, 80);
    assert_eq!(device.phase().await, Phase::Ready);
    assert_eq!(device.xaddrs().await, before);
    assert_eq!(transport.calls("GetCapabilities"), 0);
    assert!(Arc::ptr_eq(&media, &device.get_service("media").await.unwrap()));

    device.bootstrap().await.unwrap();
    assert_eq!(
        device.get_service("devicemgmt").await.unwrap().endpoint(),
        url("http://192.168.0.112/onvif/device_service")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_e2e_refresh_is_atomic_for_readers() {
    let old = url("http://192.168.0.112/onvif/media_service");
    let new = url("http://10.1.1.20/onvif/media_service");

    let transport = MemoryTransport::onvif();
    transport.respond("GetCapabilities", capabilities("192.168.0.112"));
    let device = Arc::new(device_on(&transport, "192.168.0.112"));
    device.bootstrap().await.unwrap();
    let media = device.get_service("media").await.unwrap();

    transport.respond("GetCapabilities", capabilities("10.1.1.20"));

    let readers: Vec<_> = (0..16)
        .map(|_| {
            let device = device.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..8 {
                    let client = device.get_service("media").await.unwrap();
                    let resolution = device.resolve_definition("media", None).await.unwrap();
                    seen.push((client, resolution.endpoint, device.phase().await));
                    tokio::task::yield_now().await;
                }
                seen
            })
        })
        .collect();
    let refresh = {
        let device = device.clone();
        tokio::spawn(async move { device.refresh_location(Some("10.1.1.20"), None).await })
    };

    for reader in readers {
        for (client, endpoint, phase) in reader.await.unwrap() {
            assert!(Arc::ptr_eq(&client, &media));
            assert!(endpoint == old || endpoint == new, "torn endpoint {}", endpoint);
            assert_eq!(phase, Phase::Ready);
        }
    }
    refresh.await.unwrap().unwrap();

    assert_eq!(media.endpoint(), new);
    assert_eq!(device.resolve_definition("media", None).await.unwrap().endpoint, new);
}

// ============================================================================
// Dispatch and parameter shaping
// ============================================================================

#[tokio::test]
async fn test_e2e_create_type_matches_plain_mapping() {
    let transport = MemoryTransport::onvif();
    let device = device_on(&transport, "192.168.0.112");
    let devicemgmt = device.get_service("devicemgmt").await.unwrap();

    let mut params = devicemgmt.create_type("SetHostname").unwrap();
    params.insert("Name".to_string(), json!("x"));
    let record = ServiceClient::to_record(&Value::Object(params));

    devicemgmt.call("SetHostname", record).await.unwrap();
    device
        .call("devicemgmt", "SetHostname", json!({"Name": "x"}))
        .await
        .unwrap();

    let invocations = transport.invocations();
    assert_eq!(invocations.len(), 2);
    assert_eq!(invocations[0].params, invocations[1].params);
}

#[tokio::test]
async fn test_e2e_concurrent_get_service_shares_client() {
    let transport = MemoryTransport::onvif();
    transport.respond("GetCapabilities", capabilities("192.168.0.112"));
    let device = Arc::new(device_on(&transport, "192.168.0.112"));
    device.bootstrap().await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let device = device.clone();
            tokio::spawn(async move { device.get_service("media").await.unwrap() })
        })
        .collect();

    let mut clients = Vec::new();
    for handle in handles {
        clients.push(handle.await.unwrap());
    }
    assert!(clients.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(
        transport.binds().iter().filter(|b| b.service == "media").count(),
        1
    );
}

#[tokio::test]
async fn test_e2e_create_service_replaces_cache_entry() {
    let transport = MemoryTransport::onvif();
    let device = device_on(&transport, "192.168.0.112");
    let first = device.get_service("devicemgmt").await.unwrap();
    let second = device.create_service("devicemgmt").await.unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&second, &device.get_service("devicemgmt").await.unwrap()));
    assert_eq!(device.cached_services().await, vec!["devicemgmt".to_string()]);
}

// ============================================================================
// Authentication tokens
// ============================================================================

#[test]
fn test_e2e_token_generation_is_repeatable() {
    let created = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let credential =
        Credential::new("admin", "secret", true).with_clock_skew(Some(chrono::Duration::seconds(60)));
    let token = UsernameToken::new(credential)
        .with_created(created)
        .with_nonce(b"0123456789abcdef".to_vec());

    let first = token.header();
    let second = token.header();
    assert_eq!(first, second);
    assert_eq!(first.created.as_deref(), Some("2024-01-02T03:05:05.000Z"));
    assert_eq!(
        first.password,
        password_digest(b"0123456789abcdef", "2024-01-02T03:05:05.000Z", "secret")
    );
}

#[tokio::test]
async fn test_e2e_plain_text_credentials() {
    let transport = MemoryTransport::onvif();
    let device = Device::builder("192.168.0.112", 80, "admin", "12345")
        .definitions_dir(fixture_dir())
        .use_digest(false)
        .build(Arc::new(transport.clone()));

    device.call("devicemgmt", "GetHostname", ()).await.unwrap();
    let security = transport.invocations().pop().unwrap().security;
    assert!(!security.is_digest());
    assert_eq!(security.password, "12345");
    assert!(security.nonce.is_none());
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn test_e2e_device_from_yaml_config() {
    let yaml = format!(
        r#"
host: 192.168.0.112
port: 8000
username: admin
password: "12345"
definitions_dir: {}
transport:
  bypass_proxy: true
  timeout_secs: 5
"#,
        fixture_dir().display()
    );
    let config = DeviceConfig::from_yaml(&yaml).unwrap();
    let transport = MemoryTransport::onvif();
    let device = Device::new(config, Arc::new(transport.clone()));

    let devicemgmt = device.get_service("devicemgmt").await.unwrap();
    assert_eq!(
        devicemgmt.endpoint(),
        url("http://192.168.0.112:8000/onvif/device_service")
    );
    assert!(device.clock_skew().await.is_none());
}

// ============================================================================
// HTTP transport against a local SOAP endpoint
// ============================================================================

fn soap_response(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"
              xmlns:tds="http://www.onvif.org/ver10/device/wsdl"
              xmlns:tt="http://www.onvif.org/ver10/schema">
  <env:Body>{}</env:Body>
</env:Envelope>"#,
        body
    )
}

/// Serve SOAP responses chosen by the operation named in the request body.
/// Returns the bound port and the log of received requests.
async fn serve_soap(routes: Vec<(&'static str, &'static str, String)>) -> (u16, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let log = Arc::new(Mutex::new(Vec::new()));
    let requests = log.clone();

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let request = read_http_request(&mut socket).await;
            let (status, body) = routes
                .iter()
                .find(|(operation, _, _)| request.contains(&format!("<{} ", operation)) || request.contains(&format!("<{}/>", operation)))
                .map(|(_, status, body)| (*status, body.clone()))
                .unwrap_or(("500 Internal Server Error", String::new()));
            requests.lock().unwrap().push(request);

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/soap+xml; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (port, log)
}

async fn read_http_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut data = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&data);
        if let Some(split) = text.find("\r\n\r\n") {
            let length = text[..split]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if data.len() >= split + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&data).into_owned()
}

#[tokio::test]
async fn test_e2e_http_bootstrap_and_call() {
    let capabilities = soap_response(
        r#"<tds:GetCapabilitiesResponse>
      <tds:Capabilities>
        <tt:Device><tt:XAddr>http://127.0.0.1/onvif/device_service</tt:XAddr></tt:Device>
        <tt:Media><tt:XAddr>http://127.0.0.1/onvif/media_service</tt:XAddr></tt:Media>
      </tds:Capabilities>
    </tds:GetCapabilitiesResponse>"#,
    );
    let hostname = soap_response(
        r#"<tds:GetHostnameResponse>
      <tds:HostnameInformation>
        <tt:FromDHCP>false</tt:FromDHCP>
        <tt:Name>camera-01</tt:Name>
      </tds:HostnameInformation>
    </tds:GetHostnameResponse>"#,
    );
    let (port, requests) = serve_soap(vec![
        ("GetCapabilities", "200 OK", capabilities),
        ("GetHostname", "200 OK", hostname),
    ])
    .await;

    let config = DeviceConfig {
        host: "127.0.0.1".to_string(),
        port,
        username: "admin".to_string(),
        password: "12345".to_string(),
        definitions_dir: fixture_dir(),
        transport: TransportConfig {
            bypass_proxy: true,
            timeout_secs: 5,
            ..Default::default()
        },
        ..Default::default()
    };
    let device = Device::connect(config).unwrap();
    device.bootstrap().await.unwrap();

    assert_eq!(
        device.xaddrs().await.get(MEDIA_NS),
        Some(&url("http://127.0.0.1/onvif/media_service"))
    );

    let info = device.call("devicemgmt", "GetHostname", ()).await.unwrap();
    assert_eq!(info["Name"], json!("camera-01"));
    assert_eq!(info["FromDHCP"], json!("false"));

    let requests = requests.lock().unwrap().clone();
    let capability_request = requests
        .iter()
        .find(|r| r.contains("GetCapabilities"))
        .unwrap();
    assert!(capability_request.starts_with("POST /onvif/device_service"));
    assert!(capability_request.contains("<Category>All</Category>"));
    assert!(capability_request.contains("wsse:UsernameToken"));
    assert!(capability_request.contains("#PasswordDigest"));
}

#[tokio::test]
async fn test_e2e_http_fault_is_remote_operation_error() {
    let fault = soap_response(
        r#"<env:Fault>
      <env:Code>
        <env:Value>env:Sender</env:Value>
        <env:Subcode><env:Value>ter:NotAuthorized</env:Value></env:Subcode>
      </env:Code>
      <env:Reason><env:Text xml:lang="en">Sender not Authorized</env:Text></env:Reason>
    </env:Fault>"#,
    );
    let (port, _) = serve_soap(vec![("GetHostname", "400 Bad Request", fault)]).await;

    let config = DeviceConfig {
        host: "127.0.0.1".to_string(),
        port,
        definitions_dir: fixture_dir(),
        transport: TransportConfig {
            bypass_proxy: true,
            timeout_secs: 5,
            ..Default::default()
        },
        ..Default::default()
    };
    let device = Device::connect(config).unwrap();

    let err = device.call("devicemgmt", "GetHostname", ()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteOperation);
    assert_eq!(
        err.transport_cause(),
        Some(&TransportError::Fault {
            code: "ter:NotAuthorized".to_string(),
            reason: "Sender not Authorized".to_string(),
        })
    );
}
