//! ONVIF client binary.
//!
//! Run with: `onvif-client --config device.yaml`
//!
//! Without `--service` the discovered capability map is printed. With
//! `--service` and `--operation` the operation is called and its response
//! printed as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use onvif_client::{Device, DeviceConfig};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Query an ONVIF device.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "device.yaml")]
    config: PathBuf,

    /// Override the device host from the configuration
    #[arg(long)]
    host: Option<String>,

    /// Override the device port from the configuration
    #[arg(long)]
    port: Option<u16>,

    /// Service to call (devicemgmt, media, ptz, ...)
    #[arg(short, long, requires = "operation")]
    service: Option<String>,

    /// Operation to call on the service
    #[arg(short, long, requires = "service")]
    operation: Option<String>,

    /// Operation parameters as JSON
    #[arg(short, long)]
    params: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Starting ONVIF client v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = if args.config.exists() {
        info!("Config file: {}", args.config.display());
        DeviceConfig::load(&args.config).context("Failed to load config file")?
    } else {
        info!("Config file not found, using defaults");
        DeviceConfig::default()
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    info!(
        host = %config.host,
        port = config.port,
        digest = config.use_digest,
        adjust_time = config.adjust_time,
        definitions = %config.definitions_dir.display(),
        "Configuration loaded"
    );

    let params: Value = match args.params.as_deref() {
        Some(raw) => serde_json::from_str(raw).context("Invalid --params JSON")?,
        None => Value::Null,
    };

    let device = Device::connect(config).context("Failed to create device")?;
    device.bootstrap().await.context("Capability discovery failed")?;
    info!(services = ?device.supported_services().await, "Device ready");

    let output = match (args.service, args.operation) {
        (Some(service), Some(operation)) => device
            .call(&service, &operation, params)
            .await
            .with_context(|| format!("{}.{} failed", service, operation))?,
        _ => {
            let xaddrs = device.xaddrs().await;
            let mut entries: Vec<_> = xaddrs.into_iter().collect();
            entries.sort();
            Value::Object(
                entries
                    .into_iter()
                    .map(|(ns, url)| (ns, Value::String(url.to_string())))
                    .collect(),
            )
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
