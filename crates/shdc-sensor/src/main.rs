//! `shdc-sensor`: the sensor-role daemon CLI (spec §6).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shdc_common::device_id::{parse_device_id, DeviceId};
use shdc_common::{ConfigOverrides, EngineConfig, SystemClock};
use shdc_crypto::fingerprint;
use shdc_keystore::KeyStore;
use shdc_protocol::{SensorEngine, SensorEvent};
use shdc_transport::{DiscoveryPolicy, UdpTransport};
use tracing::info;

#[derive(Parser)]
#[command(name = "shdc-sensor", about = "Smart Home Device Communications sensor daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover a hub, join it, and start reporting events.
    Run {
        #[arg(value_parser = parse_device_id)]
        id: DeviceId,
        device_type: String,
        #[arg(long)]
        hub: Option<SocketAddr>,
        #[arg(long)]
        no_auto_join: bool,
        #[arg(long)]
        data: Option<std::path::PathBuf>,
        #[arg(long, default_value_t = 30)]
        interval: u64,
        #[arg(long)]
        debug: bool,
    },
    /// Run discovery only and print the hubs found.
    Discover {
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
    /// Report this sensor's identity and key store contents.
    Status {
        #[arg(value_parser = parse_device_id)]
        id: DeviceId,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { id, device_type, hub, no_auto_join, data, interval, debug } => {
            run(id, device_type, hub, no_auto_join, data, interval, debug).await
        }
        Command::Discover { timeout } => discover(timeout).await,
        Command::Status { id } => status(id),
    }
}

async fn run(
    id: DeviceId,
    device_type: String,
    hub: Option<SocketAddr>,
    no_auto_join: bool,
    data: Option<std::path::PathBuf>,
    interval: u64,
    debug: bool,
) -> Result<()> {
    let overrides = ConfigOverrides {
        port: None,
        interface: None,
        key_dir: None,
        log: debug.then(|| "debug".to_string()),
    };
    let config = EngineConfig::load(overrides);
    shdc_common::logging::init(&config.log);

    let keystore = Arc::new(
        KeyStore::open(&config.key_dir, id.0).with_context(|| format!("opening key store under {:?}", config.key_dir))?,
    );
    let identity = keystore.generate_device_keys(false).context("loading or generating sensor identity keypair")?;

    let transport =
        Arc::new(UdpTransport::bind("0.0.0.0", 0).await.context("binding ephemeral UDP transport for discovery")?);
    let clock = Arc::new(SystemClock);
    let engine = Arc::new(SensorEngine::new(device_type, identity, keystore, transport.clone(), clock));

    engine.on_control_message(|event| {
        if let SensorEvent::ControlMessage { command_type, data } = event {
            info!(command_type, bytes = data.len(), "control message received");
        }
    });
    engine.on_hub_rotated_keys(|event| {
        if let SensorEvent::HubRotatedKeys { valid_from } = event {
            info!(valid_from, "hub rotated keys");
        }
    });

    let policy = DiscoveryPolicy {
        per_attempt_timeout: Duration::from_secs(config.discovery_timeout_secs),
        max_attempts: config.discovery_max_retries,
        retry_initial: Duration::from_secs(config.discovery_retry_initial_secs),
        retry_max: Duration::from_secs(config.discovery_retry_max_secs),
        ..DiscoveryPolicy::default()
    };

    if no_auto_join {
        let hubs = engine.discover(&policy).await.context("discovery failed")?;
        for found in hubs {
            println!("{:08X} at {} ({})", found.hub_id, found.address, found.capabilities);
        }
        return Ok(());
    }

    engine.connect(id.0, &policy, hub).await.context("joining hub failed")?;
    info!(sensor_id = %id, "joined hub");

    let continuous = engine.clone();
    tokio::spawn(async move {
        let _ = continuous
            .run_continuous_discovery(
                Duration::from_secs(config.continuous_discovery_interval_secs),
                Duration::from_secs(config.continuous_discovery_timeout_secs),
            )
            .await;
    });

    let receiver = engine.clone();
    tokio::spawn(async move {
        loop {
            match transport.recv().await {
                Ok((bytes, _src)) => receiver.handle_datagram(&bytes).await,
                Err(e) => {
                    tracing::warn!(%e, "transport recv failed, sensor receive loop exiting");
                    break;
                }
            }
        }
    });

    match data {
        Some(path) => {
            let mut tick = tokio::time::interval(Duration::from_secs(interval));
            loop {
                tick.tick().await;
                let bytes = std::fs::read(&path).with_context(|| format!("reading {path:?}"))?;
                engine.send_event(0x00, bytes).await.context("sending event report")?;
            }
        }
        None => loop {
            tokio::time::sleep(Duration::from_secs(interval)).await;
        },
    }
}

async fn discover(timeout: u64) -> Result<()> {
    let config = EngineConfig::load(ConfigOverrides::default());
    shdc_common::logging::init(&config.log);

    let keystore = Arc::new(
        KeyStore::open(&config.key_dir, shdc_common::constants::UNASSIGNED_DEVICE_ID)
            .context("opening scratch key store for discovery")?,
    );
    let identity = keystore.generate_device_keys(false).context("generating scratch identity keypair")?;
    let transport =
        Arc::new(UdpTransport::bind("0.0.0.0", 0).await.context("binding ephemeral UDP transport for discovery")?);
    let clock = Arc::new(SystemClock);
    let engine = SensorEngine::new("discovery-probe".to_string(), identity, keystore, transport, clock);

    let policy = DiscoveryPolicy { per_attempt_timeout: Duration::from_secs(timeout), max_attempts: 1, ..DiscoveryPolicy::default() };
    let hubs = engine.discover(&policy).await.context("discovery failed")?;
    if hubs.is_empty() {
        println!("no hubs found");
    }
    for hub in hubs {
        println!("{:08X} at {} ({})", hub.hub_id, hub.address, hub.capabilities);
    }
    Ok(())
}

fn status(id: DeviceId) -> Result<()> {
    let config = EngineConfig::load(ConfigOverrides::default());
    let keystore =
        KeyStore::open(&config.key_dir, id.0).with_context(|| format!("opening key store under {:?}", config.key_dir))?;

    println!("sensor {id}");
    match keystore.device_public_key() {
        Some(pubkey) => {
            let fp = fingerprint(id.0, &pubkey, "sensor");
            println!("  public key   : {}", hex::encode(pubkey));
            println!("  fingerprint  : {}", hex::encode(fp));
        }
        None => println!("  no identity keypair generated yet"),
    }

    let mut keys = keystore.list_keys();
    keys.sort_by(|a, b| a.key_id.cmp(&b.key_id));
    println!("  keys ({}):", keys.len());
    for key in keys {
        println!("    {:<24} {:?} created_at={}", key.key_id, key.key_type, key.created_at);
    }
    Ok(())
}
