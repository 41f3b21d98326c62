//! `shdc-hub`: the hub-role daemon CLI (spec §6).

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use shdc_common::constants::SHDC_MULTICAST_IP;
use shdc_common::device_id::{parse_device_id, DeviceId};
use shdc_common::{ConfigOverrides, EngineConfig, SystemClock};
use shdc_crypto::fingerprint;
use shdc_keystore::KeyStore;
use shdc_protocol::{HubEngine, HubEvent};
use shdc_transport::UdpTransport;
use tracing::info;

#[derive(Parser)]
#[command(name = "shdc-hub", about = "Smart Home Device Communications hub daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the hub and serve discovery, join, event, and rotation traffic.
    Run {
        #[arg(value_parser = parse_device_id)]
        id: DeviceId,
        #[arg(long)]
        interface: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        debug: bool,
    },
    /// Report this hub's identity and key store contents.
    Status {
        #[arg(value_parser = parse_device_id)]
        id: DeviceId,
    },
    /// Delete this hub's persisted keys, forcing regeneration on next run.
    ResetKeys {
        #[arg(value_parser = parse_device_id)]
        id: DeviceId,
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { id, interface, port, debug } => run(id, interface, port, debug).await,
        Command::Status { id } => status(id),
        Command::ResetKeys { id, yes } => reset_keys(id, yes),
    }
}

async fn run(id: DeviceId, interface: Option<String>, port: Option<u16>, debug: bool) -> Result<()> {
    let overrides = ConfigOverrides {
        port,
        interface,
        key_dir: None,
        log: debug.then(|| "debug".to_string()),
    };
    let config = EngineConfig::load(overrides);
    shdc_common::logging::init(&config.log);

    let keystore = Arc::new(
        KeyStore::open(&config.key_dir, id.0).with_context(|| format!("opening key store under {:?}", config.key_dir))?,
    );
    let identity = keystore.generate_device_keys(false).context("loading or generating hub identity keypair")?;

    let transport = Arc::new(
        UdpTransport::bind(&config.bind_address, config.port)
            .await
            .with_context(|| format!("binding UDP transport on {}:{}", config.bind_address, config.port))?,
    );
    let multicast_group: Ipv4Addr = SHDC_MULTICAST_IP.parse().expect("constant is a valid IPv4 address");
    let interface_addr = config.interface.as_deref().and_then(|s| s.parse().ok());
    transport
        .join_multicast(multicast_group, interface_addr)
        .context("joining discovery multicast group")?;

    let clock = Arc::new(SystemClock);
    let engine = HubEngine::new(id.0, identity, "v1.0".to_string(), keystore.clone(), transport, clock)
        .context("initializing hub engine")?;

    engine.on_device_joined(|event| {
        if let HubEvent::DeviceJoined { device_id } = event {
            info!(sensor_id = %format!("{device_id:08X}"), "sensor joined");
        }
    });
    engine.on_device_left(|event| {
        if let HubEvent::DeviceLeft { device_id } = event {
            info!(sensor_id = %format!("{device_id:08X}"), "sensor left");
        }
    });
    engine.on_sensor_data(|event| {
        if let HubEvent::SensorData { sender_id, event_type, data } = event {
            info!(sender_id = %format!("{sender_id:08X}"), event_type, bytes = data.len(), "sensor data received");
        }
    });
    engine.on_status_request(|event| {
        if let HubEvent::StatusRequest { device_id } = event {
            info!(device_id = %format!("{device_id:08X}"), "status requested");
        }
    });

    let maintenance_keystore = keystore.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            maintenance_keystore.cleanup_expired_keys();
        }
    });

    info!(hub_id = %format!("{:08X}", id.0), port = config.port, "hub running");
    engine.run().await.context("hub engine exited")?;
    Ok(())
}

fn status(id: DeviceId) -> Result<()> {
    let config = EngineConfig::load(ConfigOverrides::default());
    let keystore =
        KeyStore::open(&config.key_dir, id.0).with_context(|| format!("opening key store under {:?}", config.key_dir))?;

    println!("hub {id}");
    match keystore.device_public_key() {
        Some(pubkey) => {
            let fp = fingerprint(id.0, &pubkey, "hub");
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

fn reset_keys(id: DeviceId, yes: bool) -> Result<()> {
    let config = EngineConfig::load(ConfigOverrides::default());
    let device_dir: PathBuf = config.key_dir.join(format!("{:08X}", id.0));

    if !device_dir.exists() {
        println!("no keys found for {id}");
        return Ok(());
    }

    if !yes {
        print!("This deletes every key for hub {id}. Continue? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush().ok();
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer).context("reading confirmation")?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            bail!("aborted");
        }
    }

    std::fs::remove_dir_all(&device_dir).with_context(|| format!("removing {device_dir:?}"))?;
    println!("removed all keys for {id}");
    Ok(())
}
