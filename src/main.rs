//! Host demo binary — runs a small simulated mesh on one machine, one
//! thread per node, all sharing a [`SimChannel`] in place of a radio.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     SimChannel (shared medium)              │
//! │                                                              │
//! │   node 0 (master)      node 1        node 2      ...        │
//! │   MacContext<Sim,Host> MacContext    MacContext             │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Not a deployment target — a real node supplies its own
//! `Transceiver`/`PowerManager` pair and drives `MacContext::run_forever`
//! directly; this binary exists to exercise the whole stack end to end
//! without hardware.

use std::env;
use std::fs;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use log::info;

use tdma_mac::adapters::SimChannel;
use tdma_mac::config::NetworkConfiguration;
use tdma_mac::keymanager::KeyManager;
use tdma_mac::mac::MacContext;
use tdma_mac::power::HostPowerManager;
use tdma_mac::stream::manager::StreamManager;

/// Host demo parameters not part of [`NetworkConfiguration`] — number of
/// simulated nodes, how many tiles to run, and the medium's link quality.
struct DemoArgs {
    config_path: Option<String>,
    node_count: u16,
    tiles: u32,
    propagation_delay_ns: i64,
    loss_probability: f64,
}

fn parse_args() -> DemoArgs {
    let mut args = DemoArgs {
        config_path: None,
        node_count: 4,
        tiles: 500,
        propagation_delay_ns: 50_000,
        loss_probability: 0.0,
    };
    let mut it = env::args().skip(1);
    while let Some(flag) = it.next() {
        match flag.as_str() {
            "--config" => args.config_path = it.next(),
            "--nodes" => args.node_count = it.next().and_then(|v| v.parse().ok()).unwrap_or(args.node_count),
            "--tiles" => args.tiles = it.next().and_then(|v| v.parse().ok()).unwrap_or(args.tiles),
            "--loss" => args.loss_probability = it.next().and_then(|v| v.parse().ok()).unwrap_or(0.0),
            _ => {}
        }
    }
    args
}

fn load_config(path: Option<&str>) -> Result<NetworkConfiguration> {
    match path {
        Some(p) => {
            let text = fs::read_to_string(p).with_context(|| format!("reading config file {p}"))?;
            let cfg: NetworkConfiguration = serde_json::from_str(&text).with_context(|| format!("parsing config file {p}"))?;
            cfg.validate()?;
            Ok(cfg)
        }
        None => Ok(NetworkConfiguration::default()),
    }
}

fn main() -> Result<()> {
    env_logger::init();

    info!(
        "tdma-mac host demo v{} (built {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("BUILD_TIMESTAMP").unwrap_or("unknown")
    );

    let args = parse_args();
    let mut config = load_config(args.config_path.as_deref())?;
    config.max_nodes = config.max_nodes.max(args.node_count);

    info!(
        "starting {} simulated node(s), {} tiles, {:.1}% loss",
        args.node_count,
        args.tiles,
        args.loss_probability * 100.0
    );

    let channel = SimChannel::new(42, args.propagation_delay_ns, args.loss_probability);

    let handles: Vec<_> = (0..args.node_count)
        .map(|node_id| {
            let config = config.clone();
            let transceiver = channel.transceiver_for(node_id as u8);
            thread::Builder::new()
                .name(format!("node-{node_id}"))
                .spawn(move || run_node(node_id as u8, transceiver, config, args.tiles))
                .expect("spawn node thread")
        })
        .collect();

    for handle in handles {
        if let Err(e) = handle.join().expect("node thread panicked") {
            log::error!("node failed: {e}");
        }
    }

    Ok(())
}

fn run_node(
    node_id: u8,
    transceiver: tdma_mac::adapters::SimTransceiver,
    config: NetworkConfiguration,
    tiles: u32,
) -> Result<()> {
    let streams = Arc::new(StreamManager::new(node_id, &config));
    let key_manager = if config.authenticate_control || config.authenticate_data {
        Some(KeyManager::new([0u8; 32]))
    } else {
        None
    };
    let power = HostPowerManager::new();
    let mut ctx = MacContext::new(transceiver, power, config, node_id, streams, key_manager)?;

    for _ in 0..tiles {
        ctx.run_tile()?;
    }

    let snapshot = ctx.diagnostics().snapshot();
    info!(
        "node {node_id}: {} tiles, {} missed timesyncs, {} crc/auth failures, status={:?}",
        snapshot.tiles_run,
        snapshot.missed_timesyncs,
        snapshot.crc_or_auth_failures,
        ctx.status()
    );
    Ok(())
}
