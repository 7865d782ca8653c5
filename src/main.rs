//! CC Bridge - command-line host
//!
//! Opens a MIDI input, ticks one CC engine at a fixed rate and prints the
//! resulting control voltages.

use anyhow::Result;
use clap::Parser;
use colored::*;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cc_bridge::config::{BridgeConfig, ConfigWatcher};
use cc_bridge::engine::{CcEngine, ChannelFilter, PortSelection};
use cc_bridge::host::{
    self as scheduler, demo_transport, find_input_port, spawn_demo_feed, Host, DEMO_DEVICE,
};
use cc_bridge::persistence::StateSnapshot;
use cc_bridge::transport::{MidiSystem, MidiTransport};

/// CC Bridge - republish MIDI CC values as control voltages
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "cc-bridge.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    /// Input port (descriptive name or substring), overrides config
    #[arg(short, long)]
    port: Option<String>,

    /// MIDI channel 1-16, overrides config
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=16))]
    channel: Option<u8>,

    /// First watched CC number, overrides config
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=126))]
    first_cc: Option<u8>,

    /// Use a built-in controller that sweeps every watched CC
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("Starting CC Bridge...");

    let (config, watcher) = load_config(&args.config).await?;

    let transport: Arc<dyn MidiTransport> = if args.demo {
        let transport = demo_transport();
        spawn_demo_feed(
            transport.clone(),
            args.first_cc.unwrap_or(config.midi.first_cc),
            0,
        );
        Arc::new(transport)
    } else {
        MidiSystem::global()?
    };

    if args.list_ports {
        list_ports_formatted(transport.as_ref());
        return Ok(());
    }

    let engine = CcEngine::with_offset_policy(transport, config.midi.offset_policy);
    let mut host = Host::new(engine, &config.host);

    let state_file = config.host.state_file.clone();
    let restored = match &state_file {
        Some(path) if Path::new(path).exists() => match StateSnapshot::load_from_file(path).await {
            Ok(snapshot) => {
                snapshot.restore(host.engine_mut());
                info!("Settings restored from {}", path);
                true
            }
            Err(e) => {
                warn!("Failed to restore settings: {:#}", e);
                false
            }
        },
        _ => false,
    };

    if !restored || args.demo {
        let mut midi_config = config.midi.clone();
        if args.demo {
            midi_config.port = Some(DEMO_DEVICE.to_string());
        }
        host.apply_midi_config(&midi_config);
    }
    apply_overrides(&mut host, &args);

    if host.engine().port() == PortSelection::None {
        warn!("No MIDI input open; outputs will hold their values");
    }

    scheduler::run(&mut host, config.host.tick_hz, watcher, shutdown_signal()).await?;

    if let Err(e) = host.save_state(state_file.as_deref()).await {
        warn!("Failed to save settings: {:#}", e);
    }

    info!("CC Bridge shutdown complete");
    Ok(())
}

/// Load the config file with hot reload, or fall back to defaults
async fn load_config(path: &str) -> Result<(BridgeConfig, Option<ConfigWatcher>)> {
    if !Path::new(path).exists() {
        info!("Configuration file {} not found, using defaults", path);
        return Ok((BridgeConfig::default(), None));
    }

    let (watcher, config) = ConfigWatcher::new(path.to_string()).await?;
    info!("Configuration loaded from {} with hot-reload enabled", path);
    Ok((config, Some(watcher)))
}

fn apply_overrides(host: &mut Host, args: &Args) {
    let engine = host.engine_mut();

    if let Some(pattern) = &args.port {
        match find_input_port(&engine.list_ports(), pattern) {
            Some(index) => {
                let _ = engine.set_port(PortSelection::Index(index));
            }
            None => warn!("No MIDI input matching '{}'", pattern),
        }
    }
    if let Some(channel) = args.channel {
        if let Err(e) = engine.set_channel(ChannelFilter::Channel(channel - 1)) {
            warn!("Ignoring --channel: {}", e);
        }
    }
    if let Some(first_cc) = args.first_cc {
        if let Err(e) = engine.set_first_cc(first_cc) {
            warn!("Ignoring --first-cc: {}", e);
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// List all ports in a formatted way
fn list_ports_formatted(transport: &dyn MidiTransport) {
    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());

    match transport.enumerate_ports() {
        Ok(ports) if ports.is_empty() => {
            println!("  {}", "No MIDI devices found".dimmed());
        }
        Ok(ports) => {
            for port in ports {
                let marker = if port.is_input() {
                    "[INPUT] ".green()
                } else {
                    "[OUTPUT]".yellow()
                };
                println!("  {:>3} {} {}", port.index, marker, port.descriptive_name());
            }
        }
        Err(e) => {
            println!("  {} {}", "Failed to enumerate ports:".red(), e);
        }
    }

    println!();
}
