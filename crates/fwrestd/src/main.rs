//! fwrestd - Firmware REST daemon
//!
//! Serves the device control plane (raw flash, OTA, file store, pin and log
//! configuration) over a simulated device.
//!
//! Usage:
//!   fwrestd [OPTIONS] [config.toml]
//!
//! Options:
//!   --json    Log JSON lines instead of human-readable text
//!
//! Without a config file every setting takes its default.

mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use fwrest_api::{create_router, AppState, Collaborators, LogSettings};
use fwrest_core::{FileStore, FlashDevice};
use fwrest_sim::{AbPartitions, DirStore, MemChannels, MemPins, ResetNotifier, SimConsole, SimFlash};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, DestinationKind};

/// Parsed command-line arguments
struct Args {
    /// Daemon config file (TOML)
    config_path: Option<String>,
    /// Force JSON log output
    json: bool,
}

fn parse_args() -> Args {
    let mut result = Args {
        config_path: None,
        json: false,
    };

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--json" => result.json = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => {
                // Positional argument = config file
                result.config_path = Some(arg.to_string());
            }
            other => eprintln!("Unknown argument: {}", other),
        }
    }

    result
}

fn print_help() {
    eprintln!(
        r#"fwrestd - Firmware REST daemon

Usage: fwrestd [OPTIONS] [config.toml]

Options:
      --json    Log JSON lines instead of human-readable text
  -h, --help    Print this help message

Examples:
  # Simulated device with default layout, files under ./lfs
  fwrestd

  # Run with config file
  fwrestd device.toml
"#
    );
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fwrestd=info,fwrest_api=info,fwrest_core=debug,fwrest_sim=info".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

/// Simulated hardware behind the API
struct Device {
    collaborators: Collaborators,
    partitions: Option<Arc<AbPartitions>>,
    reset: ResetNotifier,
}

fn build_device(config: &Config) -> anyhow::Result<Device> {
    let flash: Arc<dyn FlashDevice> = match &config.flash.image {
        Some(path) => Arc::new(
            SimFlash::open(path, config.flash.capacity, config.flash.erase_size)
                .with_context(|| format!("opening flash image {}", path.display()))?,
        ),
        None => Arc::new(SimFlash::new(config.flash.capacity, config.flash.erase_size)),
    };

    let store = Arc::new(DirStore::new(&config.lfs.root));
    if let Err(e) = store.mount(false) {
        tracing::info!(
            root = %config.lfs.root.display(),
            error = %e,
            "file store not mounted, it is created by the first upload"
        );
    }

    let reset = ResetNotifier::new();
    let channels = Arc::new(MemChannels::new(config.device.channel_count));
    let console = Arc::new(SimConsole::new(channels.clone(), Arc::new(reset.clone())));
    let pins = Arc::new(MemPins::new(config.device.gpio_count).with_console(console.clone()));

    let partitions = match config.ota.destination {
        DestinationKind::PartitionTable => Some(Arc::new(config.partitions.build()?)),
        DestinationKind::Region => None,
    };

    Ok(Device {
        collaborators: Collaborators {
            flash,
            store,
            pins,
            channels,
            commands: console,
            reset: Arc::new(reset.clone()),
        },
        partitions,
        reset,
    })
}

async fn shutdown_signal(reset: ResetNotifier) {
    tokio::select! {
        _ = reset.wait() => tracing::info!("Device reset, shutting down"),
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Interrupted, shutting down"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for ctrl-c"),
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();

    let config = match &args.config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    init_tracing(args.json || config.log.json);
    tracing::info!("Starting fwrestd (firmware REST daemon)");
    match &args.config_path {
        Some(path) => tracing::info!("Loaded config from: {}", path),
        None => tracing::info!("No config file provided, using defaults"),
    }

    let device = build_device(&config)?;
    let settings = config.api_settings(device.partitions.clone())?;
    tracing::info!(
        format = settings.ota.format.name(),
        destination = ?settings.ota.destination,
        capacity = format_args!("0x{:06X}", config.flash.capacity),
        "Device ready"
    );

    let log = Arc::new(LogSettings::new(config.log.level, config.log.features));
    let state = AppState::new(device.collaborators, settings, log);
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(device.reset.clone()))
        .await?;

    if let Some(partitions) = &device.partitions {
        partitions.reboot();
        tracing::info!(active = partitions.active(), "Boot slot after reset");
    }

    Ok(())
}
