//! RNET client entry point.
//!
//! Loads the configuration, opens a session to the bus, and logs every frame
//! that crosses it until Ctrl-C.  Optionally reads a few paths at startup.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config() + CLI overrides
//!  └─ Session::start()           -- opens TCP or serial transport
//!  └─ startup reads (--read)     -- Session::read_path
//!  └─ event loop
//!       ├─ SessionEvent::*          -> tracing
//!       ├─ session fell to Stopped  -> restart after a delay
//!       └─ Ctrl-C                   -> Session::stop()
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use rnet_client::infrastructure::config::{
    default_config_path, load_config, save_config, ClientConfig, TransportKind,
};
use rnet_client::{Connection, Session, SessionEvent, SessionState};
use rnet_core::{DeviceAddress, Path};

/// Delay before restarting a session that stopped on a transport fault.
const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Command-line options.  Anything given here overrides the config file.
#[derive(Debug, Parser)]
#[command(name = "rnet-client", version, about = "Russound RNET bus client")]
struct Args {
    /// Config file; defaults to the platform config directory.
    #[arg(long, env = "RNET_CONFIG")]
    config: Option<PathBuf>,

    /// TCP host of the controller or serial bridge.
    #[arg(long, conflicts_with = "serial")]
    host: Option<String>,

    /// TCP port of the controller or serial bridge.
    #[arg(long)]
    port: Option<u16>,

    /// Serial device, e.g. /dev/ttyUSB0 or COM3.
    #[arg(long)]
    serial: Option<String>,

    /// Serial line speed.
    #[arg(long)]
    baud: Option<u32>,

    /// Log level used when RUST_LOG is unset.
    #[arg(long)]
    log_level: Option<String>,

    /// Controller addressed by --read.
    #[arg(long, default_value_t = 0)]
    controller: u8,

    /// Path to read once connected, dotted (e.g. 2.0.0.7).  Repeatable.
    #[arg(long = "read", value_parser = parse_path)]
    reads: Vec<Path>,

    /// Write the effective configuration back to the config file and exit.
    #[arg(long)]
    save_config: bool,
}

fn parse_path(text: &str) -> Result<Path, String> {
    let elements = if text.is_empty() {
        Vec::new()
    } else {
        text.split('.')
            .map(|part| part.parse::<u8>().map_err(|e| format!("{part:?}: {e}")))
            .collect::<Result<Vec<_>, _>>()?
    };
    Path::new(elements).map_err(|e| e.to_string())
}

fn apply_overrides(config: &mut ClientConfig, args: &Args) {
    if let Some(host) = &args.host {
        config.connection.transport = TransportKind::Tcp;
        config.connection.host = host.clone();
    }
    if let Some(port) = args.port {
        config.connection.port = port;
    }
    if let Some(serial) = &args.serial {
        config.connection.transport = TransportKind::Serial;
        config.connection.serial_port = serial.clone();
    }
    if let Some(baud) = args.baud {
        config.connection.baud_rate = baud;
    }
    if let Some(level) = &args.log_level {
        config.client.log_level = level.clone();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path().context("locating config file")?,
    };
    let mut config = load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    apply_overrides(&mut config, &args);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.client.log_level)),
        )
        .init();

    if args.save_config {
        save_config(&config, &config_path)
            .with_context(|| format!("saving {}", config_path.display()))?;
        info!("configuration written to {}", config_path.display());
        return Ok(());
    }

    let connection = Connection::new(config.connection.build_transport());
    let session = Session::new(connection, config.session_config());
    info!("RNET client starting as {}", session.config().local_address);

    let mut events = session.events();
    session.start().await.context("starting session")?;

    let controller = DeviceAddress::controller(args.controller);
    for path in &args.reads {
        match session.read_path(controller, path, true).await {
            Ok(value) => info!(%controller, %path, "value: {:02X?}", &value[..]),
            Err(e) => warn!(%controller, %path, "read failed: {e}"),
        }
    }

    let mut states = session.watch_state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => warn!("event log lagged, {n} events skipped"),
                Err(RecvError::Closed) => break,
            },
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                if *states.borrow_and_update() == SessionState::Stopped {
                    warn!("session stopped unexpectedly; restarting in {RESTART_DELAY:?}");
                    tokio::time::sleep(RESTART_DELAY).await;
                    if let Err(e) = session.start().await {
                        error!("restart failed: {e}");
                    }
                }
            }
        }
    }

    session.stop().await;
    info!("RNET client stopped");
    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::MessageReceived(env) => debug!(
            source = %env.source,
            target = %env.target,
            "<- {:?}",
            env.message
        ),
        SessionEvent::MessageSent(env) => debug!(target = %env.target, "-> {:?}", env.message),
        SessionEvent::ConnectionStateChanged(state) => info!("connection {state}"),
        SessionEvent::SessionStateChanged(state) => debug!("session {state}"),
        SessionEvent::ProtocolError(issue) => warn!("protocol error: {issue}"),
    }
}
