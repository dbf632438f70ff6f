mod capture;

use std::{path::PathBuf, time::Duration};

use bellrig_core::{
    dmx, AppConfig, BellRigError, ChannelSink, DmxTransmitter, Orchestrator, ShutdownFlag,
    StateSnapshot,
};
use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing_subscriber::EnvFilter;

fn main() -> bellrig_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            port,
            device,
        } => run(config, port, device),
        Commands::ListPorts => list_ports(),
    }
}

fn run(
    config_path: Option<PathBuf>,
    port: Option<String>,
    device: Option<String>,
) -> bellrig_core::Result<()> {
    let mut config = match &config_path {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    if port.is_some() {
        config.dmx.port = port;
    }
    if device.is_some() {
        config.audio.input_device = device;
    }
    config.validate()?;

    let port = match config.dmx.port.clone() {
        Some(port) => port,
        None => dmx::detect_port()?,
    };
    tracing::info!(port = %port, baud = config.dmx.baud_rate, "opening dmx link");
    let transmitter = DmxTransmitter::open(&port, config.dmx.baud_rate)?;

    let (sink, snapshots) = ChannelSink::new(64);
    let orchestrator = Orchestrator::new(&config, Box::new(sink))?;
    let shutdown = orchestrator.shutdown_flag();
    let transmit = orchestrator.spawn_transmit_loop(transmitter, config.dmx.refresh_rate_hz);

    // Ctrl-C requests the same cooperative shutdown both loops observe, so
    // the rig winds down cleanly instead of dying mid-serial-write.
    let interrupt = shutdown.clone();
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received, shutting down");
        interrupt.request();
    })
    .map_err(|err| BellRigError::config(format!("cannot install interrupt handler: {err}")))?;

    // The stream must stay alive for capture to keep running.
    let _stream = capture::start(&config.audio, orchestrator, shutdown.clone())?;
    tracing::info!("listening for bells");

    log_snapshots_until_shutdown(&snapshots, &shutdown);

    shutdown.request();
    if transmit.join().is_err() {
        tracing::warn!("transmit loop panicked during shutdown");
    }
    Ok(())
}

/// Logs state snapshots until shutdown is requested or every publisher is
/// gone. Polls the flag between receives so an interrupt ends the run even
/// while the capture side keeps the channel open.
fn log_snapshots_until_shutdown(snapshots: &Receiver<StateSnapshot>, shutdown: &ShutdownFlag) {
    while !shutdown.is_requested() {
        match snapshots.recv_timeout(Duration::from_millis(500)) {
            Ok(snapshot) => tracing::debug!(
                scene = ?snapshot.scenes.current_scene,
                idle = snapshot.scenes.idle,
                dings = snapshot.audio_reactive.ding_count,
                "state"
            ),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn list_ports() -> bellrig_core::Result<()> {
    let ports = dmx::list_ports()?;
    if ports.is_empty() {
        println!("no serial devices found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Bell-triggered DMX lighting rig", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the rig: capture audio, detect bells, drive the lights.
    Run {
        /// Optional JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Serial device for the DMX adapter; auto-detected when omitted.
        #[arg(short, long)]
        port: Option<String>,
        /// Audio input device name; the host default when omitted.
        #[arg(short, long)]
        device: Option<String>,
    },
    /// List the serial devices visible to the process.
    ListPorts,
}
