// src/main.rs - Device host with simulated producers and motion driver
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::sync::{broadcast, watch};

use stroke_rs::command::{Command, CommandAction, CommandPayload, CommandStream, ParameterKind};
use stroke_rs::config::{self, Config};
use stroke_rs::device::Device;
use stroke_rs::simulator::SimulatedDriver;
use stroke_rs::state::{DeviceState, DeviceStatus};

/// Linear actuator control host
#[derive(Parser, Debug)]
#[command(name = "stroke-host", about = "Runs the actuator control core against a simulated driver.")]
struct Args {
    /// Path to a TOML config file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level: trace, debug, info, warn or error
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    seconds: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    let level = args.log_level.parse::<tracing::Level>().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    tracing::info!("Starting stroke-host");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            config::load_config(path).map_err(|e| {
                tracing::error!("Failed to load config from '{}': {}", path, e);
                Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
            })?
        }
        None => Config::default(),
    };
    tracing::info!(
        "Homing: {:?}, stroke {}..{} mm",
        config.device.homing_method,
        config.driver.min_stroke_mm,
        config.driver.max_stroke_mm
    );

    let driver = SimulatedDriver::from_config(&config.driver)
        .with_auto_homing(150, config.driver.max_stroke_steps())
        .with_homing_jitter(20);
    let mut device = Device::new(config, driver)?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    tokio::spawn(remote_producer(
        device.stream(),
        device.subscribe_status(),
        shutdown_tx.subscribe(),
    ));
    tokio::spawn(ble_producer(
        device.stream(),
        device.subscribe_status(),
        shutdown_tx.subscribe(),
    ));
    tokio::spawn(log_reports(device.subscribe_reports(), shutdown_tx.subscribe()));

    let signal_tx = shutdown_tx.clone();
    let seconds = args.seconds;
    tokio::spawn(async move {
        match seconds {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                }
            }
        }
        let _ = signal_tx.send(());
    });

    device.start_session(uuid::Uuid::new_v4().to_string());
    device.run(shutdown_tx.subscribe()).await;

    // Bring the actuator to rest before exiting.
    device.stream().enqueue(Command::bare("shutdown-stop", CommandAction::StopPlay));
    device.run_cycle(Instant::now());

    if let Some(batch) = device.drain_telemetry() {
        match batch.to_json() {
            Ok(json) => tracing::debug!("Telemetry batch: {}", json),
            Err(e) => tracing::warn!("Failed to encode telemetry: {}", e),
        }
        tracing::info!("Telemetry: {} samples pending upload", batch.data.len());
    }

    let summary = device.end_session();
    tracing::info!(
        "Session complete: {} strokes, {:.1} mm travelled, final state {}",
        summary.statistics.strokes_total,
        summary.statistics.distance_in_millimeters,
        device.state()
    );
    Ok(())
}

async fn wait_for_state(status: &mut watch::Receiver<DeviceStatus>, state: DeviceState) -> bool {
    status.wait_for(|s| s.state == state).await.is_ok()
}

fn parameter(id: String, kind: ParameterKind, value: f64) -> Command {
    Command::new(id, CommandAction::SetParameter, CommandPayload::new(kind, value))
}

/// Stands in for the wireless remote: sets up a stroke and keeps nudging speed.
async fn remote_producer(
    stream: CommandStream,
    mut status: watch::Receiver<DeviceStatus>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::select! {
        _ = shutdown.recv() => return,
        ready = wait_for_state(&mut status, DeviceState::Idle) => {
            if !ready {
                return;
            }
        }
    }

    stream.enqueue(parameter("remote-stroke".into(), ParameterKind::Stroke, 60.0));
    stream.enqueue(parameter("remote-depth".into(), ParameterKind::Depth, 80.0));
    stream.enqueue(parameter("remote-speed".into(), ParameterKind::Speed, 40.0));
    stream.enqueue(Command::new(
        "remote-pattern",
        CommandAction::SetPattern,
        CommandPayload::new(ParameterKind::Pattern, 2.0),
    ));
    stream.enqueue(Command::bare("remote-confirm", CommandAction::ConfirmStart));
    stream.enqueue(Command::bare("remote-start", CommandAction::StartPlay));

    let mut interval = tokio::time::interval(Duration::from_secs(2));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut sequence = 0u64;
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("Remote producer shutting down");
                break;
            }
            _ = interval.tick() => {
                sequence += 1;
                let speed = 30.0 + rand::random::<f64>() * 40.0;
                stream.enqueue(parameter(format!("remote-speed-{}", sequence), ParameterKind::Speed, speed));
            }
        }
    }
}

/// Stands in for the BLE app: subscribes to position telemetry and polls settings.
async fn ble_producer(
    stream: CommandStream,
    mut status: watch::Receiver<DeviceStatus>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::select! {
        _ = shutdown.recv() => return,
        playing = wait_for_state(&mut status, DeviceState::Playing) => {
            if !playing {
                return;
            }
        }
    }

    stream.enqueue(Command::new(
        "ble-stream-position",
        CommandAction::StreamOutParameter,
        CommandPayload::new(ParameterKind::Position, 1.0),
    ));

    let mut interval = tokio::time::interval(Duration::from_millis(500));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut sequence = 0u64;
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("BLE producer shutting down");
                break;
            }
            _ = interval.tick() => {
                sequence += 1;
                stream.enqueue(Command::new(
                    format!("ble-get-{}", sequence),
                    CommandAction::GetParameter,
                    CommandPayload::new(ParameterKind::Speed, 0.0),
                ));
            }
        }
    }
}

async fn log_reports(
    mut reports: broadcast::Receiver<stroke_rs::device::CommandReport>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            report = reports.recv() => match report {
                Ok(report) => match &report.outcome {
                    Ok(handled) => tracing::debug!("{} '{}': {:?}", report.action, report.id, handled),
                    Err(rejection) => tracing::warn!("'{}' {}", report.id, rejection),
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Report log fell behind, {} reports skipped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
