// src/device.rs - Control loop owning the stream consumer, state machine and session accounting
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{broadcast, watch};

use crate::command::{Command, CommandAction, CommandStream, ParameterKind};
use crate::config::{Config, ConfigError};
use crate::motion::MotionDriver;
use crate::session::{PositionBuffer, SessionStatistics, SessionStatisticsTracker, SessionSummary, TelemetryBatch};
use crate::state::{DeviceState, DeviceStateMachine, DeviceStatus, Handled, Rejection};
use crate::watchdog::StateWatchdog;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Outcome of one handled command, keyed by the producer's correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReport {
    pub id: String,
    pub action: CommandAction,
    pub outcome: Result<Handled, Rejection>,
}

const REPORT_CHANNEL_CAPACITY: usize = 64;

pub struct Device<D: MotionDriver> {
    config: Config,
    stream: CommandStream,
    machine: DeviceStateMachine,
    tracker: SessionStatisticsTracker,
    telemetry: PositionBuffer,
    watchdog: StateWatchdog,
    driver: D,
    reports_tx: broadcast::Sender<CommandReport>,
    steps_per_mm: f64,
    sample_interval: Duration,
    last_sample: Option<Instant>,
    session_started: Option<Instant>,
}

impl<D: MotionDriver> Device<D> {
    pub fn new(config: Config, driver: D) -> Result<Self, DeviceError> {
        config.validate()?;
        let steps_per_mm = config.driver.steps_per_mm();
        let (reports_tx, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        tracing::info!(
            "Device {} ready: {} ms cycle, {:.2} steps/mm",
            config.device.device_id.as_deref().unwrap_or("<unnamed>"),
            config.device.control_cycle_ms,
            steps_per_mm
        );
        Ok(Self {
            stream: CommandStream::new(),
            machine: DeviceStateMachine::from_config(&config),
            tracker: SessionStatisticsTracker::new(steps_per_mm),
            telemetry: PositionBuffer::new(config.telemetry.buffer_capacity),
            watchdog: StateWatchdog::from_config(&config.device),
            driver,
            reports_tx,
            steps_per_mm,
            sample_interval: Duration::from_millis(config.telemetry.sample_interval_ms),
            last_sample: None,
            session_started: None,
            config,
        })
    }

    /// Producer handle onto this device's command stream.
    pub fn stream(&self) -> CommandStream {
        self.stream.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> DeviceState {
        self.machine.state()
    }

    pub fn status(&self) -> DeviceStatus {
        self.machine.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<DeviceStatus> {
        self.machine.subscribe()
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<CommandReport> {
        self.reports_tx.subscribe()
    }

    pub fn machine(&self) -> &DeviceStateMachine {
        &self.machine
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn statistics(&self) -> SessionStatistics {
        self.tracker.statistics()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.tracker.session_id()
    }

    /// Queue the synthetic fault command. Takes the ordinary admission path.
    pub fn report_driver_fault(&self) {
        tracing::error!("Motor driver reported a fault");
        self.stream.enqueue(synthetic(CommandAction::DriverFault));
    }

    pub fn start_session(&mut self, session_id: impl Into<String>) {
        self.tracker.start_session(session_id);
        self.telemetry.clear();
        self.last_sample = None;
        self.session_started = Some(Instant::now());
    }

    pub fn end_session(&mut self) -> SessionSummary {
        self.session_started = None;
        self.tracker.end_session()
    }

    /// Hand off buffered position samples. `None` outside a session or when
    /// nothing was sampled.
    pub fn drain_telemetry(&mut self) -> Option<TelemetryBatch> {
        let session_id = self.tracker.session_id()?.to_string();
        if self.telemetry.is_empty() {
            return None;
        }
        Some(TelemetryBatch {
            device_id: self.config.device.device_id.clone(),
            session_id,
            data: self.telemetry.drain(),
        })
    }

    /// One control cycle. Handles at most one command; returns its report.
    pub fn run_cycle(&mut self, now: Instant) -> Option<CommandReport> {
        if let Some(action) = self.watchdog.check(self.machine.state(), now) {
            self.stream.enqueue(synthetic(action));
        }

        self.driver.service();
        if self.machine.poll(&mut self.driver).is_some() {
            self.watchdog.rearm();
        }

        let report = self.stream.get_next().map(|command| {
            let outcome = self.machine.handle(&command, &mut self.driver);
            if let Ok(Handled::Transitioned { .. }) = outcome {
                self.watchdog.rearm();
            }
            let report = CommandReport {
                id: command.id,
                action: command.action,
                outcome,
            };
            // No subscribers is fine.
            let _ = self.reports_tx.send(report.clone());
            self.stream.finish_current();
            report
        });

        if self.tracker.session_id().is_some() {
            let feedback = self.driver.feedback();
            self.tracker.update(feedback.current, feedback.target);
            self.sample_position(now, feedback.current);
        }

        report
    }

    fn sample_position(&mut self, now: Instant, current_steps: i32) {
        if self.machine.streaming_out() != Some(ParameterKind::Position) {
            return;
        }
        if let Some(last) = self.last_sample {
            if now.saturating_duration_since(last) < self.sample_interval {
                return;
            }
        }
        let Some(started) = self.session_started else {
            return;
        };
        self.last_sample = Some(now);
        let time_ms = now.saturating_duration_since(started).as_millis() as u64;
        let position_mm = current_steps.unsigned_abs() as f64 / self.steps_per_mm;
        self.telemetry.push(time_ms, position_mm);
    }

    /// Drive `run_cycle` at the configured period until shutdown is signalled.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) {
        let period = Duration::from_millis(self.config.device.control_cycle_ms);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!("Control loop running every {:?}", period);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Control loop shutting down");
                    break;
                }
                tick = interval.tick() => {
                    self.run_cycle(tick.into_std());
                }
            }
        }
    }
}

fn synthetic(action: CommandAction) -> Command {
    Command::bare(format!("internal-{}", uuid::Uuid::new_v4()), action)
}
