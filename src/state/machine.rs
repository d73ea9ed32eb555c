// src/state/machine.rs - Device lifecycle controller
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::context::{MachineContext, MachineLimits};
use super::transitions::{self, Effect, Refusal};
use super::{DeviceState, DeviceStatus, Handled, ParameterReading, Rejection};
use crate::command::{Command, CommandAction, CommandPayload, ParameterKind};
use crate::config::Config;
use crate::motion::{
    HomingCallback, HomingMethod, HomingOutcome, MotionDriver, MotionState, PlaySettings,
    SafetyBounds,
};

/// How many applied commands are remembered for retry suppression.
const RECENT_ID_CAPACITY: usize = 64;

/// A redelivery matches only when id, action and payload all agree.
#[derive(Debug, Clone, PartialEq)]
struct AppliedCommand {
    id: String,
    action: CommandAction,
    payload: CommandPayload,
}

impl AppliedCommand {
    fn matches(&self, command: &Command) -> bool {
        self.id == command.id && self.action == command.action && self.payload == command.payload
    }
}

type HomingSlot = Arc<Mutex<Option<HomingOutcome>>>;

pub struct DeviceStateMachine {
    state: DeviceState,
    context: MachineContext,
    homing_method: HomingMethod,
    /// Replaced on every homing entry so late callbacks from an abandoned
    /// run land in a slot nobody reads.
    homing_slot: Option<HomingSlot>,
    recent: VecDeque<AppliedCommand>,
    status_tx: watch::Sender<DeviceStatus>,
}

impl DeviceStateMachine {
    pub fn new(homing_method: HomingMethod, limits: MachineLimits) -> Self {
        let (status_tx, _) = watch::channel(DeviceStatus::default());
        tracing::info!("State machine created, homing method: {:?}", homing_method);
        Self {
            state: DeviceState::Booting,
            context: MachineContext::new(limits),
            homing_method,
            homing_slot: None,
            recent: VecDeque::with_capacity(RECENT_ID_CAPACITY),
            status_tx,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.device.homing_method, MachineLimits::from_config(config))
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn status(&self) -> DeviceStatus {
        self.status_tx.borrow().clone()
    }

    /// Receiver that observes every published status change.
    pub fn subscribe(&self) -> watch::Receiver<DeviceStatus> {
        self.status_tx.subscribe()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.context.error_message.as_deref()
    }

    pub fn is_homed(&self) -> bool {
        self.context.calibration.homed
    }

    pub fn motion(&self) -> &MotionState {
        &self.context.motion
    }

    pub fn settings(&self) -> &PlaySettings {
        &self.context.settings
    }

    pub fn bounds(&self) -> &SafetyBounds {
        &self.context.bounds
    }

    pub fn streaming_out(&self) -> Option<ParameterKind> {
        self.context.streaming_out
    }

    pub fn context(&self) -> &MachineContext {
        &self.context
    }

    /// Evaluate one dequeued command: table lookup, retry check, guard, then action.
    ///
    /// A rejected command leaves the machine exactly as it was.
    pub fn handle(
        &mut self,
        command: &Command,
        driver: &mut dyn MotionDriver,
    ) -> Result<Handled, Rejection> {
        let from = self.state;

        let Some(transition) = transitions::lookup(from, command.action) else {
            let rejection = Rejection::InvalidForState {
                action: command.action,
                state: from,
            };
            tracing::warn!("Command '{}' {}", command.id, rejection);
            return Err(rejection);
        };

        if self.was_applied(command) {
            tracing::debug!("Ignoring repeated {} '{}'", command.action, command.id);
            return Ok(Handled::Duplicate);
        }

        if let Some(guard) = transition.guard {
            if let Err(refusal) = guard(&self.context, command) {
                let rejection = match refusal {
                    Refusal::Payload(reason) => Rejection::InvalidPayload {
                        action: command.action,
                        reason,
                    },
                    Refusal::Condition(reason) => Rejection::GuardFailed {
                        action: command.action,
                        state: from,
                        reason,
                    },
                };
                tracing::warn!("Command '{}' {}", command.id, rejection);
                return Err(rejection);
            }
        }

        let effect = (transition.action)(&mut self.context, command, driver);
        self.remember(command);

        let handled = match effect {
            Effect::Enter(to) if to != from => {
                self.enter(to, driver);
                tracing::info!("{} -> {} on {} '{}'", from, to, command.action, command.id);
                Handled::Transitioned { from, to }
            }
            Effect::Enter(_) | Effect::Stay => Handled::Applied,
            Effect::Report(value) => Handled::Reported(ParameterReading {
                kind: command.payload.kind,
                value,
            }),
        };
        self.publish();
        Ok(handled)
    }

    /// Advance states that progress without a command: boot runs driver
    /// initialization and starts homing; homing picks up the driver's result.
    pub fn poll(&mut self, driver: &mut dyn MotionDriver) -> Option<DeviceState> {
        let from = self.state;
        match from {
            DeviceState::Booting => {
                driver.initialize();
                self.enter(DeviceState::Homing, driver);
            }
            DeviceState::Homing => {
                let outcome = self.homing_slot.as_ref().and_then(|slot| slot.lock().take())?;
                self.homing_slot = None;
                self.finish_homing(outcome);
            }
            _ => return None,
        }
        tracing::info!("{} -> {}", from, self.state);
        self.publish();
        Some(self.state)
    }

    fn finish_homing(&mut self, outcome: HomingOutcome) {
        match outcome {
            HomingOutcome::Homed {
                measured_stroke_steps,
            } => {
                let stroke = measured_stroke_steps.abs();
                if stroke < self.context.limits.min_stroke_steps {
                    tracing::error!(
                        "Measured stroke of {} steps is below the minimum of {}",
                        stroke,
                        self.context.limits.min_stroke_steps
                    );
                    self.fail("stroke too short");
                    return;
                }
                tracing::info!("Homing complete, measured stroke {} steps", stroke);
                self.context.calibration.homed = true;
                self.context.calibration.measured_stroke_steps = stroke;
                self.state = DeviceState::Idle;
            }
            HomingOutcome::Failed { reason } => {
                tracing::error!("Homing failed: {}", reason);
                self.fail(&reason);
            }
        }
    }

    fn fail(&mut self, message: &str) {
        self.context.calibration.homed = false;
        self.context.error_message = Some(message.to_string());
        self.state = DeviceState::Error;
    }

    /// Switch state and run entry work.
    fn enter(&mut self, to: DeviceState, driver: &mut dyn MotionDriver) {
        self.state = to;
        if to == DeviceState::Homing {
            self.begin_homing(driver);
        } else {
            self.homing_slot = None;
        }
    }

    fn begin_homing(&mut self, driver: &mut dyn MotionDriver) {
        let slot: HomingSlot = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&slot);
        let on_complete: HomingCallback = Box::new(move |outcome| {
            *sink.lock() = Some(outcome);
        });
        self.homing_slot = Some(slot);

        tracing::info!("Starting {:?} homing", self.homing_method);
        match self.homing_method {
            HomingMethod::Sensorless => driver.home_sensorless(on_complete),
            HomingMethod::Endstop => driver.home_with_endstop(on_complete),
        }
    }

    fn was_applied(&self, command: &Command) -> bool {
        if command.id.is_empty() || command.action.always_executes() {
            return false;
        }
        self.recent.iter().any(|seen| seen.matches(command))
    }

    fn remember(&mut self, command: &Command) {
        if command.id.is_empty() || command.action.always_executes() {
            return;
        }
        if self.recent.len() == RECENT_ID_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(AppliedCommand {
            id: command.id.clone(),
            action: command.action,
            payload: command.payload,
        });
    }

    fn publish(&self) {
        let status = DeviceStatus {
            state: self.state,
            error_message: self.context.error_message.clone(),
            active_pattern: self.context.active_pattern,
            homed: self.context.calibration.homed,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandPayload;
    use crate::simulator::SimulatedDriver;

    fn machine() -> DeviceStateMachine {
        DeviceStateMachine::new(
            HomingMethod::Sensorless,
            MachineLimits {
                speed_dead_zone_percent: 1.0,
                min_stroke_steps: 1000,
            },
        )
    }

    fn homed(driver: &mut SimulatedDriver) -> DeviceStateMachine {
        let mut m = machine();
        m.poll(driver);
        driver.complete_homing(HomingOutcome::Homed {
            measured_stroke_steps: 8000,
        });
        m.poll(driver);
        assert_eq!(m.state(), DeviceState::Idle);
        m
    }

    #[test]
    fn test_boot_enters_homing() {
        let mut driver = SimulatedDriver::default();
        let mut m = machine();
        assert_eq!(m.state(), DeviceState::Booting);
        assert_eq!(m.poll(&mut driver), Some(DeviceState::Homing));
        assert!(driver.is_homing());
        // No outcome yet: stays homing.
        assert_eq!(m.poll(&mut driver), None);
        assert_eq!(m.state(), DeviceState::Homing);
    }

    #[test]
    fn test_short_stroke_is_an_error() {
        let mut driver = SimulatedDriver::default();
        let mut m = machine();
        m.poll(&mut driver);
        driver.complete_homing(HomingOutcome::Homed {
            measured_stroke_steps: -200,
        });
        assert_eq!(m.poll(&mut driver), Some(DeviceState::Error));
        assert_eq!(m.error_message(), Some("stroke too short"));
        assert!(!m.is_homed());
    }

    #[test]
    fn test_homing_failure_reason_is_kept() {
        let mut driver = SimulatedDriver::default();
        let mut m = machine();
        m.poll(&mut driver);
        driver.complete_homing(HomingOutcome::Failed {
            reason: "current sensor not responding".to_string(),
        });
        m.poll(&mut driver);
        assert_eq!(m.state(), DeviceState::Error);
        assert_eq!(m.error_message(), Some("current sensor not responding"));
    }

    #[test]
    fn test_duplicate_id_is_not_reapplied() {
        let mut driver = SimulatedDriver::default();
        let mut m = homed(&mut driver);
        let cmd = Command::new(
            "dup",
            CommandAction::SetParameter,
            CommandPayload::new(ParameterKind::Depth, 40.0),
        );
        assert_eq!(m.handle(&cmd, &mut driver), Ok(Handled::Applied));
        assert_eq!(m.handle(&cmd, &mut driver), Ok(Handled::Duplicate));
    }

    #[test]
    fn test_same_id_with_new_payload_is_applied() {
        let mut driver = SimulatedDriver::default();
        let mut m = homed(&mut driver);
        let depth = |value| {
            Command::new(
                "depth",
                CommandAction::SetParameter,
                CommandPayload::new(ParameterKind::Depth, value),
            )
        };
        assert_eq!(m.handle(&depth(40.0), &mut driver), Ok(Handled::Applied));
        assert_eq!(m.handle(&depth(65.0), &mut driver), Ok(Handled::Applied));
        assert_eq!(m.settings().depth, 65.0);
    }

    #[test]
    fn test_rejected_command_can_be_retried() {
        let mut driver = SimulatedDriver::default();
        let mut m = homed(&mut driver);
        let speed = Command::new(
            "speed",
            CommandAction::SetParameter,
            CommandPayload::new(ParameterKind::Speed, 30.0),
        );
        m.handle(&speed, &mut driver).unwrap();

        let start = Command::bare("start-1", CommandAction::StartPlay);
        assert!(m.handle(&start, &mut driver).is_err());
        m.handle(&Command::bare("confirm", CommandAction::ConfirmStart), &mut driver)
            .unwrap();
        assert_eq!(
            m.handle(&start, &mut driver),
            Ok(Handled::Transitioned {
                from: DeviceState::Idle,
                to: DeviceState::Playing
            })
        );
    }

    #[test]
    fn test_status_is_published() {
        let mut driver = SimulatedDriver::default();
        let mut m = machine();
        let rx = m.subscribe();
        m.poll(&mut driver);
        assert_eq!(rx.borrow().state, DeviceState::Homing);
        m.handle(&Command::bare("stop", CommandAction::EmergencyStop), &mut driver)
            .unwrap();
        let status = m.status();
        assert_eq!(status.state, DeviceState::Error);
        assert_eq!(status.error_message.as_deref(), Some("emergency stop"));
    }

    #[test]
    fn test_late_homing_callback_is_ignored_after_estop() {
        let mut driver = SimulatedDriver::default();
        let mut m = machine();
        m.poll(&mut driver);
        m.handle(&Command::bare("e", CommandAction::EmergencyStop), &mut driver)
            .unwrap();
        driver.complete_homing(HomingOutcome::Homed {
            measured_stroke_steps: 8000,
        });
        assert_eq!(m.poll(&mut driver), None);
        assert_eq!(m.state(), DeviceState::Error);
        assert!(!m.is_homed());
    }
}
