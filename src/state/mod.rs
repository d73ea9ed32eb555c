//! Device lifecycle
//!
//! The device is always in exactly one [`DeviceState`]. Only the
//! [`DeviceStateMachine`] changes it, either in response to a dequeued
//! command or from [`DeviceStateMachine::poll`] (boot progress, homing
//! completion).

mod context;
mod machine;
mod transitions;

pub use context::{Calibration, MachineContext, MachineLimits};
pub use machine::DeviceStateMachine;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::command::{CommandAction, ParameterKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceState {
    /// Power-on initialization
    Booting,
    /// Driver homing routine in progress
    Homing,
    /// Homed and at rest
    Idle,
    /// Advanced configuration session
    Configuring,
    /// Stroke engine running
    Playing,
    /// Fault or emergency stop; left only through RESET_DEVICE
    Error,
    /// Network / pairing setup session
    SettingUp,
}

impl DeviceState {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceState::Booting => "Booting",
            DeviceState::Homing => "Homing",
            DeviceState::Idle => "Idle",
            DeviceState::Configuring => "Configuring",
            DeviceState::Playing => "Playing",
            DeviceState::Error => "Error",
            DeviceState::SettingUp => "SettingUp",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, DeviceState::Error)
    }

    /// States that are expected to end on their own or be cut short by the watchdog.
    pub fn is_time_bounded(&self) -> bool {
        matches!(
            self,
            DeviceState::Homing | DeviceState::Configuring | DeviceState::SettingUp
        )
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Read-only view published to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub state: DeviceState,
    pub error_message: Option<String>,
    pub active_pattern: Option<u8>,
    pub homed: bool,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            state: DeviceState::Booting,
            error_message: None,
            active_pattern: None,
            homed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterReading {
    pub kind: ParameterKind,
    pub value: f64,
}

/// Successful outcome of handling one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Handled {
    Transitioned { from: DeviceState, to: DeviceState },
    /// Accepted without a state change.
    Applied,
    Reported(ParameterReading),
    /// Same command id already applied; nothing re-executed.
    Duplicate,
}

/// Why a command was not applied. The device is left exactly as it was.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("rejected: {action} invalid for state {state}")]
    InvalidForState {
        action: CommandAction,
        state: DeviceState,
    },
    #[error("rejected: {action} in state {state}: {reason}")]
    GuardFailed {
        action: CommandAction,
        state: DeviceState,
        reason: &'static str,
    },
    #[error("rejected: {action} has an invalid payload: {reason}")]
    InvalidPayload {
        action: CommandAction,
        reason: String,
    },
}
