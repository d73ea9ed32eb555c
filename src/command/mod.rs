// src/command/mod.rs - Command vocabulary shared by every producer and the control loop
pub mod stream;

pub use stream::{CommandStream, InFlight};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

/// Urgency tier of a command. Lower value is served first.
///
/// `Emergency` is the only class with special admission behaviour; see
/// [`CommandStream::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PriorityClass {
    Emergency = 0,
    System = 1,
    Control = 2,
    Configuration = 3,
    Pattern = 4,
    ParameterSet = 5,
    ParameterStream = 6,
    TelemetryGet = 7,
    TelemetryStream = 8,
}

impl PriorityClass {
    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn is_emergency(self) -> bool {
        matches!(self, PriorityClass::Emergency)
    }
}

/// Everything a producer may ask the device to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    EmergencyStop,

    ResetDevice,
    StopPlay,
    StartPlay,
    /// Operator acknowledges starting motion at a nonzero speed.
    ConfirmStart,
    EnterSetup,
    CompleteSetup,
    /// Synthetic, delivered by the watchdog.
    HomingTimeout,
    /// Synthetic, delivered by the watchdog.
    SetupTimeout,
    /// Synthetic, delivered when the motion driver reports a fault.
    DriverFault,

    HoldPosition,
    TriggerHoming,

    SetSafetyBounds,
    EnterConfiguration,

    SetPattern,

    SetParameter,
    StreamInParameter,

    GetParameter,
    StreamOutParameter,
}

impl CommandAction {
    /// The single ordering lookup. Nothing else in the crate compares priorities.
    pub fn priority_class(self) -> PriorityClass {
        use CommandAction::*;
        match self {
            EmergencyStop => PriorityClass::Emergency,
            ResetDevice | StopPlay | StartPlay | ConfirmStart | EnterSetup | CompleteSetup
            | HomingTimeout | SetupTimeout | DriverFault => PriorityClass::System,
            HoldPosition | TriggerHoming => PriorityClass::Control,
            SetSafetyBounds | EnterConfiguration => PriorityClass::Configuration,
            SetPattern => PriorityClass::Pattern,
            SetParameter => PriorityClass::ParameterSet,
            StreamInParameter => PriorityClass::ParameterStream,
            GetParameter => PriorityClass::TelemetryGet,
            StreamOutParameter => PriorityClass::TelemetryStream,
        }
    }

    /// Stop-class, reset and synthetic actions run on every delivery, whatever id they carry.
    pub fn always_executes(self) -> bool {
        use CommandAction::*;
        matches!(
            self,
            EmergencyStop | StopPlay | ResetDevice | DriverFault | HomingTimeout | SetupTimeout
        )
    }

    pub fn name(self) -> &'static str {
        use CommandAction::*;
        match self {
            EmergencyStop => "E_STOP",
            ResetDevice => "RESET_DEVICE",
            StopPlay => "STOP_PLAY",
            StartPlay => "START_PLAY",
            ConfirmStart => "CONFIRM_START",
            EnterSetup => "ENTER_SETUP",
            CompleteSetup => "COMPLETE_SETUP",
            HomingTimeout => "HOMING_TIMEOUT",
            SetupTimeout => "SETUP_TIMEOUT",
            DriverFault => "DRIVER_FAULT",
            HoldPosition => "HOLD_POSITION",
            TriggerHoming => "TRIGGER_HOMING",
            SetSafetyBounds => "SET_SAFETY_BOUNDS",
            EnterConfiguration => "ENTER_CONFIGURATION",
            SetPattern => "SET_PATTERN",
            SetParameter => "SET_PARAMETER",
            StreamInParameter => "STREAM_IN_PARAMETER",
            GetParameter => "GET_PARAMETER",
            StreamOutParameter => "STREAM_OUT_PARAMETER",
        }
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Position,
    Speed,
    Acceleration,
    Deceleration,
    /// Milliseconds to reach a streamed position.
    Time,
    Depth,
    Stroke,
    Sensation,
    Pattern,
}

/// Highest stroke-engine pattern id.
pub const MAX_PATTERN_ID: u8 = 6;

impl ParameterKind {
    /// Validate a raw value against the natural range of this parameter.
    pub fn validate(self, value: f64) -> Result<(), String> {
        if !value.is_finite() {
            return Err(format!("{:?} value must be finite", self));
        }
        match self {
            ParameterKind::Position
            | ParameterKind::Speed
            | ParameterKind::Depth
            | ParameterKind::Stroke
            | ParameterKind::Sensation => {
                if !(0.0..=100.0).contains(&value) {
                    return Err(format!("{:?} must be within 0..=100, got {}", self, value));
                }
            }
            ParameterKind::Acceleration | ParameterKind::Deceleration | ParameterKind::Time => {
                if value < 0.0 {
                    return Err(format!("{:?} must not be negative, got {}", self, value));
                }
            }
            ParameterKind::Pattern => {
                if value.fract() != 0.0 || !(0.0..=MAX_PATTERN_ID as f64).contains(&value) {
                    return Err(format!(
                        "pattern id must be an integer within 0..={}, got {}",
                        MAX_PATTERN_ID, value
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub kind: ParameterKind,
    pub value: f64,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl CommandPayload {
    pub fn new(kind: ParameterKind, value: f64) -> Self {
        Self {
            kind,
            value,
            min: None,
            max: None,
        }
    }

    pub fn bounded(kind: ParameterKind, value: f64, min: f64, max: f64) -> Self {
        Self {
            kind,
            value,
            min: Some(min),
            max: Some(max),
        }
    }

    /// Check the value against its kind and any producer-supplied bounds.
    pub fn validate(&self) -> Result<(), String> {
        self.kind.validate(self.value)?;
        if let Some(min) = self.min {
            if self.value < min {
                return Err(format!("{:?} {} is below bound {}", self.kind, self.value, min));
            }
        }
        if let Some(max) = self.max {
            if self.value > max {
                return Err(format!("{:?} {} is above bound {}", self.kind, self.value, max));
            }
        }
        Ok(())
    }
}

impl Default for CommandPayload {
    fn default() -> Self {
        Self::new(ParameterKind::Position, 0.0)
    }
}

/// One unit of work from a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Producer-assigned correlation id.
    pub id: String,
    pub action: CommandAction,
    pub payload: CommandPayload,
    /// Monotonic milliseconds; diagnostics only, never used for ordering.
    pub timestamp: u64,
}

impl Command {
    pub fn new(id: impl Into<String>, action: CommandAction, payload: CommandPayload) -> Self {
        Self::with_timestamp(id, action, payload, monotonic_ms())
    }

    pub fn with_timestamp(
        id: impl Into<String>,
        action: CommandAction,
        payload: CommandPayload,
        timestamp: u64,
    ) -> Self {
        Self {
            id: id.into(),
            action,
            payload,
            timestamp,
        }
    }

    /// Command whose payload is irrelevant to its action.
    pub fn bare(id: impl Into<String>, action: CommandAction) -> Self {
        Self::new(id, action, CommandPayload::default())
    }

    pub fn priority_class(&self) -> PriorityClass {
        self.action.priority_class()
    }
}

/// Milliseconds since the first call in this process.
pub fn monotonic_ms() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}
