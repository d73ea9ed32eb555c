// src/state/context.rs - Data owned by the state machine and touched only by its actions
use crate::command::ParameterKind;
use crate::config::Config;
use crate::motion::{MotionState, PlaySettings, SafetyBounds};

/// Homing results; persists until the next homing, reset or emergency stop.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Calibration {
    pub homed: bool,
    pub measured_stroke_steps: i32,
}

/// Fixed thresholds the guards evaluate against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachineLimits {
    /// Speed below this percentage counts as zero for the start guard.
    pub speed_dead_zone_percent: f64,
    /// A homing run measuring less than this is treated as failed.
    pub min_stroke_steps: i32,
}

impl Default for MachineLimits {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl MachineLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            speed_dead_zone_percent: config.device.speed_dead_zone_percent,
            min_stroke_steps: config.driver.min_stroke_steps(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MachineContext {
    pub motion: MotionState,
    pub settings: PlaySettings,
    pub bounds: SafetyBounds,
    pub calibration: Calibration,
    pub limits: MachineLimits,
    /// Operator acknowledged a start at nonzero speed.
    pub start_confirmed: bool,
    pub holding: bool,
    pub streaming_out: Option<ParameterKind>,
    pub error_message: Option<String>,
    pub active_pattern: Option<u8>,
}

impl MachineContext {
    pub fn new(limits: MachineLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn speed_is_zero(&self) -> bool {
        self.settings.speed < self.limits.speed_dead_zone_percent
    }

    /// Store a setting. Returns `true` for kinds that live in [`PlaySettings`].
    /// A changed speed withdraws any pending start confirmation.
    pub fn store_setting(&mut self, kind: ParameterKind, value: f64) -> bool {
        let settings = &mut self.settings;
        match kind {
            ParameterKind::Speed => {
                if settings.speed != value {
                    self.start_confirmed = false;
                }
                settings.speed = value;
            }
            ParameterKind::Stroke => settings.stroke = value,
            ParameterKind::Depth => settings.depth = value,
            ParameterKind::Sensation => settings.sensation = value,
            ParameterKind::Acceleration => settings.acceleration = value,
            ParameterKind::Deceleration => settings.deceleration = value,
            ParameterKind::Pattern => {
                settings.pattern = value as u8;
                self.active_pattern = Some(settings.pattern);
            }
            ParameterKind::Position | ParameterKind::Time => return false,
        }
        true
    }

    pub fn read(&self, kind: ParameterKind) -> f64 {
        let settings = &self.settings;
        match kind {
            ParameterKind::Position => self.motion.target_position,
            ParameterKind::Time => self.motion.target_time as f64,
            ParameterKind::Speed => settings.speed,
            ParameterKind::Stroke => settings.stroke,
            ParameterKind::Depth => settings.depth,
            ParameterKind::Sensation => settings.sensation,
            ParameterKind::Acceleration => settings.acceleration,
            ParameterKind::Deceleration => settings.deceleration,
            ParameterKind::Pattern => settings.pattern as f64,
        }
    }
}
