// src/motion/mod.rs - Motion targets and the boundary to the external motion driver
use serde::{Deserialize, Serialize};

/// Target handed to the motion driver. Positions are device-relative percent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionState {
    pub target_position: f64,
    pub target_velocity: f64,
    pub target_time: u32,
}

impl MotionState {
    /// Set a new target position, clamped to `[0, 100]` and then to `bounds`.
    pub fn move_to(&mut self, position: f64, in_time_ms: u32, bounds: &SafetyBounds) {
        self.target_position = bounds.clamp(position.clamp(0.0, 100.0));
        self.target_time = in_time_ms;
    }
}

/// Operator-adjustable stroke engine settings, all percent except `pattern`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaySettings {
    pub speed: f64,
    pub stroke: f64,
    pub depth: f64,
    pub sensation: f64,
    pub acceleration: f64,
    pub deceleration: f64,
    pub pattern: u8,
}

/// Usable fraction of the rail, applied to every target position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyBounds {
    pub min_position: f64,
    pub max_position: f64,
}

impl Default for SafetyBounds {
    fn default() -> Self {
        Self {
            min_position: 0.0,
            max_position: 100.0,
        }
    }
}

impl SafetyBounds {
    pub fn clamp(&self, position: f64) -> f64 {
        position.clamp(self.min_position, self.max_position)
    }
}

/// Homing routine fitted to the hardware revision, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HomingMethod {
    /// Detects the hard stops from motor current.
    #[default]
    Sensorless,
    /// Uses a physical home switch.
    Endstop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HomingOutcome {
    Homed { measured_stroke_steps: i32 },
    Failed { reason: String },
}

/// Completion callback given to the driver's homing entry points. May be
/// called from any thread.
pub type HomingCallback = Box<dyn FnOnce(HomingOutcome) + Send + 'static>;

/// Raw position feedback in motor steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionFeedback {
    pub current: i32,
    pub target: i32,
}

/// Everything the control core asks of the physical motion layer.
///
/// Implementations must return promptly; long-running work (homing) reports
/// completion through the callback.
pub trait MotionDriver: Send {
    /// Bring the driver up after power-on or reset.
    fn initialize(&mut self) {}
    fn set_target(&mut self, position: f64, velocity: f64, time_ms: u32);
    fn configure(&mut self, settings: &PlaySettings);
    fn start(&mut self);
    fn stop(&mut self);
    fn hold(&mut self);
    fn home_sensorless(&mut self, on_complete: HomingCallback);
    fn home_with_endstop(&mut self, on_complete: HomingCallback);
    fn feedback(&self) -> PositionFeedback;
    /// Called once per control cycle before feedback is read. Drivers that
    /// have no execution context of their own advance here.
    fn service(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_to_clamps_range() {
        let mut motion = MotionState::default();
        motion.move_to(150.0, 200, &SafetyBounds::default());
        assert_eq!(motion.target_position, 100.0);
        assert_eq!(motion.target_time, 200);
        motion.move_to(-3.0, 0, &SafetyBounds::default());
        assert_eq!(motion.target_position, 0.0);
    }

    #[test]
    fn test_move_to_respects_safety_bounds() {
        let bounds = SafetyBounds {
            min_position: 10.0,
            max_position: 80.0,
        };
        let mut motion = MotionState::default();
        motion.move_to(95.0, 0, &bounds);
        assert_eq!(motion.target_position, 80.0);
        motion.move_to(2.0, 0, &bounds);
        assert_eq!(motion.target_position, 10.0);
    }
}
