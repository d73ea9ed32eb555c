// src/simulator/mod.rs - In-process motion driver for the host binary and tests
use crate::config::DriverConfig;
use crate::motion::{
    HomingCallback, HomingOutcome, MotionDriver, PlaySettings, PositionFeedback,
};

struct HomingRun {
    on_complete: HomingCallback,
    remaining_steps: u32,
}

/// Belt-drive stand-in. Positions are motor steps, growing negative away
/// from home. `step()` advances one control cycle.
pub struct SimulatedDriver {
    current: i32,
    target: i32,
    rail_steps: i32,
    max_steps_per_cycle: i32,
    settings: PlaySettings,
    running: bool,
    holding: bool,
    streaming: bool,
    /// Last commanded (position, time); a target repeating both only changes velocity.
    commanded: (f64, u32),
    homing: Option<HomingRun>,
    homing_cycles: u32,
    homing_stroke_steps: i32,
    homing_jitter_steps: i32,
    pub initialize_calls: u32,
    pub start_calls: u32,
    pub stop_calls: u32,
    pub hold_calls: u32,
    pub configure_calls: u32,
    pub targets: Vec<(f64, f64, u32)>,
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new(8000, 200)
    }
}

impl SimulatedDriver {
    pub fn new(rail_steps: i32, max_steps_per_cycle: i32) -> Self {
        Self {
            current: 0,
            target: 0,
            rail_steps: rail_steps.max(1),
            max_steps_per_cycle: max_steps_per_cycle.max(1),
            settings: PlaySettings::default(),
            running: false,
            holding: false,
            streaming: false,
            commanded: (0.0, 0),
            homing: None,
            homing_cycles: 0,
            homing_stroke_steps: rail_steps,
            homing_jitter_steps: 0,
            initialize_calls: 0,
            start_calls: 0,
            stop_calls: 0,
            hold_calls: 0,
            configure_calls: 0,
            targets: Vec::new(),
        }
    }

    pub fn from_config(config: &DriverConfig) -> Self {
        Self::new(config.max_stroke_steps(), config.max_stroke_steps() / 20)
    }

    /// Finish homing automatically after `cycles` calls to [`step`](Self::step),
    /// reporting `stroke_steps`. With zero cycles homing only ends through
    /// [`complete_homing`](Self::complete_homing).
    pub fn with_auto_homing(mut self, cycles: u32, stroke_steps: i32) -> Self {
        self.homing_cycles = cycles;
        self.homing_stroke_steps = stroke_steps;
        self
    }

    /// Random error of up to `steps` on the measured stroke.
    pub fn with_homing_jitter(mut self, steps: i32) -> Self {
        self.homing_jitter_steps = steps.abs();
        self
    }

    pub fn is_homing(&self) -> bool {
        self.homing.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_holding(&self) -> bool {
        self.holding
    }

    pub fn settings(&self) -> &PlaySettings {
        &self.settings
    }

    /// Deliver the outcome of a pending homing run. Returns `false` if none was pending.
    pub fn complete_homing(&mut self, outcome: HomingOutcome) -> bool {
        match self.homing.take() {
            Some(run) => {
                if matches!(outcome, HomingOutcome::Homed { .. }) {
                    self.current = 0;
                    self.target = 0;
                }
                (run.on_complete)(outcome);
                true
            }
            None => false,
        }
    }

    /// Advance the simulation by one control cycle.
    pub fn step(&mut self) {
        if let Some(run) = self.homing.as_mut() {
            if self.homing_cycles > 0 {
                run.remaining_steps = run.remaining_steps.saturating_sub(1);
                if run.remaining_steps == 0 {
                    let stroke = self.homing_stroke_steps + self.jitter();
                    self.complete_homing(HomingOutcome::Homed {
                        measured_stroke_steps: stroke,
                    });
                }
            }
            return;
        }

        if !self.running || self.holding {
            return;
        }
        if !self.streaming && self.current == self.target {
            self.target = self.next_pattern_target();
        }

        let rate = if self.streaming {
            self.max_steps_per_cycle
        } else {
            ((self.max_steps_per_cycle as f64 * self.settings.speed / 100.0).round() as i32).max(1)
        };
        let delta = (self.target - self.current).clamp(-rate, rate);
        self.current += delta;
    }

    fn jitter(&self) -> i32 {
        if self.homing_jitter_steps == 0 {
            return 0;
        }
        ((rand::random::<f64>() - 0.5) * 2.0 * self.homing_jitter_steps as f64).round() as i32
    }

    /// Alternate between the shallow and deep end of the configured stroke.
    fn next_pattern_target(&self) -> i32 {
        let deep = -(self.rail_steps as f64 * self.settings.depth / 100.0).round() as i32;
        let length = (self.rail_steps as f64 * self.settings.stroke / 100.0).round() as i32;
        let shallow = (deep + length).min(0);
        if self.current <= (deep + shallow) / 2 {
            shallow
        } else {
            deep
        }
    }

    fn begin_homing(&mut self, on_complete: HomingCallback) {
        self.running = false;
        self.homing = Some(HomingRun {
            on_complete,
            remaining_steps: self.homing_cycles,
        });
    }
}

impl MotionDriver for SimulatedDriver {
    fn initialize(&mut self) {
        self.initialize_calls += 1;
        self.running = false;
        self.holding = false;
        tracing::debug!("Simulated driver initialized");
    }

    fn set_target(&mut self, position: f64, velocity: f64, time_ms: u32) {
        self.targets.push((position, velocity, time_ms));
        self.holding = false;
        if self.commanded == (position, time_ms) {
            // Velocity-only update; keep whatever the driver is currently following.
            return;
        }
        self.commanded = (position, time_ms);
        self.streaming = true;
        self.target = -(self.rail_steps as f64 * position / 100.0).round() as i32;
    }

    fn configure(&mut self, settings: &PlaySettings) {
        self.configure_calls += 1;
        self.settings = *settings;
    }

    fn start(&mut self) {
        self.start_calls += 1;
        self.running = true;
        self.holding = false;
        self.streaming = false;
    }

    fn stop(&mut self) {
        self.stop_calls += 1;
        self.running = false;
        self.holding = false;
        self.target = self.current;
        // Any homing run in flight is abandoned.
        self.homing = None;
    }

    fn hold(&mut self) {
        self.hold_calls += 1;
        self.holding = true;
        self.target = self.current;
    }

    fn home_sensorless(&mut self, on_complete: HomingCallback) {
        tracing::debug!("Simulated sensorless homing started");
        self.begin_homing(on_complete);
    }

    fn home_with_endstop(&mut self, on_complete: HomingCallback) {
        tracing::debug!("Simulated endstop homing started");
        self.begin_homing(on_complete);
    }

    fn feedback(&self) -> PositionFeedback {
        PositionFeedback {
            current: self.current,
            target: self.target,
        }
    }

    fn service(&mut self) {
        self.step();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_auto_homing_reports_stroke() {
        let mut driver = SimulatedDriver::new(4000, 100).with_auto_homing(3, 3900);
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        driver.home_sensorless(Box::new(move |outcome| {
            *sink.lock().unwrap() = Some(outcome);
        }));
        driver.step();
        driver.step();
        assert!(driver.is_homing());
        driver.step();
        assert!(!driver.is_homing());
        assert_eq!(
            *seen.lock().unwrap(),
            Some(HomingOutcome::Homed {
                measured_stroke_steps: 3900
            })
        );
    }

    #[test]
    fn test_streamed_target_is_followed() {
        let mut driver = SimulatedDriver::new(1000, 100);
        driver.start();
        driver.set_target(50.0, 0.0, 0);
        assert_eq!(driver.feedback().target, -500);
        for _ in 0..10 {
            driver.step();
        }
        assert_eq!(driver.feedback().current, -500);
    }

    #[test]
    fn test_pattern_oscillates_when_running() {
        let mut driver = SimulatedDriver::new(1000, 100);
        driver.configure(&PlaySettings {
            speed: 100.0,
            stroke: 50.0,
            depth: 80.0,
            ..PlaySettings::default()
        });
        driver.start();
        let mut lowest = 0;
        for _ in 0..40 {
            driver.step();
            lowest = lowest.min(driver.feedback().current);
        }
        assert_eq!(lowest, -800);
        assert!(driver.feedback().current >= -800);
    }

    #[test]
    fn test_velocity_only_target_keeps_pattern() {
        let mut driver = SimulatedDriver::new(1000, 100);
        driver.configure(&PlaySettings {
            speed: 100.0,
            stroke: 50.0,
            depth: 80.0,
            ..PlaySettings::default()
        });
        driver.start();
        driver.set_target(0.0, 100.0, 0);
        let mut lowest = 0;
        for _ in 0..40 {
            driver.step();
            lowest = lowest.min(driver.feedback().current);
        }
        assert_eq!(lowest, -800);
        assert_eq!(driver.targets.len(), 1);
    }

    #[test]
    fn test_hold_freezes_position() {
        let mut driver = SimulatedDriver::new(1000, 100);
        driver.start();
        driver.set_target(100.0, 0.0, 0);
        driver.step();
        driver.hold();
        let held = driver.feedback().current;
        driver.step();
        assert_eq!(driver.feedback().current, held);
        assert_eq!(driver.hold_calls, 1);
    }
}
