//! # Device Configuration
//!
//! All tunables of the control host live in one TOML file. Every field has a
//! default, so an empty file (or no file at all) yields a working setup.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [device]
//! device_id = "bench-unit-01"
//! control_cycle_ms = 10
//! homing_method = "endstop"
//! homing_timeout_ms = 40000
//!
//! [driver]
//! motor_steps_per_revolution = 800
//! pulley_tooth_count = 20
//! belt_pitch_mm = 2.0
//! min_stroke_mm = 50.0
//!
//! [telemetry]
//! sample_interval_ms = 33
//! buffer_capacity = 32
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::motion::HomingMethod;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Control loop and lifecycle timing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default = "default_control_cycle_ms")]
    pub control_cycle_ms: u64,
    #[serde(default)]
    pub homing_method: HomingMethod,
    #[serde(default = "default_homing_timeout_ms")]
    pub homing_timeout_ms: u64,
    #[serde(default = "default_setup_timeout_ms")]
    pub setup_timeout_ms: u64,
    #[serde(default = "default_speed_dead_zone_percent")]
    pub speed_dead_zone_percent: f64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            control_cycle_ms: default_control_cycle_ms(),
            homing_method: HomingMethod::default(),
            homing_timeout_ms: default_homing_timeout_ms(),
            setup_timeout_ms: default_setup_timeout_ms(),
            speed_dead_zone_percent: default_speed_dead_zone_percent(),
        }
    }
}

/// Mechanical geometry of the belt drive.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DriverConfig {
    #[serde(default = "default_motor_steps_per_revolution")]
    pub motor_steps_per_revolution: u32,
    #[serde(default = "default_pulley_tooth_count")]
    pub pulley_tooth_count: u32,
    #[serde(default = "default_belt_pitch_mm")]
    pub belt_pitch_mm: f64,
    #[serde(default = "default_max_stroke_mm")]
    pub max_stroke_mm: f64,
    #[serde(default = "default_min_stroke_mm")]
    pub min_stroke_mm: f64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            motor_steps_per_revolution: default_motor_steps_per_revolution(),
            pulley_tooth_count: default_pulley_tooth_count(),
            belt_pitch_mm: default_belt_pitch_mm(),
            max_stroke_mm: default_max_stroke_mm(),
            min_stroke_mm: default_min_stroke_mm(),
        }
    }
}

impl DriverConfig {
    pub fn steps_per_mm(&self) -> f64 {
        self.motor_steps_per_revolution as f64
            / (self.pulley_tooth_count as f64 * self.belt_pitch_mm)
    }

    pub fn min_stroke_steps(&self) -> i32 {
        (self.min_stroke_mm * self.steps_per_mm()).round() as i32
    }

    pub fn max_stroke_steps(&self) -> i32 {
        (self.max_stroke_mm * self.steps_per_mm()).round() as i32
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

impl Config {
    /// Reject values the control loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let device = &self.device;
        if device.control_cycle_ms == 0 {
            return Err(ConfigError::Invalid("control_cycle_ms must be > 0".to_string()));
        }
        if device.homing_timeout_ms == 0 || device.setup_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be > 0".to_string()));
        }
        if !device.speed_dead_zone_percent.is_finite()
            || !(0.0..100.0).contains(&device.speed_dead_zone_percent)
        {
            return Err(ConfigError::Invalid(
                "speed_dead_zone_percent must be within 0..100".to_string(),
            ));
        }

        let driver = &self.driver;
        if driver.motor_steps_per_revolution == 0
            || driver.pulley_tooth_count == 0
            || !driver.belt_pitch_mm.is_finite()
            || driver.belt_pitch_mm <= 0.0
        {
            return Err(ConfigError::Invalid(
                "driver geometry must be positive".to_string(),
            ));
        }
        if !driver.min_stroke_mm.is_finite() || !driver.max_stroke_mm.is_finite() {
            return Err(ConfigError::Invalid(
                "stroke limits must be finite".to_string(),
            ));
        }
        if driver.min_stroke_mm <= 0.0 || driver.min_stroke_mm >= driver.max_stroke_mm {
            return Err(ConfigError::Invalid(format!(
                "min_stroke_mm ({}) must be > 0 and below max_stroke_mm ({})",
                driver.min_stroke_mm, driver.max_stroke_mm
            )));
        }

        let telemetry = &self.telemetry;
        if telemetry.sample_interval_ms == 0 || telemetry.buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "telemetry interval and buffer capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// Default value functions
fn default_control_cycle_ms() -> u64 { 10 }
fn default_homing_timeout_ms() -> u64 { 40_000 }
fn default_setup_timeout_ms() -> u64 { 120_000 }
fn default_speed_dead_zone_percent() -> f64 { 1.0 }
fn default_motor_steps_per_revolution() -> u32 { 800 }
fn default_pulley_tooth_count() -> u32 { 20 }
fn default_belt_pitch_mm() -> f64 { 2.0 }
fn default_max_stroke_mm() -> f64 { 500.0 }
fn default_min_stroke_mm() -> f64 { 50.0 }
fn default_sample_interval_ms() -> u64 { 33 }
fn default_buffer_capacity() -> usize { 32 }

/// Load and validate configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    let config: Config = match toml::from_str(&contents) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to parse config TOML: {}", e);
            return Err(ConfigError::Toml(e));
        }
    };
    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e);
    }
    Ok(config)
}
