// src/lib.rs - Control core for a belt-driven linear actuator
pub mod command;
pub mod config;
pub mod device;
pub mod motion;
pub mod session;
pub mod simulator;
pub mod state;
pub mod watchdog;

pub use command::{Command, CommandAction, CommandPayload, CommandStream, ParameterKind, PriorityClass};
pub use config::{Config, ConfigError, load_config};
pub use device::{CommandReport, Device, DeviceError};
pub use motion::{HomingMethod, HomingOutcome, MotionDriver};
pub use session::{SessionStatistics, SessionStatisticsTracker};
pub use state::{DeviceState, DeviceStateMachine, DeviceStatus, Handled, Rejection};
