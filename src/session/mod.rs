//! Session scoped accounting: stroke/distance statistics and position telemetry.

pub mod stats;
pub mod telemetry;

pub use stats::{MotionDirection, SessionStatistics, SessionStatisticsTracker, SessionSummary};
pub use telemetry::{PositionBuffer, PositionSample, TelemetryBatch};
