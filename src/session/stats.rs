// src/session/stats.rs - Stroke count and distance derived from raw position feedback
use serde::{Deserialize, Serialize};

/// Travel direction inferred from where the motor is heading.
///
/// Positions grow negative away from home, so heading to a lower step count
/// is extending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MotionDirection {
    Extending,
    #[default]
    Retracting,
}

impl MotionDirection {
    /// Direction implied by a feedback pair, or `None` when the motor is at its target.
    pub fn of(current: i32, target: i32) -> Option<Self> {
        match current.cmp(&target) {
            std::cmp::Ordering::Greater => Some(MotionDirection::Extending),
            std::cmp::Ordering::Less => Some(MotionDirection::Retracting),
            std::cmp::Ordering::Equal => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub strokes_total: u32,
    pub distance_in_millimeters: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Option<String>,
    pub statistics: SessionStatistics,
}

/// Accumulates [`SessionStatistics`] from per-cycle feedback.
///
/// A stroke is one extending-then-retracting cycle, so only the
/// Extending -> Retracting change is counted.
#[derive(Debug, Clone)]
pub struct SessionStatisticsTracker {
    steps_per_mm: f64,
    statistics: SessionStatistics,
    direction: MotionDirection,
    last_direction: MotionDirection,
    last_position: i32,
    initialized: bool,
    session_id: Option<String>,
}

impl SessionStatisticsTracker {
    pub fn new(steps_per_mm: f64) -> Self {
        Self {
            steps_per_mm,
            statistics: SessionStatistics::default(),
            direction: MotionDirection::default(),
            last_direction: MotionDirection::default(),
            last_position: 0,
            initialized: false,
            session_id: None,
        }
    }

    /// Feed one cycle of driver feedback, in motor steps.
    pub fn update(&mut self, current: i32, target: i32) {
        let direction = MotionDirection::of(current, target).unwrap_or(self.direction);

        if !self.initialized {
            self.last_position = current;
            self.last_direction = direction;
            self.direction = direction;
            self.initialized = true;
            return;
        }

        let delta_steps = (current as i64 - self.last_position as i64).abs();
        self.statistics.distance_in_millimeters += delta_steps as f64 / self.steps_per_mm;

        if direction != self.last_direction {
            if self.last_direction == MotionDirection::Extending
                && direction == MotionDirection::Retracting
            {
                self.statistics.strokes_total += 1;
            }
            self.last_direction = direction;
        }

        self.direction = direction;
        self.last_position = current;
    }

    /// Zero the statistics; the next update becomes a fresh baseline.
    pub fn reset(&mut self) {
        self.statistics = SessionStatistics::default();
        self.initialized = false;
    }

    pub fn statistics(&self) -> SessionStatistics {
        self.statistics
    }

    pub fn direction(&self) -> MotionDirection {
        self.direction
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn start_session(&mut self, session_id: impl Into<String>) {
        self.reset();
        let id = session_id.into();
        tracing::info!("Session '{}' started", id);
        self.session_id = Some(id);
    }

    pub fn end_session(&mut self) -> SessionSummary {
        let summary = SessionSummary {
            session_id: self.session_id.take(),
            statistics: self.statistics,
        };
        tracing::info!(
            "Session {:?} ended: {} strokes, {:.1} mm",
            summary.session_id,
            summary.statistics.strokes_total,
            summary.statistics.distance_in_millimeters
        );
        self.reset();
        summary
    }
}
