// src/session/telemetry.rs - Position sampling for session upload
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    #[serde(rename = "time")]
    pub time_ms: u64,
    #[serde(rename = "position")]
    pub position_mm: f64,
}

/// Fixed-capacity ring of the most recent samples; the oldest is overwritten when full.
#[derive(Debug, Clone)]
pub struct PositionBuffer {
    samples: VecDeque<PositionSample>,
    capacity: usize,
}

impl PositionBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, time_ms: u64, position_mm: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(PositionSample {
            time_ms,
            position_mm,
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Take every buffered sample, oldest first.
    pub fn drain(&mut self) -> Vec<PositionSample> {
        self.samples.drain(..).collect()
    }
}

impl Default for PositionBuffer {
    fn default() -> Self {
        Self::new(32)
    }
}

/// Upload unit handed to whatever transport ships telemetry off the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryBatch {
    pub device_id: Option<String>,
    pub session_id: String,
    pub data: Vec<PositionSample>,
}

impl TelemetryBatch {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
