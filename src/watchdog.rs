// src/watchdog.rs - Cuts time-bounded states short with a synthetic command
use std::time::{Duration, Instant};

use crate::command::CommandAction;
use crate::config::DeviceConfig;
use crate::state::DeviceState;

/// Tracks how long the device has been in its current state and asks for a
/// timeout command once per entry into a time-bounded state.
#[derive(Debug, Clone)]
pub struct StateWatchdog {
    homing_timeout: Duration,
    setup_timeout: Duration,
    state: Option<DeviceState>,
    entered_at: Option<Instant>,
    fired: bool,
}

impl StateWatchdog {
    pub fn new(homing_timeout: Duration, setup_timeout: Duration) -> Self {
        Self {
            homing_timeout,
            setup_timeout,
            state: None,
            entered_at: None,
            fired: false,
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(
            Duration::from_millis(config.homing_timeout_ms),
            Duration::from_millis(config.setup_timeout_ms),
        )
    }

    fn limit_for(&self, state: DeviceState) -> Option<(Duration, CommandAction)> {
        match state {
            DeviceState::Homing => Some((self.homing_timeout, CommandAction::HomingTimeout)),
            DeviceState::Configuring | DeviceState::SettingUp => {
                Some((self.setup_timeout, CommandAction::SetupTimeout))
            }
            _ => None,
        }
    }

    /// Observe the current state. Returns the timeout action to deliver, at
    /// most once per state entry.
    pub fn check(&mut self, state: DeviceState, now: Instant) -> Option<CommandAction> {
        if self.state != Some(state) {
            self.state = Some(state);
            self.entered_at = Some(now);
            self.fired = false;
        }
        if self.fired || !state.is_time_bounded() {
            return None;
        }

        let (limit, action) = self.limit_for(state)?;
        let entered_at = self.entered_at?;
        if now.saturating_duration_since(entered_at) < limit {
            return None;
        }
        self.fired = true;
        tracing::warn!("{} exceeded {:?}, issuing {}", state, limit, action);
        Some(action)
    }

    /// Forget the current entry so the next `check` starts a fresh timer.
    pub fn rearm(&mut self) {
        self.state = None;
        self.entered_at = None;
        self.fired = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_per_entry() {
        let mut dog = StateWatchdog::new(Duration::from_millis(100), Duration::from_millis(500));
        let t0 = Instant::now();
        assert_eq!(dog.check(DeviceState::Homing, t0), None);
        assert_eq!(dog.check(DeviceState::Homing, t0 + Duration::from_millis(99)), None);
        assert_eq!(
            dog.check(DeviceState::Homing, t0 + Duration::from_millis(100)),
            Some(CommandAction::HomingTimeout)
        );
        assert_eq!(dog.check(DeviceState::Homing, t0 + Duration::from_millis(300)), None);
    }

    #[test]
    fn test_timer_restarts_on_state_change() {
        let mut dog = StateWatchdog::new(Duration::from_millis(100), Duration::from_millis(200));
        let t0 = Instant::now();
        dog.check(DeviceState::Idle, t0);
        assert_eq!(dog.check(DeviceState::Idle, t0 + Duration::from_secs(60)), None);

        let t1 = t0 + Duration::from_secs(60);
        assert_eq!(dog.check(DeviceState::SettingUp, t1), None);
        assert_eq!(dog.check(DeviceState::SettingUp, t1 + Duration::from_millis(150)), None);
        assert_eq!(
            dog.check(DeviceState::SettingUp, t1 + Duration::from_millis(200)),
            Some(CommandAction::SetupTimeout)
        );
    }

    #[test]
    fn test_rearm_restarts_timer() {
        let mut dog = StateWatchdog::new(Duration::from_millis(100), Duration::from_millis(100));
        let t0 = Instant::now();
        dog.check(DeviceState::Configuring, t0);
        dog.rearm();
        let t1 = t0 + Duration::from_millis(90);
        assert_eq!(dog.check(DeviceState::Configuring, t1), None);
        assert_eq!(dog.check(DeviceState::Configuring, t0 + Duration::from_millis(150)), None);
        assert_eq!(
            dog.check(DeviceState::Configuring, t1 + Duration::from_millis(100)),
            Some(CommandAction::SetupTimeout)
        );
    }
}
