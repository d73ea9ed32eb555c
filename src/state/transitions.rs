// src/state/transitions.rs - (state, action) -> (guard, action) table
//
// Guards only read. Actions are the only code allowed to mutate the
// machine context or call the motion driver.

use super::DeviceState;
use super::context::MachineContext;
use crate::command::{Command, CommandAction, ParameterKind};
use crate::motion::{MotionDriver, SafetyBounds};

pub(crate) enum Refusal {
    Payload(String),
    Condition(&'static str),
}

pub(crate) type GuardFn = fn(&MachineContext, &Command) -> Result<(), Refusal>;
pub(crate) type ActionFn = fn(&mut MachineContext, &Command, &mut dyn MotionDriver) -> Effect;

/// What an action asks the machine to do next.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Effect {
    Stay,
    Enter(DeviceState),
    Report(f64),
}

#[derive(Clone, Copy)]
pub(crate) struct Transition {
    pub guard: Option<GuardFn>,
    pub action: ActionFn,
}

fn unguarded(action: ActionFn) -> Option<Transition> {
    Some(Transition {
        guard: None,
        action,
    })
}

fn guarded(guard: GuardFn, action: ActionFn) -> Option<Transition> {
    Some(Transition {
        guard: Some(guard),
        action,
    })
}

pub(crate) fn lookup(state: DeviceState, action: CommandAction) -> Option<Transition> {
    use CommandAction::*;
    use DeviceState::*;

    match (state, action) {
        (_, EmergencyStop) => unguarded(emergency_stop),

        (Error | Idle, ResetDevice) => unguarded(reset_device),
        (Error, _) => None,
        (_, DriverFault) => unguarded(driver_fault),

        (Homing, HomingTimeout) => unguarded(homing_timed_out),

        (Idle, StartPlay) => guarded(can_start_play, start_play),
        (Idle, ConfirmStart) => unguarded(confirm_start),
        (Idle, TriggerHoming) => unguarded(trigger_homing),
        (Idle, EnterSetup) => unguarded(enter_setup),
        (Idle, EnterConfiguration) => unguarded(enter_configuration),
        (Idle, SetPattern) => guarded(valid_pattern, store_pattern),
        (Idle | Configuring, SetSafetyBounds) => guarded(valid_bounds, set_safety_bounds),
        (Idle | Configuring, SetParameter) => guarded(valid_stored_parameter, store_parameter),

        (Playing, StopPlay) => unguarded(stop_play),
        (Playing, HoldPosition) => unguarded(hold_position),
        (Playing, SetParameter) => guarded(valid_payload, apply_parameter),
        (Playing, SetPattern) => guarded(valid_pattern, apply_pattern),
        (Playing, StreamInParameter) => guarded(valid_stream_in, stream_in_parameter),

        (Configuring | SettingUp, CompleteSetup | SetupTimeout) => unguarded(finish_setup),

        (Idle | Playing | Configuring | SettingUp, GetParameter) => unguarded(get_parameter),
        (Idle | Playing, StreamOutParameter) => unguarded(stream_out_parameter),

        _ => None,
    }
}

// Guards

fn valid_payload(_ctx: &MachineContext, command: &Command) -> Result<(), Refusal> {
    command.payload.validate().map_err(Refusal::Payload)
}

fn valid_stored_parameter(ctx: &MachineContext, command: &Command) -> Result<(), Refusal> {
    valid_payload(ctx, command)?;
    match command.payload.kind {
        ParameterKind::Position | ParameterKind::Time => {
            Err(Refusal::Condition("position targets are only accepted while playing"))
        }
        _ => Ok(()),
    }
}

fn valid_pattern(_ctx: &MachineContext, command: &Command) -> Result<(), Refusal> {
    ParameterKind::Pattern
        .validate(command.payload.value)
        .map_err(Refusal::Payload)
}

fn valid_stream_in(ctx: &MachineContext, command: &Command) -> Result<(), Refusal> {
    valid_payload(ctx, command)?;
    match command.payload.kind {
        ParameterKind::Position | ParameterKind::Time | ParameterKind::Speed => Ok(()),
        other => Err(Refusal::Payload(format!("{:?} cannot be streamed in", other))),
    }
}

fn valid_bounds(_ctx: &MachineContext, command: &Command) -> Result<(), Refusal> {
    match (command.payload.min, command.payload.max) {
        (Some(min), Some(max)) if 0.0 <= min && min < max && max <= 100.0 => Ok(()),
        (Some(_), Some(_)) => Err(Refusal::Payload(
            "safety bounds must satisfy 0 <= min < max <= 100".to_string(),
        )),
        _ => Err(Refusal::Payload("safety bounds need both min and max".to_string())),
    }
}

fn can_start_play(ctx: &MachineContext, _command: &Command) -> Result<(), Refusal> {
    if !ctx.calibration.homed {
        return Err(Refusal::Condition("device is not homed"));
    }
    if !ctx.speed_is_zero() && !ctx.start_confirmed {
        return Err(Refusal::Condition(
            "speed is not zero and start has not been confirmed",
        ));
    }
    Ok(())
}

// Actions

fn emergency_stop(ctx: &mut MachineContext, _c: &Command, driver: &mut dyn MotionDriver) -> Effect {
    driver.stop();
    ctx.calibration.homed = false;
    ctx.start_confirmed = false;
    ctx.holding = false;
    ctx.error_message = Some("emergency stop".to_string());
    Effect::Enter(DeviceState::Error)
}

fn driver_fault(ctx: &mut MachineContext, _c: &Command, driver: &mut dyn MotionDriver) -> Effect {
    driver.stop();
    ctx.calibration.homed = false;
    ctx.start_confirmed = false;
    ctx.holding = false;
    ctx.error_message = Some("motor driver fault".to_string());
    Effect::Enter(DeviceState::Error)
}

fn homing_timed_out(ctx: &mut MachineContext, _c: &Command, driver: &mut dyn MotionDriver) -> Effect {
    driver.stop();
    ctx.calibration.homed = false;
    ctx.error_message = Some("homing took too long".to_string());
    Effect::Enter(DeviceState::Error)
}

fn reset_device(ctx: &mut MachineContext, _c: &Command, driver: &mut dyn MotionDriver) -> Effect {
    ctx.error_message = None;
    ctx.calibration = Default::default();
    ctx.start_confirmed = false;
    ctx.motion = Default::default();
    push_target(ctx, driver);
    Effect::Enter(DeviceState::Booting)
}

fn trigger_homing(ctx: &mut MachineContext, _c: &Command, _d: &mut dyn MotionDriver) -> Effect {
    ctx.calibration.homed = false;
    Effect::Enter(DeviceState::Homing)
}

fn start_play(ctx: &mut MachineContext, _c: &Command, driver: &mut dyn MotionDriver) -> Effect {
    ctx.holding = false;
    driver.configure(&ctx.settings);
    driver.start();
    Effect::Enter(DeviceState::Playing)
}

fn confirm_start(ctx: &mut MachineContext, _c: &Command, _d: &mut dyn MotionDriver) -> Effect {
    ctx.start_confirmed = true;
    Effect::Stay
}

fn stop_play(ctx: &mut MachineContext, _c: &Command, driver: &mut dyn MotionDriver) -> Effect {
    driver.stop();
    ctx.start_confirmed = false;
    ctx.holding = false;
    Effect::Enter(DeviceState::Idle)
}

fn hold_position(ctx: &mut MachineContext, _c: &Command, driver: &mut dyn MotionDriver) -> Effect {
    if !ctx.holding {
        driver.hold();
        ctx.holding = true;
    }
    Effect::Stay
}

fn enter_setup(_ctx: &mut MachineContext, _c: &Command, _d: &mut dyn MotionDriver) -> Effect {
    Effect::Enter(DeviceState::SettingUp)
}

fn enter_configuration(_ctx: &mut MachineContext, _c: &Command, _d: &mut dyn MotionDriver) -> Effect {
    Effect::Enter(DeviceState::Configuring)
}

fn finish_setup(_ctx: &mut MachineContext, _c: &Command, _d: &mut dyn MotionDriver) -> Effect {
    Effect::Enter(DeviceState::Idle)
}

fn set_safety_bounds(ctx: &mut MachineContext, command: &Command, driver: &mut dyn MotionDriver) -> Effect {
    // Guard guarantees both bounds are present.
    ctx.bounds = SafetyBounds {
        min_position: command.payload.min.unwrap_or(0.0),
        max_position: command.payload.max.unwrap_or(100.0),
    };
    let clamped = ctx.bounds.clamp(ctx.motion.target_position);
    if clamped != ctx.motion.target_position {
        ctx.motion.target_position = clamped;
        push_target(ctx, driver);
    }
    Effect::Stay
}

fn store_parameter(ctx: &mut MachineContext, command: &Command, _d: &mut dyn MotionDriver) -> Effect {
    ctx.store_setting(command.payload.kind, command.payload.value);
    Effect::Stay
}

fn store_pattern(ctx: &mut MachineContext, command: &Command, _d: &mut dyn MotionDriver) -> Effect {
    ctx.store_setting(ParameterKind::Pattern, command.payload.value);
    Effect::Stay
}

fn apply_pattern(ctx: &mut MachineContext, command: &Command, driver: &mut dyn MotionDriver) -> Effect {
    ctx.store_setting(ParameterKind::Pattern, command.payload.value);
    driver.configure(&ctx.settings);
    Effect::Stay
}

fn apply_parameter(ctx: &mut MachineContext, command: &Command, driver: &mut dyn MotionDriver) -> Effect {
    let payload = command.payload;
    if ctx.store_setting(payload.kind, payload.value) {
        driver.configure(&ctx.settings);
        if payload.kind == ParameterKind::Speed {
            ctx.motion.target_velocity = payload.value;
            push_target(ctx, driver);
        }
    } else if update_motion(ctx, payload.kind, payload.value) {
        push_target(ctx, driver);
    }
    Effect::Stay
}

fn stream_in_parameter(
    ctx: &mut MachineContext,
    command: &Command,
    driver: &mut dyn MotionDriver,
) -> Effect {
    if update_motion(ctx, command.payload.kind, command.payload.value) {
        push_target(ctx, driver);
    }
    Effect::Stay
}

fn get_parameter(ctx: &mut MachineContext, command: &Command, _d: &mut dyn MotionDriver) -> Effect {
    Effect::Report(ctx.read(command.payload.kind))
}

fn stream_out_parameter(ctx: &mut MachineContext, command: &Command, _d: &mut dyn MotionDriver) -> Effect {
    ctx.streaming_out = if command.payload.value > 0.0 {
        Some(command.payload.kind)
    } else {
        None
    };
    Effect::Stay
}

/// Apply a motion-related parameter. Returns `true` if the motion target changed.
fn update_motion(ctx: &mut MachineContext, kind: ParameterKind, value: f64) -> bool {
    let motion = &mut ctx.motion;
    match kind {
        ParameterKind::Position => {
            let time = motion.target_time;
            motion.move_to(value, time, &ctx.bounds);
        }
        ParameterKind::Time => motion.target_time = value as u32,
        ParameterKind::Speed => motion.target_velocity = value,
        _ => return false,
    }
    true
}

fn push_target(ctx: &mut MachineContext, driver: &mut dyn MotionDriver) {
    ctx.holding = false;
    let motion = ctx.motion;
    driver.set_target(motion.target_position, motion.target_velocity, motion.target_time);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emergency_stop_listed_for_every_state() {
        let states = [
            DeviceState::Booting,
            DeviceState::Homing,
            DeviceState::Idle,
            DeviceState::Configuring,
            DeviceState::Playing,
            DeviceState::Error,
            DeviceState::SettingUp,
        ];
        for state in states {
            let t = lookup(state, CommandAction::EmergencyStop).expect("E_STOP accepted");
            assert!(t.guard.is_none(), "E_STOP must be unguarded in {}", state);
        }
    }

    #[test]
    fn test_error_accepts_only_reset() {
        assert!(lookup(DeviceState::Error, CommandAction::ResetDevice).is_some());
        assert!(lookup(DeviceState::Error, CommandAction::StartPlay).is_none());
        assert!(lookup(DeviceState::Error, CommandAction::SetParameter).is_none());
        assert!(lookup(DeviceState::Error, CommandAction::DriverFault).is_none());
    }

    #[test]
    fn test_homing_accepts_only_safety_commands() {
        assert!(lookup(DeviceState::Homing, CommandAction::HomingTimeout).is_some());
        assert!(lookup(DeviceState::Homing, CommandAction::DriverFault).is_some());
        assert!(lookup(DeviceState::Homing, CommandAction::StartPlay).is_none());
        assert!(lookup(DeviceState::Homing, CommandAction::SetParameter).is_none());
    }

    #[test]
    fn test_start_play_is_guarded() {
        let t = lookup(DeviceState::Idle, CommandAction::StartPlay).unwrap();
        assert!(t.guard.is_some());
        assert!(lookup(DeviceState::Playing, CommandAction::StartPlay).is_none());
    }
}
