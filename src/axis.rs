//! Axis States, Reboot Actions and Device Error Flags
//!
//! Device-reported runtime errors are a bitmask of independently combinable
//! flags. They are rendered to a human-readable description and reported
//! through the session's side channel; they are never raised as `Err`.

use serde::{Deserialize, Serialize};

/// Axis state machine states reported in heartbeats and requested via
/// Set_Axis_State
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisState {
    Undefined = 0,
    Idle = 1,
    StartupSequence = 2,
    FullCalibrationSequence = 3,
    MotorCalibration = 4,
    EncoderIndexSearch = 6,
    EncoderOffsetCalibration = 7,
    ClosedLoopControl = 8,
    LockinSpin = 9,
    EncoderDirFind = 10,
    Homing = 11,
    EncoderHallPolarityCalibration = 12,
    EncoderHallPhaseCalibration = 13,
}

impl AxisState {
    /// Parse a raw heartbeat state byte
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(AxisState::Undefined),
            1 => Some(AxisState::Idle),
            2 => Some(AxisState::StartupSequence),
            3 => Some(AxisState::FullCalibrationSequence),
            4 => Some(AxisState::MotorCalibration),
            6 => Some(AxisState::EncoderIndexSearch),
            7 => Some(AxisState::EncoderOffsetCalibration),
            8 => Some(AxisState::ClosedLoopControl),
            9 => Some(AxisState::LockinSpin),
            10 => Some(AxisState::EncoderDirFind),
            11 => Some(AxisState::Homing),
            12 => Some(AxisState::EncoderHallPolarityCalibration),
            13 => Some(AxisState::EncoderHallPhaseCalibration),
            _ => None,
        }
    }
}

impl From<AxisState> for u8 {
    fn from(state: AxisState) -> u8 {
        state as u8
    }
}

/// Action byte for the Reboot command
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebootAction {
    /// Reboot without persisting configuration
    Reboot = 0,
    /// Save configuration to non-volatile memory, then reboot
    Save = 1,
    /// Erase configuration, then reboot
    Erase = 2,
}

/// Axis error flags in ascending bit order
const AXIS_ERROR_FLAGS: &[(u32, &str)] = &[
    (1, "INITIALIZING - The system is initializing or reconfiguring."),
    (2, "SYSTEM_LEVEL - Unexpected system error such as memory corruption, stack overflow, frozen thread, assert fail, etc."),
    (4, "TIMING_ERROR - An internal hard timing requirement was violated. Likely due to system overload."),
    (8, "MISSING_ESTIMATE - The position/velocity/phase estimate was invalid."),
    (16, "BAD_CONFIG - The configuration is invalid or incomplete."),
    (32, "DRV_FAULT - The gate driver chip reported an error."),
    (64, "MISSING_INPUT - No value was provided for input_pos, input_vel, or input_torque."),
    (256, "DC_BUS_OVER_VOLTAGE - The DC voltage exceeded the configured overvoltage trip level."),
    (512, "DC_BUS_UNDER_VOLTAGE - The DC voltage fell below the configured undervoltage trip level."),
    (1024, "DC_BUS_OVER_CURRENT - Too much DC current was pulled."),
    (2048, "DC_BUS_OVER_REGEN_CURRENT - Too much DC current was regenerated."),
    (4096, "CURRENT_LIMIT_VIOLATION - The motor current exceeded the specified hard max current."),
    (8192, "MOTOR_OVER_TEMP - The motor temperature exceeded the specified upper limit."),
    (16384, "INVERTER_OVER_TEMP - The inverter temperature exceeded the specified upper limit."),
    (32768, "VELOCITY_LIMIT_VIOLATION - The velocity exceeds the velocity limit."),
    (65536, "POSITION_LIMIT_VIOLATION - The position exceeded the position limit."),
    (16777216, "WATCHDOG_TIMER_EXPIRED - The axis watchdog timer expired."),
    (33554432, "ESTOP_REQUESTED - An emergency stop was requested."),
    (67108864, "SPINOUT_DETECTED - A spinout situation was detected."),
    (134217728, "BRAKE_RESISTOR_DISARMED - The brake resistor was disarmed."),
    (268435456, "THERMISTOR_DISCONNECTED - The motor thermistor is disconnected."),
    (1073741824, "CALIBRATION_ERROR - A calibration procedure failed."),
];

/// Render a heartbeat error bitmask as a multi-line description
///
/// One line per set flag, in ascending bit order. A zero mask renders as
/// "No error.".
pub fn describe_errors(bitmask: u32) -> String {
    let lines: Vec<&str> = AXIS_ERROR_FLAGS
        .iter()
        .filter(|(bit, _)| bitmask & bit != 0)
        .map(|(_, desc)| *desc)
        .collect();

    if lines.is_empty() {
        "No error.".to_string()
    } else {
        lines.join("\n")
    }
}
