//! CANSimple Frame Codec
//!
//! Encoders build complete command frames from typed values; decoders
//! validate payload lengths before interpreting bytes and never read out of
//! bounds. All layouts are little-endian, byte-exact against the protocol's
//! opcode table.

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::BufMut;

use crate::axis::RebootAction;
use crate::error::{CanSimpleError, Result};
use crate::frame::{CanFrame, Opcode};
use crate::value::{EndpointValue, EndpointValueType};

/// SDO sub-opcode for a read request (byte 0 of an RxSdo payload)
pub const SDO_OPCODE_READ: u8 = 0x00;
/// SDO sub-opcode for a write request
pub const SDO_OPCODE_WRITE: u8 = 0x01;

const HEARTBEAT_MIN_LEN: usize = 7;
const VERSION_REPLY_LEN: usize = 8;
const SDO_HEADER_LEN: usize = 4;

/// Periodic status report broadcast by a node (opcode 0x01)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Active error bitmask (see [`crate::axis::describe_errors`])
    pub axis_error: u32,
    /// Current axis state machine state
    pub axis_state: u8,
    /// Result code of the last procedure
    pub procedure_result: u8,
    /// Trajectory-done flag
    pub trajectory_done: bool,
}

/// Decoded Get_Version reply (opcode 0x00)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub hw_product_line: u8,
    pub hw_version: u8,
    pub hw_variant: u8,
    pub fw_major: u8,
    pub fw_minor: u8,
    pub fw_revision: u8,
    pub fw_unreleased: bool,
}

impl VersionInfo {
    /// Hardware version as the dotted string used to key endpoint maps
    pub fn hw_string(&self) -> String {
        format!("{}.{}.{}", self.hw_product_line, self.hw_version, self.hw_variant)
    }

    /// Firmware version as the dotted string used to key endpoint maps
    pub fn fw_string(&self) -> String {
        format!("{}.{}.{}", self.fw_major, self.fw_minor, self.fw_revision)
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hw {} fw {}", self.hw_string(), self.fw_string())?;
        if self.fw_unreleased {
            write!(f, " (unreleased)")?;
        }
        Ok(())
    }
}

/// Set_Axis_State command (opcode 0x07)
pub fn encode_state_command(node_id: u8, state: u32) -> CanFrame {
    let mut data = Vec::with_capacity(4);
    data.put_u32_le(state);
    CanFrame::new(node_id, Opcode::SetAxisState, data)
}

/// Set_Input_Vel command (opcode 0x0d): velocity plus torque feedforward
pub fn encode_velocity_command(node_id: u8, velocity: f32, torque_feedforward: f32) -> CanFrame {
    let mut data = Vec::with_capacity(8);
    data.put_f32_le(velocity);
    data.put_f32_le(torque_feedforward);
    CanFrame::new(node_id, Opcode::SetInputVel, data)
}

/// Set_Input_Pos command (opcode 0x0c): position plus velocity and torque
/// feedforward
pub fn encode_position_command(
    node_id: u8,
    position: f32,
    velocity_feedforward: f32,
    torque_feedforward: f32,
) -> CanFrame {
    let mut data = Vec::with_capacity(12);
    data.put_f32_le(position);
    data.put_f32_le(velocity_feedforward);
    data.put_f32_le(torque_feedforward);
    CanFrame::new(node_id, Opcode::SetInputPos, data)
}

/// Clear_Errors command (opcode 0x18)
pub fn encode_clear_errors(node_id: u8, identify: bool) -> CanFrame {
    CanFrame::new(node_id, Opcode::ClearErrors, vec![identify as u8])
}

/// Reboot command (opcode 0x16)
pub fn encode_reboot(node_id: u8, action: RebootAction) -> CanFrame {
    CanFrame::new(node_id, Opcode::Reboot, vec![action as u8])
}

/// Get_Version query (opcode 0x00, empty payload)
pub fn encode_version_query(node_id: u8) -> CanFrame {
    CanFrame::new(node_id, Opcode::GetVersion, Vec::new())
}

/// RxSdo write request: sub-opcode, endpoint id, reserved byte, value
pub fn encode_sdo_write(node_id: u8, endpoint_id: u16, value: &EndpointValue) -> CanFrame {
    let mut data = Vec::with_capacity(SDO_HEADER_LEN + value.value_type().wire_size());
    data.put_u8(SDO_OPCODE_WRITE);
    data.put_u16_le(endpoint_id);
    data.put_u8(0);
    value.encode_into(&mut data);
    CanFrame::new(node_id, Opcode::RxSdo, data)
}

/// RxSdo read request: sub-opcode, endpoint id, reserved byte
pub fn encode_sdo_read(node_id: u8, endpoint_id: u16) -> CanFrame {
    let mut data = Vec::with_capacity(SDO_HEADER_LEN);
    data.put_u8(SDO_OPCODE_READ);
    data.put_u16_le(endpoint_id);
    data.put_u8(0);
    CanFrame::new(node_id, Opcode::RxSdo, data)
}

/// Decode a heartbeat payload (opcode 0x01)
pub fn decode_heartbeat(payload: &[u8]) -> Result<Heartbeat> {
    if payload.len() < HEARTBEAT_MIN_LEN {
        return Err(CanSimpleError::malformed(format!(
            "heartbeat payload too short: {} < {HEARTBEAT_MIN_LEN} bytes",
            payload.len()
        )));
    }

    let mut rdr = Cursor::new(&payload[..HEARTBEAT_MIN_LEN]);
    Ok(Heartbeat {
        axis_error: rdr.read_u32::<LittleEndian>()?,
        axis_state: rdr.read_u8()?,
        procedure_result: rdr.read_u8()?,
        trajectory_done: rdr.read_u8()? != 0,
    })
}

/// Decode a TxSdo reply payload (opcode 0x05) with the endpoint's type
pub fn decode_sdo_reply(payload: &[u8], ty: EndpointValueType) -> Result<EndpointValue> {
    if payload.len() < SDO_HEADER_LEN + ty.wire_size() {
        return Err(CanSimpleError::malformed(format!(
            "SDO reply too short for {}: {} < {} bytes",
            ty,
            payload.len(),
            SDO_HEADER_LEN + ty.wire_size()
        )));
    }

    EndpointValue::decode(ty, &payload[SDO_HEADER_LEN..])
}

/// Endpoint id carried in an SDO request or reply payload
pub fn sdo_endpoint_id(payload: &[u8]) -> Result<u16> {
    if payload.len() < SDO_HEADER_LEN {
        return Err(CanSimpleError::malformed(format!(
            "SDO payload too short: {} < {SDO_HEADER_LEN} bytes",
            payload.len()
        )));
    }
    let mut rdr = Cursor::new(&payload[1..3]);
    Ok(rdr.read_u16::<LittleEndian>()?)
}

/// Decode a Get_Version reply payload (opcode 0x00)
pub fn decode_version_reply(payload: &[u8]) -> Result<VersionInfo> {
    if payload.len() < VERSION_REPLY_LEN {
        return Err(CanSimpleError::malformed(format!(
            "version reply too short: {} < {VERSION_REPLY_LEN} bytes",
            payload.len()
        )));
    }

    // byte 0 is reserved
    Ok(VersionInfo {
        hw_product_line: payload[1],
        hw_version: payload[2],
        hw_variant: payload[3],
        fw_major: payload[4],
        fw_minor: payload[5],
        fw_revision: payload[6],
        fw_unreleased: payload[7] != 0,
    })
}
