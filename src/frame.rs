//! CAN Frame Definition and Routing Keys
//!
//! CANSimple addresses nodes through the standard 11-bit arbitration id:
//! the upper 6 bits carry the node id, the lower 5 bits the command opcode.

use serde::{Deserialize, Serialize};

/// Maximum node id representable in the 6-bit routing field
pub const MAX_NODE_ID: u8 = 0x3F;

/// Classic CAN payload capacity in bytes
pub const CLASSIC_CAN_PAYLOAD: usize = 8;

/// CANSimple command opcodes (lower 5 bits of the arbitration id)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    GetVersion = 0x00,
    Heartbeat = 0x01,
    RxSdo = 0x04,
    TxSdo = 0x05,
    Address = 0x06,
    SetAxisState = 0x07,
    SetInputPos = 0x0C,
    SetInputVel = 0x0D,
    Reboot = 0x16,
    ClearErrors = 0x18,
}

impl Opcode {
    /// Parse a raw 5-bit command id
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(Opcode::GetVersion),
            0x01 => Some(Opcode::Heartbeat),
            0x04 => Some(Opcode::RxSdo),
            0x05 => Some(Opcode::TxSdo),
            0x06 => Some(Opcode::Address),
            0x07 => Some(Opcode::SetAxisState),
            0x0C => Some(Opcode::SetInputPos),
            0x0D => Some(Opcode::SetInputVel),
            0x16 => Some(Opcode::Reboot),
            0x18 => Some(Opcode::ClearErrors),
            _ => None,
        }
    }
}

/// Compose the arbitration id for a node/opcode pair
pub fn routing_key(node_id: u8, opcode: Opcode) -> u32 {
    ((node_id as u32) << 5) | opcode as u32
}

/// CAN frame as exchanged with the transport
///
/// Payloads on classic CAN are 0-8 bytes. The 12-byte position setpoint
/// defined by the byte-exact opcode table exceeds that and is only usable on
/// transports that accept longer payloads (CAN FD or the in-memory bus).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    /// Arbitration id (routing key)
    pub id: u32,
    /// Frame payload
    pub data: Vec<u8>,
    /// Extended 29-bit identifier flag (always false for CANSimple)
    pub is_extended: bool,
}

impl CanFrame {
    /// Create a standard frame addressed to a node/opcode pair
    pub fn new(node_id: u8, opcode: Opcode, data: Vec<u8>) -> Self {
        CanFrame {
            id: routing_key(node_id, opcode),
            data,
            is_extended: false,
        }
    }

    /// Node id carried in the arbitration id
    pub fn node_id(&self) -> u8 {
        (self.id >> 5) as u8
    }

    /// Raw 5-bit command id carried in the arbitration id
    pub fn opcode_raw(&self) -> u8 {
        (self.id & 0x1F) as u8
    }

    /// Decoded command opcode, if known
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_raw(self.opcode_raw())
    }

    /// Data length code
    pub fn dlc(&self) -> u8 {
        self.data.len() as u8
    }
}
