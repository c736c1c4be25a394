//! Typed Endpoint Values
//!
//! Endpoints expose fixed-width little-endian scalars. The type tags here map
//! 1:1 onto the tags used by the device vendor's endpoint map files
//! (`bool`, `uint8` ... `int64`, `float`).

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::error::{CanSimpleError, Result};

/// Wire type of an endpoint value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointValueType {
    Bool,
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Uint64,
    Int64,
    Float,
}

impl EndpointValueType {
    /// Encoded width in bytes
    pub fn wire_size(&self) -> usize {
        match self {
            EndpointValueType::Bool | EndpointValueType::Uint8 | EndpointValueType::Int8 => 1,
            EndpointValueType::Uint16 | EndpointValueType::Int16 => 2,
            EndpointValueType::Uint32 | EndpointValueType::Int32 | EndpointValueType::Float => 4,
            EndpointValueType::Uint64 | EndpointValueType::Int64 => 8,
        }
    }

    /// Type tag as it appears in endpoint map files
    pub fn tag(&self) -> &'static str {
        match self {
            EndpointValueType::Bool => "bool",
            EndpointValueType::Uint8 => "uint8",
            EndpointValueType::Int8 => "int8",
            EndpointValueType::Uint16 => "uint16",
            EndpointValueType::Int16 => "int16",
            EndpointValueType::Uint32 => "uint32",
            EndpointValueType::Int32 => "int32",
            EndpointValueType::Uint64 => "uint64",
            EndpointValueType::Int64 => "int64",
            EndpointValueType::Float => "float",
        }
    }
}

impl fmt::Display for EndpointValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A typed endpoint value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EndpointValue {
    Bool(bool),
    Uint8(u8),
    Int8(i8),
    Uint16(u16),
    Int16(i16),
    Uint32(u32),
    Int32(i32),
    Uint64(u64),
    Int64(i64),
    Float(f32),
}

impl EndpointValue {
    /// Wire type of this value
    pub fn value_type(&self) -> EndpointValueType {
        match self {
            EndpointValue::Bool(_) => EndpointValueType::Bool,
            EndpointValue::Uint8(_) => EndpointValueType::Uint8,
            EndpointValue::Int8(_) => EndpointValueType::Int8,
            EndpointValue::Uint16(_) => EndpointValueType::Uint16,
            EndpointValue::Int16(_) => EndpointValueType::Int16,
            EndpointValue::Uint32(_) => EndpointValueType::Uint32,
            EndpointValue::Int32(_) => EndpointValueType::Int32,
            EndpointValue::Uint64(_) => EndpointValueType::Uint64,
            EndpointValue::Int64(_) => EndpointValueType::Int64,
            EndpointValue::Float(_) => EndpointValueType::Float,
        }
    }

    /// Append the little-endian encoding to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match *self {
            EndpointValue::Bool(v) => buf.put_u8(v as u8),
            EndpointValue::Uint8(v) => buf.put_u8(v),
            EndpointValue::Int8(v) => buf.put_i8(v),
            EndpointValue::Uint16(v) => buf.put_u16_le(v),
            EndpointValue::Int16(v) => buf.put_i16_le(v),
            EndpointValue::Uint32(v) => buf.put_u32_le(v),
            EndpointValue::Int32(v) => buf.put_i32_le(v),
            EndpointValue::Uint64(v) => buf.put_u64_le(v),
            EndpointValue::Int64(v) => buf.put_i64_le(v),
            EndpointValue::Float(v) => buf.put_f32_le(v),
        }
    }

    /// Decode a value of the given type from the start of `bytes`
    pub fn decode(ty: EndpointValueType, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ty.wire_size() {
            return Err(CanSimpleError::malformed(format!(
                "value field too short for {}: {} < {} bytes",
                ty,
                bytes.len(),
                ty.wire_size()
            )));
        }

        let mut rdr = Cursor::new(bytes);
        let value = match ty {
            EndpointValueType::Bool => EndpointValue::Bool(rdr.read_u8()? != 0),
            EndpointValueType::Uint8 => EndpointValue::Uint8(rdr.read_u8()?),
            EndpointValueType::Int8 => EndpointValue::Int8(rdr.read_i8()?),
            EndpointValueType::Uint16 => EndpointValue::Uint16(rdr.read_u16::<LittleEndian>()?),
            EndpointValueType::Int16 => EndpointValue::Int16(rdr.read_i16::<LittleEndian>()?),
            EndpointValueType::Uint32 => EndpointValue::Uint32(rdr.read_u32::<LittleEndian>()?),
            EndpointValueType::Int32 => EndpointValue::Int32(rdr.read_i32::<LittleEndian>()?),
            EndpointValueType::Uint64 => EndpointValue::Uint64(rdr.read_u64::<LittleEndian>()?),
            EndpointValueType::Int64 => EndpointValue::Int64(rdr.read_i64::<LittleEndian>()?),
            EndpointValueType::Float => EndpointValue::Float(rdr.read_f32::<LittleEndian>()?),
        };
        Ok(value)
    }

    /// Convert a JSON configuration value into a typed endpoint value
    ///
    /// Floats are truncated to f32 here, so the stored value already matches
    /// what the device will echo back on readout. Range overflows and type
    /// mismatches are `InvalidData`.
    pub fn from_json(ty: EndpointValueType, raw: &serde_json::Value) -> Result<Self> {
        let mismatch = || {
            CanSimpleError::invalid_data(format!("cannot represent {raw} as endpoint type {ty}"))
        };

        let value = match ty {
            EndpointValueType::Bool => EndpointValue::Bool(raw.as_bool().ok_or_else(mismatch)?),
            EndpointValueType::Uint8 => EndpointValue::Uint8(
                raw.as_u64()
                    .and_then(|v| u8::try_from(v).ok())
                    .ok_or_else(mismatch)?,
            ),
            EndpointValueType::Int8 => EndpointValue::Int8(
                raw.as_i64()
                    .and_then(|v| i8::try_from(v).ok())
                    .ok_or_else(mismatch)?,
            ),
            EndpointValueType::Uint16 => EndpointValue::Uint16(
                raw.as_u64()
                    .and_then(|v| u16::try_from(v).ok())
                    .ok_or_else(mismatch)?,
            ),
            EndpointValueType::Int16 => EndpointValue::Int16(
                raw.as_i64()
                    .and_then(|v| i16::try_from(v).ok())
                    .ok_or_else(mismatch)?,
            ),
            EndpointValueType::Uint32 => EndpointValue::Uint32(
                raw.as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(mismatch)?,
            ),
            EndpointValueType::Int32 => EndpointValue::Int32(
                raw.as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(mismatch)?,
            ),
            EndpointValueType::Uint64 => {
                EndpointValue::Uint64(raw.as_u64().ok_or_else(mismatch)?)
            },
            EndpointValueType::Int64 => EndpointValue::Int64(raw.as_i64().ok_or_else(mismatch)?),
            EndpointValueType::Float => {
                EndpointValue::Float(raw.as_f64().ok_or_else(mismatch)? as f32)
            },
        };
        Ok(value)
    }

    /// Check a readback against this written value
    ///
    /// Exact equality for integers and bools. Floats compare equal when both
    /// are NaN; any other difference is a verification failure.
    pub fn verifies_against(&self, readback: &EndpointValue) -> bool {
        match (self, readback) {
            (EndpointValue::Float(a), EndpointValue::Float(b)) => {
                a == b || (a.is_nan() && b.is_nan())
            },
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for EndpointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointValue::Bool(v) => write!(f, "{v}"),
            EndpointValue::Uint8(v) => write!(f, "{v}"),
            EndpointValue::Int8(v) => write!(f, "{v}"),
            EndpointValue::Uint16(v) => write!(f, "{v}"),
            EndpointValue::Int16(v) => write!(f, "{v}"),
            EndpointValue::Uint32(v) => write!(f, "{v}"),
            EndpointValue::Int32(v) => write!(f, "{v}"),
            EndpointValue::Uint64(v) => write!(f, "{v}"),
            EndpointValue::Int64(v) => write!(f, "{v}"),
            EndpointValue::Float(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(value: EndpointValue) {
        let mut buf = Vec::new();
        value.encode_into(&mut buf);
        assert_eq!(buf.len(), value.value_type().wire_size());
        let decoded = EndpointValue::decode(value.value_type(), &buf).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        roundtrip(EndpointValue::Bool(true));
        roundtrip(EndpointValue::Uint8(0xAB));
        roundtrip(EndpointValue::Int8(-5));
        roundtrip(EndpointValue::Uint16(0xBEEF));
        roundtrip(EndpointValue::Int16(-12345));
        roundtrip(EndpointValue::Uint32(0xDEADBEEF));
        roundtrip(EndpointValue::Int32(-100_000));
        roundtrip(EndpointValue::Uint64(u64::MAX - 1));
        roundtrip(EndpointValue::Int64(i64::MIN + 1));
        roundtrip(EndpointValue::Float(3.5));
    }

    #[test]
    fn test_little_endian_layout() {
        let mut buf = Vec::new();
        EndpointValue::Uint32(0x0403_0201).encode_into(&mut buf);
        assert_eq!(buf, vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_decode_short_payload() {
        let err = EndpointValue::decode(EndpointValueType::Uint32, &[1, 2]).unwrap_err();
        assert!(matches!(err, CanSimpleError::MalformedFrame(_)));
    }

    #[test]
    fn test_type_tags_match_map_format() {
        assert_eq!(
            serde_json::to_string(&EndpointValueType::Uint32).unwrap(),
            "\"uint32\""
        );
        let ty: EndpointValueType = serde_json::from_str("\"float\"").unwrap();
        assert_eq!(ty, EndpointValueType::Float);
    }

    #[test]
    fn test_from_json_range_checks() {
        let v = EndpointValue::from_json(EndpointValueType::Uint8, &json!(200)).unwrap();
        assert_eq!(v, EndpointValue::Uint8(200));

        assert!(EndpointValue::from_json(EndpointValueType::Uint8, &json!(256)).is_err());
        assert!(EndpointValue::from_json(EndpointValueType::Int16, &json!(40000)).is_err());
        assert!(EndpointValue::from_json(EndpointValueType::Bool, &json!(1)).is_err());
        assert!(EndpointValue::from_json(EndpointValueType::Uint32, &json!(-1)).is_err());
    }

    #[test]
    fn test_from_json_float_truncation() {
        // Double-precision inputs are pruned to f32 at conversion time
        let v = EndpointValue::from_json(EndpointValueType::Float, &json!(0.1)).unwrap();
        assert_eq!(v, EndpointValue::Float(0.1f64 as f32));
    }

    #[test]
    fn test_verification_equality() {
        let nan = EndpointValue::Float(f32::NAN);
        assert!(nan.verifies_against(&EndpointValue::Float(f32::NAN)));
        assert!(!nan.verifies_against(&EndpointValue::Float(1.0)));
        assert!(!EndpointValue::Float(1.0).verifies_against(&nan));
        assert!(EndpointValue::Uint32(7).verifies_against(&EndpointValue::Uint32(7)));
        assert!(!EndpointValue::Uint32(7).verifies_against(&EndpointValue::Uint32(8)));
        assert!(!EndpointValue::Uint32(7).verifies_against(&EndpointValue::Int32(7)));
    }
}
