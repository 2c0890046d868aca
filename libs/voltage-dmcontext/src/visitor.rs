//! Property visitors
//!
//! A visitor tells the driver where a property lives on the device and how
//! the raw wire value becomes a typed [`ProtocolValue`].
//!
//! # Modbus read transform
//!
//! 1. Take the first `quantity` words of the register buffer
//! 2. `swapRegister` reverses the word order
//! 3. `swapByte` reverses the two bytes of every word
//! 4. Reinterpret the bytes (big-endian) as the declared type
//! 5. Numeric types with a non-zero `scale` are multiplied and become `Float64`
//!
//! A `scale` of zero means "no scaling", the same as leaving it out.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::access::bounded;
use crate::bytes::{bytes_to_regs, regs_to_bytes, ByteOrder};
use crate::decoder::{self, Candidate, Decoded, Protocol};
use crate::error::{DmError, Result};
use crate::serde_helpers::{
    deserialize_bool_flexible, deserialize_null_default, deserialize_scalar_text,
};
use crate::value::{ProtocolValue, ScalarType};

// ============================================================================
// Property Visitor
// ============================================================================

/// Per-property visitor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyVisitor {
    Modbus(ModbusVisitor),
    Opcua(OpcuaVisitor),
    Custom(CustomVisitor),
}

impl PropertyVisitor {
    /// Decode a visitor fragment (Modbus, then OPC-UA, then Custom)
    pub fn decode(fragment: &Value) -> Result<Self> {
        Self::decode_traced(fragment, None).map(|decoded| decoded.value)
    }

    /// Decode with the owning property's type used when the visitor omits one
    pub fn decode_traced(
        fragment: &Value,
        inherited: Option<ScalarType>,
    ) -> Result<Decoded<Self>> {
        decoder::resolve(fragment, &VISITOR_CANDIDATES, VisitorShape::Custom)?
            .try_map(|shape| shape.validate(inherited))
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Modbus(_) => Protocol::Modbus,
            Self::Opcua(_) => Protocol::Opcua,
            Self::Custom(_) => Protocol::Custom,
        }
    }

    pub fn as_modbus(&self) -> Option<&ModbusVisitor> {
        match self {
            Self::Modbus(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_opcua(&self) -> Option<&OpcuaVisitor> {
        match self {
            Self::Opcua(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_custom(&self) -> Option<&CustomVisitor> {
        match self {
            Self::Custom(c) => Some(c),
            _ => None,
        }
    }

    /// Value type the visitor produces, if it is known
    pub fn data_type(&self) -> Option<ScalarType> {
        match self {
            Self::Modbus(m) => Some(m.data_type),
            Self::Opcua(o) => o.data_type,
            Self::Custom(_) => None,
        }
    }
}

impl<'de> Deserialize<'de> for PropertyVisitor {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let fragment = Value::deserialize(deserializer)?;
        Self::decode(&fragment).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Modbus
// ============================================================================

/// Modbus function code, limited to the four read tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    ReadCoils = 1,
    ReadDiscreteInputs = 2,
    ReadHoldingRegisters = 3,
    ReadInputRegisters = 4,
}

impl FunctionCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::ReadCoils),
            2 => Some(Self::ReadDiscreteInputs),
            3 => Some(Self::ReadHoldingRegisters),
            4 => Some(Self::ReadInputRegisters),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Coils and discrete inputs carry bits, the others 16-bit registers
    pub fn is_bit_access(&self) -> bool {
        matches!(self, Self::ReadCoils | Self::ReadDiscreteInputs)
    }

    /// Discrete inputs and input registers cannot be written
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::ReadCoils | Self::ReadHoldingRegisters)
    }

    /// Type used when neither the visitor nor the property declares one
    pub fn default_type(&self) -> ScalarType {
        if self.is_bit_access() {
            ScalarType::Bool
        } else {
            ScalarType::Int16
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for FunctionCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Modbus visitor, fully resolved: type and quantity are always known
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModbusVisitor {
    pub function: FunctionCode,
    /// Driver-specific address text, not interpreted here
    pub address: String,
    pub quantity: u16,
    #[serde(rename = "type")]
    pub data_type: ScalarType,
    pub scale: f64,
    #[serde(rename = "swapByte")]
    pub swap_byte: bool,
    #[serde(rename = "swapRegister")]
    pub swap_register: bool,
}

impl ModbusVisitor {
    pub fn byte_order(&self) -> ByteOrder {
        ByteOrder::from_swaps(self.swap_register, self.swap_byte)
    }

    fn is_scaled(&self) -> bool {
        self.data_type.is_numeric() && self.scale != 0.0
    }

    /// Transform a raw register buffer into the property value
    pub fn decode(&self, raw: &[u16]) -> Result<ProtocolValue> {
        let needed = usize::from(self.quantity);
        let words = raw.get(..needed).ok_or(DmError::InsufficientData {
            needed,
            available: raw.len(),
        })?;
        let bytes = regs_to_bytes(words, self.byte_order());

        let value = match self.data_type {
            ScalarType::Int16 => ProtocolValue::Int16(i16::from_be_bytes(self.fixed(&bytes)?)),
            ScalarType::Int32 => ProtocolValue::Int32(i32::from_be_bytes(self.fixed(&bytes)?)),
            ScalarType::Int64 => ProtocolValue::Int64(i64::from_be_bytes(self.fixed(&bytes)?)),
            ScalarType::Float32 => {
                ProtocolValue::Float32(f32::from_be_bytes(self.fixed(&bytes)?))
            },
            ScalarType::Float64 => {
                ProtocolValue::Float64(f64::from_be_bytes(self.fixed(&bytes)?))
            },
            ScalarType::String => {
                let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
                ProtocolValue::String(String::from_utf8_lossy(&bytes[..end]).into_owned())
            },
            ScalarType::Bool => ProtocolValue::Bool(bytes.iter().any(|b| *b != 0)),
        };

        if !self.is_scaled() {
            return Ok(value);
        }
        match value.as_f64() {
            Some(raw) => Ok(ProtocolValue::Float64(raw * self.scale)),
            None => Ok(value),
        }
    }

    /// Transform a property value into the registers to write
    ///
    /// Inverse of [`decode`](Self::decode): the value is divided by a
    /// non-zero scale (rounded for integer types), converted to the declared
    /// type and laid out with the same swaps.
    pub fn encode(&self, value: &ProtocolValue) -> Result<Vec<u16>> {
        let value = if self.is_scaled() {
            let numeric = value
                .clone()
                .coerce(ScalarType::Float64)?
                .as_f64()
                .ok_or_else(|| DmError::coercion(value, self.data_type))?;
            let unscaled = numeric / self.scale;
            if self.data_type.is_integer() {
                ProtocolValue::Float64(unscaled.round())
            } else {
                ProtocolValue::Float64(unscaled)
            }
        } else {
            value.clone()
        };

        let width = usize::from(self.quantity) * 2;
        let bytes = match value.coerce(self.data_type)? {
            ProtocolValue::Int16(v) => v.to_be_bytes().to_vec(),
            ProtocolValue::Int32(v) => v.to_be_bytes().to_vec(),
            ProtocolValue::Int64(v) => v.to_be_bytes().to_vec(),
            ProtocolValue::Float32(v) => v.to_be_bytes().to_vec(),
            ProtocolValue::Float64(v) => v.to_be_bytes().to_vec(),
            ProtocolValue::String(s) => {
                if s.len() > width {
                    return Err(DmError::coercion(
                        format!("'{s}' ({} bytes, room for {width})", s.len()),
                        ScalarType::String,
                    ));
                }
                let mut bytes = s.into_bytes();
                bytes.resize(width, 0);
                bytes
            },
            ProtocolValue::Bool(b) => {
                let mut bytes = vec![0u8; width];
                if let Some(last) = bytes.last_mut() {
                    *last = u8::from(b);
                }
                bytes
            },
        };

        Ok(bytes_to_regs(&bytes, self.byte_order()))
    }

    fn fixed<const N: usize>(&self, bytes: &[u8]) -> Result<[u8; N]> {
        bytes
            .get(..N)
            .and_then(|slice| slice.try_into().ok())
            .ok_or_else(|| {
                DmError::width(self.data_type, (N / 2) as u16, self.quantity)
            })
    }
}

// ============================================================================
// OPC-UA
// ============================================================================

/// OPC-UA visitor; values arrive typed, so only coercion applies
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpcuaVisitor {
    #[serde(rename = "nodeid")]
    pub node_id: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub data_type: Option<ScalarType>,
}

impl OpcuaVisitor {
    /// Coerce a node's native value to the declared type (pass-through if none)
    pub fn coerce(&self, native: ProtocolValue) -> Result<ProtocolValue> {
        match self.data_type {
            Some(target) => native.coerce(target),
            None => Ok(native),
        }
    }
}

// ============================================================================
// Custom
// ============================================================================

/// Opaque visitor interpreted by a custom driver
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CustomVisitor(pub String);

impl CustomVisitor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Document shapes
// ============================================================================

/// Candidate shapes tried in [`decoder::DECODE_ORDER`]
pub(crate) const VISITOR_CANDIDATES: [Candidate<VisitorShape>; 2] = [
    Candidate {
        protocol: Protocol::Modbus,
        admit: admit_modbus,
    },
    Candidate {
        protocol: Protocol::Opcua,
        admit: admit_opcua,
    },
];

fn admit_modbus(fragment: &Value) -> std::result::Result<VisitorShape, String> {
    decoder::admit_all(fragment, &["function", "address"]).map(VisitorShape::Modbus)
}

fn admit_opcua(fragment: &Value) -> std::result::Result<VisitorShape, String> {
    decoder::admit_all(fragment, &["nodeid"]).map(VisitorShape::Opcua)
}

pub(crate) enum VisitorShape {
    Modbus(ModbusVisitorShape),
    Opcua(OpcuaVisitorShape),
    Custom(String),
}

impl VisitorShape {
    fn validate(self, inherited: Option<ScalarType>) -> Result<PropertyVisitor> {
        match self {
            Self::Modbus(shape) => shape.validate(inherited).map(PropertyVisitor::Modbus),
            Self::Opcua(shape) => shape.validate(inherited).map(PropertyVisitor::Opcua),
            Self::Custom(raw) => Ok(PropertyVisitor::Custom(CustomVisitor(raw))),
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct ModbusVisitorShape {
    function: i64,
    #[serde(deserialize_with = "deserialize_scalar_text")]
    address: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    quantity: i64,
    #[serde(default, rename = "type", deserialize_with = "deserialize_null_default")]
    type_tag: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    scale: f64,
    #[serde(
        default,
        rename = "swapByte",
        alias = "swapbyte",
        deserialize_with = "deserialize_bool_flexible"
    )]
    swap_byte: bool,
    #[serde(
        default,
        rename = "swapRegister",
        alias = "swapregister",
        deserialize_with = "deserialize_bool_flexible"
    )]
    swap_register: bool,
}

#[derive(Deserialize)]
pub(crate) struct OpcuaVisitorShape {
    #[serde(alias = "nodeId")]
    nodeid: String,
    #[serde(default, rename = "type", deserialize_with = "deserialize_null_default")]
    type_tag: String,
}

impl ModbusVisitorShape {
    fn validate(self, inherited: Option<ScalarType>) -> Result<ModbusVisitor> {
        let code = bounded("function", self.function, 1, 4)? as u8;
        let function = FunctionCode::from_u8(code)
            .ok_or_else(|| DmError::range("function", format!("unsupported code {code}")))?;

        let declared = ScalarType::parse_tag(&self.type_tag).map_err(|e| e.at("type"))?;
        let data_type = declared
            .or(inherited)
            .unwrap_or_else(|| function.default_type());

        let quantity = match bounded("quantity", self.quantity, 0, i64::from(u16::MAX))? as u16 {
            0 => match data_type {
                ScalarType::Bool => 1,
                ScalarType::String => {
                    return Err(DmError::range("quantity", "is required for string values"))
                },
                fixed => fixed.register_count().unwrap_or(1),
            },
            q => q,
        };
        if let Some(expected) = data_type.register_count() {
            if expected != quantity {
                return Err(DmError::width(data_type, expected, quantity).at("quantity"));
            }
        }

        if !self.scale.is_finite() {
            return Err(DmError::range("scale", "must be a finite number"));
        }

        Ok(ModbusVisitor {
            function,
            address: self.address,
            quantity,
            data_type,
            scale: self.scale,
            swap_byte: self.swap_byte,
            swap_register: self.swap_register,
        })
    }
}

impl OpcuaVisitorShape {
    fn validate(self, inherited: Option<ScalarType>) -> Result<OpcuaVisitor> {
        if self.nodeid.trim().is_empty() {
            return Err(DmError::range("nodeid", "is required"));
        }
        let declared = ScalarType::parse_tag(&self.type_tag).map_err(|e| e.at("type"))?;
        Ok(OpcuaVisitor {
            node_id: self.nodeid,
            data_type: declared.or(inherited),
        })
    }
}
