//! Access descriptors
//!
//! Per-device connection parameters. A fragment is decoded into exactly one of
//! [`ModbusAccess`], [`OpcuaAccess`] or [`CustomAccess`]; the union is an enum
//! so the mutual exclusivity holds by construction.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::decoder::{self, Candidate, Decoded, Protocol};
use crate::error::{DmError, Result};
use crate::serde_helpers::{deserialize_duration_or_zero, deserialize_null_default};

// ============================================================================
// Defaults
// ============================================================================

/// Default Modbus response timeout
pub const DEFAULT_MODBUS_TIMEOUT: Duration = Duration::from_secs(10);

/// Default Modbus idle timeout before the link is closed
pub const DEFAULT_MODBUS_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default RTU baud rate
pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// Default RTU data bits
pub const DEFAULT_DATA_BITS: u8 = 8;

/// Default RTU stop bits
pub const DEFAULT_STOP_BITS: u8 = 1;

// ============================================================================
// Access Descriptor
// ============================================================================

/// Per-device access descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AccessConfig {
    Modbus(ModbusAccess),
    Opcua(OpcuaAccess),
    Custom(CustomAccess),
}

impl AccessConfig {
    /// Decode an access fragment (Modbus, then OPC-UA, then Custom)
    pub fn decode(fragment: &Value) -> Result<Self> {
        Self::decode_traced(fragment).map(|decoded| decoded.value)
    }

    /// Decode and keep the rejected candidates for diagnostics
    pub fn decode_traced(fragment: &Value) -> Result<Decoded<Self>> {
        decoder::resolve(fragment, &ACCESS_CANDIDATES, AccessShape::Custom)?
            .try_map(AccessShape::validate)
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Modbus(_) => Protocol::Modbus,
            Self::Opcua(_) => Protocol::Opcua,
            Self::Custom(_) => Protocol::Custom,
        }
    }

    pub fn as_modbus(&self) -> Option<&ModbusAccess> {
        match self {
            Self::Modbus(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_opcua(&self) -> Option<&OpcuaAccess> {
        match self {
            Self::Opcua(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_custom(&self) -> Option<&CustomAccess> {
        match self {
            Self::Custom(c) => Some(c),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for AccessConfig {
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

/// Modbus access parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModbusAccess {
    /// Unit (slave) identifier
    pub id: u8,
    /// Polling interval, zero lets the engine decide
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(rename = "idletimeout", with = "humantime_serde")]
    pub idle_timeout: Duration,
    #[serde(flatten)]
    pub transport: ModbusTransport,
}

/// Modbus transport, serialized as a `tcp` or `rtu` key
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModbusTransport {
    Tcp(TcpConfig),
    Rtu(RtuConfig),
}

impl ModbusTransport {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tcp(_) => "tcp",
            Self::Rtu(_) => "rtu",
        }
    }
}

impl fmt::Display for ModbusTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(tcp) => write!(f, "tcp://{}:{}", tcp.address, tcp.port),
            Self::Rtu(rtu) => write!(
                f,
                "rtu://{} {} {}{}{}",
                rtu.port,
                rtu.baudrate,
                rtu.databit,
                rtu.parity.as_str(),
                rtu.stopbit
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TcpConfig {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RtuConfig {
    /// Serial device path
    pub port: String,
    pub baudrate: u32,
    pub parity: Parity,
    pub databit: u8,
    pub stopbit: u8,
}

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Parity {
    #[default]
    #[serde(rename = "E")]
    Even,
    #[serde(rename = "N")]
    None,
    #[serde(rename = "O")]
    Odd,
}

impl Parity {
    /// Parse a parity letter, empty means the default (even)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" | "E" => Some(Self::Even),
            "N" => Some(Self::None),
            "O" => Some(Self::Odd),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Even => "E",
            Self::None => "N",
            Self::Odd => "O",
        }
    }
}

// ============================================================================
// OPC-UA
// ============================================================================

/// OPC-UA access parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpcuaAccess {
    pub id: u8,
    pub endpoint: String,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub security: OpcuaSecurity,
    pub auth: OpcuaAuth,
    pub certificate: OpcuaCertificate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpcuaSecurity {
    #[serde(deserialize_with = "deserialize_null_default")]
    pub policy: String,
    #[serde(deserialize_with = "deserialize_null_default")]
    pub mode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpcuaAuth {
    #[serde(deserialize_with = "deserialize_null_default")]
    pub username: String,
    #[serde(
        skip_serializing_if = "String::is_empty",
        deserialize_with = "deserialize_null_default"
    )]
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpcuaCertificate {
    #[serde(rename = "certFile", deserialize_with = "deserialize_null_default")]
    pub cert_file: String,
    #[serde(rename = "keyFile", deserialize_with = "deserialize_null_default")]
    pub key_file: String,
}

// ============================================================================
// Custom
// ============================================================================

/// Opaque handle interpreted by a custom driver
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CustomAccess(pub String);

impl CustomAccess {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Document shapes
// ============================================================================

/// Candidate shapes tried in [`decoder::DECODE_ORDER`]
pub(crate) const ACCESS_CANDIDATES: [Candidate<AccessShape>; 2] = [
    Candidate {
        protocol: Protocol::Modbus,
        admit: admit_modbus,
    },
    Candidate {
        protocol: Protocol::Opcua,
        admit: admit_opcua,
    },
];

fn admit_modbus(fragment: &Value) -> std::result::Result<AccessShape, String> {
    decoder::admit_any(fragment, &["tcp", "rtu"]).map(AccessShape::Modbus)
}

fn admit_opcua(fragment: &Value) -> std::result::Result<AccessShape, String> {
    decoder::admit_all(fragment, &["endpoint"]).map(AccessShape::Opcua)
}

pub(crate) enum AccessShape {
    Modbus(ModbusAccessShape),
    Opcua(OpcuaAccessShape),
    Custom(String),
}

impl AccessShape {
    fn validate(self) -> Result<AccessConfig> {
        match self {
            Self::Modbus(shape) => shape.validate().map(AccessConfig::Modbus),
            Self::Opcua(shape) => shape.validate().map(AccessConfig::Opcua),
            Self::Custom(raw) => Ok(AccessConfig::Custom(CustomAccess(raw))),
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct ModbusAccessShape {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    id: i64,
    #[serde(default, deserialize_with = "deserialize_duration_or_zero")]
    interval: Duration,
    #[serde(default, deserialize_with = "deserialize_duration_or_zero")]
    timeout: Duration,
    #[serde(
        default,
        alias = "idleTimeout",
        deserialize_with = "deserialize_duration_or_zero"
    )]
    idletimeout: Duration,
    tcp: Option<TcpShape>,
    rtu: Option<RtuShape>,
}

#[derive(Deserialize)]
struct TcpShape {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    address: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    port: i64,
}

#[derive(Deserialize)]
struct RtuShape {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    port: String,
    #[serde(default, alias = "baudRate", deserialize_with = "deserialize_null_default")]
    baudrate: i64,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    parity: String,
    #[serde(default, alias = "dataBit", deserialize_with = "deserialize_null_default")]
    databit: i64,
    #[serde(default, alias = "stopBit", deserialize_with = "deserialize_null_default")]
    stopbit: i64,
}

#[derive(Deserialize)]
pub(crate) struct OpcuaAccessShape {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    id: i64,
    endpoint: String,
    #[serde(default, deserialize_with = "deserialize_duration_or_zero")]
    interval: Duration,
    #[serde(default, deserialize_with = "deserialize_duration_or_zero")]
    timeout: Duration,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    security: OpcuaSecurity,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    auth: OpcuaAuth,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    certificate: OpcuaCertificate,
}

/// Check `value` lies in `[min, max]`
pub(crate) fn bounded(field: &str, value: i64, min: i64, max: i64) -> Result<i64> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(DmError::range(
            field,
            format!("must be within [{min}, {max}], got {value}"),
        ))
    }
}

fn or_default(value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        default
    } else {
        value
    }
}

impl ModbusAccessShape {
    fn validate(self) -> Result<ModbusAccess> {
        let id = bounded("id", self.id, 0, i64::from(u8::MAX))? as u8;
        let transport = match (self.tcp, self.rtu) {
            (Some(tcp), None) => ModbusTransport::Tcp(tcp.validate().map_err(|e| e.at("tcp"))?),
            (None, Some(rtu)) => ModbusTransport::Rtu(rtu.validate().map_err(|e| e.at("rtu"))?),
            (Some(_), Some(_)) => {
                return Err(DmError::range(
                    "transport",
                    "must set exactly one of `tcp` and `rtu`",
                ))
            },
            // Admission requires one of the two keys
            (None, None) => return Err(DmError::malformed("missing `tcp` or `rtu`")),
        };

        Ok(ModbusAccess {
            id,
            interval: self.interval,
            timeout: or_default(self.timeout, DEFAULT_MODBUS_TIMEOUT),
            idle_timeout: or_default(self.idletimeout, DEFAULT_MODBUS_IDLE_TIMEOUT),
            transport,
        })
    }
}

impl TcpShape {
    fn validate(self) -> Result<TcpConfig> {
        if self.address.trim().is_empty() {
            return Err(DmError::range("address", "is required"));
        }
        if self.port == 0 {
            return Err(DmError::range("port", "is required"));
        }
        let port = bounded("port", self.port, 1, i64::from(u16::MAX))? as u16;
        Ok(TcpConfig {
            address: self.address,
            port,
        })
    }
}

impl RtuShape {
    fn validate(self) -> Result<RtuConfig> {
        if self.port.trim().is_empty() {
            return Err(DmError::range("port", "is required"));
        }
        let baudrate = match self.baudrate {
            0 => DEFAULT_BAUD_RATE,
            b => bounded("baudrate", b, 1, i64::from(u32::MAX))? as u32,
        };
        let parity = Parity::parse(&self.parity).ok_or_else(|| {
            DmError::range("parity", format!("must be one of E, N, O, got '{}'", self.parity))
        })?;
        let databit = match self.databit {
            0 => DEFAULT_DATA_BITS,
            d => bounded("databit", d, 5, 8)? as u8,
        };
        let stopbit = match self.stopbit {
            0 => DEFAULT_STOP_BITS,
            s => bounded("stopbit", s, 1, 2)? as u8,
        };

        Ok(RtuConfig {
            port: self.port,
            baudrate,
            parity,
            databit,
            stopbit,
        })
    }
}

impl OpcuaAccessShape {
    fn validate(self) -> Result<OpcuaAccess> {
        if self.endpoint.trim().is_empty() {
            return Err(DmError::range("endpoint", "is required"));
        }
        Ok(OpcuaAccess {
            id: bounded("id", self.id, 0, i64::from(u8::MAX))? as u8,
            endpoint: self.endpoint,
            interval: self.interval,
            timeout: self.timeout,
            security: self.security,
            auth: self.auth,
            certificate: self.certificate,
        })
    }
}
