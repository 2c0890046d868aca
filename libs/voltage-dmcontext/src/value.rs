//! Protocol value model
//!
//! The typed scalar domain a property value can take, and the coercion rules
//! used when a native value (OPC-UA) is mapped onto a declared type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DmError, Result};

// ============================================================================
// Scalar Types
// ============================================================================

/// Scalar domain of a property or visitor `type` tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bool,
}

impl ScalarType {
    /// Parse a type tag. Tags are exact and lowercase.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "int16" => Some(Self::Int16),
            "int32" => Some(Self::Int32),
            "int64" => Some(Self::Int64),
            "float32" => Some(Self::Float32),
            "float64" => Some(Self::Float64),
            "string" => Some(Self::String),
            "bool" => Some(Self::Bool),
            _ => None,
        }
    }

    /// Parse an optional tag where the empty string means "unspecified"
    pub fn parse_tag(s: &str) -> Result<Option<Self>> {
        if s.is_empty() {
            return Ok(None);
        }
        Self::parse(s)
            .map(Some)
            .ok_or_else(|| DmError::unknown_type(s))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::String => "string",
            Self::Bool => "bool",
        }
    }

    /// Number of 16-bit registers for fixed-width types
    pub fn register_count(&self) -> Option<u16> {
        match self {
            Self::Int16 => Some(1),
            Self::Int32 | Self::Float32 => Some(2),
            Self::Int64 | Self::Float64 => Some(4),
            Self::String | Self::Bool => None,
        }
    }

    /// Check if this is a numeric type (scale applies)
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::String | Self::Bool)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int16 | Self::Int32 | Self::Int64)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScalarType {
    type Err = DmError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| DmError::unknown_type(s))
    }
}

// ============================================================================
// Typed Values
// ============================================================================

/// Typed application value produced by a visitor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProtocolValue {
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bool(bool),
}

impl ProtocolValue {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Self::Int16(_) => ScalarType::Int16,
            Self::Int32(_) => ScalarType::Int32,
            Self::Int64(_) => ScalarType::Int64,
            Self::Float32(_) => ScalarType::Float32,
            Self::Float64(_) => ScalarType::Float64,
            Self::String(_) => ScalarType::String,
            Self::Bool(_) => ScalarType::Bool,
        }
    }

    /// Numeric view as f64 (bools map to 0/1, strings are not numeric)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int16(v) => Some(f64::from(*v)),
            Self::Int32(v) => Some(f64::from(*v)),
            Self::Int64(v) => Some(*v as f64),
            Self::Float32(v) => Some(f64::from(*v)),
            Self::Float64(v) => Some(*v),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::String(_) => None,
        }
    }

    /// Exact integer view; floats only when finite, truncated toward zero
    fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int16(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            Self::Float32(_) | Self::Float64(_) => {
                let f = self.as_f64()?.trunc();
                if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 {
                    Some(f as i64)
                } else {
                    None
                }
            },
            Self::Bool(b) => Some(i64::from(*b)),
            Self::String(s) => s.trim().parse::<i64>().ok(),
        }
    }

    fn truthy(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::String(s) => match s.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" => Some(true),
                "0" | "false" | "no" => Some(false),
                _ => None,
            },
            other => other.as_f64().map(|v| v != 0.0),
        }
    }

    /// Coerce into `target`, rejecting lossy integer narrowing
    pub fn coerce(self, target: ScalarType) -> Result<ProtocolValue> {
        if self.scalar_type() == target {
            return Ok(self);
        }
        let fail = |v: &ProtocolValue| DmError::coercion(v, target);
        let coerced = match target {
            ScalarType::Int16 => self
                .as_i64()
                .and_then(|v| i16::try_from(v).ok())
                .map(ProtocolValue::Int16),
            ScalarType::Int32 => self
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(ProtocolValue::Int32),
            ScalarType::Int64 => self.as_i64().map(ProtocolValue::Int64),
            ScalarType::Float32 => self
                .float_view()
                .map(|v| ProtocolValue::Float32(v as f32)),
            ScalarType::Float64 => self.float_view().map(ProtocolValue::Float64),
            ScalarType::String => Some(ProtocolValue::String(self.to_string())),
            ScalarType::Bool => self.truthy().map(ProtocolValue::Bool),
        };
        coerced.ok_or_else(|| fail(&self))
    }

    fn float_view(&self) -> Option<f64> {
        match self {
            Self::String(s) => s.trim().parse::<f64>().ok(),
            other => other.as_f64(),
        }
    }
}

impl fmt::Display for ProtocolValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float32(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}
