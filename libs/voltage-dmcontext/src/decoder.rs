//! Discriminated decoder
//!
//! Classifies an untyped document fragment into one protocol variant by
//! trying each structured candidate in a fixed order and committing to the
//! first one that admits the fragment. Scalars that no candidate admits fall
//! back to the opaque Custom variant; anything else is a malformed document.
//!
//! Admission is purely structural. Range checks run after commit, so a
//! fragment that is Modbus-shaped but carries `function: 9` is rejected as a
//! configuration error instead of silently sliding to the next candidate.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::debug;

use crate::error::{DmError, Result};

/// Protocol family of an access descriptor or visitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Modbus,
    Opcua,
    Custom,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Modbus => "modbus",
            Self::Opcua => "opcua",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order in which fragments are classified. Custom is the catch-all and
/// must stay last, otherwise it would mask every structured shape.
pub const DECODE_ORDER: [Protocol; 3] = [Protocol::Modbus, Protocol::Opcua, Protocol::Custom];

/// A structured candidate rejected a fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMismatch {
    pub protocol: Protocol,
    pub reason: String,
}

impl fmt::Display for ShapeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.protocol, self.reason)
    }
}

/// A structured candidate: protocol tag plus its admission function
pub struct Candidate<S> {
    pub protocol: Protocol,
    pub admit: fn(&Value) -> std::result::Result<S, String>,
}

/// Outcome of a decode, with the candidates rejected on the way
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    pub value: T,
    pub protocol: Protocol,
    pub mismatches: Vec<ShapeMismatch>,
}

impl<T> Decoded<T> {
    /// True when no structured candidate admitted the fragment
    pub fn fell_back(&self) -> bool {
        self.protocol == Protocol::Custom
    }

    pub fn try_map<U>(self, f: impl FnOnce(T) -> Result<U>) -> Result<Decoded<U>> {
        Ok(Decoded {
            value: f(self.value)?,
            protocol: self.protocol,
            mismatches: self.mismatches,
        })
    }
}

/// Classify `fragment` against `candidates`, falling back to `custom`
pub fn resolve<S>(
    fragment: &Value,
    candidates: &[Candidate<S>],
    custom: fn(String) -> S,
) -> Result<Decoded<S>> {
    if fragment.is_null() {
        return Err(DmError::malformed("empty fragment"));
    }

    let mut mismatches = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match (candidate.admit)(fragment) {
            Ok(shape) => {
                debug!(
                    "Fragment admitted as {} after {} mismatch(es)",
                    candidate.protocol,
                    mismatches.len()
                );
                return Ok(Decoded {
                    value: shape,
                    protocol: candidate.protocol,
                    mismatches,
                });
            },
            Err(reason) => {
                debug!("Shape mismatch for {}: {}", candidate.protocol, reason);
                mismatches.push(ShapeMismatch {
                    protocol: candidate.protocol,
                    reason,
                });
            },
        }
    }

    match scalar_text(fragment) {
        Some(text) => {
            debug!("Fragment '{}' falls back to custom", text);
            Ok(Decoded {
                value: custom(text),
                protocol: Protocol::Custom,
                mismatches,
            })
        },
        None => {
            let reasons = mismatches
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            Err(DmError::malformed(format!(
                "{} matches no protocol shape ({})",
                kind_of(fragment),
                reasons
            )))
        },
    }
}

/// Textual form of a scalar fragment; strings are preserved verbatim
pub fn scalar_text(fragment: &Value) -> Option<String> {
    match fragment {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

// ============================================================================
// Admission helpers
// ============================================================================

fn as_mapping(fragment: &Value) -> std::result::Result<&Map<String, Value>, String> {
    fragment
        .as_object()
        .ok_or_else(|| format!("expected a mapping, found {}", kind_of(fragment)))
}

fn has_key(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).is_some_and(|v| !v.is_null())
}

/// Admit when every key in `required` is present, then deserialize
pub fn admit_all<S: DeserializeOwned>(
    fragment: &Value,
    required: &[&str],
) -> std::result::Result<S, String> {
    let map = as_mapping(fragment)?;
    if let Some(missing) = required.iter().find(|key| !has_key(map, key)) {
        return Err(format!("missing field `{missing}`"));
    }
    S::deserialize(fragment).map_err(|e| e.to_string())
}

/// Admit when at least one key in `any_of` is present, then deserialize
pub fn admit_any<S: DeserializeOwned>(
    fragment: &Value,
    any_of: &[&str],
) -> std::result::Result<S, String> {
    let map = as_mapping(fragment)?;
    if !any_of.iter().any(|key| has_key(map, key)) {
        let names = any_of
            .iter()
            .map(|k| format!("`{k}`"))
            .collect::<Vec<_>>()
            .join(" or ");
        return Err(format!("missing {names}"));
    }
    S::deserialize(fragment).map_err(|e| e.to_string())
}
