//! Custom deserializers shared by the document shapes

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Deserialize an optional field, reading an explicit null as the default
///
/// `#[serde(default)]` only covers a missing key; YAML documents often
/// leave a key present with no value (`scale:`).
pub fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Humantime duration (`"10s"`, `"500ms"`) where null reads as zero
pub fn deserialize_duration_or_zero<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<humantime_serde::Serde<Duration>>::deserialize(deserializer)?
        .map(humantime_serde::Serde::into_inner)
        .unwrap_or_default())
}

/// Custom deserializer for boolean toggles that supports multiple input formats
///
/// Supports native booleans, integers, and string values:
/// - boolean: true, false
/// - integer: 0 (false), 1 (true)
/// - string: "1"/"0", "true"/"false", "yes"/"no" (case-insensitive)
/// - null: false
pub fn deserialize_bool_flexible<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrStringOrInt {
        Bool(bool),
        Int(i64),
        String(String),
    }

    match Option::<BoolOrStringOrInt>::deserialize(deserializer)? {
        None => Ok(false),
        Some(BoolOrStringOrInt::Bool(b)) => Ok(b),
        Some(BoolOrStringOrInt::Int(i)) => match i {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(de::Error::custom(format!(
                "Invalid integer value {}, expected 0 or 1",
                i
            ))),
        },
        Some(BoolOrStringOrInt::String(s)) => match s.to_lowercase().trim() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" | "" => Ok(false),
            other => Err(de::Error::custom(format!(
                "Invalid boolean value '{}', expected: 1/0, true/false, yes/no, or boolean",
                other
            ))),
        },
    }
}

/// Deserialize a scalar (string, number or bool) as its text
///
/// Register addresses are written either quoted (`"40001"`, `"0x10"`) or as
/// bare numbers; both keep the text the driver will parse. Null reads as
/// an empty string.
///
/// Bare numbers are normalized by the YAML/JSON parser before they get
/// here: `1.10` becomes `"1.1"` and YAML `0x10` becomes `"16"`. Quote
/// handles and versions that must keep their exact spelling.
pub fn deserialize_scalar_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(String::new());
    }
    crate::decoder::scalar_text(&value).ok_or_else(|| {
        de::Error::custom(format!(
            "expected a scalar, found {}",
            crate::decoder::kind_of(&value)
        ))
    })
}
