//! Device/property aggregate
//!
//! The decoded driver configuration: devices with their access descriptor and
//! their ordered properties, each owning a visitor. Construction is a single
//! fold over the document; any load error aborts the whole load.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

use crate::access::AccessConfig;
use crate::decoder::{kind_of, Protocol};
use crate::error::{DmError, Result};
use crate::serde_helpers::{deserialize_null_default, deserialize_scalar_text};
use crate::value::{ProtocolValue, ScalarType};
use crate::visitor::PropertyVisitor;

// ============================================================================
// Driver Configuration
// ============================================================================

/// Top-level driver configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriverConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub driver: String,
    pub devices: Vec<DeviceInfo>,
}

impl DriverConfig {
    /// Decode a configuration document already parsed into a generic tree
    pub fn from_value(document: &Value) -> Result<Self> {
        let map = match document {
            // An empty file has nothing to configure
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => {
                return Err(DmError::malformed(format!(
                    "expected a mapping at document root, found {}",
                    kind_of(other)
                )))
            },
        };

        let driver = match map.get("driver") {
            None | Some(Value::Null) => String::new(),
            Some(value) => crate::decoder::scalar_text(value).ok_or_else(|| {
                DmError::malformed(format!("expected a string, found {}", kind_of(value)))
                    .at("driver")
            })?,
        };

        let devices = sequence(map.get("devices"))
            .map_err(|e| e.at("devices"))?
            .iter()
            .enumerate()
            .map(|(i, fragment)| {
                DeviceInfo::from_value(fragment).map_err(|e| e.at(&format!("devices[{i}]")))
            })
            .collect::<Result<Vec<_>>>()?;

        let config = Self { driver, devices };
        info!(
            "Loaded driver '{}' with {} device(s), {} propert(ies)",
            config.driver,
            config.devices.len(),
            config.property_count()
        );
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let document: Value = serde_yaml::from_str(content)
            .map_err(|e| DmError::malformed(format!("invalid YAML: {e}")))?;
        Self::from_value(&document)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(content)
            .map_err(|e| DmError::malformed(format!("invalid JSON: {e}")))?;
        Self::from_value(&document)
    }

    pub fn device(&self, name: &str) -> Option<&DeviceInfo> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn property_count(&self) -> usize {
        self.devices.iter().map(|d| d.properties.len()).sum()
    }

    /// Collect warnings about a configuration that loaded successfully
    ///
    /// Nothing reported here rejects the document; duplicate device names in
    /// particular are legal and left to the caller to police. Warnings are
    /// returned, not logged.
    pub fn report(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (i, device) in self.devices.iter().enumerate() {
            if let Some(first) = seen.insert(device.name.as_str(), i) {
                report.add_warning(format!(
                    "devices[{i}]: name '{}' already used by devices[{first}]",
                    device.name
                ));
            }
            report.merge(device.report(&format!("devices[{i}]")));
        }
        report
    }
}

impl<'de> Deserialize<'de> for DriverConfig {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let document = Value::deserialize(deserializer)?;
        Self::from_value(&document).map_err(serde::de::Error::custom)
    }
}

/// Absent and null mean "empty"; anything else must be a sequence
fn sequence(fragment: Option<&Value>) -> Result<&[Value]> {
    match fragment {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(DmError::malformed(format!(
            "expected a sequence, found {}",
            kind_of(other)
        ))),
    }
}

fn mapping(fragment: &Value) -> Result<&Map<String, Value>> {
    fragment.as_object().ok_or_else(|| {
        DmError::malformed(format!("expected a mapping, found {}", kind_of(fragment)))
    })
}

// ============================================================================
// Validation Report
// ============================================================================

/// Non-fatal findings about a loaded configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.warnings.extend(other.warnings);
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

// ============================================================================
// Device
// ============================================================================

/// Transport topic with its MQTT quality of service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QosTopic {
    #[serde(deserialize_with = "deserialize_null_default")]
    pub qos: u8,
    #[serde(deserialize_with = "deserialize_null_default")]
    pub topic: String,
}

impl QosTopic {
    pub fn is_empty(&self) -> bool {
        self.topic.is_empty() && self.qos == 0
    }
}

/// Topic set of a device, inlined into the device entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topic {
    #[serde(
        skip_serializing_if = "QosTopic::is_empty",
        deserialize_with = "deserialize_null_default"
    )]
    pub delta: QosTopic,
    #[serde(
        skip_serializing_if = "QosTopic::is_empty",
        deserialize_with = "deserialize_null_default"
    )]
    pub report: QosTopic,
    #[serde(
        skip_serializing_if = "QosTopic::is_empty",
        deserialize_with = "deserialize_null_default"
    )]
    pub event: QosTopic,
    #[serde(
        skip_serializing_if = "QosTopic::is_empty",
        deserialize_with = "deserialize_null_default"
    )]
    pub get: QosTopic,
    #[serde(
        rename = "getResponse",
        alias = "getresponse",
        skip_serializing_if = "QosTopic::is_empty",
        deserialize_with = "deserialize_null_default"
    )]
    pub get_response: QosTopic,
}

/// One device entry of the driver configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(flatten)]
    pub topic: Topic,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<DeviceProperty>,
}

#[derive(Deserialize)]
struct DeviceHeader {
    #[serde(default, deserialize_with = "deserialize_scalar_text")]
    name: String,
    #[serde(default, deserialize_with = "deserialize_scalar_text")]
    version: String,
    #[serde(flatten)]
    topic: Topic,
}

impl DeviceInfo {
    pub fn from_value(fragment: &Value) -> Result<Self> {
        let map = mapping(fragment)?;
        let header = DeviceHeader::deserialize(fragment)
            .map_err(|e| DmError::malformed(e.to_string()))?;

        let access = match map.get("access") {
            None | Some(Value::Null) => None,
            Some(access) => {
                let decoded = AccessConfig::decode_traced(access).map_err(|e| e.at("access"))?;
                if decoded.fell_back() {
                    debug!("Device '{}' uses a custom access descriptor", header.name);
                }
                Some(decoded.value)
            },
        };

        let properties = sequence(map.get("properties"))
            .map_err(|e| e.at("properties"))?
            .iter()
            .enumerate()
            .map(|(j, fragment)| {
                DeviceProperty::from_value(fragment)
                    .map_err(|e| e.at(&format!("properties[{j}]")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: header.name,
            version: header.version,
            topic: header.topic,
            access,
            properties,
        })
    }

    pub fn protocol(&self) -> Option<Protocol> {
        self.access.as_ref().map(AccessConfig::protocol)
    }

    pub fn property(&self, name: &str) -> Option<&DeviceProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    fn report(&self, path: &str) -> ValidationReport {
        let mut report = ValidationReport::default();

        if let Some(AccessConfig::Custom(raw)) = &self.access {
            report.add_warning(format!(
                "{path}.access: no protocol shape matched, kept as custom '{}'",
                raw.as_str()
            ));
        }

        for (j, property) in self.properties.iter().enumerate() {
            let at = format!("{path}.properties[{j}]");
            match &property.visitor {
                PropertyVisitor::Custom(raw) => report.add_warning(format!(
                    "{at}.visitor: no protocol shape matched, kept as custom '{}'",
                    raw.as_str()
                )),
                PropertyVisitor::Modbus(modbus)
                    if property.mode.is_writable() && !modbus.function.is_writable() =>
                {
                    report.add_warning(format!(
                        "{at}: property '{}' is rw but function {} is read-only",
                        property.name, modbus.function
                    ))
                },
                _ => {},
            }

            let visitor_protocol = property.visitor.protocol();
            if let Some(access_protocol) = self.protocol() {
                if visitor_protocol != Protocol::Custom
                    && access_protocol != Protocol::Custom
                    && visitor_protocol != access_protocol
                {
                    report.add_warning(format!(
                        "{at}: {visitor_protocol} visitor on a device with {access_protocol} access"
                    ));
                }
            }
        }

        report
    }
}

// ============================================================================
// Property
// ============================================================================

/// Property access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum PropertyMode {
    #[default]
    #[serde(rename = "ro")]
    ReadOnly,
    #[serde(rename = "rw")]
    ReadWrite,
}

impl PropertyMode {
    /// Parse a mode tag, empty means read-only
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" | "ro" => Some(Self::ReadOnly),
            "rw" => Some(Self::ReadWrite),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "ro",
            Self::ReadWrite => "rw",
        }
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

impl fmt::Display for PropertyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named device property bound to its visitor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceProperty {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub data_type: Option<ScalarType>,
    pub mode: PropertyMode,
    pub visitor: PropertyVisitor,
}

#[derive(Deserialize)]
struct PropertyHeader {
    #[serde(default, deserialize_with = "deserialize_scalar_text")]
    name: String,
    #[serde(default, rename = "type", deserialize_with = "deserialize_null_default")]
    type_tag: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    mode: String,
}

/// Payload handed to the driver for a write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteValue {
    /// Registers to write, already scaled and swapped
    Registers(Vec<u16>),
    /// Typed value for protocols that carry types on the wire
    Value(ProtocolValue),
}

impl DeviceProperty {
    pub fn from_value(fragment: &Value) -> Result<Self> {
        let map = mapping(fragment)?;
        let header = PropertyHeader::deserialize(fragment)
            .map_err(|e| DmError::malformed(e.to_string()))?;

        let data_type = ScalarType::parse_tag(&header.type_tag).map_err(|e| e.at("type"))?;
        let mode = PropertyMode::parse(&header.mode).ok_or_else(|| {
            DmError::range("mode", format!("must be ro or rw, got '{}'", header.mode))
        })?;

        let visitor_fragment = map.get("visitor").unwrap_or(&Value::Null);
        let decoded = PropertyVisitor::decode_traced(visitor_fragment, data_type)
            .map_err(|e| e.at("visitor"))?;
        if decoded.fell_back() {
            debug!("Property '{}' uses a custom visitor", header.name);
        }

        Ok(Self {
            name: header.name,
            data_type,
            mode,
            visitor: decoded.value,
        })
    }

    /// Type of the values this property produces, if known
    pub fn effective_type(&self) -> Option<ScalarType> {
        self.visitor.data_type().or(self.data_type)
    }

    /// Map a native (already typed) reading onto the property's type
    pub fn coerce_native(&self, native: ProtocolValue) -> Result<ProtocolValue> {
        match &self.visitor {
            PropertyVisitor::Opcua(opcua) => opcua.coerce(native),
            _ => match self.effective_type() {
                Some(target) => native.coerce(target),
                None => Ok(native),
            },
        }
    }

    /// Prepare a write of `value`, refused unless the property is `rw`
    pub fn encode_write(&self, value: &ProtocolValue) -> Result<WriteValue> {
        if !self.mode.is_writable() {
            return Err(DmError::ReadOnly(self.name.clone()));
        }
        match &self.visitor {
            PropertyVisitor::Modbus(modbus) => modbus.encode(value).map(WriteValue::Registers),
            _ => self.coerce_native(value.clone()).map(WriteValue::Value),
        }
    }
}

// ============================================================================
// Event & Shadow
// ============================================================================

/// Device-originated event; the payload schema belongs to the publisher
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type", default, deserialize_with = "deserialize_null_default")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Event {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Reported and desired state of one device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceShadow {
    pub name: String,
    #[serde(
        default,
        skip_serializing_if = "Map::is_empty",
        deserialize_with = "deserialize_null_default"
    )]
    pub report: Map<String, Value>,
    #[serde(
        default,
        skip_serializing_if = "Map::is_empty",
        deserialize_with = "deserialize_null_default"
    )]
    pub desire: Map<String, Value>,
}

impl DeviceShadow {
    /// Empty shadow bound to `device`
    pub fn for_device(device: &DeviceInfo) -> Self {
        Self {
            name: device.name.clone(),
            ..Self::default()
        }
    }

    /// Record a reported property value
    pub fn report_value(&mut self, property: &str, value: &ProtocolValue) {
        // ProtocolValue serializes to a plain JSON scalar; non-finite floats become null
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.report.insert(property.to_string(), value);
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    fn property(fragment: Value) -> DeviceProperty {
        DeviceProperty::from_value(&fragment).unwrap()
    }

    #[test]
    fn test_property_type_is_inherited_by_visitor() {
        let p = property(json!({
            "name": "voltage",
            "type": "float32",
            "visitor": {"function": 3, "address": "40001"}
        }));
        assert_eq!(p.mode, PropertyMode::ReadOnly);
        let modbus = p.visitor.as_modbus().unwrap();
        assert_eq!(modbus.data_type, ScalarType::Float32);
        assert_eq!(modbus.quantity, 2);
        assert_eq!(p.effective_type(), Some(ScalarType::Float32));
    }

    #[test]
    fn test_null_type_and_mode_read_as_absent() {
        let p = property(json!({
            "name": "counter",
            "type": null,
            "mode": null,
            "visitor": {"function": 4, "address": "30001", "type": null, "scale": null}
        }));
        assert_eq!(p.data_type, None);
        assert_eq!(p.mode, PropertyMode::ReadOnly);
        let modbus = p.visitor.as_modbus().unwrap();
        assert_eq!(modbus.data_type, ScalarType::Int16);
        assert_eq!(modbus.decode(&[0xFFFE]).unwrap(), ProtocolValue::Int16(-2));

        let device = DeviceInfo::from_value(&json!({
            "name": "meter",
            "version": null,
            "delta": null,
            "report": {"qos": null, "topic": "things/meter/report"}
        }))
        .unwrap();
        assert_eq!(device.version, "");
        assert!(device.topic.delta.is_empty());
        assert_eq!(device.topic.report.qos, 0);
    }

    #[test]
    fn test_property_mode_rejected() {
        let err = DeviceProperty::from_value(&json!({
            "name": "x", "mode": "wo", "visitor": "raw"
        }))
        .unwrap_err();
        assert!(matches!(err, DmError::ConfigurationRange { ref field, .. } if field == "mode"));
    }

    #[test]
    fn test_missing_visitor_is_malformed() {
        let err = DeviceProperty::from_value(&json!({"name": "x"})).unwrap_err();
        assert!(matches!(err, DmError::MalformedDocument { .. }));
        assert_eq!(err.path(), Some("visitor"));
    }

    #[test]
    fn test_encode_write_requires_rw() {
        let ro = property(json!({
            "name": "setpoint",
            "visitor": {"function": 3, "address": "1", "type": "int16"}
        }));
        assert_eq!(
            ro.encode_write(&ProtocolValue::Int16(5)).unwrap_err(),
            DmError::ReadOnly("setpoint".into())
        );

        let rw = property(json!({
            "name": "setpoint",
            "mode": "rw",
            "visitor": {"function": 3, "address": "1", "type": "int16", "swapByte": true}
        }));
        assert_eq!(
            rw.encode_write(&ProtocolValue::Int16(0x0102)).unwrap(),
            WriteValue::Registers(vec![0x0201])
        );

        let opcua = property(json!({
            "name": "speed", "mode": "rw", "type": "int32",
            "visitor": {"nodeid": "ns=2;s=Speed"}
        }));
        assert_eq!(
            opcua.encode_write(&ProtocolValue::Float64(12.7)).unwrap(),
            WriteValue::Value(ProtocolValue::Int32(12))
        );
    }

    #[test]
    fn test_device_without_access() {
        let device = DeviceInfo::from_value(&json!({"name": "meter", "access": null})).unwrap();
        assert!(device.access.is_none());
        assert!(device.properties.is_empty());
        assert_eq!(device.protocol(), None);
    }

    #[test]
    fn test_property_errors_carry_path() {
        let err = DriverConfig::from_value(&json!({
            "devices": [
                {"name": "a"},
                {"name": "b", "properties": [
                    {"name": "ok", "visitor": "raw"},
                    {"name": "bad", "visitor": {"function": 7, "address": "1"}}
                ]}
            ]
        }))
        .unwrap_err();
        assert_eq!(err.path(), Some("devices[1].properties[1].visitor"));
    }

    #[test]
    fn test_root_must_be_mapping() {
        assert!(DriverConfig::from_value(&json!([1, 2])).is_err());
        assert_eq!(DriverConfig::from_value(&Value::Null).unwrap(), DriverConfig::default());
        let err = DriverConfig::from_value(&json!({"devices": "meter"})).unwrap_err();
        assert_eq!(err.path(), Some("devices"));
    }

    #[test]
    fn test_duplicate_names_accepted_with_warning() {
        let config = DriverConfig::from_value(&json!({
            "driver": "modbus",
            "devices": [{"name": "pump"}, {"name": "pump"}]
        }))
        .unwrap();
        assert_eq!(config.devices.len(), 2);

        let report = config.report();
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("already used by devices[0]"));
    }

    #[test]
    fn test_report_flags_suspicious_properties() {
        let config = DriverConfig::from_value(&json!({
            "devices": [{
                "name": "plc",
                "access": {"tcp": {"address": "10.0.0.2", "port": 502}},
                "properties": [
                    {"name": "alarm", "mode": "rw", "visitor": {"function": 2, "address": "3"}},
                    {"name": "temp", "visitor": {"nodeid": "ns=1;i=5", "type": "float32"}},
                    {"name": "opaque", "visitor": "vendor-handle"}
                ]
            }]
        }))
        .unwrap();

        let report = config.report();
        assert_eq!(report.warnings.len(), 3, "{:?}", report.warnings);
        assert!(report.warnings[0].contains("read-only"));
        assert!(report.warnings[1].contains("opcua visitor on a device with modbus access"));
        assert!(report.warnings[2].contains("kept as custom 'vendor-handle'"));
    }

    #[test]
    fn test_topic_fields_are_inlined() {
        let device = DeviceInfo::from_value(&json!({
            "name": "meter",
            "version": 2,
            "delta": {"qos": 1, "topic": "things/meter/delta"},
            "getResponse": {"topic": "things/meter/get/response"}
        }))
        .unwrap();
        assert_eq!(device.version, "2");
        assert_eq!(device.topic.delta.qos, 1);
        assert_eq!(device.topic.get_response.topic, "things/meter/get/response");

        let value = serde_json::to_value(&device).unwrap();
        assert_eq!(value["delta"]["topic"], "things/meter/delta");
        assert!(value.get("report").is_none());
    }

    #[test]
    #[traced_test]
    fn test_fallback_decisions_are_logged() {
        let config = DriverConfig::from_value(&json!({
            "devices": [{
                "name": "gateway",
                "access": "vendor://gw/1",
                "properties": [{"name": "raw", "visitor": "ch-7"}]
            }]
        }))
        .unwrap();

        assert!(logs_contain("Shape mismatch for modbus"));
        assert!(logs_contain("Fragment 'vendor://gw/1' falls back to custom"));
        assert!(logs_contain("Device 'gateway' uses a custom access descriptor"));

        let report = config.report();
        assert!(report.warnings.iter().any(|w| w.contains("kept as custom 'ch-7'")));
        assert!(!logs_contain("kept as custom"));
    }

    #[test]
    fn test_shadow_and_event() {
        let device = DeviceInfo::from_value(&json!({"name": "meter"})).unwrap();
        let mut shadow = DeviceShadow::for_device(&device);
        shadow.report_value("voltage", &ProtocolValue::Float64(229.5));
        assert_eq!(shadow.name, "meter");
        assert_eq!(shadow.report["voltage"], json!(229.5));

        let event = Event::new("alarm", json!({"code": 17}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"type": "alarm", "payload": {"code": 17}}));
    }
}
