use std::time::Duration;

use voltage_dmcontext::{
    AccessConfig, DmError, DriverConfig, ModbusTransport, Parity, Protocol, PropertyMode,
    PropertyVisitor, ProtocolValue, ScalarType, WriteValue,
};

const MIXED_DRIVER: &str = r#"
driver: gateway
devices:
  - name: inverter
    version: v1
    delta:
      qos: 1
      topic: thing/inverter/delta
    access:
      id: 3
      interval: 500ms
      rtu:
        port: /dev/ttyUSB0
        baudrate: 9600
    properties:
      - name: ac-power
        type: int32
        visitor:
          function: 4
          address: "30775"
          scale: 0.001
          swapRegister: true
      - name: state
        visitor:
          function: 2
          address: "12"
      - name: label
        mode: rw
        visitor:
          function: 3
          address: "40100"
          type: string
          quantity: 4
  - name: boiler
    access:
      endpoint: opc.tcp://boiler.local:4840
      interval: 1s
      security:
        policy: None
        mode: None
    properties:
      - name: temperature
        type: float64
        visitor:
          nodeid: ns=2;s=Boiler.Temp
  - name: legacy
    access: legacy-handle-42
    properties:
      - name: anything
        visitor: "register 7 / bit 3"
"#;

fn load() -> DriverConfig {
    DriverConfig::from_yaml_str(MIXED_DRIVER).expect("Should decode mixed driver document")
}

#[test]
fn test_each_device_commits_to_one_protocol() {
    let config = load();
    let protocols: Vec<_> = config
        .devices
        .iter()
        .map(|d| d.protocol().expect("Every device has access"))
        .collect();
    assert_eq!(protocols, [Protocol::Modbus, Protocol::Opcua, Protocol::Custom]);
}

#[test]
fn test_rtu_access_defaults_fill_in() {
    let config = load();
    let access = config.devices[0]
        .access
        .as_ref()
        .and_then(AccessConfig::as_modbus)
        .expect("Should be Modbus access");

    assert_eq!(access.id, 3);
    assert_eq!(access.interval, Duration::from_millis(500));
    assert_eq!(access.timeout, Duration::from_secs(10));
    assert_eq!(access.idle_timeout, Duration::from_secs(60));

    let ModbusTransport::Rtu(rtu) = &access.transport else {
        panic!("Should be RTU transport");
    };
    assert_eq!(rtu.baudrate, 9600);
    assert_eq!(rtu.parity, Parity::Even);
    assert_eq!(rtu.databit, 8);
    assert_eq!(rtu.stopbit, 1);
}

#[test]
fn test_register_transforms_from_document() {
    let config = load();
    let inverter = config.device("inverter").expect("Should find inverter");

    let power = inverter.property("ac-power").expect("Should find ac-power");
    let visitor = power.visitor.as_modbus().expect("Should be Modbus visitor");
    assert_eq!(visitor.data_type, ScalarType::Int32);
    assert_eq!(visitor.quantity, 2);
    // 0x0001_E240 = 123456, low word first on this device
    let value = visitor
        .decode(&[0xE240, 0x0001])
        .expect("Should decode power");
    let ProtocolValue::Float64(kw) = value else {
        panic!("Scaled value should be Float64, got {value:?}");
    };
    assert!((kw - 123.456).abs() < 1e-9);

    let state = inverter.property("state").expect("Should find state");
    let visitor = state.visitor.as_modbus().expect("Should be Modbus visitor");
    assert_eq!(visitor.data_type, ScalarType::Bool);
    assert_eq!(
        visitor.decode(&[1]).expect("Should decode state"),
        ProtocolValue::Bool(true)
    );

    let label = inverter.property("label").expect("Should find label");
    assert_eq!(label.mode, PropertyMode::ReadWrite);
    let WriteValue::Registers(regs) = label
        .encode_write(&ProtocolValue::String("INV-01".into()))
        .expect("Should encode label")
    else {
        panic!("Modbus writes produce registers");
    };
    assert_eq!(regs, [0x494E, 0x562D, 0x3031, 0x0000]);
    assert_eq!(
        label.visitor.as_modbus().expect("Modbus").decode(&regs),
        Ok(ProtocolValue::String("INV-01".into()))
    );
}

#[test]
fn test_opcua_visitor_inherits_property_type() {
    let config = load();
    let temperature = config.devices[1]
        .property("temperature")
        .expect("Should find temperature");
    let PropertyVisitor::Opcua(opcua) = &temperature.visitor else {
        panic!("Should be OPC-UA visitor");
    };
    assert_eq!(opcua.node_id, "ns=2;s=Boiler.Temp");
    assert_eq!(
        opcua.coerce(ProtocolValue::Float32(81.5)),
        Ok(ProtocolValue::Float64(81.5))
    );
}

#[test]
fn test_custom_fallbacks_preserve_raw_text() {
    let config = load();
    let legacy = &config.devices[2];
    assert_eq!(
        legacy.access.as_ref().and_then(AccessConfig::as_custom).map(|c| c.as_str()),
        Some("legacy-handle-42")
    );
    assert_eq!(
        legacy.properties[0].visitor.as_custom().map(|c| c.as_str()),
        Some("register 7 / bit 3")
    );

    let report = config.report();
    assert!(report
        .warnings
        .iter()
        .any(|w| w.starts_with("devices[2].access")));
}

#[test]
fn test_normalized_document_decodes_to_same_aggregate() {
    let config = load();
    let json = serde_json::to_string(&config).expect("Should serialize");
    let again = DriverConfig::from_json_str(&json).expect("Should decode normalized document");
    assert_eq!(again, config);
}

#[test]
fn test_keys_left_blank_take_defaults() {
    let yaml = r#"
driver:
devices:
  - name: meter
    version:
    delta:
    access:
      id:
      interval:
      timeout: ~
      rtu:
        port: /dev/ttyS0
        baudrate:
        parity:
        databit:
        stopbit:
    properties:
      - name: energy
        type:
        mode:
        visitor:
          function: 3
          address: "40001"
          type: int32
          scale:
          swapByte:
          swapRegister:
"#;
    let config = DriverConfig::from_yaml_str(yaml).expect("Should accept blank optional keys");
    let meter = &config.devices[0];
    assert_eq!(meter.version, "");

    let access = meter
        .access
        .as_ref()
        .and_then(AccessConfig::as_modbus)
        .expect("Should be Modbus access");
    assert_eq!(access.interval, Duration::ZERO);
    assert_eq!(access.timeout, Duration::from_secs(10));
    assert_eq!(access.transport.to_string(), "rtu:///dev/ttyS0 19200 8E1");

    let energy = meter.property("energy").expect("Should find energy");
    assert_eq!(energy.data_type, None);
    assert_eq!(energy.mode, PropertyMode::ReadOnly);
    let visitor = energy.visitor.as_modbus().expect("Should be Modbus visitor");
    assert_eq!(visitor.scale, 0.0);
    assert_eq!(
        visitor.decode(&[0x0001, 0x0002]).expect("Should decode energy"),
        ProtocolValue::Int32(0x0001_0002)
    );
}

#[test]
fn test_width_mismatch_aborts_whole_load() {
    let yaml = r#"
devices:
  - name: ok
    properties:
      - name: a
        visitor: { function: 3, address: "1" }
  - name: broken
    properties:
      - name: b
        visitor: { function: 3, address: "2", type: int64, quantity: 2 }
"#;
    let err = DriverConfig::from_yaml_str(yaml).expect_err("Should reject width mismatch");
    assert_eq!(
        err,
        DmError::WidthMismatch {
            path: "devices[1].properties[0].visitor.quantity".into(),
            data_type: ScalarType::Int64,
            expected: 4,
            actual: 2,
        }
    );
}

#[test]
fn test_structured_fragment_matching_nothing_is_malformed() {
    let yaml = r#"
devices:
  - name: odd
    access:
      host: 10.0.0.1
"#;
    let err = DriverConfig::from_yaml_str(yaml).expect_err("Should reject unknown shape");
    match err {
        DmError::MalformedDocument { path, reason } => {
            assert_eq!(path, "devices[0].access");
            assert!(reason.contains("modbus: missing `tcp` or `rtu`"));
            assert!(reason.contains("opcua: missing field `endpoint`"));
        },
        other => panic!("Unexpected error: {other:?}"),
    }
}

#[test]
fn test_invalid_yaml_is_malformed() {
    let err = DriverConfig::from_yaml_str("devices: [unclosed").expect_err("Should fail");
    assert!(matches!(err, DmError::MalformedDocument { .. }));
}

#[test]
fn test_serde_entry_point() {
    let config: DriverConfig =
        serde_yaml::from_str(MIXED_DRIVER).expect("Should deserialize via serde");
    assert_eq!(config.devices.len(), 3);

    let yaml = "devices: [{name: x, access: {rtu: {port: p, stopbit: 3}}}]";
    let err = serde_yaml::from_str::<DriverConfig>(yaml).expect_err("Should surface range error");
    assert!(err.to_string().contains("stopbit"));
}
