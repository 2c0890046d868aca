//! VoltageEMS Device Model Context
//!
//! Decodes driver configuration documents into typed device models:
//!
//! - **Access descriptors**: Modbus TCP/RTU, OPC-UA or an opaque custom handle
//! - **Property visitors**: where a property lives and how its raw value is read
//! - **Value model**: the raw register to typed value transform (scale, swaps)
//! - **Aggregate**: devices, properties, events and shadows
//!
//! Fragments are classified by trying each protocol shape in a fixed order
//! ([`DECODE_ORDER`]), committing to the first match and falling back to the
//! custom variant for scalars.
//!
//! # Example
//!
//! ```
//! use voltage_dmcontext::{DriverConfig, ProtocolValue};
//!
//! let config = DriverConfig::from_yaml_str(r#"
//! driver: modbus
//! devices:
//!   - name: meter
//!     access:
//!       tcp: { address: 10.0.0.5, port: 502 }
//!     properties:
//!       - name: power
//!         visitor: { function: 3, address: "40001", type: int16, scale: 0.5 }
//! "#).unwrap();
//!
//! let visitor = config.devices[0].properties[0].visitor.as_modbus().unwrap();
//! assert_eq!(visitor.decode(&[1234]).unwrap(), ProtocolValue::Float64(617.0));
//! ```

pub mod access;
pub mod bytes;
pub mod decoder;
pub mod device;
pub mod error;
pub mod loader;
pub mod serde_helpers;
pub mod value;
pub mod visitor;

// Re-export commonly used types
pub use access::{
    AccessConfig, CustomAccess, ModbusAccess, ModbusTransport, OpcuaAccess, OpcuaAuth,
    OpcuaCertificate, OpcuaSecurity, Parity, RtuConfig, TcpConfig,
};
pub use bytes::ByteOrder;
pub use decoder::{Decoded, Protocol, ShapeMismatch, DECODE_ORDER};
pub use device::{
    DeviceInfo, DeviceProperty, DeviceShadow, DriverConfig, Event, PropertyMode, QosTopic, Topic,
    ValidationReport, WriteValue,
};
pub use error::{DmError, Result};
pub use loader::{load_driver_config, DriverConfigLoader};
pub use value::{ProtocolValue, ScalarType};
pub use visitor::{CustomVisitor, FunctionCode, ModbusVisitor, OpcuaVisitor, PropertyVisitor};
