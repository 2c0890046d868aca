//! Device Model Context Error Types
//!
//! Load-time errors (malformed documents, out-of-range fields, width
//! mismatches) and the runtime errors raised by the register value transforms.

use thiserror::Error;

use crate::value::ScalarType;

/// Result type for voltage-dmcontext operations
pub type Result<T> = std::result::Result<T, DmError>;

/// Device model context errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DmError {
    /// The fragment is not even minimally well-formed
    #[error("Malformed document at `{path}`: {reason}")]
    MalformedDocument { path: String, reason: String },

    /// A field violates a declared bound
    #[error("Configuration range error at `{path}`: {field} {reason}")]
    ConfigurationRange {
        path: String,
        field: String,
        reason: String,
    },

    /// Declared scalar width does not match the register quantity
    #[error(
        "Width mismatch at `{path}`: {data_type} needs {expected} register(s), quantity is {actual}"
    )]
    WidthMismatch {
        path: String,
        data_type: ScalarType,
        expected: u16,
        actual: u16,
    },

    /// Type tag outside the scalar domain
    #[error("Unknown scalar type at `{path}`: '{name}'")]
    UnknownType { path: String, name: String },

    /// Raw buffer shorter than the visitor's quantity
    #[error("Insufficient register data: need {needed} word(s), got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// Value cannot be represented as the target type
    #[error("Cannot coerce {value} to {target}")]
    Coercion { value: String, target: ScalarType },

    /// Write attempted on a read-only property
    #[error("Property '{0}' is read-only")]
    ReadOnly(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// Configuration source errors (file provider, environment)
    #[error("Configuration source error: {0}")]
    Source(String),
}

impl From<std::io::Error> for DmError {
    fn from(err: std::io::Error) -> Self {
        DmError::Io(err.to_string())
    }
}

impl From<figment::Error> for DmError {
    fn from(err: figment::Error) -> Self {
        DmError::Source(err.to_string())
    }
}

// Helper methods for creating errors
impl DmError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        DmError::MalformedDocument {
            path: String::new(),
            reason: reason.into(),
        }
    }

    pub fn range(field: impl Into<String>, reason: impl Into<String>) -> Self {
        DmError::ConfigurationRange {
            path: String::new(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn width(data_type: ScalarType, expected: u16, actual: u16) -> Self {
        DmError::WidthMismatch {
            path: String::new(),
            data_type,
            expected,
            actual,
        }
    }

    pub fn unknown_type(name: impl Into<String>) -> Self {
        DmError::UnknownType {
            path: String::new(),
            name: name.into(),
        }
    }

    pub fn coercion(value: impl ToString, target: ScalarType) -> Self {
        DmError::Coercion {
            value: value.to_string(),
            target,
        }
    }

    /// Prefix the document path of a load-time error.
    ///
    /// `err.at("devices[0]")` turns a path of `access.tcp` into
    /// `devices[0].access.tcp`. Runtime errors are returned unchanged.
    pub fn at(mut self, prefix: &str) -> Self {
        if let Some(path) = self.path_mut() {
            *path = if path.is_empty() {
                prefix.to_string()
            } else if path.starts_with('[') {
                format!("{prefix}{path}")
            } else {
                format!("{prefix}.{path}")
            };
        }
        self
    }

    /// Document path of a load-time error
    pub fn path(&self) -> Option<&str> {
        match self {
            DmError::MalformedDocument { path, .. }
            | DmError::ConfigurationRange { path, .. }
            | DmError::WidthMismatch { path, .. }
            | DmError::UnknownType { path, .. } => Some(path.as_str()),
            _ => None,
        }
    }

    fn path_mut(&mut self) -> Option<&mut String> {
        match self {
            DmError::MalformedDocument { path, .. }
            | DmError::ConfigurationRange { path, .. }
            | DmError::WidthMismatch { path, .. }
            | DmError::UnknownType { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Check if this error is raised while loading configuration
    pub fn is_load_error(&self) -> bool {
        self.path().is_some()
    }
}
