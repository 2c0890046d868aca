//! Driver configuration loader
//!
//! Layers the configuration file (YAML or JSON, picked by extension) with
//! prefixed environment variables, then hands the merged tree to the typed
//! decoder so load errors keep their kind and document path.
//!
//! Priority (highest to lowest):
//! 1. Environment variables (`DMCONTEXT_DRIVER` overrides `driver`)
//! 2. The configuration file

use figment::{
    providers::{Env, Format, Json, Yaml},
    Figment,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::device::DriverConfig;
use crate::error::{DmError, Result};

/// Default prefix of environment overrides
pub const DEFAULT_ENV_PREFIX: &str = "DMCONTEXT_";

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| DmError::Source(format!("No file extension: {}", path.display())))?;

        match extension.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            other => Err(DmError::Source(format!(
                "Unsupported config format: {}",
                other
            ))),
        }
    }
}

/// Loads a [`DriverConfig`] from a file plus environment overrides
#[derive(Debug, Clone)]
pub struct DriverConfigLoader {
    path: PathBuf,
    env_prefix: Option<String>,
}

impl DriverConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            env_prefix: Some(DEFAULT_ENV_PREFIX.to_string()),
        }
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Ignore the environment, load the file alone
    pub fn without_env(mut self) -> Self {
        self.env_prefix = None;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build the layered sources
    pub fn figment(&self) -> Result<Figment> {
        // Figment treats a missing file as empty; a driver without its file is an error
        if !self.path.is_file() {
            return Err(DmError::Io(format!(
                "Configuration file not found: {}",
                self.path.display()
            )));
        }

        let mut figment = match ConfigFormat::from_path(&self.path)? {
            ConfigFormat::Yaml => Figment::new().merge(Yaml::file(&self.path)),
            ConfigFormat::Json => Figment::new().merge(Json::file(&self.path)),
        };

        if let Some(prefix) = &self.env_prefix {
            debug!("Merging environment overrides with prefix {}", prefix);
            figment = figment.merge(Env::prefixed(prefix));
        }

        Ok(figment)
    }

    pub fn load(&self) -> Result<DriverConfig> {
        info!("Loading driver configuration from {}", self.path.display());
        let document: Value = self.figment()?.extract()?;
        DriverConfig::from_value(&document)
    }
}

/// Load a driver configuration with the default environment prefix
pub fn load_driver_config(path: impl AsRef<Path>) -> Result<DriverConfig> {
    DriverConfigLoader::new(path.as_ref()).load()
}
