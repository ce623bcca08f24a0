//! Server configuration
//!
//! The `cas-bridge` binary reads a JSON document such as:
//!
//! ```json
//! {
//!   "log_level": "debug",
//!   "process_timeout_secs": 0.1,
//!   "pvs": [
//!     { "name": "DEMO:TEMP", "type": "DOUBLE",
//!       "attributes": { "value": 21.5, "unit": "C", "precision": 1 } },
//!     { "name": "DEMO:WAVE", "type": "LONG", "count": 8, "aliases": ["DEMO:W"] }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bridge::{FieldType, HostEnum};
use crate::catalog::{PvDirectory, PvOptions, SimplePv};
use crate::host::{Attributes, HostValue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Longest time one `process` call waits for engine work.
    pub process_timeout_secs: f64,
    /// Name the server reports in its log output.
    pub bind_name: String,
    pub pvs: Vec<PvConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            process_timeout_secs: 0.1,
            bind_name: "cas-bridge".to_owned(),
            pvs: Vec::new(),
        }
    }
}

/// A statically configured PV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvConfig {
    pub name: String,
    /// `Type` member name, e.g. `"DOUBLE"`.
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub value_deadband: f64,
    #[serde(default)]
    pub archive_deadband: f64,
    #[serde(default)]
    pub aliases: Vec<String>,
}

fn default_count() -> u32 {
    1
}

impl BridgeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read config {:?}", path))?;
        let config: Self =
            serde_json::from_str(&text).with_context(|| format!("Failed to parse config {:?}", path))?;
        config.validate()?;
        debug!(path = ?path, pvs = config.pvs.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.process_timeout_secs.is_finite() || self.process_timeout_secs < 0.0 {
            bail!("process_timeout_secs must be a non-negative number, got {}", self.process_timeout_secs);
        }
        for pv in &self.pvs {
            pv.kind().with_context(|| format!("Invalid PV {:?}", pv.name))?;
        }
        Ok(())
    }

    /// Create every configured PV in `directory`. The returned handles keep
    /// the PVs alive.
    pub fn populate(&self, directory: &PvDirectory) -> Result<Vec<SimplePv>> {
        self.pvs
            .iter()
            .map(|config| -> Result<SimplePv> {
                let pv = directory
                    .create_pv(&config.name, config.kind()?, config.count, config.options())
                    .with_context(|| format!("Failed to create PV {:?}", config.name))?;
                for alias in &config.aliases {
                    directory.add_alias(alias, &config.name)?;
                }
                Ok(pv)
            })
            .collect()
    }
}

impl PvConfig {
    pub fn kind(&self) -> Result<FieldType> {
        FieldType::from_host(&HostValue::Str(self.field_type.clone()))
            .with_context(|| format!("Unknown PV type {:?}", self.field_type))
    }

    pub fn options(&self) -> PvOptions {
        let attributes: Attributes = self
            .attributes
            .iter()
            .map(|(key, value)| (key.clone(), HostValue::from_json(value)))
            .collect();
        PvOptions {
            attributes,
            value_deadband: self.value_deadband,
            archive_deadband: self.archive_deadband,
            write_hook: None,
        }
    }
}
