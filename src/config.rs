//! Engine configuration and workflow manifests
//!
//! A manifest is a YAML document with an `engine` section and one entry per
//! model describing its ports and command ACLs:
//!
//! ```yaml
//! engine:
//!   resumeDelaySecs: 30
//! models:
//!   order:
//!     ports:
//!       reserveInventory:
//!         consumesEvent: orderCreated
//!         producesEvent: inventoryReserved
//!         timeout: 5
//!         retryTimeout: 30
//!     commands:
//!       cancel:
//!         port: cancelOrder
//!         acl: [write]
//! ```
//!
//! Adapters are code, so a manifest yields a [`ModelSpecBuilder`] to which
//! the host attaches them before building.

use crate::bus::DEFAULT_SIGNAL_CAPACITY;
use crate::domain::event::normalize_model_name;
use crate::domain::spec::{CommandSpec, ModelSpecBuilder, ModelSpecification, PortConfig};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

// =============================================================================
// Engine Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Seconds between loading models and resuming their workflows
    pub resume_delay_secs: u64,
    /// Capacity of the signal broadcast channel
    pub signal_capacity: usize,
    /// Directory of file-backed repositories
    pub data_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resume_delay_secs: 30,
            signal_capacity: DEFAULT_SIGNAL_CAPACITY,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl EngineConfig {
    pub fn resume_delay(&self) -> Duration {
        Duration::from_secs(self.resume_delay_secs)
    }
}

// =============================================================================
// Manifest
// =============================================================================

/// A command routed to a port
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandManifest {
    pub port: String,
    #[serde(default)]
    pub acl: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelManifest {
    pub ports: IndexMap<String, PortConfig>,
    pub commands: IndexMap<String, CommandManifest>,
    pub remote: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Manifest {
    pub engine: EngineConfig,
    pub models: IndexMap<String, ModelManifest>,
}

impl Manifest {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let manifest: Manifest = serde_yaml::from_str(yaml)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read and validate a manifest file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Configuration(format!("cannot read manifest {}: {}", path.display(), e))
        })?;
        let manifest = Self::from_yaml_str(&contents)?;
        debug!(path = %path.display(), models = manifest.models.len(), "manifest loaded");
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(Error::Configuration("manifest declares no models".into()));
        }
        if self.engine.signal_capacity == 0 {
            return Err(Error::Configuration("signalCapacity must be positive".into()));
        }
        for (name, model) in &self.models {
            normalize_model_name(name)?;
            for (command, spec) in &model.commands {
                if !model.ports.contains_key(&spec.port) {
                    return Err(Error::Configuration(format!(
                        "model {}: command {} targets unknown port {}",
                        name, command, spec.port
                    )));
                }
                if spec.acl.is_empty() {
                    warn!(model = %name, command = %command, "command has an empty ACL and can never run");
                }
            }
            for (port, config) in &model.ports {
                if config.is_misconfigured() {
                    warn!(model = %name, port = %port, "retryTimeout is shorter than timeout");
                }
            }
        }
        Ok(())
    }

    pub fn model(&self, name: &str) -> Option<&ModelManifest> {
        let wanted = normalize_model_name(name).ok()?;
        self.models
            .iter()
            .find(|(key, _)| normalize_model_name(key).ok().as_deref() == Some(wanted.as_str()))
            .map(|(_, model)| model)
    }

    /// Specification builder with the model's ports and commands
    pub fn spec_builder(&self, name: &str) -> Result<ModelSpecBuilder> {
        self.spec_builder_with(name, |_, config| config)
    }

    /// Like [`Manifest::spec_builder`], passing each port's configuration
    /// through `configure` first
    pub fn spec_builder_with<F>(&self, name: &str, mut configure: F) -> Result<ModelSpecBuilder>
    where
        F: FnMut(&str, PortConfig) -> PortConfig,
    {
        let model = self.model(name).ok_or_else(|| Error::UnregisteredModel {
            model_name: name.to_string(),
        })?;
        let mut builder = ModelSpecification::builder(name).remote(model.remote);
        for (port, config) in &model.ports {
            builder = builder.port(port.clone(), configure(port, config.clone()));
        }
        for (command, spec) in &model.commands {
            builder = builder.command(
                command.clone(),
                CommandSpec::port(spec.port.clone()).with_acl(spec.acl.iter().cloned()),
            );
        }
        Ok(builder)
    }
}
