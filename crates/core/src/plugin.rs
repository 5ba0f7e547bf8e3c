//! Installed plugin definitions and the catalog they are looked up in.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Default mount point of the plugin's input directory.
pub const DEFAULT_INPUT_MOUNT: &str = "/circus/in";

/// Default mount point of the plugin's output directory.
pub const DEFAULT_OUTPUT_MOUNT: &str = "/circus/out";

/// Container-side mount points declared by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginBinds {
    #[serde(rename = "in")]
    pub input: String,
    #[serde(rename = "out")]
    pub output: String,
}

impl Default for PluginBinds {
    fn default() -> Self {
        Self {
            input: DEFAULT_INPUT_MOUNT.to_string(),
            output: DEFAULT_OUTPUT_MOUNT.to_string(),
        }
    }
}

/// An installed, runnable plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDefinition {
    pub plugin_id: String,
    pub version: String,
    pub container_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binds: Option<PluginBinds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_execution_seconds: Option<u64>,
}

impl PluginDefinition {
    /// Mount points, falling back to `/circus/in` and `/circus/out`.
    pub fn binds(&self) -> PluginBinds {
        self.binds.clone().unwrap_or_default()
    }

    /// Hard execution limit, if the plugin declares one.
    pub fn execution_timeout(&self) -> Option<Duration> {
        self.max_execution_seconds.map(Duration::from_secs)
    }

    /// Reject definitions the database schema would refuse as well.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.max_execution_seconds == Some(0) {
            return Err(CatalogError::Invalid {
                plugin_id: self.plugin_id.clone(),
                reason: "maxExecutionSeconds must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

/// Errors from a plugin catalog backend.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The backing store cannot be reached.
    #[error("Plugin catalog unavailable: {0}")]
    Unavailable(String),

    #[error("Plugin catalog error: {0}")]
    Storage(String),

    #[error("Failed to read plugin definitions: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed plugin definitions: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid definition for plugin {plugin_id}: {reason}")]
    Invalid { plugin_id: String, reason: String },
}

impl CatalogError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Lookup of installed plugins by id.
#[async_trait]
pub trait PluginCatalog: Send + Sync {
    /// Return the plugin, or `None` if no such plugin is installed.
    async fn get(&self, plugin_id: &str) -> Result<Option<PluginDefinition>, CatalogError>;
}

/// A fixed set of plugin definitions, typically loaded from a JSON file.
#[derive(Debug, Default, Clone)]
pub struct StaticPluginCatalog {
    plugins: HashMap<String, PluginDefinition>,
}

impl StaticPluginCatalog {
    pub fn new(definitions: impl IntoIterator<Item = PluginDefinition>) -> Self {
        Self {
            plugins: definitions
                .into_iter()
                .map(|d| (d.plugin_id.clone(), d))
                .collect(),
        }
    }

    /// Load a JSON array of plugin definitions.
    pub async fn load_json(path: &Path) -> Result<Self, CatalogError> {
        let raw = tokio::fs::read(path).await?;
        let definitions: Vec<PluginDefinition> = serde_json::from_slice(&raw)?;
        for definition in &definitions {
            definition.validate()?;
        }
        tracing::info!(
            path = %path.display(),
            count = definitions.len(),
            "Loaded plugin definitions",
        );
        Ok(Self::new(definitions))
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[async_trait]
impl PluginCatalog for StaticPluginCatalog {
    async fn get(&self, plugin_id: &str) -> Result<Option<PluginDefinition>, CatalogError> {
        Ok(self.plugins.get(plugin_id).cloned())
    }
}
