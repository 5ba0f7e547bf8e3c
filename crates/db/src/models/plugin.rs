//! Row model for the `plugin_definitions` table.

use circus_core::plugin::{PluginBinds, PluginDefinition};
use circus_core::types::Timestamp;
use sqlx::FromRow;

/// A row from the `plugin_definitions` table.
#[derive(Debug, Clone, FromRow)]
pub struct PluginDefinitionRow {
    pub plugin_id: String,
    pub version: String,
    pub container_image: String,
    pub bind_in: Option<String>,
    pub bind_out: Option<String>,
    pub max_execution_seconds: Option<i64>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<PluginDefinitionRow> for PluginDefinition {
    fn from(row: PluginDefinitionRow) -> Self {
        let binds = match (row.bind_in, row.bind_out) {
            (Some(input), Some(output)) => Some(PluginBinds { input, output }),
            _ => None,
        };
        Self {
            plugin_id: row.plugin_id,
            version: row.version,
            container_image: row.container_image,
            binds,
            max_execution_seconds: row
                .max_execution_seconds
                .and_then(|s| u64::try_from(s).ok()),
        }
    }
}
