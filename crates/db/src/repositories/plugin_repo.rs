//! Repository for the `plugin_definitions` table.

use async_trait::async_trait;
use circus_core::plugin::{CatalogError, PluginCatalog, PluginDefinition};
use sqlx::PgPool;

use crate::is_connection_error;
use crate::models::plugin::PluginDefinitionRow;

/// Column list for `plugin_definitions` queries.
const COLUMNS: &str = "\
    plugin_id, version, container_image, bind_in, bind_out, \
    max_execution_seconds, created_at, updated_at";

/// Provides CRUD operations for installed plugins.
pub struct PluginDefinitionRepo;

impl PluginDefinitionRepo {
    /// Find a plugin by its id.
    pub async fn find_by_id(
        pool: &PgPool,
        plugin_id: &str,
    ) -> Result<Option<PluginDefinitionRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM plugin_definitions WHERE plugin_id = $1");
        sqlx::query_as::<_, PluginDefinitionRow>(&query)
            .bind(plugin_id)
            .fetch_optional(pool)
            .await
    }

    /// List all installed plugins ordered by id.
    pub async fn list(pool: &PgPool) -> Result<Vec<PluginDefinitionRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM plugin_definitions ORDER BY plugin_id");
        sqlx::query_as::<_, PluginDefinitionRow>(&query)
            .fetch_all(pool)
            .await
    }

    /// Insert or replace a plugin definition.
    pub async fn upsert(
        pool: &PgPool,
        definition: &PluginDefinition,
    ) -> Result<PluginDefinitionRow, sqlx::Error> {
        let binds = definition.binds.as_ref();
        let max_secs = definition
            .max_execution_seconds
            .map(|s| i64::try_from(s).unwrap_or(i64::MAX));
        let query = format!(
            "INSERT INTO plugin_definitions \
                 (plugin_id, version, container_image, bind_in, bind_out, max_execution_seconds) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (plugin_id) DO UPDATE SET \
                 version = EXCLUDED.version, \
                 container_image = EXCLUDED.container_image, \
                 bind_in = EXCLUDED.bind_in, \
                 bind_out = EXCLUDED.bind_out, \
                 max_execution_seconds = EXCLUDED.max_execution_seconds, \
                 updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PluginDefinitionRow>(&query)
            .bind(&definition.plugin_id)
            .bind(&definition.version)
            .bind(&definition.container_image)
            .bind(binds.map(|b| b.input.as_str()))
            .bind(binds.map(|b| b.output.as_str()))
            .bind(max_secs)
            .fetch_one(pool)
            .await
    }
}

/// [`PluginCatalog`] adapter over [`PluginDefinitionRepo`].
#[derive(Clone)]
pub struct PgPluginCatalog {
    pool: PgPool,
}

impl PgPluginCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PluginCatalog for PgPluginCatalog {
    async fn get(&self, plugin_id: &str) -> Result<Option<PluginDefinition>, CatalogError> {
        PluginDefinitionRepo::find_by_id(&self.pool, plugin_id)
            .await
            .map(|row| row.map(PluginDefinition::from))
            .map_err(|e| {
                if is_connection_error(&e) {
                    CatalogError::Unavailable(e.to_string())
                } else {
                    CatalogError::Storage(e.to_string())
                }
            })
    }
}
