/// SQLite persistence layer for flow definitions
///
/// Handles flow CRUD operations in a single SQLite database. Definitions are
/// stored as JSON text so the wire format and the stored format are the same.
/// Only definitions are persisted; invocations never touch storage.

use crate::flow::types::FlowDefinition;
use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool},
    Row,
};
use std::collections::HashMap;
use std::path::Path;

/// SQLite-based flow storage manager
#[derive(Debug, Clone)]
pub struct FlowStorage {
    /// SQLite connection pool for the flow database
    pool: SqlitePool,
}

impl FlowStorage {
    /// Create new storage instance with an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database file and initialise the schema
    pub async fn connect(database_path: impl AsRef<Path>) -> Result<Self> {
        let database_path = database_path.as_ref();
        if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("Failed to create database directory '{}': {}", parent.display(), e))?;
        }

        tracing::info!("🗄️ Opening flow database: {}", database_path.display());

        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Initialize the flow storage schema
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                definition TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_flows_name ON flows(name)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Store a new flow
    ///
    /// Returns false, leaving the stored row untouched, if the id is taken.
    pub async fn insert_flow(&self, flow: &FlowDefinition) -> Result<bool> {
        let definition_json = serde_json::to_string(flow)?;

        let result = sqlx::query(
            r#"
            INSERT INTO flows (id, name, definition)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&flow.id)
        .bind(&flow.name)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Replace the definition of an existing flow
    ///
    /// Returns false if no flow with that id is stored.
    pub async fn update_flow(&self, flow: &FlowDefinition) -> Result<bool> {
        let definition_json = serde_json::to_string(flow)?;

        let result = sqlx::query(
            r#"
            UPDATE flows
            SET name = ?, definition = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(&flow.name)
        .bind(&definition_json)
        .bind(&flow.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Retrieve a flow by ID
    pub async fn get_flow(&self, id: &str) -> Result<Option<FlowDefinition>> {
        let row = sqlx::query("SELECT definition FROM flows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition_json)?))
            }
            None => Ok(None),
        }
    }

    /// List all flows with basic metadata, most recently updated first
    pub async fn list_flows(&self) -> Result<Vec<FlowMetadata>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name,
                   CAST(created_at AS TEXT) AS created_at,
                   CAST(updated_at AS TEXT) AS updated_at
            FROM flows ORDER BY updated_at DESC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| FlowMetadata {
                id: row.get("id"),
                name: row.get("name"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Load all flows for registry initialization
    pub async fn load_all_flows(&self) -> Result<HashMap<String, FlowDefinition>> {
        let rows = sqlx::query("SELECT id, definition FROM flows")
            .fetch_all(&self.pool)
            .await?;

        let mut flows = HashMap::new();
        for row in rows {
            let id: String = row.get("id");
            let definition_json: String = row.get("definition");
            flows.insert(id, serde_json::from_str(&definition_json)?);
        }

        Ok(flows)
    }

    /// Delete a flow by ID
    pub async fn delete_flow(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM flows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Basic flow metadata for listing operations
#[derive(Debug, serde::Serialize)]
pub struct FlowMetadata {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}
