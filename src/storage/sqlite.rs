use anyhow::{Context, Result};
use rusqlite::params;
use std::path::Path;

use super::{open_pool, MetadataPersistency, Pool};
use crate::execution::ExecutionMetadata;

/// SQLite-backed execution metadata store.
///
/// Every call checks out its own pooled connection, so concurrent workers
/// never share a connection; SQLite serializes the writes.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    pool: Pool,
}

impl SqliteMetadataStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let pool = open_pool(path)
            .with_context(|| format!("Failed to open metadata database {}", path.display()))?;
        Ok(Self::new(pool))
    }
}

impl MetadataPersistency for SqliteMetadataStore {
    fn add(&self, execution: &ExecutionMetadata) -> Result<()> {
        let conn = self.pool.get()?;
        let metadata_json = serde_json::to_string(execution)?;

        conn.execute(
            "INSERT OR REPLACE INTO executions (id, date, active, dirty, metadata_json, archived_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                execution.id,
                execution.date,
                execution.active,
                execution.dirty,
                metadata_json,
                chrono::Utc::now().to_rfc3339()
            ],
        )
        .with_context(|| format!("Failed to store execution {}", execution.id))?;

        Ok(())
    }

    fn get_all(&self) -> Result<Vec<ExecutionMetadata>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT metadata_json, dirty FROM executions ORDER BY id")?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
        })?;

        let mut executions = Vec::new();
        for r in rows {
            let (json, dirty) = r?;
            let mut execution: ExecutionMetadata =
                serde_json::from_str(&json).context("Corrupt execution metadata row")?;
            execution.dirty = dirty;
            executions.push(execution);
        }
        Ok(executions)
    }
}
