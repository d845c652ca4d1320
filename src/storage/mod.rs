//! Local execution metadata persistence.
//!
//! The archiver only ever needs two operations from the local store:
//! insert one execution, and list everything stored. Both implementations
//! are safe to call from concurrent archive workers.

pub mod memory;
pub mod schema;
pub mod sqlite;

use anyhow::Result;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

use crate::execution::ExecutionMetadata;

pub use self::memory::MemoryMetadataStore;
pub use self::sqlite::SqliteMetadataStore;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Narrow persistence interface required by the archiver.
pub trait MetadataPersistency: Send + Sync {
    /// Insert (or replace) an execution record.
    fn add(&self, execution: &ExecutionMetadata) -> Result<()>;

    /// Every stored execution, ordered by id.
    fn get_all(&self) -> Result<Vec<ExecutionMetadata>>;
}

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}
