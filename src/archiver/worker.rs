//! Per-execution archive pipeline: fetch, extract, verify, commit, remote cleanup.
//!
//! A failed attempt leaves local state as it was before the attempt: the
//! extracted folder is rolled back and nothing reaches the metadata store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::extract::{self, TempArchive};
use super::integrity::{self, IntegrityError};
use super::ArchiveError;
use crate::execution::{self, ExecutionMetadata};
use crate::remote::{self, ReportClient};
use crate::storage::MetadataPersistency;

/// Everything a worker needs, shared by all workers of the archiver.
pub struct WorkerContext {
    pub client: Arc<dyn ReportClient>,
    pub store: Arc<dyn MetadataPersistency>,
    pub reports_folder: PathBuf,
    pub download_dir: PathBuf,
    pub delete_after_archive: bool,
    pub delete_from_elastic: bool,
}

impl WorkerContext {
    /// Local folder of execution `id`.
    pub fn execution_folder(&self, id: u32) -> PathBuf {
        self.reports_folder.join(execution::folder_name(id))
    }
}

/// Archive one execution. Returns the committed record on success.
pub async fn archive_execution(
    ctx: &WorkerContext,
    mut execution: ExecutionMetadata,
) -> Result<ExecutionMetadata, ArchiveError> {
    let id = execution.id;
    let folder = ctx.execution_folder(id);

    // 1. Fetch
    let zip_path = match remote::fetch_report_archive(ctx.client.as_ref(), id, &ctx.download_dir).await {
        Ok(path) => path,
        Err(e) => {
            error!(execution_id = id, error = %format!("{e:#}"), "Failed to get execution zip file");
            return Err(ArchiveError::Download {
                id,
                reason: format!("{e:#}"),
            });
        }
    };
    let archive = TempArchive::new(zip_path);
    debug!(execution_id = id, file = %archive.path().display(), "Got archived report file");

    // 2. Extract
    let zip = archive.path().to_path_buf();
    let destination = ctx.reports_folder.clone();
    let root = execution::folder_name(id);
    let extracted = tokio::task::spawn_blocking(move || extract::extract_archive(&zip, &destination, &root))
        .await
        .map_err(anyhow::Error::from)
        .and_then(|r| r);
    if let Err(e) = extracted {
        error!(execution_id = id, error = %format!("{e:#}"), "Error extracting report archive");
        rollback(&folder).await;
        return Err(ArchiveError::Extract {
            id,
            reason: format!("{e:#}"),
        });
    }

    // 3. Verify
    if let Err(e) = check_integrity(ctx, id, &folder).await {
        error!(
            execution_id = id,
            error = %e,
            "Retrieving reports was unsuccessful. Rolling back and deleting local execution"
        );
        rollback(&folder).await;
        return Err(ArchiveError::Integrity { id, source: e });
    }

    // 4. Commit
    debug!(execution_id = id, "Adding execution to persistency");
    execution.dirty = true;
    let store = Arc::clone(&ctx.store);
    let record = execution.clone();
    let committed = tokio::task::spawn_blocking(move || store.add(&record))
        .await
        .map_err(anyhow::Error::from)
        .and_then(|r| r);
    if let Err(e) = committed {
        error!(execution_id = id, error = %format!("{e:#}"), "Failed to store execution. Rolling back");
        rollback(&folder).await;
        return Err(ArchiveError::Persist {
            id,
            reason: format!("{e:#}"),
        });
    }
    info!(execution_id = id, "Execution archived");

    // 5. Remote cleanup
    if ctx.delete_after_archive {
        delete_remote_execution(ctx, id).await;
    }

    Ok(execution)
}

async fn check_integrity(ctx: &WorkerContext, id: u32, folder: &Path) -> Result<u64, IntegrityError> {
    let response = ctx
        .client
        .get_string(&remote::report_size_path(id))
        .await
        .map_err(|e| IntegrityError::NoResponse {
            reason: format!("{e:#}"),
        })?;

    let folder = folder.to_path_buf();
    let size = tokio::task::spawn_blocking(move || integrity::verify(&response, &folder))
        .await
        .map_err(|e| IntegrityError::LocalUnreadable {
            path: ctx.execution_folder(id).display().to_string(),
            reason: e.to_string(),
        })??;
    debug!(execution_id = id, bytes = size, "Local and remote report sizes match");
    Ok(size)
}

/// Best-effort; the local commit already counts as success.
async fn delete_remote_execution(ctx: &WorkerContext, id: u32) {
    debug!(
        execution_id = id,
        from_elastic = ctx.delete_from_elastic,
        "About to delete execution from remote server"
    );
    let path = remote::execution_delete_path(id, ctx.delete_from_elastic);
    if let Err(e) = ctx.client.delete(&path).await {
        warn!(execution_id = id, error = %format!("{e:#}"), "Remote delete failed; local copy kept");
    }
}

async fn rollback(folder: &Path) {
    let target = folder.to_path_buf();
    if let Err(e) = tokio::task::spawn_blocking(move || extract::remove_folder(&target)).await {
        error!(folder = %folder.display(), error = %e, "Rollback task failed");
    }
}
