//! Client side of the remote reporting server.
//!
//! The archiver only needs four verbs from the server. They sit behind
//! [`ReportClient`] so the archive pipeline can run against the real HTTP
//! client or an in-process stand-in.

pub mod http;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::execution::{self, ExecutionMetadata};

pub use self::http::HttpReportClient;

/// Listing of every execution the remote server knows about.
pub const EXECUTIONS_INDEX_PATH: &str = "/reports/meta.json";

/// Path returning the zip archive of one execution's reports.
pub fn report_archive_path(id: u32) -> String {
    format!("/api/reports/{id}")
}

/// Path returning the total size in bytes of one execution's report folder.
pub fn report_size_path(id: u32) -> String {
    format!("/api/reports/{id}/size")
}

/// Path deleting one execution, optionally from the search index as well.
pub fn execution_delete_path(id: u32, from_elastic: bool) -> String {
    format!("/api/executions/{id}?fromElastic={from_elastic}")
}

/// Verbs the archiver uses against the remote reporting server.
#[async_trait::async_trait]
pub trait ReportClient: Send + Sync {
    /// Fetch and decode an `id -> execution` map.
    async fn get_executions(&self, path: &str) -> Result<BTreeMap<u32, ExecutionMetadata>>;

    /// Fetch a scalar response body as text.
    async fn get_string(&self, path: &str) -> Result<String>;

    /// Download `path` into `dir/file_name` and return the written file.
    async fn get_file(&self, path: &str, dir: &Path, file_name: &str) -> Result<PathBuf>;

    /// Issue a delete request. The response body is ignored.
    async fn delete(&self, path: &str) -> Result<()>;
}

/// Download the zip archive of execution `id` into `dir`.
pub async fn fetch_report_archive(
    client: &dyn ReportClient,
    id: u32,
    dir: &Path,
) -> Result<PathBuf> {
    client
        .get_file(&report_archive_path(id), dir, &execution::archive_file_name(id))
        .await
}
