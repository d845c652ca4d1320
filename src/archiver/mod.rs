//! The reports archiver: moves finished executions from the remote reporting
//! server into local storage.
//!
//! One cycle:
//! 1. Make sure the local reports folder exists (disabling the archiver if it can't).
//! 2. List every remote execution.
//! 3. Select the finished, old-enough executions not archived yet.
//! 4. Archive the selection concurrently on the worker pool.
//! 5. Record the cycle in the history ring.

pub mod extract;
pub mod filter;
pub mod integrity;
pub mod worker;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use self::integrity::IntegrityError;
use self::worker::WorkerContext;
use crate::config::ArchiverConfig;
use crate::execution::ExecutionMetadata;
use crate::remote::{self, ReportClient};
use crate::scheduler::history::{ArchiveHistory, ArchiveHistoryRecord};
use crate::storage::MetadataPersistency;

/// Why a single execution was not archived.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to get zip file for execution {id}: {reason}")]
    Download { id: u32, reason: String },

    #[error("failed to extract reports of execution {id}: {reason}")]
    Extract { id: u32, reason: String },

    #[error("integrity check of execution {id} failed: {source}")]
    Integrity {
        id: u32,
        #[source]
        source: IntegrityError,
    },

    #[error("failed to store execution {id}: {reason}")]
    Persist { id: u32, reason: String },

    #[error("worker for execution {id} aborted: {reason}")]
    Aborted { id: u32, reason: String },
}

/// Why a whole cycle was abandoned before archiving anything.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("previous archive cycle still running")]
    AlreadyRunning,

    #[error("failed to list remote executions: {0}")]
    RemoteListing(String),

    #[error("failed to read local executions: {0}")]
    LocalStore(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionFailure {
    pub id: u32,
    pub reason: String,
}

/// Outcome of one completed cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub remote_executions: usize,
    /// Executions the filter selected, in the order they were submitted.
    pub selected: Vec<u32>,
    /// Executions committed locally.
    pub archived: Vec<u32>,
    pub failures: Vec<ExecutionFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Health {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl Health {
    fn up() -> Self {
        Self {
            status: HealthStatus::Up,
            details: BTreeMap::new(),
        }
    }

    fn down(key: &str, detail: String) -> Self {
        Self {
            status: HealthStatus::Down,
            details: BTreeMap::from([(key.to_string(), detail)]),
        }
    }
}

/// Resets the running flag when a cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ReportsArchiver {
    /// `archiver.enabled` as configured. Never changes.
    configured_enabled: bool,
    /// Cleared at runtime when local storage turns out to be unusable.
    enabled: AtomicBool,
    disabled_reason: RwLock<Option<String>>,
    cycle_running: AtomicBool,
    min_reports_age: Duration,
    max_to_archive: usize,
    workers: Arc<Semaphore>,
    ctx: Arc<WorkerContext>,
    history: RwLock<ArchiveHistory>,
}

impl ReportsArchiver {
    pub fn new(
        config: &ArchiverConfig,
        client: Arc<dyn ReportClient>,
        store: Arc<dyn MetadataPersistency>,
    ) -> Self {
        let a = &config.archiver;
        Self {
            configured_enabled: a.enabled,
            enabled: AtomicBool::new(a.enabled),
            disabled_reason: RwLock::new(None),
            cycle_running: AtomicBool::new(false),
            min_reports_age: a.min_reports_age(),
            max_to_archive: a.max_to_archive,
            workers: Arc::new(Semaphore::new(a.worker_threads.max(1))),
            ctx: Arc::new(WorkerContext {
                client,
                store,
                reports_folder: config.reports_folder(),
                download_dir: a.download_dir(),
                delete_after_archive: a.delete_after_archive,
                delete_from_elastic: a.delete_from_elastic,
            }),
            history: RwLock::new(ArchiveHistory::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Start a cycle in the background. The caller may drop the handle.
    pub fn archive(self: &Arc<Self>) -> JoinHandle<()> {
        let archiver = Arc::clone(self);
        tokio::spawn(async move {
            match archiver.run_cycle().await {
                Ok(Some(report)) => {
                    debug!(
                        selected = report.selected.len(),
                        archived = report.archived.len(),
                        failed = report.failures.len(),
                        "Archive cycle finished"
                    );
                }
                Ok(None) => {}
                Err(CycleError::AlreadyRunning) => {
                    warn!("Previous archive cycle still running, skipping this one");
                }
                Err(e) => error!(error = %e, "Archive cycle aborted"),
            }
        })
    }

    /// Run one full cycle and wait for every worker to finish.
    ///
    /// Returns `Ok(None)` when the archiver is (or just became) disabled.
    pub async fn run_cycle(&self) -> Result<Option<CycleReport>, CycleError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        if self
            .cycle_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CycleError::AlreadyRunning);
        }
        let _guard = CycleGuard(&self.cycle_running);

        if !self.init_reports_folder().await {
            return Ok(None);
        }

        let (remote_executions, selected) = self.eligible_executions().await?;
        let mut report = CycleReport {
            remote_executions,
            selected: selected.iter().map(|e| e.id).collect(),
            ..Default::default()
        };
        if selected.is_empty() {
            return Ok(Some(report));
        }

        info!(count = selected.len(), "Archiving executions");
        for outcome in self.archive_executions(selected).await {
            match outcome {
                Ok(execution) => report.archived.push(execution.id),
                Err(e) => report.failures.push(ExecutionFailure {
                    id: failed_id(&e),
                    reason: e.to_string(),
                }),
            }
        }
        report.archived.sort_unstable();

        self.log_history(&report);
        Ok(Some(report))
    }

    /// The executions a cycle would archive right now, plus the remote total.
    /// Has no side effects.
    pub async fn eligible_executions(&self) -> Result<(usize, Vec<ExecutionMetadata>), CycleError> {
        let remote_executions = self
            .ctx
            .client
            .get_executions(remote::EXECUTIONS_INDEX_PATH)
            .await
            .map_err(|e| CycleError::RemoteListing(format!("{e:#}")))?;
        debug!(count = remote_executions.len(), "Found executions in remote server");

        let store = Arc::clone(&self.ctx.store);
        let local = tokio::task::spawn_blocking(move || store.get_all())
            .await
            .map_err(|e| CycleError::LocalStore(e.to_string()))?
            .map_err(|e| CycleError::LocalStore(format!("{e:#}")))?;

        let selected = filter::filter_executions_to_archive(
            &remote_executions,
            &local,
            self.min_reports_age,
            self.max_to_archive,
            Utc::now(),
        );
        debug!(
            count = selected.len(),
            max_to_archive = self.max_to_archive,
            "Executions that need to be archived"
        );
        Ok((remote_executions.len(), selected))
    }

    /// Fan out one worker per execution, bounded by the worker pool, and
    /// collect every outcome. A failing or panicking worker never affects
    /// its siblings.
    async fn archive_executions(
        &self,
        executions: Vec<ExecutionMetadata>,
    ) -> Vec<Result<ExecutionMetadata, ArchiveError>> {
        let tasks: Vec<(u32, JoinHandle<Result<ExecutionMetadata, ArchiveError>>)> = executions
            .into_iter()
            .map(|execution| {
                let id = execution.id;
                let ctx = Arc::clone(&self.ctx);
                let workers = Arc::clone(&self.workers);
                let handle = tokio::spawn(async move {
                    let _permit = workers.acquire_owned().await.map_err(|e| ArchiveError::Aborted {
                        id,
                        reason: e.to_string(),
                    })?;
                    worker::archive_execution(&ctx, execution).await
                });
                (id, handle)
            })
            .collect();

        let (ids, handles): (Vec<u32>, Vec<_>) = tasks.into_iter().unzip();
        futures::future::join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, id)| {
                joined.unwrap_or_else(|e| {
                    Err(ArchiveError::Aborted {
                        id,
                        reason: e.to_string(),
                    })
                })
            })
            .collect()
    }

    /// Creates the reports folder if missing. Disables the archiver on failure.
    async fn init_reports_folder(&self) -> bool {
        let folder = &self.ctx.reports_folder;
        if folder.is_dir() {
            return true;
        }
        debug!(folder = %folder.display(), "Preparing new reports folder");
        match tokio::fs::create_dir_all(folder).await {
            Ok(()) => true,
            Err(e) => {
                self.disable(format!("failed to create {}: {e}", folder.display()));
                false
            }
        }
    }

    fn disable(&self, reason: String) {
        error!(%reason, "Disabling reports archiver");
        self.enabled.store(false, Ordering::Release);
        let mut slot = self
            .disabled_reason
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(reason);
    }

    /// Records the attempted set; executions rolled back still count as archived here.
    fn log_history(&self, report: &CycleReport) {
        if report.selected.is_empty() {
            return;
        }
        let record = ArchiveHistoryRecord {
            cycle_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            remote_executions: report.remote_executions,
            archived_executions: report.selected.len(),
            archived_ids: report.selected.clone(),
            completed: report.archived.len(),
        };
        self.history
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
    }

    /// Oldest-first copy of the cycle history.
    pub fn history(&self) -> Vec<ArchiveHistoryRecord> {
        self.history
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .snapshot()
    }

    /// Up unless the archiver switched itself off while configured on.
    pub fn health(&self) -> Health {
        if !self.configured_enabled || self.is_enabled() {
            return Health::up();
        }
        let reason = self
            .disabled_reason
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .unwrap_or_default();
        Health::down("Reports archiver is down", reason)
    }

    /// History snapshot, or nothing while disabled.
    pub fn info(&self) -> Option<Vec<ArchiveHistoryRecord>> {
        self.is_enabled().then(|| self.history())
    }
}

fn failed_id(e: &ArchiveError) -> u32 {
    match e {
        ArchiveError::Download { id, .. }
        | ArchiveError::Extract { id, .. }
        | ArchiveError::Integrity { id, .. }
        | ArchiveError::Persist { id, .. }
        | ArchiveError::Aborted { id, .. } => *id,
    }
}
