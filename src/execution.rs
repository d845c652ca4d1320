//! Execution metadata as exchanged with the remote reporting server.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Name of the folder (under the document root) holding all execution reports.
pub const REPORTS_FOLDER_NAME: &str = "reports";

/// Prefix of every per-execution report folder and zip archive.
pub const EXECUTION_FOLDER_PREFIX: &str = "exec";

/// One test-execution run.
///
/// Field names follow the reporting server's JSON (`numOfTests`, `folderName`, ...).
/// `dirty` is local bookkeeping: it is set when the archiver commits a copy
/// and never travels over the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionMetadata {
    pub id: u32,
    pub description: String,
    pub comment: String,
    pub folder_name: String,
    pub uri: String,
    pub date: String,
    pub time: String,
    pub num_of_tests: u32,
    pub num_of_successful_tests: u32,
    pub num_of_failed_tests: u32,
    pub num_of_tests_with_warnings: u32,
    pub active: bool,
    pub locked: bool,
    #[serde(skip)]
    pub dirty: bool,
}

impl ExecutionMetadata {
    pub fn new(id: u32, date: impl Into<String>, active: bool) -> Self {
        Self {
            id,
            date: date.into(),
            active,
            folder_name: folder_name(id),
            ..Default::default()
        }
    }

    /// The execution's start date, or `None` when blank or unparsable.
    pub fn parsed_date(&self) -> Option<DateTime<Utc>> {
        parse_date(&self.date)
    }
}

/// `exec_<id>`
pub fn folder_name(id: u32) -> String {
    format!("{EXECUTION_FOLDER_PREFIX}_{id}")
}

/// `exec_<id>.zip`
pub fn archive_file_name(id: u32) -> String {
    format!("{}.zip", folder_name(id))
}

/// Parse an execution date.
///
/// Accepts the reporting server's `yyyy/MM/dd` (optionally followed by
/// `HH:mm:ss`), ISO `yyyy-MM-dd` and RFC 3339. Date-only values are taken as
/// local midnight.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y/%m/%d %H:%M:%S")
        .ok()
        .or_else(|| {
            ["%Y/%m/%d", "%Y-%m-%d"]
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}
