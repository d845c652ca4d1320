//! Selection of the remote executions that are due for archiving.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::execution::ExecutionMetadata;

/// Pick the executions to archive this cycle.
///
/// An execution qualifies when it has finished, is not already stored
/// locally, and its date is known and older than `min_age`. Qualifying
/// executions are ordered oldest first (ties broken by id) and at most
/// `max_to_archive` are returned; the rest wait for a later cycle.
pub fn filter_executions_to_archive(
    remote: &BTreeMap<u32, ExecutionMetadata>,
    local: &[ExecutionMetadata],
    min_age: Duration,
    max_to_archive: usize,
    now: DateTime<Utc>,
) -> Vec<ExecutionMetadata> {
    let archived: HashSet<u32> = local.iter().map(|e| e.id).collect();

    let mut eligible: Vec<(DateTime<Utc>, &ExecutionMetadata)> = remote
        .values()
        .filter(|e| !e.active)
        .filter(|e| !archived.contains(&e.id))
        .filter_map(|e| e.parsed_date().map(|date| (date, e)))
        .filter(|(date, _)| now.signed_duration_since(*date) > min_age)
        .collect();

    eligible.sort_by(|(a_date, a), (b_date, b)| a_date.cmp(b_date).then(a.id.cmp(&b.id)));

    eligible
        .into_iter()
        .take(max_to_archive)
        .map(|(_, e)| e.clone())
        .collect()
}
