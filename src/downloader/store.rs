//! Process-wide job table: one record and one progress snapshot per job.
//!
//! Both views sit behind a single lock so a reader never sees a record and a
//! snapshot from different moments of a terminal transition.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use crate::downloader::progress::clamp_percent;
use crate::downloader::{JobRecord, JobStatus, ProgressSnapshot};
use crate::errors::{AppError, Result};

/// Record and snapshot of one job, copied out of the store.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEntry {
    pub record: JobRecord,
    pub snapshot: ProgressSnapshot,
}

#[derive(Default)]
struct Tables {
    records: HashMap<String, JobRecord>,
    snapshots: HashMap<String, ProgressSnapshot>,
}

/// Cheap to clone; every clone sees the same jobs.
#[derive(Clone, Default)]
pub struct JobStore {
    tables: Arc<RwLock<Tables>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a `queued` record with its initial snapshot.
    pub async fn create(&self, record: JobRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.records.contains_key(&record.id) {
            return Err(AppError::DuplicateJob(record.id));
        }

        let id = record.id.clone();
        tables.records.insert(id.clone(), record);
        tables.snapshots.insert(id, ProgressSnapshot::queued());
        Ok(())
    }

    /// Replaces the snapshot of `id` wholesale.
    ///
    /// Returns `false` without touching anything when the job is unknown or
    /// already terminal.
    pub async fn update_snapshot(&self, id: &str, mut snapshot: ProgressSnapshot) -> bool {
        let mut tables = self.tables.write().await;
        let Some(record) = tables.records.get(id) else {
            log::debug!("Dropping snapshot for unknown job {}", id);
            return false;
        };
        if record.status.is_terminal() {
            log::debug!("Dropping snapshot for job {} in terminal state {}", id, record.status);
            return false;
        }

        snapshot.percent = clamp_percent(snapshot.percent);
        tables.snapshots.insert(id.to_string(), snapshot);
        true
    }

    /// Applies `mutator` to the record of `id` atomically.
    ///
    /// A status change the lifecycle does not allow is undone (the other
    /// fields the mutator touched are kept). Returns `false` for unknown ids.
    pub async fn update_record<F>(&self, id: &str, mutator: F) -> bool
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut tables = self.tables.write().await;
        let Some(record) = tables.records.get_mut(id) else {
            log::debug!("Dropping record update for unknown job {}", id);
            return false;
        };

        let previous = record.status;
        mutator(record);
        record.id = id.to_string();

        if !previous.can_transition_to(record.status) {
            log::warn!(
                "Rejected status change {} -> {} for job {}",
                previous,
                record.status,
                id
            );
            record.status = previous;
        } else if previous != record.status {
            stamp_transition(record);
        }
        true
    }

    /// Moves a job to `finished` with its output path and a 100% snapshot.
    pub async fn complete(&self, id: &str, filepath: PathBuf) -> bool {
        let mut tables = self.tables.write().await;
        let Some(record) = tables.records.get_mut(id) else {
            return false;
        };
        if !record.status.can_transition_to(JobStatus::Finished) {
            log::warn!("Job {} cannot finish from state {}", id, record.status);
            return false;
        }

        record.filepath = Some(filepath);
        if record.status != JobStatus::Finished {
            record.status = JobStatus::Finished;
            stamp_transition(record);
        }
        tables.snapshots.insert(id.to_string(), ProgressSnapshot::done());
        true
    }

    /// Moves a job to `error`, keeping the last known percent.
    pub async fn fail(&self, id: &str, rate: &str, message: &str) -> bool {
        let mut tables = self.tables.write().await;
        let Some(record) = tables.records.get_mut(id) else {
            return false;
        };
        if !record.status.can_transition_to(JobStatus::Error) {
            log::warn!("Job {} cannot fail from state {}", id, record.status);
            return false;
        }

        if record.status != JobStatus::Error {
            record.status = JobStatus::Error;
            stamp_transition(record);
        }
        let percent = tables.snapshots.get(id).map(|s| s.percent).unwrap_or(0.0);
        tables
            .snapshots
            .insert(id.to_string(), ProgressSnapshot::failed(percent, rate, message));
        true
    }

    pub async fn get(&self, id: &str) -> Option<JobEntry> {
        let tables = self.tables.read().await;
        let record = tables.records.get(id)?.clone();
        let snapshot = tables
            .snapshots
            .get(id)
            .cloned()
            .unwrap_or_else(ProgressSnapshot::queued);
        Some(JobEntry { record, snapshot })
    }

    pub async fn snapshot(&self, id: &str) -> Option<ProgressSnapshot> {
        self.tables.read().await.snapshots.get(id).cloned()
    }

    /// All jobs, oldest first.
    pub async fn list(&self) -> Vec<JobEntry> {
        let tables = self.tables.read().await;
        let mut entries: Vec<JobEntry> = tables
            .records
            .values()
            .map(|record| JobEntry {
                record: record.clone(),
                snapshot: tables
                    .snapshots
                    .get(&record.id)
                    .cloned()
                    .unwrap_or_else(ProgressSnapshot::queued),
            })
            .collect();
        entries.sort_by(|a, b| {
            a.record
                .created_at
                .cmp(&b.record.created_at)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        entries
    }

    pub async fn job_count(&self) -> usize {
        self.tables.read().await.records.len()
    }
}

fn stamp_transition(record: &mut JobRecord) {
    let now = chrono::Utc::now();
    match record.status {
        JobStatus::Starting => record.started_at = Some(now),
        JobStatus::Finished | JobStatus::Error => record.completed_at = Some(now),
        JobStatus::Queued | JobStatus::Downloading => {}
    }
}
