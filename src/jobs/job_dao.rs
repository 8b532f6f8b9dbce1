use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;

use super::{JobId, JobParameters, JobRecord, JobStatus};

#[derive(Debug, Error)]
pub enum DaoError {
    #[error("Job {0} not found")]
    NotFound(JobId),
    #[error("Job {0} already exists")]
    Duplicate(JobId),
    #[error("Job {0} is in a terminal state and can no longer change")]
    TerminalRecord(JobId),
    #[error("Job {0} is no longer held by this claim")]
    ClaimLost(JobId),
    #[error("Job {id} has invalid stored data: {reason}")]
    Corrupt { id: JobId, reason: String },
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Selection criteria shared by `find` and `count`.
///
/// Every populated criterion must match. An empty `statuses` list matches any status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub action_type: Option<String>,
    pub parameters: JobParameters,
    pub statuses: Vec<JobStatus>,
    pub offset: u64,
    pub limit: Option<u64>,
}

impl JobFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn action_type(mut self, action_type: impl Into<String>) -> Self {
        self.action_type = Some(action_type.into());
        self
    }

    #[must_use]
    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn status(mut self, status: JobStatus) -> Self {
        self.statuses.push(status);
        self
    }

    #[must_use]
    pub fn statuses(mut self, statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        self.statuses.extend(statuses);
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Checks the criteria against a record, ignoring `offset` and `limit`.
    #[must_use]
    pub fn matches(&self, record: &JobRecord) -> bool {
        self.action_type
            .as_deref()
            .is_none_or(|action_type| record.action_type == action_type)
            && (self.statuses.is_empty() || self.statuses.contains(&record.status))
            && self
                .parameters
                .iter()
                .all(|(key, value)| record.parameters.get(key) == Some(value))
    }
}

/// Durable storage for job records.
///
/// `claim_next` is the only synchronization primitive the engine relies on:
/// under concurrent callers, any given record is handed to exactly one of them.
#[async_trait]
pub trait JobDao: Send + Sync {
    /// Records matching `filter`, oldest `added` first.
    async fn find(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, DaoError>;

    /// Total number of records matching `filter`, regardless of `offset`/`limit`.
    async fn count(&self, filter: &JobFilter) -> Result<u64, DaoError>;

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, DaoError>;

    async fn create(&self, record: &JobRecord) -> Result<(), DaoError>;

    /// Overwrites a stored record. Fails with `TerminalRecord` when the stored
    /// copy is already `Finished` or `Error`.
    async fn update(&self, record: &JobRecord) -> Result<(), DaoError>;

    /// Writes back the outcome of an attempt.
    ///
    /// Only succeeds while the stored record is still `Processing` under the
    /// claim that started at `claimed_at`. Otherwise nothing is written and
    /// `ClaimLost` is returned.
    async fn update_claimed(
        &self,
        record: &JobRecord,
        claimed_at: NaiveDateTime,
    ) -> Result<(), DaoError>;

    async fn delete(&self, record: &JobRecord) -> Result<(), DaoError>;

    /// Atomically moves the oldest claimable `New` record of `action_type` to
    /// `Processing` and returns it.
    async fn claim_next(
        &self,
        action_type: &str,
        now: NaiveDateTime,
    ) -> Result<Option<JobRecord>, DaoError>;

    /// Distinct action types present in the store.
    async fn action_types(&self) -> Result<Vec<String>, DaoError>;
}
