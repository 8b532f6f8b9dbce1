pub mod job_dao;
pub mod job_record;
pub mod job_registry;
pub mod job_result;
pub mod job_service;
pub mod memory_dao;
pub mod recovery;
pub mod retry_policy;
mod worker;

use async_trait::async_trait;
use thiserror::Error;

pub use crate::database::models::job_status::{self, JobStatus};
pub use job_record::{JobId, JobParameters, JobRecord};

#[derive(Debug, Clone, Error)]
pub enum JobError {
    #[error("{0}")]
    FailPermanently(String),
    #[error("{0}")]
    TryAgainLater(String),
}

/// Business logic executed for a claimed job record.
///
/// Actions must tolerate being executed again after a partial failure: a
/// failed attempt is followed by `rollback` and, tries permitting, another
/// `execute` on a fresh instance.
#[async_trait]
pub trait JobAction: Send + Sync {
    /// A deactivated action leaves its records queued instead of running them.
    fn is_activated(&self) -> bool {
        true
    }

    async fn execute(&self) -> Result<(), JobError>;

    /// Undo the effects of a failed `execute`. Errors are logged, never retried.
    async fn rollback(&self) -> Result<(), JobError> {
        Ok(())
    }
}

/// Typed action that knows its queue name and how to build itself from a record.
pub trait Job: JobAction + Sized + 'static {
    fn name() -> &'static str;

    fn from_record(record: &JobRecord) -> Result<Self, JobError>;
}
