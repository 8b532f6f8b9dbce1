use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::jobs::{
    job_dao::{DaoError, JobDao, JobFilter},
    Job, JobParameters, JobRecord, JobStatus,
};

/// Producer-side handle for one action type.
///
/// Holds no queue state of its own: every record lives in the store, so
/// queued work survives a process restart.
#[derive(Clone)]
pub struct JobQueue {
    action_type: String,
    dao: Arc<dyn JobDao>,
}

impl JobQueue {
    pub fn new(action_type: impl Into<String>, dao: Arc<dyn JobDao>) -> Self {
        Self {
            action_type: action_type.into(),
            dao,
        }
    }

    /// Queue handle named after a typed job
    pub fn for_job<J: Job>(dao: Arc<dyn JobDao>) -> Self {
        Self::new(J::name(), dao)
    }

    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    /// Persist a new record; does not wait for it to run.
    pub async fn add(&self, parameters: JobParameters) -> Result<JobRecord, DaoError> {
        let record = JobRecord::new(self.action_type.clone(), parameters);
        self.dao.create(&record).await?;

        debug!("📥 Queued {}({})", record.action_type, record.id);
        Ok(record)
    }

    /// Persist a new record that may not be claimed before `not_before`.
    pub async fn add_at(
        &self,
        parameters: JobParameters,
        not_before: NaiveDateTime,
    ) -> Result<JobRecord, DaoError> {
        let mut record = JobRecord::new(self.action_type.clone(), parameters);
        record.next_attempt_at = Some(not_before);
        self.dao.create(&record).await?;

        debug!(
            "📥 Queued {}({}) for {}",
            record.action_type, record.id, not_before
        );
        Ok(record)
    }

    /// Records of this queue matching `filter`; its action type is always overridden.
    pub async fn listing(&self, filter: JobFilter) -> Result<Vec<JobRecord>, DaoError> {
        self.dao.find(&self.scoped(filter)).await
    }

    pub async fn count(&self, filter: JobFilter) -> Result<u64, DaoError> {
        self.dao.count(&self.scoped(filter)).await
    }

    /// Delete the records matching `filter`.
    ///
    /// Records currently `processing` are skipped so that no running attempt
    /// loses its record. Returns the number of deleted records.
    pub async fn clear(&self, filter: JobFilter) -> Result<usize, DaoError> {
        let records = self.dao.find(&self.scoped(filter)).await?;

        let mut deleted = 0;
        for record in records {
            if record.status == JobStatus::Processing {
                warn!(
                    "Not clearing {}({}): it is being processed",
                    record.action_type, record.id
                );
                continue;
            }

            match self.dao.delete(&record).await {
                Ok(()) => deleted += 1,
                Err(DaoError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        debug!("🧹 Cleared {} job(s) from '{}'", deleted, self.action_type);
        Ok(deleted)
    }

    fn scoped(&self, filter: JobFilter) -> JobFilter {
        filter.action_type(self.action_type.clone())
    }
}

impl Debug for JobQueue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("action_type", &self.action_type)
            .finish_non_exhaustive()
    }
}
