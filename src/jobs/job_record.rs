use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::models::job_status::JobStatus;

use super::JobError;

pub type JobId = Uuid;

/// Action-specific parameters. The engine never interprets them.
pub type JobParameters = BTreeMap<String, String>;

/// A persisted unit of deferred work bound to one action type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Identifies the action that processes this record; doubles as the queue name.
    pub action_type: String,
    pub parameters: JobParameters,
    pub status: JobStatus,
    pub added: NaiveDateTime,
    pub started: Option<NaiveDateTime>,
    pub finished: Option<NaiveDateTime>,
    /// Number of completed attempts. Never decreases.
    pub tries: u32,
    pub last_exception: Option<String>,
    /// Earliest time a `New` record may be claimed. `None` means right away.
    pub next_attempt_at: Option<NaiveDateTime>,
}

impl JobRecord {
    pub fn new(action_type: impl Into<String>, parameters: JobParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            action_type: action_type.into(),
            parameters,
            status: JobStatus::New,
            added: chrono::Utc::now().naive_utc(),
            started: None,
            finished: None,
            tries: 0,
            last_exception: None,
            next_attempt_at: None,
        }
    }

    /// Looks up a parameter an action cannot run without.
    pub fn required_parameter(&self, key: &str) -> Result<&str, JobError> {
        self.parameters.get(key).map(String::as_str).ok_or_else(|| {
            JobError::FailPermanently(format!(
                "Missing parameter '{key}' for {} job {}",
                self.action_type, self.id
            ))
        })
    }

    /// Whether a worker may claim this record at `now`.
    #[must_use]
    pub fn is_ready(&self, now: NaiveDateTime) -> bool {
        self.status.is_pending() && self.next_attempt_at.is_none_or(|at| at <= now)
    }

    /// Mark the record as claimed
    pub const fn start(&mut self, now: NaiveDateTime) {
        self.status = JobStatus::Processing;
        self.started = Some(now);
    }

    /// Mark the record as successfully executed
    pub const fn finish(&mut self, now: NaiveDateTime) {
        self.tries += 1;
        self.status = JobStatus::Finished;
        self.finished = Some(now);
        self.next_attempt_at = None;
    }

    /// Record a failed attempt.
    ///
    /// Returns `true` when the record reached the terminal `Error` state, either
    /// because the failure was permanent or because `max_tries` is exhausted.
    /// Otherwise the record goes back to `New`; the caller decides when it
    /// becomes eligible again by setting `next_attempt_at`.
    pub fn fail(
        &mut self,
        now: NaiveDateTime,
        reason: impl Into<String>,
        max_tries: u32,
        permanent: bool,
    ) -> bool {
        self.tries += 1;
        self.last_exception = Some(reason.into());

        if permanent || self.tries >= max_tries {
            self.status = JobStatus::Error;
            self.finished = Some(now);
            self.next_attempt_at = None;
            true
        } else {
            self.status = JobStatus::New;
            false
        }
    }

    /// Hand a claimed record back without counting an attempt
    pub const fn release(&mut self) {
        self.status = JobStatus::New;
        self.started = None;
    }
}
