use std::fmt::{Display, Formatter, Result};

use crate::jobs::JobError;

/// Outcome of a single attempt at executing a job record.
pub enum JobResult {
    Completed,
    Failed(JobError),
    TimedOut,
}

impl JobResult {
    /// Permanent failures go straight to `Error` regardless of remaining tries.
    pub const fn is_permanent_failure(&self) -> bool {
        matches!(self, Self::Failed(JobError::FailPermanently(_)))
    }
}

impl Display for JobResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed(e) => write!(f, "error: {e}"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

impl From<std::result::Result<(), JobError>> for JobResult {
    fn from(result: std::result::Result<(), JobError>) -> Self {
        match result {
            Ok(()) => Self::Completed,
            Err(e) => Self::Failed(e),
        }
    }
}
