use sea_orm::{sea_query::StringLen, DeriveActiveEnum};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Represents the lifecycle state of a queued job record.
///
/// A record is created `New`, claimed into `Processing` by exactly one worker
/// and then ends up `Finished`, back in `New` (retryable failure) or `Error`.
///
/// # State Transitions
///
/// - `New` → `Processing` (claim)
/// - `Processing` → `Finished` (success)
/// - `Processing` → `New` (retryable failure, deactivated action, abandoned claim)
/// - `Processing` → `Error` (tries exhausted or permanent failure)
///
/// `Finished` and `Error` are terminal: the record is never modified again.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[derive(Default)]
pub enum JobStatus {
    /// Waiting to be claimed by a worker.
    ///
    /// Eligible for a claim once `next_attempt_at` has been reached (or is unset).
    #[sea_orm(string_value = "new")]
    #[default]
    New,

    /// Claimed by a worker, which holds exclusive execution rights.
    #[sea_orm(string_value = "processing")]
    Processing,

    /// Action executed successfully. Terminal.
    #[sea_orm(string_value = "finished")]
    Finished,

    /// Tries exhausted or failed permanently. Terminal.
    #[sea_orm(string_value = "error")]
    Error,
}

impl JobStatus {
    /// Terminal records are kept as an audit trail and never change again.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }

    pub const fn is_processing(&self) -> bool {
        matches!(self, Self::Processing)
    }

    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::New)
    }
}
