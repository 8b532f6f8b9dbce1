//! `SeaORM` Entity for queued job records

use crate::database::models::job_status::JobStatus;
use crate::jobs::{job_dao::DaoError, JobParameters, JobRecord};
use sea_orm::entity::prelude::*;
use sea_orm::Set;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "job")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub action_type: String,
    #[sea_orm(column_type = "Json")]
    pub parameters: Json,
    pub status: JobStatus,
    pub added: DateTime,
    pub started: Option<DateTime>,
    pub finished: Option<DateTime>,
    pub tries: i32,
    #[sea_orm(column_type = "Text", nullable)]
    pub last_exception: Option<String>,
    pub next_attempt_at: Option<DateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parameters are stored as a flat JSON object of strings
    pub fn into_record(self) -> Result<JobRecord, DaoError> {
        let parameters: JobParameters =
            serde_json::from_value(self.parameters).map_err(|e| DaoError::Corrupt {
                id: self.id,
                reason: format!("parameters are not a string map: {e}"),
            })?;
        let tries = u32::try_from(self.tries).map_err(|_| DaoError::Corrupt {
            id: self.id,
            reason: format!("negative tries {}", self.tries),
        })?;

        Ok(JobRecord {
            id: self.id,
            action_type: self.action_type,
            parameters,
            status: self.status,
            added: self.added,
            started: self.started,
            finished: self.finished,
            tries,
            last_exception: self.last_exception,
            next_attempt_at: self.next_attempt_at,
        })
    }
}

impl From<&JobRecord> for ActiveModel {
    fn from(record: &JobRecord) -> Self {
        let parameters = record
            .parameters
            .iter()
            .map(|(key, value)| (key.clone(), Json::String(value.clone())))
            .collect::<serde_json::Map<_, _>>();

        Self {
            id: Set(record.id),
            action_type: Set(record.action_type.clone()),
            parameters: Set(Json::Object(parameters)),
            status: Set(record.status),
            added: Set(record.added),
            started: Set(record.started),
            finished: Set(record.finished),
            tries: Set(i32::try_from(record.tries).unwrap_or(i32::MAX)),
            last_exception: Set(record.last_exception.clone()),
            next_attempt_at: Set(record.next_attempt_at),
        }
    }
}
