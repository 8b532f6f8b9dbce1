use async_trait::async_trait;
use chrono::{NaiveDateTime, SubsecRound};
use sea_orm::{
    sea_query::{Expr, LockBehavior, LockType},
    ActiveValue::NotSet,
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select, SqlErr, TransactionTrait,
};
use tracing::debug;

use crate::database::models::{
    job::{self, Entity as JobEntity},
    job_status::JobStatus,
};
use crate::jobs::{
    job_dao::{DaoError, JobDao, JobFilter},
    JobId, JobRecord,
};

/// Job store backed by the `job` table.
///
/// On Postgres the candidate row is locked with `FOR UPDATE SKIP LOCKED` so
/// concurrent claimers move on to the next record instead of queueing up. On
/// every backend the `New` → `Processing` update is conditional on the status
/// still being `New`, which is what guarantees a single winner.
#[derive(Clone, Debug)]
pub struct DatabaseJobDao {
    db: DatabaseConnection,
}

impl DatabaseJobDao {
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn filtered(filter: &JobFilter) -> Select<JobEntity> {
        let mut query = JobEntity::find();

        if let Some(action_type) = &filter.action_type {
            query = query.filter(job::Column::ActionType.eq(action_type.as_str()));
        }
        if !filter.statuses.is_empty() {
            query = query.filter(job::Column::Status.is_in(filter.statuses.iter().copied()));
        }

        query
            .order_by_asc(job::Column::Added)
            .order_by_asc(job::Column::Id)
    }

    /// Tells a missing record apart from one that exists in another state.
    async fn missing_or(&self, id: JobId, err: DaoError) -> Result<(), DaoError> {
        match JobEntity::find_by_id(id).one(&self.db).await? {
            Some(_) => Err(err),
            None => Err(DaoError::NotFound(id)),
        }
    }

    /// Parameter criteria are matched after loading; the JSON column has no
    /// portable containment operator.
    async fn find_matching_parameters(
        &self,
        filter: &JobFilter,
    ) -> Result<Vec<JobRecord>, DaoError> {
        let mut records = Vec::new();
        for model in Self::filtered(filter).all(&self.db).await? {
            let record = model.into_record()?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl JobDao for DatabaseJobDao {
    async fn find(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, DaoError> {
        if filter.parameters.is_empty() {
            return Self::filtered(filter)
                .offset(filter.offset)
                .limit(filter.limit)
                .all(&self.db)
                .await?
                .into_iter()
                .map(job::Model::into_record)
                .collect();
        }

        let offset = usize::try_from(filter.offset).unwrap_or(usize::MAX);
        let limit = filter
            .limit
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));

        Ok(self
            .find_matching_parameters(filter)
            .await?
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn count(&self, filter: &JobFilter) -> Result<u64, DaoError> {
        if filter.parameters.is_empty() {
            return Ok(Self::filtered(filter).count(&self.db).await?);
        }

        let count = self.find_matching_parameters(filter).await?.len();
        Ok(count as u64)
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, DaoError> {
        JobEntity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(job::Model::into_record)
            .transpose()
    }

    async fn create(&self, record: &JobRecord) -> Result<(), DaoError> {
        let active_model: job::ActiveModel = record.into();

        JobEntity::insert(active_model)
            .exec_without_returning(&self.db)
            .await
            .map_err(|e| match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => DaoError::Duplicate(record.id),
                _ => DaoError::Database(e),
            })?;

        Ok(())
    }

    async fn update(&self, record: &JobRecord) -> Result<(), DaoError> {
        let mut active_model: job::ActiveModel = record.into();
        active_model.id = NotSet;

        let result = JobEntity::update_many()
            .set(active_model)
            .filter(job::Column::Id.eq(record.id))
            .filter(job::Column::Status.is_not_in([JobStatus::Finished, JobStatus::Error]))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            return Ok(());
        }

        // Nothing updated: either the record is gone or it is terminal
        self.missing_or(record.id, DaoError::TerminalRecord(record.id)).await
    }

    async fn update_claimed(
        &self,
        record: &JobRecord,
        claimed_at: NaiveDateTime,
    ) -> Result<(), DaoError> {
        let mut active_model: job::ActiveModel = record.into();
        active_model.id = NotSet;

        let result = JobEntity::update_many()
            .set(active_model)
            .filter(job::Column::Id.eq(record.id))
            .filter(job::Column::Status.eq(JobStatus::Processing))
            .filter(job::Column::Started.eq(claimed_at))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            return Ok(());
        }

        self.missing_or(record.id, DaoError::ClaimLost(record.id)).await
    }

    async fn delete(&self, record: &JobRecord) -> Result<(), DaoError> {
        let result = JobEntity::delete_by_id(record.id).exec(&self.db).await?;

        if result.rows_affected == 0 {
            return Err(DaoError::NotFound(record.id));
        }
        Ok(())
    }

    async fn claim_next(
        &self,
        action_type: &str,
        now: NaiveDateTime,
    ) -> Result<Option<JobRecord>, DaoError> {
        // Postgres keeps microseconds; the claim time must compare equal once stored
        let claimed_at = now.trunc_subsecs(6);

        // A lost race means another claimer took that row, so this terminates
        // once no claimable row is left.
        loop {
            let txn = self.db.begin().await?;

            let mut query = JobEntity::find()
                .filter(job::Column::ActionType.eq(action_type))
                .filter(job::Column::Status.eq(JobStatus::New))
                .filter(
                    Condition::any()
                        .add(job::Column::NextAttemptAt.is_null())
                        .add(job::Column::NextAttemptAt.lte(now)),
                )
                .order_by_asc(job::Column::Added) // Select oldest job first
                .order_by_asc(job::Column::Id)
                .limit(1);

            if txn.get_database_backend() == DbBackend::Postgres {
                query = query.lock_with_behavior(LockType::Update, LockBehavior::SkipLocked);
            }

            let Some(candidate) = query.one(&txn).await? else {
                txn.commit().await?;
                return Ok(None);
            };

            let claimed = JobEntity::update_many()
                .col_expr(job::Column::Status, Expr::value(JobStatus::Processing))
                .col_expr(job::Column::Started, Expr::value(Some(claimed_at)))
                .filter(job::Column::Id.eq(candidate.id))
                .filter(job::Column::Status.eq(JobStatus::New))
                .exec(&txn)
                .await?;

            txn.commit().await?;

            if claimed.rows_affected == 1 {
                let mut record = candidate.into_record()?;
                record.start(claimed_at);
                return Ok(Some(record));
            }

            debug!(
                "Lost claim race for {}({}), selecting another",
                action_type, candidate.id
            );
        }
    }

    async fn action_types(&self) -> Result<Vec<String>, DaoError> {
        Ok(JobEntity::find()
            .select_only()
            .column(job::Column::ActionType)
            .distinct()
            .order_by_asc(job::Column::ActionType)
            .into_tuple::<String>()
            .all(&self.db)
            .await?)
    }
}
