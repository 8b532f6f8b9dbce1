use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::{RecoveryConfig, WorkerQueueConfig, WorkersConfig};

use super::job_dao::{DaoError, JobDao, JobFilter};
use super::JobStatus;

const ABANDONED_REASON: &str = "Claim abandoned by worker";

pub(crate) async fn run_recovery_loop(
    config: RecoveryConfig,
    workers: WorkersConfig,
    dao: &dyn JobDao,
    shutdown: &mut watch::Receiver<bool>,
) {
    let interval = Duration::from_secs(config.interval_seconds);
    let lease = Duration::from_secs(config.lease_seconds);

    for (action_type, worker_config) in &workers.workers {
        if worker_config.count > 0 && worker_config.execution_timeout_ms.is_none() {
            warn!(
                "Queue '{}' has no execution timeout; its claims are never recovered",
                action_type
            );
        }
    }

    while !*shutdown.borrow() {
        let now = chrono::Utc::now().naive_utc();
        match recover_stale_jobs(&workers, dao, lease, now).await {
            Ok(recovered_count) => {
                if recovered_count > 0 {
                    info!("🏥 Recovered {} abandoned jobs", recovered_count);
                }
            }
            Err(e) => {
                error!("❌ Failed to recover abandoned jobs: {}", e);
            }
        }

        tokio::select! {
            () = sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

/// How long a claim of this queue must be held before it counts as abandoned.
///
/// At least twice the enforced execution timeout. A queue without a timeout
/// has no bound on a live attempt, so its claims are never considered
/// abandoned.
#[must_use]
pub fn abandoned_after(worker_config: &WorkerQueueConfig, lease: Duration) -> Option<Duration> {
    let timeout = Duration::from_millis(worker_config.execution_timeout_ms?);
    Some(lease.max(timeout.saturating_mul(2)))
}

/// Settles every queue's `processing` records whose claim outlived its lease.
pub async fn recover_stale_jobs(
    workers: &WorkersConfig,
    dao: &dyn JobDao,
    lease: Duration,
    now: NaiveDateTime,
) -> Result<usize, DaoError> {
    let mut total_recovered = 0;

    for (action_type, worker_config) in &workers.workers {
        let Some(stale_after) = abandoned_after(worker_config, lease) else {
            continue;
        };
        total_recovered +=
            recover_stale_jobs_for_queue(action_type, worker_config, dao, stale_after, now)
                .await?;
    }

    Ok(total_recovered)
}

/// The abandoned attempt is counted, so a record that keeps killing its
/// worker still ends up in `error` once its tries are spent.
pub async fn recover_stale_jobs_for_queue(
    action_type: &str,
    worker_config: &WorkerQueueConfig,
    dao: &dyn JobDao,
    stale_after: Duration,
    now: NaiveDateTime,
) -> Result<usize, DaoError> {
    let stale_after = chrono::Duration::from_std(stale_after).unwrap_or(chrono::Duration::MAX);
    let cutoff_time = now.checked_sub_signed(stale_after).unwrap_or(NaiveDateTime::MIN);

    let processing = dao
        .find(
            &JobFilter::new()
                .action_type(action_type)
                .status(JobStatus::Processing),
        )
        .await?;

    let mut recovered_count = 0;
    for mut stale_job in processing
        .into_iter()
        .filter(|job| job.started.is_none_or(|started| started <= cutoff_time))
    {
        let claimed_at = stale_job.started;

        let terminal = stale_job.fail(now, ABANDONED_REASON, worker_config.max_tries, false);
        if !terminal {
            stale_job.next_attempt_at = worker_config.retry.next_attempt_at(stale_job.tries, now);
        }

        warn!(
            "🏥 Recovering job {}({}) claimed {}s ago; now {} after {} attempt(s)",
            stale_job.action_type,
            stale_job.id,
            claimed_at.map_or(0, |started| now.signed_duration_since(started).num_seconds()),
            stale_job.status,
            stale_job.tries
        );

        let saved = match claimed_at {
            Some(claimed_at) => dao.update_claimed(&stale_job, claimed_at).await,
            None => dao.update(&stale_job).await,
        };

        match saved {
            Ok(()) => recovered_count += 1,
            // The worker settled it between the scan and this update
            Err(DaoError::ClaimLost(_) | DaoError::TerminalRecord(_)) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(recovered_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job_registry::JobRegistry;
    use crate::jobs::memory_dao::InMemoryJobDao;
    use crate::jobs::worker::execute_and_update_job;
    use crate::jobs::{JobParameters, JobRecord};
    use crate::tests::setup_test::ScriptedAction;

    const LEASE: Duration = Duration::from_secs(600);

    fn timed_queue(max_tries: u32) -> WorkerQueueConfig {
        let mut config = WorkerQueueConfig::with_count(1);
        config.max_tries = max_tries;
        config.execution_timeout_ms = Some(60_000);
        config
    }

    fn queue(max_tries: u32) -> WorkersConfig {
        WorkersConfig::default().with_queue("Thumbnail", timed_queue(max_tries))
    }

    #[test]
    fn test_lease_follows_execution_timeout() {
        let mut config = timed_queue(3);
        assert_eq!(abandoned_after(&config, LEASE), Some(LEASE));

        config.execution_timeout_ms = Some(900_000);
        assert_eq!(abandoned_after(&config, LEASE), Some(Duration::from_secs(1800)));

        config.execution_timeout_ms = None;
        assert_eq!(abandoned_after(&config, LEASE), None);
    }

    #[tokio::test]
    async fn test_stale_claim_goes_back_to_queue() {
        let dao = InMemoryJobDao::new();
        let record = JobRecord::new("Thumbnail", JobParameters::new());
        dao.create(&record).await.unwrap();

        let claimed_at = chrono::Utc::now().naive_utc();
        dao.claim_next("Thumbnail", claimed_at).await.unwrap().unwrap();

        let later = claimed_at + chrono::Duration::minutes(15);
        let recovered = recover_stale_jobs(&queue(3), &dao, LEASE, later)
            .await
            .unwrap();

        assert_eq!(recovered, 1);
        let stored = dao.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::New);
        assert_eq!(stored.tries, 1);
        assert_eq!(stored.last_exception.as_deref(), Some(ABANDONED_REASON));
    }

    #[tokio::test]
    async fn test_fresh_claim_is_left_alone() {
        let dao = InMemoryJobDao::new();
        let record = JobRecord::new("Thumbnail", JobParameters::new());
        dao.create(&record).await.unwrap();

        let claimed_at = chrono::Utc::now().naive_utc();
        dao.claim_next("Thumbnail", claimed_at).await.unwrap().unwrap();

        let later = claimed_at + chrono::Duration::minutes(5);
        let recovered = recover_stale_jobs(&queue(3), &dao, LEASE, later)
            .await
            .unwrap();

        assert_eq!(recovered, 0);
        let stored = dao.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_claims_without_timeout_are_never_recovered() {
        let dao = InMemoryJobDao::new();
        let record = JobRecord::new("Thumbnail", JobParameters::new());
        dao.create(&record).await.unwrap();

        let claimed_at = chrono::Utc::now().naive_utc();
        dao.claim_next("Thumbnail", claimed_at).await.unwrap().unwrap();

        let workers = WorkersConfig::default()
            .with_queue("Thumbnail", WorkerQueueConfig::with_count(1));
        let much_later = claimed_at + chrono::Duration::days(2);
        let recovered = recover_stale_jobs(&workers, &dao, LEASE, much_later)
            .await
            .unwrap();

        assert_eq!(recovered, 0);
        let stored = dao.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
        assert_eq!(stored.tries, 0);
    }

    #[tokio::test]
    async fn test_stale_claim_with_exhausted_tries_becomes_error() {
        let dao = InMemoryJobDao::new();
        let mut record = JobRecord::new("Thumbnail", JobParameters::new());
        record.tries = 2;
        dao.create(&record).await.unwrap();

        let claimed_at = chrono::Utc::now().naive_utc();
        dao.claim_next("Thumbnail", claimed_at).await.unwrap().unwrap();

        let later = claimed_at + chrono::Duration::hours(1);
        recover_stale_jobs(&queue(3), &dao, LEASE, later)
            .await
            .unwrap();

        let stored = dao.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Error);
        assert_eq!(stored.tries, 3);
    }

    #[tokio::test]
    async fn test_late_result_of_recovered_claim_is_dropped() {
        let dao = InMemoryJobDao::new();
        let record = JobRecord::new("Thumbnail", JobParameters::new());
        dao.create(&record).await.unwrap();

        let script = ScriptedAction::failing_first(1);
        let mut registry = JobRegistry::new();
        script.register(&mut registry, "Thumbnail");
        let worker_config = timed_queue(5);

        // First holder goes quiet long enough to look abandoned
        let first_claim = chrono::Utc::now().naive_utc() - chrono::Duration::hours(1);
        let first = dao.claim_next("Thumbnail", first_claim).await.unwrap().unwrap();
        let now = chrono::Utc::now().naive_utc();
        let recovered = recover_stale_jobs(&queue(5), &dao, LEASE, now).await.unwrap();
        assert_eq!(recovered, 1);

        // Second holder fails its attempt
        let second = dao
            .claim_next("Thumbnail", chrono::Utc::now().naive_utc())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.id, first.id);
        execute_and_update_job(second, &worker_config, &dao, &registry, "Thumbnail-1")
            .await
            .unwrap();
        let before = dao.get(record.id).await.unwrap().unwrap();
        assert_eq!(before.tries, 2);

        // First holder finally succeeds; its result must not land
        execute_and_update_job(first, &worker_config, &dao, &registry, "Thumbnail-0")
            .await
            .unwrap();

        let stored = dao.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::New);
        assert_eq!(stored.tries, 2);
        assert_eq!(script.executions.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
