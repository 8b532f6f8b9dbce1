use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::WorkerQueueConfig;

use super::job_dao::{DaoError, JobDao};
use super::job_registry::JobRegistry;
use super::job_result::JobResult;
use super::{JobAction, JobError, JobRecord};

/// What happened to a claimed record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attempt {
    Processed,
    /// The action is deactivated; the record went back to the queue untouched
    Deferred,
}

pub(crate) async fn worker(
    worker_instance_name: &str,
    action_type: &str,
    worker_config: &WorkerQueueConfig,
    dao: &dyn JobDao,
    job_registry: &JobRegistry,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), DaoError> {
    loop {
        // Claim and execute until the queue is drained
        let mut jobs_processed = 0;
        while !*shutdown.borrow() {
            let now = chrono::Utc::now().naive_utc();
            let Some(job) = dao.claim_next(action_type, now).await? else {
                break;
            };

            debug!(
                "🔧 Worker '{worker_instance_name}' claimed {}({}) attempt #{}",
                job.action_type,
                job.id,
                job.tries + 1
            );

            let attempt =
                execute_and_update_job(job, worker_config, dao, job_registry, worker_instance_name)
                    .await?;
            match attempt {
                Attempt::Processed => jobs_processed += 1,
                Attempt::Deferred => break,
            }
        }

        if jobs_processed > 0 {
            debug!(
                "Worker '{}' processed {} job(s), queue drained",
                worker_instance_name, jobs_processed
            );
        }

        if *shutdown.borrow() {
            debug!("Worker '{}' stopping", worker_instance_name);
            return Ok(());
        }

        // Jitter keeps idle workers of one pool from polling in lockstep
        let idle = Duration::from_millis(worker_config.poll_interval_ms)
            + Duration::from_millis(fastrand::u64(0..=worker_config.poll_interval_ms / 10));

        tokio::select! {
            () = sleep(idle) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

pub(crate) async fn execute_and_update_job(
    mut job: JobRecord,
    worker_config: &WorkerQueueConfig,
    dao: &dyn JobDao,
    job_registry: &JobRegistry,
    worker_instance_name: &str,
) -> Result<Attempt, DaoError> {
    let Some(claimed_at) = job.started else {
        return Err(DaoError::Corrupt {
            id: job.id,
            reason: "claimed record has no start time".to_string(),
        });
    };

    let action = match job_registry.resolve(&job) {
        Ok(action) => action,
        Err(e) => {
            // Nothing was executed, so there is nothing to roll back
            let result = JobResult::Failed(e);
            handle_job_failure(
                &mut job,
                &result,
                worker_config,
                worker_instance_name,
                Duration::ZERO,
            );
            save_after_execution(&job, claimed_at, dao, worker_instance_name).await?;
            return Ok(Attempt::Processed);
        }
    };

    if !action.is_activated() {
        debug!(
            "⏸️ Worker '{worker_instance_name}' deferred {}({}): action is deactivated",
            job.action_type, job.id
        );
        job.release();
        save_after_execution(&job, claimed_at, dao, worker_instance_name).await?;
        return Ok(Attempt::Deferred);
    }

    let start_time = Instant::now();
    let result = match worker_config.execution_timeout_ms {
        Some(timeout_ms) => timeout(
            Duration::from_millis(timeout_ms),
            run_guarded(action.execute()),
        )
        .await
        .unwrap_or(JobResult::TimedOut),
        None => run_guarded(action.execute()).await,
    };
    let execution_duration = start_time.elapsed();

    if let JobResult::Completed = result {
        info!(
            "✅ Worker '{worker_instance_name}' completed job {}({}) added at {} in {:?}",
            job.action_type, job.id, job.added, execution_duration
        );
        job.finish(chrono::Utc::now().naive_utc());
    } else {
        rollback(action.as_ref(), &job, worker_instance_name).await;
        handle_job_failure(
            &mut job,
            &result,
            worker_config,
            worker_instance_name,
            execution_duration,
        );
    }

    save_after_execution(&job, claimed_at, dao, worker_instance_name).await?;
    Ok(Attempt::Processed)
}

/// Runs action code so that a panic turns into an ordinary failure
async fn run_guarded<F>(future: F) -> JobResult
where
    F: Future<Output = Result<(), JobError>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result.into(),
        Err(panic) => JobResult::Failed(JobError::TryAgainLater(format!(
            "Action panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Best-effort: a failed rollback never blocks the retry or terminal transition
async fn rollback(action: &dyn JobAction, job: &JobRecord, worker_instance_name: &str) {
    match run_guarded(action.rollback()).await {
        JobResult::Completed => {}
        result => {
            error!(
                "↩️ Worker '{worker_instance_name}' could not roll back {}({}): {}",
                job.action_type, job.id, result
            );
        }
    }
}

fn handle_job_failure(
    job: &mut JobRecord,
    result: &JobResult,
    worker_config: &WorkerQueueConfig,
    worker_instance_name: &str,
    execution_duration: Duration,
) {
    let now = chrono::Utc::now().naive_utc();
    let terminal = job.fail(
        now,
        result.to_string(),
        worker_config.max_tries,
        result.is_permanent_failure(),
    );

    if terminal {
        error!(
            "❌ Worker '{worker_instance_name}' failed job {}({}) after {} attempt(s) in {:?}: {}",
            job.action_type, job.id, job.tries, execution_duration, result
        );
    } else {
        job.next_attempt_at = worker_config.retry.next_attempt_at(job.tries, now);
        warn!(
            "⚠️ Worker '{worker_instance_name}' retrying job {}({}) after {:?} ({}/{}): {}",
            job.action_type,
            job.id,
            execution_duration,
            job.tries,
            worker_config.max_tries,
            result
        );
    }
}

async fn save_after_execution(
    job: &JobRecord,
    claimed_at: NaiveDateTime,
    dao: &dyn JobDao,
    worker_instance_name: &str,
) -> Result<(), DaoError> {
    match dao.update_claimed(job, claimed_at).await {
        Ok(()) => Ok(()),
        // Recovery settled this claim while the action was running
        Err(DaoError::ClaimLost(id)) => {
            warn!(
                "Worker '{worker_instance_name}' dropped result for job {}({}): claim was taken over",
                job.action_type, id
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}
