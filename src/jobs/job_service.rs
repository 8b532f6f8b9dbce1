use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use thiserror::Error;
use tokio::{spawn, sync::watch, task::JoinHandle, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{
    config::{JobsConfig, WorkerQueueConfig},
    job_queue::JobQueue,
    jobs::{recovery::run_recovery_loop, worker::worker},
};

use super::{job_dao::JobDao, job_registry::JobRegistry};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("No action registered for configured queue '{0}'")]
    UnregisteredAction(String),
    #[error("Job service is already running")]
    AlreadyRunning,
    #[error("Job service did not stop within {0:?}; {1} task(s) were aborted")]
    ShutdownTimedOut(Duration, usize),
}

/// Owns the worker pools and the abandoned-claim sweeper.
///
/// Nothing runs until `start`; `stop` stops claiming new records and waits a
/// bounded time for in-flight attempts to finish.
pub struct JobService {
    config: JobsConfig,
    dao: Arc<dyn JobDao>,
    job_registry: Arc<JobRegistry>,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl JobService {
    pub fn new(config: JobsConfig, dao: Arc<dyn JobDao>, job_registry: JobRegistry) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            dao,
            job_registry: Arc::new(job_registry),
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Queue handle for producers of `action_type` records
    pub fn queue(&self, action_type: impl Into<String>) -> JobQueue {
        JobQueue::new(action_type, self.dao.clone())
    }

    pub fn dao(&self) -> &Arc<dyn JobDao> {
        &self.dao
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    pub fn start(&mut self) -> Result<(), ServiceError> {
        if self.is_running() {
            return Err(ServiceError::AlreadyRunning);
        }

        self.verify_queues_have_actions()?;
        self.shutdown.send_replace(false);

        self.start_worker_pools();

        if self.config.recovery.enabled {
            self.start_recovery_task();
        }

        Ok(())
    }

    pub async fn stop(&mut self, grace: Duration) -> Result<(), ServiceError> {
        if !self.is_running() {
            return Ok(());
        }

        info!("🛑 Stopping job service");
        self.shutdown.send_replace(true);

        let handles: Vec<JoinHandle<()>> = self.handles.drain(..).collect();
        let abort_handles: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        if tokio::time::timeout(grace, join_all(handles)).await.is_ok() {
            info!("🛑 Job service stopped");
            return Ok(());
        }

        let unfinished = abort_handles.iter().filter(|h| !h.is_finished()).count();
        for handle in &abort_handles {
            handle.abort();
        }
        error!(
            "💥 Job service did not stop within {:?}, aborted {} task(s)",
            grace, unfinished
        );
        Err(ServiceError::ShutdownTimedOut(grace, unfinished))
    }

    /// Every configured pool needs an action, otherwise its records could never run.
    fn verify_queues_have_actions(&self) -> Result<(), ServiceError> {
        for (action_type, worker_config) in &self.config.workers.workers {
            if worker_config.count > 0 && !self.job_registry.contains(action_type) {
                return Err(ServiceError::UnregisteredAction(action_type.clone()));
            }
        }

        for action_type in self.job_registry.action_types() {
            let covered = self
                .config
                .workers
                .workers
                .get(action_type)
                .is_some_and(|worker_config| worker_config.count > 0);
            if !covered {
                warn!(
                    "No workers configured for job type '{}'; its jobs will stay queued",
                    action_type
                );
            }
        }

        Ok(())
    }

    fn start_worker_pools(&mut self) {
        info!("🚀 Starting job workers");

        let pools: Vec<(String, WorkerQueueConfig)> = self
            .config
            .workers
            .workers
            .iter()
            .filter(|(_, worker_config)| worker_config.count > 0)
            .map(|(action_type, worker_config)| (action_type.clone(), worker_config.clone()))
            .collect();

        for (action_type, worker_config) in pools {
            info!(
                "⚡ Queue '{}': {} workers, max {} tries",
                action_type, worker_config.count, worker_config.max_tries
            );
            self.start_worker_pool(&action_type, &worker_config);
        }
    }

    fn start_worker_pool(&mut self, action_type: &str, worker_config: &WorkerQueueConfig) {
        for worker_id in 0..worker_config.count {
            let worker_instance_name = format!("{action_type}-{worker_id}");
            let action_type = action_type.to_string();
            let worker_config = worker_config.clone();
            let dao = self.dao.clone();
            let job_registry = self.job_registry.clone();
            let shutdown = self.shutdown.subscribe();

            self.handles.push(spawn(async move {
                run_worker_with_restart(
                    &worker_instance_name,
                    &action_type,
                    &worker_config,
                    dao,
                    job_registry,
                    shutdown,
                )
                .await;
            }));
        }
    }

    fn start_recovery_task(&mut self) {
        let recovery_config = self.config.recovery.clone();
        let workers_config = self.config.workers.clone();
        let dao = self.dao.clone();
        let mut shutdown = self.shutdown.subscribe();

        self.handles.push(spawn(async move {
            info!("🏥 Starting abandoned job recovery");
            run_recovery_loop(recovery_config, workers_config, dao.as_ref(), &mut shutdown).await;
        }));
    }
}

/// Run a worker, restarting it after storage errors until shutdown
async fn run_worker_with_restart(
    worker_instance_name: &str,
    action_type: &str,
    worker_config: &WorkerQueueConfig,
    dao: Arc<dyn JobDao>,
    job_registry: Arc<JobRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut restart_count = 0;
    loop {
        debug!(
            "Starting worker '{}' for '{}' (restart #{})",
            worker_instance_name, action_type, restart_count
        );

        match worker(
            worker_instance_name,
            action_type,
            worker_config,
            dao.as_ref(),
            &job_registry,
            &mut shutdown,
        )
        .await
        {
            Ok(()) => return,
            Err(e) => {
                error!(
                    "💥 Worker '{}' crashed (restart #{}) - error: {}",
                    worker_instance_name, restart_count, e
                );
            }
        }

        restart_count += 1;

        tokio::select! {
            () = sleep(Duration::from_millis(worker_config.restart_delay_ms)) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            return;
        }
    }
}

impl Drop for JobService {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}
