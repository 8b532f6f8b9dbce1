use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::ConnectOptions;
use sea_orm_migration::MigratorTrait;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::{
    database::{job_dao::DatabaseJobDao, migrations::Migrator},
    jobs::{
        job_dao::JobDao, job_registry::JobRegistry, JobAction, JobError, JobId, JobRecord,
    },
};

static TRACING_INITIALIZED: std::sync::Once = std::sync::Once::new();

/// Longest time `wait_for_terminal` waits before failing the test
const TERMINAL_WAIT: Duration = Duration::from_secs(10);

/// Initialize tracing for tests
pub fn init_tracing() {
    TRACING_INITIALIZED.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let _ = tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

/// Creates a migrated, private in-memory SQLite store.
///
/// A single connection is used: every connection to `sqlite::memory:` would
/// otherwise open its own empty database.
///
/// # Panics
///
/// Panics if the connection or the migrations fail.
pub async fn setup_sqlite_dao() -> DatabaseJobDao {
    init_tracing();

    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);

    let db = sea_orm::Database::connect(options)
        .await
        .expect("Failed to open in-memory SQLite database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations on SQLite");

    debug!("In-memory SQLite job store ready");
    DatabaseJobDao::new(db)
}

/// Polls the store until the record reaches `finished` or `error`.
///
/// # Panics
///
/// Panics if the record disappears or stays non-terminal for too long.
pub async fn wait_for_terminal(dao: &dyn JobDao, id: JobId) -> JobRecord {
    let deadline = Instant::now() + TERMINAL_WAIT;
    loop {
        let record = dao
            .get(id)
            .await
            .expect("Failed to read job")
            .expect("Job disappeared from the store");

        if record.status.is_terminal() {
            return record;
        }

        assert!(
            Instant::now() < deadline,
            "Job {id} still {} after {TERMINAL_WAIT:?}",
            record.status
        );
        sleep(Duration::from_millis(10)).await;
    }
}

/// Scriptable action shared by every instance its factory builds.
///
/// Attempt counters live here rather than in the action because the engine
/// builds a fresh action for every attempt.
#[derive(Debug, Default)]
pub struct ScriptedAction {
    pub executions: AtomicU32,
    pub rollbacks: AtomicU32,
    /// Attempts up to and including this number fail
    pub fail_first: u32,
    pub active: AtomicBool,
    pub rollback_fails: AtomicBool,
    /// Failing attempts panic instead of returning an error
    pub panics: AtomicBool,
    pub first_execution_delay: Mutex<Option<Duration>>,
}

impl ScriptedAction {
    pub fn succeeding() -> Arc<Self> {
        Self::failing_first(0)
    }

    pub fn always_failing() -> Arc<Self> {
        Self::failing_first(u32::MAX)
    }

    pub fn failing_first(attempts: u32) -> Arc<Self> {
        Arc::new(Self {
            fail_first: attempts,
            active: AtomicBool::new(true),
            ..Self::default()
        })
    }

    pub fn register(self: &Arc<Self>, registry: &mut JobRegistry, action_type: &str) {
        let script = self.clone();
        registry.register(action_type, move |_record: &JobRecord| {
            Ok(Box::new(ScriptedActionInstance {
                script: script.clone(),
            }) as Box<dyn JobAction>)
        });
    }
}

struct ScriptedActionInstance {
    script: Arc<ScriptedAction>,
}

#[async_trait]
impl JobAction for ScriptedActionInstance {
    fn is_activated(&self) -> bool {
        self.script.active.load(Ordering::SeqCst)
    }

    async fn execute(&self) -> Result<(), JobError> {
        let attempt = self.script.executions.fetch_add(1, Ordering::SeqCst) + 1;

        if attempt == 1 {
            let delay = *self
                .script
                .first_execution_delay
                .lock()
                .expect("script delay lock poisoned");
            if let Some(delay) = delay {
                sleep(delay).await;
            }
        }

        if attempt <= self.script.fail_first {
            assert!(
                !self.script.panics.load(Ordering::SeqCst),
                "script attempt {attempt} blew up"
            );
            return Err(JobError::TryAgainLater(format!("attempt {attempt} failed")));
        }

        Ok(())
    }

    async fn rollback(&self) -> Result<(), JobError> {
        self.script.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.script.rollback_fails.load(Ordering::SeqCst) {
            return Err(JobError::TryAgainLater("rollback failed".to_string()));
        }
        Ok(())
    }
}
