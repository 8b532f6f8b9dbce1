use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::config::CoalescingConfig;
use crate::job_queue::JobQueue;
use crate::jobs::JobParameters;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Deferred work; not polled until its deadline is reached.
pub type Payload = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler is shutting down")]
    ShuttingDown,
    #[error("Scheduler did not drain within {timeout:?}, {remaining} task(s) still pending")]
    DrainTimedOut { timeout: Duration, remaining: usize },
    #[error("Dispatcher task failed: {0}")]
    Dispatcher(String),
}

struct PendingTask {
    fire_at: Instant,
    seq: u64,
    payload: Payload,
}

enum Next<K> {
    Run(K, Payload),
    Wait(Option<Instant>),
    Drained,
}

struct State<K> {
    by_deadline: BTreeMap<(Instant, u64), K>,
    by_key: HashMap<K, PendingTask>,
    next_seq: u64,
    shutting_down: bool,
}

impl<K: Eq + Hash + Clone> State<K> {
    fn new() -> Self {
        Self {
            by_deadline: BTreeMap::new(),
            by_key: HashMap::new(),
            next_seq: 0,
            shutting_down: false,
        }
    }

    /// Replaces any pending task for `key`. Returns whether one was replaced.
    fn insert(&mut self, key: K, fire_at: Instant, payload: Payload) -> bool {
        let seq = self.next_seq;
        self.next_seq += 1;

        let replaced = self.by_key.insert(
            key.clone(),
            PendingTask {
                fire_at,
                seq,
                payload,
            },
        );
        if let Some(old) = &replaced {
            self.by_deadline.remove(&(old.fire_at, old.seq));
        }
        self.by_deadline.insert((fire_at, seq), key);

        replaced.is_some()
    }

    fn remove(&mut self, key: &K) -> bool {
        match self.by_key.remove(key) {
            Some(task) => {
                self.by_deadline.remove(&(task.fire_at, task.seq));
                true
            }
            None => false,
        }
    }

    /// Pops the earliest task once it is due, or immediately while draining.
    fn next(&mut self, now: Instant) -> Next<K> {
        loop {
            let Some((&(fire_at, _), _)) = self.by_deadline.first_key_value() else {
                return if self.shutting_down {
                    Next::Drained
                } else {
                    Next::Wait(None)
                };
            };

            if fire_at > now && !self.shutting_down {
                return Next::Wait(Some(fire_at));
            }

            let Some((_, key)) = self.by_deadline.pop_first() else {
                continue;
            };
            if let Some(task) = self.by_key.remove(&key) {
                return Next::Run(key, task.payload);
            }
        }
    }
}

struct Shared<K> {
    state: Mutex<State<K>>,
    wake: Notify,
    delay: Duration,
}

impl<K> Shared<K> {
    fn state(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Debounces work per key.
///
/// Every `submit` for a key resets its deadline to `now + delay` and replaces
/// the payload, so only the latest payload runs, once submissions for that
/// key pause for at least `delay`. A single dispatcher task runs due payloads
/// one at a time.
///
/// Must be created from within a Tokio runtime. Dropping the scheduler
/// without calling [`shutdown`](Self::shutdown) still drains pending tasks in
/// the background for as long as the runtime lives.
pub struct DelayCoalescingScheduler<K> {
    shared: Arc<Shared<K>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<K> DelayCoalescingScheduler<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    pub fn new(delay: Duration) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::new()),
            wake: Notify::new(),
            delay,
        });

        let dispatcher = tokio::spawn(dispatch(shared.clone()));
        debug!("Coalescing scheduler started with a {:?} delay", delay);

        Self {
            shared,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    pub fn from_config(config: &CoalescingConfig) -> Self {
        Self::new(Duration::from_millis(config.delay_ms))
    }

    pub fn delay(&self) -> Duration {
        self.shared.delay
    }

    /// Schedule `payload` for `key`, cancelling the task already pending for it.
    ///
    /// Returns `true` when a pending task was replaced.
    pub fn submit<F>(&self, key: K, payload: F) -> Result<bool, SchedulerError>
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let fire_at = Instant::now() + self.shared.delay;

        let replaced = {
            let mut state = self.shared.state();
            if state.shutting_down {
                return Err(SchedulerError::ShuttingDown);
            }
            state.insert(key, fire_at, Box::pin(payload))
        };

        self.shared.wake.notify_one();
        Ok(replaced)
    }

    /// Coalesce job submissions: only the latest parameters for `key` are queued.
    pub fn enqueue(
        &self,
        key: K,
        queue: &JobQueue,
        parameters: JobParameters,
    ) -> Result<bool, SchedulerError> {
        let queue = queue.clone();
        self.submit(key, async move {
            queue.add(parameters).await?;
            Ok(())
        })
    }

    /// Drop the pending task for `key`. Has no effect once the dispatcher
    /// has picked it up.
    pub fn cancel(&self, key: &K) -> bool {
        self.shared.state().remove(key)
    }

    pub fn pending(&self) -> usize {
        self.shared.state().by_key.len()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.shared.state().by_key.contains_key(key)
    }

    /// Refuse new submissions, run every pending task now in deadline order
    /// and wait up to `timeout` for the dispatcher to finish.
    ///
    /// On timeout the dispatcher keeps draining in the background.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), SchedulerError> {
        let pending = {
            let mut state = self.shared.state();
            state.shutting_down = true;
            state.by_key.len()
        };
        self.shared.wake.notify_one();

        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(dispatcher) = dispatcher else {
            return Ok(());
        };

        info!("🛑 Draining {} coalesced task(s)", pending);

        match tokio::time::timeout(timeout, dispatcher).await {
            Ok(Ok(())) => {
                info!("✅ Coalescing scheduler drained");
                Ok(())
            }
            Ok(Err(e)) => Err(SchedulerError::Dispatcher(e.to_string())),
            Err(_) => {
                let remaining = self.pending();
                warn!(
                    "Coalescing scheduler still has {} task(s) after {:?}",
                    remaining, timeout
                );
                Err(SchedulerError::DrainTimedOut { timeout, remaining })
            }
        }
    }
}

impl<K> Drop for DelayCoalescingScheduler<K> {
    fn drop(&mut self) {
        self.shared.state().shutting_down = true;
        self.shared.wake.notify_one();
    }
}

impl<K> Debug for DelayCoalescingScheduler<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayCoalescingScheduler")
            .field("delay", &self.shared.delay)
            .finish_non_exhaustive()
    }
}

async fn dispatch<K>(shared: Arc<Shared<K>>)
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    loop {
        let next = shared.state().next(Instant::now());

        match next {
            Next::Run(key, payload) => run_payload(&key, payload).await,
            Next::Wait(Some(deadline)) => {
                tokio::select! {
                    () = sleep_until(deadline) => {}
                    () = shared.wake.notified() => {}
                }
            }
            Next::Wait(None) => shared.wake.notified().await,
            Next::Drained => break,
        }
    }

    debug!("Coalescing dispatcher stopped");
}

async fn run_payload<K: Debug>(key: &K, payload: Payload) {
    match AssertUnwindSafe(payload).catch_unwind().await {
        Ok(Ok(())) => debug!("Coalesced task for {:?} done", key),
        Ok(Err(e)) => error!("❌ Coalesced task for {:?} failed: {}", key, e),
        Err(_) => error!("💥 Coalesced task for {:?} panicked", key),
    }
}
