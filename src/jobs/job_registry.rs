use std::fmt::{self, Debug, Formatter};
use std::{collections::HashMap, sync::Arc};

use super::{Job, JobAction, JobError, JobRecord};

/// Builds the action instance that processes one claimed record
type ActionFactory =
    Arc<dyn Fn(&JobRecord) -> Result<Box<dyn JobAction>, JobError> + Send + Sync>;

/// Maps action type names to the factories that build their actions.
///
/// Populated at startup; looked up by name each time a worker claims a record.
#[derive(Clone)]
pub struct JobRegistry {
    actions: HashMap<String, ActionFactory>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    pub fn register_job<J: Job>(&mut self) {
        self.register(J::name(), |record: &JobRecord| {
            J::from_record(record).map(|job| Box::new(job) as Box<dyn JobAction>)
        });
    }

    pub fn register<F>(&mut self, action_type: impl Into<String>, factory: F)
    where
        F: Fn(&JobRecord) -> Result<Box<dyn JobAction>, JobError> + Send + Sync + 'static,
    {
        self.actions.insert(action_type.into(), Arc::new(factory));
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.actions.contains_key(action_type)
    }

    pub fn action_types(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub(crate) fn resolve(&self, record: &JobRecord) -> Result<Box<dyn JobAction>, JobError> {
        let factory = self.actions.get(&record.action_type).ok_or_else(|| {
            JobError::FailPermanently(format!(
                "No action registered for job type: {}",
                record.action_type
            ))
        })?;

        factory(record)
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for JobRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut action_types: Vec<&str> = self.action_types().collect();
        action_types.sort_unstable();
        f.debug_struct("JobRegistry")
            .field("actions", &action_types)
            .finish()
    }
}
