use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::NaiveDateTime;

use super::job_dao::{DaoError, JobDao, JobFilter};
use super::{JobId, JobRecord};

/// Thread-safe in-process job store.
///
/// Records are kept in insertion order so that records sharing an `added`
/// timestamp are still claimed first-in first-out. Every operation runs under
/// one lock, which is what makes `claim_next` atomic.
#[derive(Clone, Debug, Default)]
pub struct InMemoryJobDao {
    records: Arc<Mutex<Vec<JobRecord>>>,
}

impl InMemoryJobDao {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, Vec<JobRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sorted_matches<'a>(records: &'a [JobRecord], filter: &JobFilter) -> Vec<&'a JobRecord> {
        let mut matches: Vec<&JobRecord> = records.iter().filter(|r| filter.matches(r)).collect();
        matches.sort_by_key(|record| record.added);
        matches
    }
}

#[async_trait]
impl JobDao for InMemoryJobDao {
    async fn find(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, DaoError> {
        let records = self.records();
        let offset = usize::try_from(filter.offset).unwrap_or(usize::MAX);
        let limit = filter
            .limit
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));

        Ok(Self::sorted_matches(&records, filter)
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self, filter: &JobFilter) -> Result<u64, DaoError> {
        let records = self.records();
        let count = records.iter().filter(|r| filter.matches(r)).count();
        Ok(count as u64)
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, DaoError> {
        Ok(self.records().iter().find(|r| r.id == id).cloned())
    }

    async fn create(&self, record: &JobRecord) -> Result<(), DaoError> {
        let mut records = self.records();
        if records.iter().any(|r| r.id == record.id) {
            return Err(DaoError::Duplicate(record.id));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn update(&self, record: &JobRecord) -> Result<(), DaoError> {
        let mut records = self.records();
        let stored = records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or(DaoError::NotFound(record.id))?;

        if stored.status.is_terminal() {
            return Err(DaoError::TerminalRecord(record.id));
        }

        *stored = record.clone();
        Ok(())
    }

    async fn update_claimed(
        &self,
        record: &JobRecord,
        claimed_at: NaiveDateTime,
    ) -> Result<(), DaoError> {
        let mut records = self.records();
        let stored = records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or(DaoError::NotFound(record.id))?;

        if !stored.status.is_processing() || stored.started != Some(claimed_at) {
            return Err(DaoError::ClaimLost(record.id));
        }

        *stored = record.clone();
        Ok(())
    }

    async fn delete(&self, record: &JobRecord) -> Result<(), DaoError> {
        let mut records = self.records();
        let position = records
            .iter()
            .position(|r| r.id == record.id)
            .ok_or(DaoError::NotFound(record.id))?;
        records.remove(position);
        Ok(())
    }

    async fn claim_next(
        &self,
        action_type: &str,
        now: NaiveDateTime,
    ) -> Result<Option<JobRecord>, DaoError> {
        let mut records = self.records();

        // First match wins on `added` ties, so insertion order breaks them.
        let oldest = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.action_type == action_type && r.is_ready(now))
            .min_by_key(|(index, r)| (r.added, *index))
            .map(|(index, _)| index);

        Ok(oldest.map(|index| {
            let record = &mut records[index];
            record.start(now);
            record.clone()
        }))
    }

    async fn action_types(&self) -> Result<Vec<String>, DaoError> {
        let records = self.records();
        let action_types: BTreeSet<&str> = records.iter().map(|r| r.action_type.as_str()).collect();
        Ok(action_types.into_iter().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::jobs::{JobParameters, JobStatus};

    fn now() -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }

    fn params(pairs: &[(&str, &str)]) -> JobParameters {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_parameters_round_trip() {
        let dao = InMemoryJobDao::new();
        let record = JobRecord::new("Thumbnail", params(&[("a", "1"), ("b", "2")]));
        dao.create(&record).await.unwrap();

        let found = dao
            .find(&JobFilter::new().action_type("Thumbnail"))
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].parameters, params(&[("a", "1"), ("b", "2")]));
    }

    #[tokio::test]
    async fn test_claim_oldest_first() {
        let dao = InMemoryJobDao::new();
        let first = JobRecord::new("Thumbnail", params(&[("n", "1")]));
        let second = JobRecord::new("Thumbnail", params(&[("n", "2")]));
        let other = JobRecord::new("Index", JobParameters::new());
        dao.create(&first).await.unwrap();
        dao.create(&second).await.unwrap();
        dao.create(&other).await.unwrap();

        let claimed = dao.claim_next("Thumbnail", now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert!(claimed.started.is_some());

        let claimed = dao.claim_next("Thumbnail", now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, second.id);

        assert!(dao.claim_next("Thumbnail", now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_skips_records_waiting_for_retry() {
        let dao = InMemoryJobDao::new();
        let mut record = JobRecord::new("Thumbnail", JobParameters::new());
        record.next_attempt_at = Some(now() + chrono::Duration::minutes(5));
        dao.create(&record).await.unwrap();

        assert!(dao.claim_next("Thumbnail", now()).await.unwrap().is_none());

        let later = now() + chrono::Duration::minutes(6);
        assert!(dao.claim_next("Thumbnail", later).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_are_exclusive() {
        let dao = InMemoryJobDao::new();
        for n in 0..200 {
            let record = JobRecord::new("Thumbnail", params(&[("n", &n.to_string())]));
            dao.create(&record).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let dao = dao.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(record) = dao.claim_next("Thumbnail", now()).await.unwrap() {
                    claimed.push(record.id);
                    tokio::task::yield_now().await;
                }
                claimed
            }));
        }

        let mut all_claimed = Vec::new();
        for handle in handles {
            all_claimed.extend(handle.await.unwrap());
        }
        let unique: HashSet<_> = all_claimed.iter().collect();

        assert_eq!(all_claimed.len(), 200);
        assert_eq!(unique.len(), 200);
    }

    #[tokio::test]
    async fn test_terminal_records_cannot_change() {
        let dao = InMemoryJobDao::new();
        let record = JobRecord::new("Thumbnail", JobParameters::new());
        dao.create(&record).await.unwrap();

        let mut claimed = dao.claim_next("Thumbnail", now()).await.unwrap().unwrap();
        claimed.finish(now());
        dao.update(&claimed).await.unwrap();

        claimed.last_exception = Some("late write".to_string());
        let result = dao.update(&claimed).await;
        assert!(matches!(result, Err(DaoError::TerminalRecord(id)) if id == record.id));

        let stored = dao.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Finished);
        assert!(stored.last_exception.is_none());
    }

    #[tokio::test]
    async fn test_write_back_requires_the_same_claim() {
        let dao = InMemoryJobDao::new();
        let record = JobRecord::new("Thumbnail", JobParameters::new());
        dao.create(&record).await.unwrap();

        let first_claim = now();
        let mut first = dao.claim_next("Thumbnail", first_claim).await.unwrap().unwrap();

        // Someone else settles the claim and the record is claimed again
        let mut settled = first.clone();
        settled.fail(now(), "abandoned", 5, false);
        dao.update_claimed(&settled, first_claim).await.unwrap();
        let second_claim = first_claim + chrono::Duration::seconds(1);
        let mut second = dao.claim_next("Thumbnail", second_claim).await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.tries, 1);

        second.fail(now(), "boom", 5, false);
        dao.update_claimed(&second, second_claim).await.unwrap();

        first.finish(now());
        assert!(matches!(
            dao.update_claimed(&first, first_claim).await,
            Err(DaoError::ClaimLost(id)) if id == record.id
        ));

        let stored = dao.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::New);
        assert_eq!(stored.tries, 2);
    }

    #[tokio::test]
    async fn test_find_filters_and_pages() {
        let dao = InMemoryJobDao::new();
        for n in 0..5 {
            let parity = if n % 2 == 0 { "even" } else { "odd" };
            let record = JobRecord::new("Index", params(&[("parity", parity)]));
            dao.create(&record).await.unwrap();
        }
        dao.claim_next("Index", now()).await.unwrap();

        let even = JobFilter::new().action_type("Index").parameter("parity", "even");
        assert_eq!(dao.count(&even).await.unwrap(), 3);

        let even_new = even.clone().status(JobStatus::New);
        assert_eq!(dao.count(&even_new).await.unwrap(), 2);

        let page = dao.find(&even.clone().offset(1).limit(1)).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(dao.count(&even.offset(1).limit(1)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_delete_and_action_types() {
        let dao = InMemoryJobDao::new();
        let thumbnail = JobRecord::new("Thumbnail", JobParameters::new());
        let index = JobRecord::new("Index", JobParameters::new());
        dao.create(&thumbnail).await.unwrap();
        dao.create(&index).await.unwrap();

        assert_eq!(dao.action_types().await.unwrap(), vec!["Index", "Thumbnail"]);

        dao.delete(&index).await.unwrap();
        assert_eq!(dao.action_types().await.unwrap(), vec!["Thumbnail"]);
        assert!(matches!(
            dao.delete(&index).await,
            Err(DaoError::NotFound(_))
        ));
    }
}
