use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, JobError, Result};
use crate::job::{Job, JobId};
use crate::request::GenerationRequest;

/// How long finished jobs are kept around. Active jobs are never evicted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Terminal jobs older than this (by completion time) are dropped.
    pub max_age: Option<Duration>,
    /// Upper bound on stored jobs; the oldest terminal jobs go first.
    pub max_jobs: Option<usize>,
}

impl RetentionPolicy {
    pub fn keep_forever() -> Self {
        Self::default()
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_age.is_none() && self.max_jobs.is_none()
    }
}

/// In-memory job table. Single source of truth for job state.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id and store a pending job under it.
    pub async fn create(&self, request: GenerationRequest) -> JobId {
        let mut jobs = self.jobs.write().await;
        let mut id = JobId::new();
        while jobs.contains_key(&id) {
            id = JobId::new();
        }
        jobs.insert(id, Job::new(id, request));
        id
    }

    /// Snapshot of the job as it is right now.
    pub async fn get(&self, id: JobId) -> Result<Job> {
        let jobs = self.jobs.read().await;
        jobs.get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("job {id}")))
    }

    /// Apply `mutate` to the stored job as one atomic step.
    ///
    /// The mutation runs against a copy that only replaces the stored job when it
    /// returns `Ok`, so readers never observe a half-applied transition.
    pub async fn update<F>(&self, id: JobId, mutate: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> std::result::Result<(), JobError>,
    {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;

        let mut next = stored.clone();
        mutate(&mut next)?;
        *stored = next.clone();
        Ok(next)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Drop terminal jobs according to `policy`, returning what was removed.
    pub async fn evict(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> Vec<Job> {
        if policy.is_unbounded() {
            return Vec::new();
        }

        let mut jobs = self.jobs.write().await;
        let mut doomed: Vec<JobId> = Vec::new();

        if let Some(max_age) = policy.max_age {
            let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
            doomed.extend(
                jobs.values()
                    .filter(|job| job.completed_at().is_some_and(|done| now - done > max_age))
                    .map(Job::id),
            );
        }

        if let Some(max_jobs) = policy.max_jobs {
            let remaining = jobs.len() - doomed.len();
            if remaining > max_jobs {
                let mut finished: Vec<(DateTime<Utc>, JobId)> = jobs
                    .values()
                    .filter(|job| !doomed.contains(&job.id()))
                    .filter_map(|job| job.completed_at().map(|done| (done, job.id())))
                    .collect();
                finished.sort();
                doomed.extend(finished.into_iter().take(remaining - max_jobs).map(|(_, id)| id));
            }
        }

        let evicted: Vec<Job> = doomed.into_iter().filter_map(|id| jobs.remove(&id)).collect();
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), remaining = jobs.len(), "evicted finished jobs");
        }
        evicted
    }
}
