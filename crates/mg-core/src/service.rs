//! Submission and query operations over the registry, queue and artifact store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactReader, ArtifactStore};
use crate::error::{Error, GenerationError, Result};
use crate::job::{Job, JobId, JobStatus};
use crate::model::{ModelHandle, ModelLoader, ResidentModel};
use crate::model_types::{ComputeDevice, ModelSize};
use crate::registry::{JobRegistry, RetentionPolicy};
use crate::request::{GenerationDraft, GenerationParams, GenerationRequest};
use crate::worker::{QueuedJob, WorkerContext, WorkerPool};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub generation_timeout: Option<Duration>,
    pub max_duration_secs: f64,
    pub retention: RetentionPolicy,
    pub sweep_interval: Duration,
    /// Parameters applied to a model right after it is loaded.
    pub model_defaults: GenerationParams,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            queue_capacity: 64,
            generation_timeout: Some(Duration::from_secs(600)),
            max_duration_secs: 300.0,
            retention: RetentionPolicy {
                max_age: Some(Duration::from_secs(24 * 60 * 60)),
                max_jobs: Some(10_000),
            },
            sweep_interval: Duration::from_secs(60),
            model_defaults: GenerationParams::default(),
        }
    }
}

/// A stored audio file ready to be streamed to a client.
#[derive(Debug)]
pub struct Artifact {
    pub file_name: String,
    pub content: ArtifactReader,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub model_loaded: bool,
    pub model: Option<ResidentModel>,
    pub device: ComputeDevice,
    pub queued: usize,
    pub workers: usize,
}

/// Entry point used by the HTTP layer.
///
/// Submission only touches the registry and the queue, so it returns in constant time
/// no matter how long generation takes. Queries read registry snapshots and never wait
/// on the model.
pub struct MusicService {
    registry: Arc<JobRegistry>,
    model: Arc<ModelHandle>,
    store: Arc<dyn ArtifactStore>,
    queue: mpsc::Sender<QueuedJob>,
    config: ServiceConfig,
    workers: WorkerPool,
    sweeper: Option<AbortOnDrop>,
}

/// Aborts the wrapped task when dropped, so a service that is dropped without
/// `shutdown` does not leave its sweeper running.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl MusicService {
    /// Start workers (and the retention sweeper) on the current Tokio runtime.
    pub fn start(config: ServiceConfig, loader: Arc<dyn ModelLoader>, store: Arc<dyn ArtifactStore>) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let model = Arc::new(ModelHandle::new(loader, config.model_defaults));
        let (queue, queue_rx) = mpsc::channel(config.queue_capacity.max(1));

        let context = WorkerContext {
            registry: Arc::clone(&registry),
            model: Arc::clone(&model),
            store: Arc::clone(&store),
            timeout: config.generation_timeout,
        };
        let workers = WorkerPool::spawn(config.workers, queue_rx, context);

        let sweeper = (!config.retention.is_unbounded()).then(|| {
            AbortOnDrop(spawn_sweeper(
                Arc::clone(&registry),
                Arc::clone(&store),
                config.retention,
                config.sweep_interval,
            ))
        });

        info!(
            workers = workers.size(),
            queue_capacity = config.queue_capacity,
            "music service started"
        );

        Self {
            registry,
            model,
            store,
            queue,
            config,
            workers,
            sweeper,
        }
    }

    /// Validate, record a pending job and queue it. Never waits for generation.
    pub async fn submit(&self, draft: GenerationDraft) -> Result<JobId> {
        let request = GenerationRequest::validate(draft, self.config.max_duration_secs)?;

        // Reserve a queue slot first so a full queue never leaves an orphaned pending job.
        let permit = self.queue.try_reserve().map_err(|err| match err {
            mpsc::error::TrySendError::Full(()) => Error::QueueFull {
                capacity: self.queue.max_capacity(),
            },
            mpsc::error::TrySendError::Closed(()) => Error::ShuttingDown,
        })?;

        let id = self.registry.create(request.clone()).await;
        permit.send(QueuedJob { id, request });

        debug!(job_id = %id, "job queued");
        Ok(id)
    }

    pub async fn status(&self, id: JobId) -> Result<Job> {
        self.registry.get(id).await
    }

    /// Audio for a completed job. Anything else, including unknown jobs, is not found.
    pub async fn fetch_artifact(&self, id: JobId) -> Result<Artifact> {
        let job = self.registry.get(id).await?;
        let audio = match (job.status(), job.audio()) {
            (JobStatus::Completed, Some(audio)) => audio.clone(),
            _ => return Err(Error::NotFound(format!("audio for job {id}"))),
        };

        let content = self.store.load(&audio).await?;
        Ok(Artifact {
            file_name: audio.file_name,
            content,
        })
    }

    /// Load a model ahead of the first request for it.
    pub async fn preload(&self, size: ModelSize) -> std::result::Result<(), GenerationError> {
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || model.preload(size))
            .await
            .map_err(|err| GenerationError::Aborted(err.to_string()))?
    }

    pub fn health(&self) -> HealthReport {
        let model = self.model.resident();
        HealthReport {
            model_loaded: model.is_some(),
            model,
            device: self.model.device(),
            queued: self.queue.max_capacity() - self.queue.capacity(),
            workers: self.workers.size(),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Stop accepting work, let queued jobs finish, then stop the workers.
    pub async fn shutdown(self) {
        let Self {
            queue,
            workers,
            sweeper,
            ..
        } = self;

        drop(queue);
        drop(sweeper);
        workers.join().await;
        info!("music service stopped");
    }
}

fn spawn_sweeper(
    registry: Arc<JobRegistry>,
    store: Arc<dyn ArtifactStore>,
    policy: RetentionPolicy,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sweep(&registry, store.as_ref(), &policy).await;
        }
    })
}

/// Evict expired jobs and delete their audio.
pub async fn sweep(registry: &JobRegistry, store: &dyn ArtifactStore, policy: &RetentionPolicy) -> usize {
    let evicted = registry.evict(policy, Utc::now()).await;
    for job in &evicted {
        if let Some(audio) = job.audio() {
            if let Err(err) = store.remove(audio).await {
                warn!(job_id = %job.id(), error = %err, "could not delete evicted audio");
            }
        }
    }
    if !evicted.is_empty() {
        info!(count = evicted.len(), "evicted expired jobs");
    }
    evicted.len()
}
