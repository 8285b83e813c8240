use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::artifact::ArtifactStore;
use crate::error::{Error, GenerationError};
use crate::job::{AudioRef, Job, JobId};
use crate::model::ModelHandle;
use crate::registry::JobRegistry;
use crate::request::GenerationRequest;

/// A unit of work waiting in the generation queue.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: JobId,
    pub request: GenerationRequest,
}

/// Everything a worker needs to run a job.
#[derive(Clone)]
pub struct WorkerContext {
    pub registry: Arc<JobRegistry>,
    pub model: Arc<ModelHandle>,
    pub store: Arc<dyn ArtifactStore>,
    /// Wall-clock budget for load + inference + persistence.
    pub timeout: Option<Duration>,
}

impl WorkerContext {
    /// Drive one job from `pending` to a terminal state.
    pub async fn run(&self, job: QueuedJob) {
        let QueuedJob { id, request } = job;

        if let Err(err) = self.registry.update(id, Job::start_processing).await {
            warn!(job_id = %id, error = %err, "skipping job that cannot start");
            return;
        }
        info!(job_id = %id, model = %request.model_size(), prompt = request.prompt(), "generating");

        let outcome = self.generate(id, request).await;
        let recorded = match outcome {
            Ok(audio) => {
                info!(job_id = %id, file = %audio.file_name, "job completed");
                self.registry.update(id, |job| job.complete(audio)).await
            }
            Err(failure) => {
                warn!(job_id = %id, kind = ?failure.kind(), error = %failure, "job failed");
                self.registry.update(id, |job| job.fail(failure)).await
            }
        };

        if let Err(err) = recorded {
            match err {
                Error::NotFound(_) => warn!(job_id = %id, "job evicted before its outcome was recorded"),
                other => error!(job_id = %id, error = %other, "could not record job outcome"),
            }
        }
    }

    /// Steps (a) to (c): model, inference, persistence. Runs on a blocking thread.
    ///
    /// The time budget starts once the model lock is held, so waiting behind another job
    /// is free. A generation that overruns is left to finish, but its audio is never kept.
    async fn generate(&self, id: JobId, request: GenerationRequest) -> Result<AudioRef, GenerationError> {
        let model = Arc::clone(&self.model);
        let store = Arc::clone(&self.store);
        let expired = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = oneshot::channel();

        let deadline_passed = Arc::clone(&expired);
        let mut task = tokio::task::spawn_blocking(move || {
            let mut session = model.lock();
            let _ = started_tx.send(());
            let (waveform, sample_rate) = session.generate(&request)?;
            drop(session);
            debug!(job_id = %id, seconds = waveform.duration_secs(sample_rate), "inference finished");

            if deadline_passed.load(Ordering::SeqCst) {
                return Err(GenerationError::Aborted("finished after the time budget".into()));
            }
            store.save(id, &waveform, sample_rate).map_err(GenerationError::from)
        });

        let Some(limit) = self.timeout else {
            return flatten(task.await);
        };
        if started_rx.await.is_err() {
            // The task died before it got the model.
            return flatten(task.await);
        }

        match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => flatten(joined),
            Err(_) => {
                expired.store(true, Ordering::SeqCst);
                self.discard_late_result(id, task);
                Err(GenerationError::Timeout(limit))
            }
        }
    }

    /// Wait out a timed-out generation and delete audio it stored just before the deadline.
    fn discard_late_result(&self, id: JobId, task: JoinHandle<Result<AudioRef, GenerationError>>) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Ok(Ok(audio)) = task.await {
                match store.remove(&audio).await {
                    Ok(()) => debug!(job_id = %id, "discarded audio stored after the deadline"),
                    Err(err) => warn!(job_id = %id, error = %err, "could not discard late audio"),
                }
            }
        });
    }
}

fn flatten(joined: Result<Result<AudioRef, GenerationError>, JoinError>) -> Result<AudioRef, GenerationError> {
    joined.map_err(|err| {
        if err.is_panic() {
            GenerationError::Aborted("generation thread panicked".into())
        } else {
            GenerationError::Aborted(err.to_string())
        }
    })?
}

/// Fixed set of worker loops pulling from one FIFO queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` loops (at least one). Must be called inside a Tokio runtime.
    pub fn spawn(workers: usize, queue: mpsc::Receiver<QueuedJob>, context: WorkerContext) -> Self {
        let queue = Arc::new(Mutex::new(queue));
        let handles = (0..workers.max(1))
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let context = context.clone();
                tokio::spawn(async move {
                    info!(worker, "generation worker started");
                    loop {
                        // Holding the receiver lock only while waiting keeps dequeue order FIFO.
                        let next = queue.lock().await.recv().await;
                        match next {
                            Some(job) => context.run(job).await,
                            None => break,
                        }
                    }
                    info!(worker, "generation worker stopped");
                })
            })
            .collect();

        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to drain the queue and exit. The queue sender must be
    /// dropped first, otherwise this waits forever.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!(error = %err, "generation worker crashed");
            }
        }
    }
}
