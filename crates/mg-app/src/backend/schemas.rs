use chrono::{DateTime, Utc};
use mg_core::{ComputeDevice, GenerationErrorKind, HealthReport, Job, JobId, JobStatus, ModelSize};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobCreateResponse {
    pub task_id: JobId,
    pub status: JobStatus,
    pub message: String,
}

impl JobCreateResponse {
    pub fn accepted(task_id: JobId) -> Self {
        Self {
            task_id,
            status: JobStatus::Pending,
            message: "Music generation started".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatusResponse {
    pub task_id: JobId,
    pub status: JobStatus,
    pub audio_url: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<GenerationErrorKind>,
    pub prompt: String,
    pub model_size: ModelSize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            task_id: job.id(),
            status: job.status(),
            audio_url: job.audio().map(|audio| audio.url()),
            error: job.failure().map(ToString::to_string),
            error_kind: job.failure().map(|failure| failure.kind()),
            prompt: job.request().prompt().to_string(),
            model_size: job.request().model_size(),
            created_at: job.created_at(),
            started_at: job.started_at(),
            completed_at: job.completed_at(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    /// Checkpoint name of the resident model.
    pub model: Option<String>,
    pub model_size: Option<ModelSize>,
    pub device: ComputeDevice,
    pub queued: usize,
    pub workers: usize,
}

impl From<HealthReport> for HealthResponse {
    fn from(report: HealthReport) -> Self {
        Self {
            status: "healthy",
            model_loaded: report.model_loaded,
            model: report.model.as_ref().map(|model| model.name.clone()),
            model_size: report.model.map(|model| model.size),
            device: report.device,
            queued: report.queued,
            workers: report.workers,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointIndex {
    pub generate: &'static str,
    pub status: &'static str,
    pub audio: &'static str,
    pub health: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RootResponse {
    pub message: &'static str,
    pub status: &'static str,
    pub model: &'static str,
    pub version: &'static str,
    pub model_sizes: Vec<ModelSize>,
    pub endpoints: EndpointIndex,
}

impl Default for RootResponse {
    fn default() -> Self {
        Self {
            message: "Custom Music Generation API",
            status: "running",
            model: "MusicGen (Facebook AI)",
            version: env!("CARGO_PKG_VERSION"),
            model_sizes: ModelSize::all().to_vec(),
            endpoints: EndpointIndex {
                generate: "POST /api/generate",
                status: "GET /api/status/{task_id}",
                audio: "GET /audio/{filename}",
                health: "GET /health",
            },
        }
    }
}
