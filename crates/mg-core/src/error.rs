use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::job::{JobId, JobStatus};
use crate::model_types::ModelSize;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced synchronously by the submission and query operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("generation queue is full ({capacity} jobs waiting)")]
    QueueFull { capacity: usize },

    #[error("generation workers have shut down")]
    ShuttingDown,

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Job(#[from] JobError),
}

/// Rejected request fields. No job is created when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("duration must be a positive number of seconds, got {0}")]
    InvalidDuration(f64),

    #[error("duration {requested}s exceeds the maximum of {max}s")]
    DurationTooLong { requested: f64, max: f64 },

    #[error("unknown model_size '{0}', expected one of small, medium, large, melody")]
    UnknownModelSize(String),

    #[error("temperature must be a non-negative number, got {0}")]
    InvalidTemperature(f64),

    #[error("top_k must be a non-negative integer, got {0}")]
    InvalidTopK(i64),

    #[error("top_p must be within [0, 1], got {0}")]
    InvalidTopP(f64),

    #[error("malformed request: {0}")]
    Malformed(String),
}

/// Failures reported by a model collaborator.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model size '{0}' is not available on this backend")]
    UnsupportedSize(ModelSize),

    #[error("failed to load {checkpoint}: {reason}")]
    Load { checkpoint: String, reason: String },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("model returned no audio")]
    EmptyOutput,

    #[error("inference service: {0}")]
    Backend(#[from] reqwest::Error),
}

/// Why a job ended up `failed`. Recorded on the job, never returned to the submitter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("could not load model '{size}': {reason}")]
    ModelLoad { size: ModelSize, reason: String },

    #[error("generation failed: {0}")]
    Inference(String),

    #[error("could not store audio: {0}")]
    Artifact(String),

    #[error("generation exceeded the {}s time budget", .0.as_secs())]
    Timeout(Duration),

    #[error("generation aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationErrorKind {
    ModelLoad,
    Inference,
    Artifact,
    Timeout,
    Aborted,
}

impl GenerationError {
    pub fn kind(&self) -> GenerationErrorKind {
        match self {
            Self::ModelLoad { .. } => GenerationErrorKind::ModelLoad,
            Self::Inference(_) => GenerationErrorKind::Inference,
            Self::Artifact(_) => GenerationErrorKind::Artifact,
            Self::Timeout(_) => GenerationErrorKind::Timeout,
            Self::Aborted(_) => GenerationErrorKind::Aborted,
        }
    }
}

impl From<ArtifactError> for GenerationError {
    fn from(err: ArtifactError) -> Self {
        Self::Artifact(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact '{0}' not found")]
    NotFound(String),

    #[error("waveform is empty")]
    EmptyWaveform,

    #[error("wav encoding: {0}")]
    Encoding(#[from] hound::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}
