//! Job orchestration and model lifecycle for text-to-music generation.
//!
//! A [`MusicService`] accepts generation requests, records them as jobs in a
//! [`JobRegistry`], and hands them to a pool of workers that drive the single
//! resident model through a [`ModelHandle`]. Finished audio goes to an
//! [`ArtifactStore`].

pub mod artifact;
pub mod error;
pub mod job;
pub mod model;
mod model_types;
pub mod registry;
pub mod request;
pub mod service;
pub mod worker;

pub use artifact::{ArtifactReader, ArtifactStore, FsArtifactStore};
pub use error::{Error, GenerationError, GenerationErrorKind, Result, ValidationError};
pub use job::{AudioRef, Job, JobId, JobStatus};
pub use model::{ModelHandle, ModelLoader, MusicModel, RemoteLoader, ResidentModel, SynthLoader, Waveform};
pub use model_types::{ComputeDevice, ModelSize};
pub use registry::{JobRegistry, RetentionPolicy};
pub use request::{GenerationDraft, GenerationParams, GenerationRequest};
pub use service::{Artifact, HealthReport, MusicService, ServiceConfig};
