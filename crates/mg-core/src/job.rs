use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GenerationError, JobError};
use crate::request::GenerationRequest;

/// Opaque, collision-free job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Allowed edges: pending -> processing -> {completed, failed}.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a finished job's audio lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioRef {
    pub file_name: String,
}

impl AudioRef {
    pub fn for_job(id: JobId) -> Self {
        Self {
            file_name: format!("{id}.wav"),
        }
    }

    /// URL path the artifact is served under.
    pub fn url(&self) -> String {
        format!("/audio/{}", self.file_name)
    }
}

/// One generation request and its lifecycle.
///
/// Once terminal, exactly one of `audio` / `failure` is set; both are `None` before that.
/// The fields are only changed through the transition methods below.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    status: JobStatus,
    request: GenerationRequest,
    audio: Option<AudioRef>,
    failure: Option<GenerationError>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, request: GenerationRequest) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            request,
            audio: None,
            failure: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    pub fn audio(&self) -> Option<&AudioRef> {
        self.audio.as_ref()
    }

    pub fn failure(&self) -> Option<&GenerationError> {
        self.failure.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn start_processing(&mut self) -> Result<(), JobError> {
        self.advance(JobStatus::Processing)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self, audio: AudioRef) -> Result<(), JobError> {
        self.advance(JobStatus::Completed)?;
        self.audio = Some(audio);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, error: GenerationError) -> Result<(), JobError> {
        self.advance(JobStatus::Failed)?;
        self.failure = Some(error);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn advance(&mut self, next: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::GenerationDraft;

    fn job() -> Job {
        let request = GenerationRequest::validate(GenerationDraft::new("calm piano"), 300.0).unwrap();
        Job::new(JobId::new(), request)
    }

    #[test]
    fn test_new_job_is_pending_without_outcome() {
        let job = job();
        assert_eq!(job.status(), JobStatus::Pending);
        assert!(job.audio().is_none());
        assert!(job.failure().is_none());
        assert!(job.completed_at().is_none());
    }

    #[test]
    fn test_happy_path() {
        let mut job = job();
        job.start_processing().unwrap();
        assert_eq!(job.status(), JobStatus::Processing);
        assert!(job.started_at().is_some());
        assert!(job.audio().is_none() && job.failure().is_none());

        let audio = AudioRef::for_job(job.id());
        job.complete(audio.clone()).unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.audio(), Some(&audio));
        assert!(job.failure().is_none());
        assert!(job.completed_at().is_some());
    }

    #[test]
    fn test_failure_records_error() {
        let mut job = job();
        job.start_processing().unwrap();
        job.fail(GenerationError::Inference("boom".into())).unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.audio().is_none());
        assert_eq!(job.failure(), Some(&GenerationError::Inference("boom".into())));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = job();
        job.start_processing().unwrap();
        job.complete(AudioRef::for_job(job.id())).unwrap();

        let err = job.fail(GenerationError::Aborted("late".into())).unwrap_err();
        assert_eq!(
            err,
            JobError::InvalidTransition {
                id: job.id(),
                from: JobStatus::Completed,
                to: JobStatus::Failed,
            }
        );
        assert!(job.start_processing().is_err());
        assert!(job.failure().is_none());
    }

    #[test]
    fn test_pending_cannot_skip_processing() {
        let mut job = job();
        assert!(job.complete(AudioRef::for_job(job.id())).is_err());
        assert_eq!(job.status(), JobStatus::Pending);
        assert!(job.audio().is_none());
    }

    #[test]
    fn test_status_ordering() {
        assert!(JobStatus::Pending < JobStatus::Processing);
        assert!(JobStatus::Processing < JobStatus::Completed);
        assert!(JobStatus::Processing < JobStatus::Failed);
        assert!(JobStatus::Failed.is_terminal() && !JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_job_id_round_trips_through_text() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
        assert_eq!(AudioRef::for_job(id).url(), format!("/audio/{id}.wav"));
    }
}
