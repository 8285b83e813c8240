use std::io;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::Response;
use futures::stream;
use mg_core::{Artifact, JobId};
use tokio::io::AsyncReadExt;

use crate::backend::state::AppState;
use crate::error::ApiError;

/// Serves `<task_id>.wav` once the job has completed.
pub async fn get_audio(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let id = job_for_file(&filename).ok_or_else(|| ApiError::not_found(format!("audio file {filename} not found")))?;

    let Artifact { file_name, content } = state.service.fetch_artifact(id).await?;

    let chunks = stream::try_unfold(content.reader, |mut reader| async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let read = reader.read(&mut buf).await?;
        if read == 0 {
            return Ok::<_, io::Error>(None);
        }
        buf.truncate(read);
        Ok(Some((Bytes::from(buf), reader)))
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "audio/wav")
        .header(header::CONTENT_LENGTH, content.len)
        .header(header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\""))
        .body(Body::from_stream(chunks))
        .map_err(|err| ApiError::internal(err.to_string()))
}

const CHUNK_SIZE: usize = 64 * 1024;

/// Only the canonical `<hyphenated uuid>.wav` form names an artifact.
fn job_for_file(filename: &str) -> Option<JobId> {
    let id: JobId = filename.strip_suffix(".wav")?.parse().ok()?;
    (format!("{id}.wav") == filename).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_canonical_names_resolve() {
        let id = JobId::new();
        assert_eq!(job_for_file(&format!("{id}.wav")), Some(id));
        assert_eq!(job_for_file(&id.to_string()), None);
        assert_eq!(job_for_file("../etc/passwd.wav"), None);
        assert_eq!(job_for_file(&format!("{}.wav", id.to_string().replace('-', ""))), None);
    }
}
