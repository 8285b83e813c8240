use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::backend::routes::audio::get_audio;
use crate::backend::routes::job::{get_job_status, submit_job};
use crate::backend::routes::meta::{health, root};
use crate::backend::state::AppState;

mod audio;
mod job;
mod meta;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/generate", post(submit_job))
        .route("/api/status/{task_id}", get(get_job_status))
        .route("/audio/{filename}", get(get_audio))
}
