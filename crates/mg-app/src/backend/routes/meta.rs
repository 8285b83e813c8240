use std::sync::Arc;

use axum::Json;
use axum::extract::State;

use crate::backend::schemas::{HealthResponse, RootResponse};
use crate::backend::state::AppState;

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse::default())
}

/// Never waits on generation: residency comes from a snapshot.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(state.service.health().into())
}
