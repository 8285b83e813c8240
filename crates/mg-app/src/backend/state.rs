use std::sync::Arc;

use mg_core::MusicService;

pub struct AppState {
    pub service: Arc<MusicService>,
}

impl AppState {
    pub fn new(service: Arc<MusicService>) -> Self {
        Self { service }
    }
}
