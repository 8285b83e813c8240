//! HTTP server for asynchronous text-to-music generation.

use std::sync::Arc;

use mg_core::{FsArtifactStore, ModelLoader, MusicService, RemoteLoader, SynthLoader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod backend;
mod config;
mod error;

use crate::backend::{AppState, Backend};
use crate::config::{AppConfig, ModelBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mg_app=debug,mg_core=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load()?;
    info!("Starting music generation server");

    let loader: Arc<dyn ModelLoader> = match &config.backend {
        ModelBackend::Synth => {
            info!("Using the built-in synth backend");
            Arc::new(SynthLoader::new(config.model_sizes.clone()))
        }
        ModelBackend::Remote { url, device } => {
            info!("Using inference service at {url} ({device})");
            Arc::new(RemoteLoader::new(
                url.as_str(),
                *device,
                config.model_sizes.clone(),
                config.service.generation_timeout,
            )?)
        }
    };
    let store = Arc::new(FsArtifactStore::new(&config.output_dir)?);
    let service = Arc::new(MusicService::start(config.service.clone(), loader, store));

    if let Some(size) = config.preload {
        info!("Preloading {}", size.checkpoint());
        match service.preload(size).await {
            Ok(()) => info!("Model {} ready", size.checkpoint()),
            Err(err) => warn!("Preload failed, models will load on demand: {err}"),
        }
    }

    let state = Arc::new(AppState::new(Arc::clone(&service)));
    let backend = Backend::bind((config.host.as_str(), config.port), state, &config.cors_origins).await?;

    info!("Server ready. Press Ctrl+C to stop.");
    backend.serve(shutdown_signal()).await?;

    match Arc::try_unwrap(service) {
        Ok(service) => service.shutdown().await,
        Err(_) => warn!("Service still referenced at exit, queued jobs were not drained"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
