mod cors;
mod routes;
mod schemas;
mod state;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::{TcpListener, ToSocketAddrs};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::backend::cors::cors_layer;
use crate::backend::routes::api_routes;
pub use crate::backend::state::AppState;

/// Build the HTTP surface over `state`.
pub fn router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        .merge(api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

/// HTTP server bound to a listening socket.
pub struct Backend {
    listener: TcpListener,
    app: Router,
}

impl Backend {
    pub async fn bind(addr: impl ToSocketAddrs, state: Arc<AppState>, cors_origins: &[String]) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            app: router(state, cors_origins),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` resolves, then let in-flight requests finish.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Backend listening on http://{}", self.local_addr()?);
        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mg_core::error::ModelError;
    use mg_core::{
        ComputeDevice, FsArtifactStore, JobStatus, ModelLoader, ModelSize, MusicModel, MusicService, ServiceConfig,
        SynthLoader,
    };
    use reqwest::StatusCode;
    use serde_json::{Value, json};

    use super::*;

    /// Synth models that take `delay` to load, so jobs stay in flight for a while.
    struct DelayedLoader {
        inner: SynthLoader,
        delay: Duration,
    }

    impl ModelLoader for DelayedLoader {
        fn load(&self, size: ModelSize) -> Result<Box<dyn MusicModel>, ModelError> {
            std::thread::sleep(self.delay);
            self.inner.load(size)
        }

        fn device(&self) -> ComputeDevice {
            self.inner.device()
        }
    }

    fn delayed(millis: u64) -> Arc<dyn ModelLoader> {
        Arc::new(DelayedLoader {
            inner: SynthLoader::default(),
            delay: Duration::from_millis(millis),
        })
    }

    struct TestServer {
        base: String,
        client: reqwest::Client,
        service: Arc<MusicService>,
        _dir: tempfile::TempDir,
    }

    impl TestServer {
        async fn start(loader: Arc<dyn ModelLoader>, config: ServiceConfig) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(FsArtifactStore::new(dir.path()).unwrap());
            let service = Arc::new(MusicService::start(config, loader, store));

            let origins = vec!["http://localhost:3000".to_string(), "https://*.vercel.app".to_string()];
            let backend = Backend::bind("127.0.0.1:0", Arc::new(AppState::new(Arc::clone(&service))), &origins)
                .await
                .unwrap();
            let base = format!("http://{}", backend.local_addr().unwrap());
            tokio::spawn(backend.serve(std::future::pending()));

            Self {
                base,
                client: reqwest::Client::new(),
                service,
                _dir: dir,
            }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base, path)
        }

        async fn submit(&self, body: Value) -> reqwest::Response {
            self.client.post(self.url("/api/generate")).json(&body).send().await.unwrap()
        }

        async fn status(&self, task_id: &str) -> Value {
            let resp = self.client.get(self.url(&format!("/api/status/{task_id}"))).send().await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            resp.json().await.unwrap()
        }

        async fn wait_terminal(&self, task_id: &str) -> Value {
            for _ in 0..400 {
                let body = self.status(task_id).await;
                if matches!(body["status"].as_str(), Some("completed" | "failed")) {
                    return body;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            panic!("job {task_id} did not finish");
        }
    }

    fn config() -> ServiceConfig {
        ServiceConfig {
            generation_timeout: Some(Duration::from_secs(30)),
            ..ServiceConfig::default()
        }
    }

    async fn task_id(resp: reqwest::Response) -> String {
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "pending");
        assert_eq!(body["message"], "Music generation started");
        body["task_id"].as_str().unwrap().to_string()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_generate_poll_and_download() {
        let server = TestServer::start(Arc::new(SynthLoader::default()), config()).await;

        let id = task_id(
            server
                .submit(json!({"prompt": "calm piano", "duration": 5, "model_size": "small"}))
                .await,
        )
        .await;

        let done = server.wait_terminal(&id).await;
        assert_eq!(done["status"], "completed");
        assert_eq!(done["audio_url"], format!("/audio/{id}.wav"));
        assert_eq!(done["error"], Value::Null);
        assert_eq!(done["prompt"], "calm piano");
        assert_eq!(done["model_size"], "small");

        let resp = server.client.get(server.url(&format!("/audio/{id}.wav"))).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[reqwest::header::CONTENT_TYPE], "audio/wav");
        let disposition = resp.headers()[reqwest::header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.contains(&format!("{id}.wav")));

        let declared: usize = resp.headers()[reqwest::header::CONTENT_LENGTH].to_str().unwrap().parse().unwrap();

        let bytes = resp.bytes().await.unwrap();
        assert_eq!(bytes.len(), declared);
        assert_eq!(&bytes[..4], b"RIFF");
        // 5 s of 16-bit mono at 32 kHz plus the header.
        assert!(bytes.len() >= 5 * 32_000 * 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invalid_requests_are_rejected_without_a_job() {
        let server = TestServer::start(Arc::new(SynthLoader::default()), config()).await;

        let bad_bodies = [
            json!({"prompt": "   "}),
            json!({"prompt": "calm piano", "duration": -1}),
            json!({"prompt": "calm piano", "model_size": "huge"}),
            json!({"prompt": "calm piano", "top_p": 1.5}),
            json!({"duration": 10}),
        ];
        for body in bad_bodies {
            let resp = server.submit(body).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let err: Value = resp.json().await.unwrap();
            assert_eq!(err["error"]["type"], "invalid_request_error");
        }

        let resp = server
            .client
            .post(server.url("/api/generate"))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        assert!(server.service.registry().is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unknown_task_and_audio_are_not_found() {
        let server = TestServer::start(Arc::new(SynthLoader::default()), config()).await;

        for path in [
            format!("/api/status/{}", uuid::Uuid::new_v4()),
            "/api/status/not-a-uuid".to_string(),
            format!("/audio/{}.wav", uuid::Uuid::new_v4()),
            "/audio/secret.txt".to_string(),
        ] {
            let resp = server.client.get(server.url(&path)).send().await.unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{path}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unavailable_model_fails_job_and_service_keeps_working() {
        let loader = Arc::new(SynthLoader::new(vec![ModelSize::Small, ModelSize::Medium]));
        let server = TestServer::start(loader, config()).await;

        let bad = task_id(server.submit(json!({"prompt": "epic", "duration": 1, "model_size": "large"})).await).await;
        let failed = server.wait_terminal(&bad).await;
        assert_eq!(failed["status"], "failed");
        assert_eq!(failed["error_kind"], "model_load");
        assert!(failed["error"].as_str().unwrap().contains("large"));
        assert_eq!(failed["audio_url"], Value::Null);

        let resp = server.client.get(server.url(&format!("/audio/{bad}.wav"))).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let good = task_id(server.submit(json!({"prompt": "calm", "duration": 1, "model_size": "small"})).await).await;
        assert_eq!(server.wait_terminal(&good).await["status"], "completed");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_status_only_moves_forward_and_audio_waits_for_completion() {
        let server = TestServer::start(delayed(300), config()).await;
        let id = task_id(server.submit(json!({"prompt": "lofi beat", "duration": 1, "model_size": "small"})).await).await;

        let resp = server.client.get(server.url(&format!("/audio/{id}.wav"))).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let rank = |status: &str| match status {
            "pending" => JobStatus::Pending,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            other => panic!("unexpected status {other}"),
        };
        let mut seen = Vec::new();
        loop {
            let body = server.status(&id).await;
            let status = rank(body["status"].as_str().unwrap());
            seen.push(status);
            if status == JobStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]), "{seen:?}");
        assert!(seen.contains(&JobStatus::Processing));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_queue_is_service_unavailable() {
        let config = ServiceConfig {
            queue_capacity: 1,
            ..config()
        };
        let server = TestServer::start(delayed(400), config).await;

        let submissions = (0..4).map(|_| server.submit(json!({"prompt": "drums", "duration": 1})));
        let responses = futures::future::join_all(submissions).await;

        let mut accepted = 0;
        let mut rejected = 0;
        for resp in responses {
            match resp.status() {
                StatusCode::OK => accepted += 1,
                StatusCode::SERVICE_UNAVAILABLE => rejected += 1,
                other => panic!("unexpected status {other}"),
            }
        }

        assert!(rejected >= 1);
        assert_eq!(server.service.registry().len().await, accepted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_root_and_health() {
        let server = TestServer::start(Arc::new(SynthLoader::default()), config()).await;

        let root: Value = server.client.get(server.url("/")).send().await.unwrap().json().await.unwrap();
        assert_eq!(root["status"], "running");
        assert_eq!(root["endpoints"]["generate"], "POST /api/generate");

        let health: Value = server.client.get(server.url("/health")).send().await.unwrap().json().await.unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["model_loaded"], false);
        assert_eq!(health["model"], Value::Null);
        assert_eq!(health["device"], "cpu");

        server.service.preload(ModelSize::Small).await.unwrap();
        let health: Value = server.client.get(server.url("/health")).send().await.unwrap().json().await.unwrap();
        assert_eq!(health["model_loaded"], true);
        assert_eq!(health["model"], "facebook/musicgen-small");
        assert_eq!(health["model_size"], "small");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_health_answers_while_generating() {
        let server = TestServer::start(delayed(1_000), config()).await;
        task_id(server.submit(json!({"prompt": "ambient", "duration": 1})).await).await;

        let started = std::time::Instant::now();
        let resp = server.client.get(server.url("/health")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cors_allows_configured_origins() {
        let server = TestServer::start(Arc::new(SynthLoader::default()), config()).await;

        let allowed = server
            .client
            .get(server.url("/health"))
            .header(reqwest::header::ORIGIN, "https://my-app.vercel.app")
            .send()
            .await
            .unwrap();
        assert_eq!(
            allowed.headers()[reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://my-app.vercel.app"
        );
        assert_eq!(allowed.headers()[reqwest::header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");

        let denied = server
            .client
            .get(server.url("/health"))
            .header(reqwest::header::ORIGIN, "https://evil.example")
            .send()
            .await
            .unwrap();
        assert!(!denied.headers().contains_key(reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN));

        let preflight = server
            .client
            .request(reqwest::Method::OPTIONS, server.url("/api/generate"))
            .header(reqwest::header::ORIGIN, "http://localhost:3000")
            .header(reqwest::header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(reqwest::header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .send()
            .await
            .unwrap();
        assert!(preflight.status().is_success());
        assert_eq!(
            preflight.headers()[reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
    }
}
