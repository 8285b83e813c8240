//! Model backed by an out-of-process inference service speaking JSON over HTTP.
//!
//! The service keeps the real weights resident; this side only tells it which
//! checkpoint to hold and forwards generation calls. Calls are made from the model
//! handle's blocking thread, so async requests are driven with the runtime handle.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::debug;

use super::{ModelLoader, MusicModel, Waveform};
use crate::error::ModelError;
use crate::model_types::{ComputeDevice, ModelSize};
use crate::request::GenerationParams;

#[derive(Debug, Clone)]
pub struct RemoteLoader {
    client: reqwest::Client,
    base_url: String,
    device: ComputeDevice,
    sizes: Vec<ModelSize>,
}

impl RemoteLoader {
    pub fn new(
        base_url: impl Into<String>,
        device: ComputeDevice,
        sizes: Vec<ModelSize>,
        timeout: Option<Duration>,
    ) -> Result<Self, ModelError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            device,
            sizes,
        })
    }
}

#[derive(Debug, Serialize)]
struct LoadBody<'a> {
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoadReply {
    status: String,
    sample_rate: Option<u32>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    duration: f64,
    temperature: f64,
    top_k: u32,
    top_p: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    status: String,
    #[serde(default)]
    samples: Vec<f32>,
    channels: Option<u16>,
    error: Option<String>,
}

fn runtime() -> Result<Handle, ModelError> {
    Handle::try_current().map_err(|e| ModelError::Inference(format!("no async runtime available: {e}")))
}

impl ModelLoader for RemoteLoader {
    fn load(&self, size: ModelSize) -> Result<Box<dyn MusicModel>, ModelError> {
        if !self.sizes.contains(&size) {
            return Err(ModelError::UnsupportedSize(size));
        }

        let checkpoint = size.checkpoint();
        let url = format!("{}/load", self.base_url);
        debug!(%url, %checkpoint, "requesting model load");

        let reply: LoadReply = runtime()?.block_on(async {
            self.client
                .post(&url)
                .json(&LoadBody { model: &checkpoint })
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
        })?;

        match (reply.status.as_str(), reply.sample_rate) {
            ("success", Some(sample_rate)) => Ok(Box::new(RemoteModel {
                client: self.client.clone(),
                base_url: self.base_url.clone(),
                size,
                name: checkpoint,
                sample_rate,
                params: GenerationParams::default(),
            })),
            ("success", None) => Err(ModelError::Load {
                checkpoint,
                reason: "service did not report a sample rate".into(),
            }),
            _ => Err(ModelError::Load {
                checkpoint,
                reason: reply.error.unwrap_or_else(|| format!("unexpected status '{}'", reply.status)),
            }),
        }
    }

    fn device(&self) -> ComputeDevice {
        self.device
    }
}

struct RemoteModel {
    client: reqwest::Client,
    base_url: String,
    size: ModelSize,
    name: String,
    sample_rate: u32,
    params: GenerationParams,
}

impl MusicModel for RemoteModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> ModelSize {
        self.size
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn set_generation_params(&mut self, params: GenerationParams) {
        self.params = params;
    }

    fn generate(&mut self, prompts: &[String]) -> Result<Vec<Waveform>, ModelError> {
        let handle = runtime()?;
        let url = format!("{}/generate", self.base_url);

        prompts
            .iter()
            .map(|prompt| {
                let body = GenerateBody {
                    model: &self.name,
                    prompt,
                    duration: self.params.duration,
                    temperature: self.params.temperature,
                    top_k: self.params.top_k,
                    top_p: self.params.top_p,
                };
                let reply: GenerateReply = handle.block_on(async {
                    self.client
                        .post(&url)
                        .json(&body)
                        .send()
                        .await?
                        .error_for_status()?
                        .json()
                        .await
                })?;

                match reply.status.as_str() {
                    "success" if reply.samples.is_empty() => Err(ModelError::EmptyOutput),
                    "success" => Ok(Waveform {
                        channels: reply.channels.unwrap_or(1).max(1),
                        samples: reply.samples,
                    }),
                    other => Err(ModelError::Inference(
                        reply.error.unwrap_or_else(|| format!("unexpected status '{other}'")),
                    )),
                }
            })
            .collect()
    }
}
