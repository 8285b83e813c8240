use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use super::{ModelLoader, MusicModel, Waveform};
use crate::error::{GenerationError, ModelError};
use crate::model_types::{ComputeDevice, ModelSize};
use crate::request::{GenerationParams, GenerationRequest};

/// Public description of the model that is currently loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResidentModel {
    pub size: ModelSize,
    pub name: String,
    pub sample_rate: u32,
    pub loaded_at: DateTime<Utc>,
}

/// Owner of the single resident model.
///
/// Every load, swap and generation goes through one mutex, so a swap can never happen
/// underneath an in-flight generation. The mutex is a blocking one: callers run on a
/// blocking thread (`spawn_blocking`), never on the async runtime. The current residency
/// is mirrored into a watch channel that readers can inspect without waiting on the lock.
pub struct ModelHandle {
    loader: Arc<dyn ModelLoader>,
    defaults: GenerationParams,
    slot: Mutex<Option<Box<dyn MusicModel>>>,
    resident: watch::Sender<Option<ResidentModel>>,
}

impl ModelHandle {
    pub fn new(loader: Arc<dyn ModelLoader>, defaults: GenerationParams) -> Self {
        let (resident, _) = watch::channel(None);
        Self {
            loader,
            defaults,
            slot: Mutex::new(None),
            resident,
        }
    }

    /// What is loaded right now, without blocking on an in-flight generation.
    pub fn resident(&self) -> Option<ResidentModel> {
        self.resident.borrow().clone()
    }

    pub fn device(&self) -> ComputeDevice {
        self.loader.device()
    }

    /// Exclusive access to the model slot for the duration of the returned session.
    pub fn lock(&self) -> ModelSession<'_> {
        let guard = self.slot.lock().unwrap_or_else(|poisoned| {
            warn!("model lock poisoned by a crashed generation, discarding resident model");
            let mut guard = poisoned.into_inner();
            *guard = None;
            self.resident.send_replace(None);
            guard
        });
        self.slot.clear_poison();
        ModelSession { handle: self, guard }
    }

    /// Load `size` if it is not resident yet. Blocking.
    pub fn preload(&self, size: ModelSize) -> Result<(), GenerationError> {
        self.lock().ensure_loaded(size).map(|_| ())
    }

    /// Run one request end to end against the resident model. Blocking.
    pub fn generate(&self, request: &GenerationRequest) -> Result<(Waveform, u32), GenerationError> {
        self.lock().generate(request)
    }
}

/// A held lock on the model slot.
pub struct ModelSession<'a> {
    handle: &'a ModelHandle,
    guard: MutexGuard<'a, Option<Box<dyn MusicModel>>>,
}

impl ModelSession<'_> {
    /// Return the resident model for `size`, loading or swapping it first when needed.
    ///
    /// A different resident model is dropped before the new one loads. If loading fails
    /// nothing is resident afterwards, and the next call tries again.
    pub fn ensure_loaded(
        &mut self,
        size: ModelSize,
    ) -> Result<&mut (dyn MusicModel + 'static), GenerationError> {
        let current = self.guard.as_ref().map(|model| model.size());
        if current != Some(size) {
            if let Some(previous) = current {
                info!(from = %previous, to = %size, "swapping resident model");
            }
            *self.guard = None;
            self.handle.resident.send_replace(None);

            info!(size = %size, params = size.parameters(), "loading model");
            let mut model = self.handle.loader.load(size).map_err(|err| {
                warn!(size = %size, error = %err, "model load failed");
                GenerationError::ModelLoad {
                    size,
                    reason: err.to_string(),
                }
            })?;
            model.set_generation_params(self.handle.defaults);

            self.handle.resident.send_replace(Some(ResidentModel {
                size,
                name: model.name().to_string(),
                sample_rate: model.sample_rate(),
                loaded_at: Utc::now(),
            }));
            info!(size = %size, name = model.name(), "model ready");
            *self.guard = Some(model);
        }

        match self.guard.as_deref_mut() {
            Some(model) => Ok(model),
            None => Err(GenerationError::ModelLoad {
                size,
                reason: "model slot empty after load".into(),
            }),
        }
    }

    /// Load the requested size if needed, apply the request's parameters and generate.
    pub fn generate(&mut self, request: &GenerationRequest) -> Result<(Waveform, u32), GenerationError> {
        let model = self.ensure_loaded(request.model_size())?;
        model.set_generation_params(request.params());

        let sample_rate = model.sample_rate();
        let waveform = model
            .generate(&[request.prompt().to_string()])
            .map_err(|err| GenerationError::Inference(err.to_string()))?
            .into_iter()
            .next()
            .filter(|waveform| !waveform.is_empty())
            .ok_or_else(|| GenerationError::Inference(ModelError::EmptyOutput.to_string()))?;

        Ok((waveform, sample_rate))
    }
}
