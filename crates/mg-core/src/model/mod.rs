//! Capability interface of the text-to-music model and the handle that owns it.

mod handle;
pub mod remote;
pub mod synth;

pub use handle::{ModelHandle, ResidentModel};
pub use remote::RemoteLoader;
pub use synth::SynthLoader;

use crate::error::ModelError;
use crate::model_types::{ComputeDevice, ModelSize};
use crate::request::GenerationParams;

/// Raw audio produced by a model, interleaved `f32` samples in [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl Waveform {
    pub fn mono(samples: Vec<f32>) -> Self {
        Self { channels: 1, samples }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / sample_rate as f64
    }
}

/// Loads model instances. Loading is slow and blocking; call it off the async runtime.
pub trait ModelLoader: Send + Sync {
    fn load(&self, size: ModelSize) -> Result<Box<dyn MusicModel>, ModelError>;

    /// Device class models from this loader run on.
    fn device(&self) -> ComputeDevice;
}

/// A loaded model instance.
pub trait MusicModel: Send {
    fn name(&self) -> &str;

    fn size(&self) -> ModelSize;

    fn sample_rate(&self) -> u32;

    fn set_generation_params(&mut self, params: GenerationParams);

    /// Generate one waveform per prompt. Blocking.
    fn generate(&mut self, prompts: &[String]) -> Result<Vec<Waveform>, ModelError>;
}
