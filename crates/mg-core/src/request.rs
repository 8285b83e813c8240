use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model_types::ModelSize;

pub const DEFAULT_DURATION_SECS: f64 = 30.0;
pub const DEFAULT_TEMPERATURE: f64 = 1.0;
pub const DEFAULT_TOP_K: u32 = 250;
pub const DEFAULT_TOP_P: f64 = 0.0;

/// Request body as submitted by a client, before any validation.
///
/// Omitted fields take the service defaults. Numeric fields are kept wide
/// (`i64` for `top_k`) so that out-of-domain values reach validation instead
/// of failing deserialization with an opaque message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationDraft {
    pub prompt: String,
    #[serde(default = "default_duration")]
    pub duration: f64,
    #[serde(default = "default_model_size")]
    pub model_size: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
}

fn default_duration() -> f64 {
    DEFAULT_DURATION_SECS
}

fn default_model_size() -> String {
    ModelSize::default().id().to_string()
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_top_k() -> i64 {
    DEFAULT_TOP_K as i64
}

fn default_top_p() -> f64 {
    DEFAULT_TOP_P
}

impl GenerationDraft {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            duration: default_duration(),
            model_size: default_model_size(),
            temperature: default_temperature(),
            top_k: default_top_k(),
            top_p: default_top_p(),
        }
    }
}

/// Sampling parameters handed to a loaded model before generating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    pub duration: f64,
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            duration: DEFAULT_DURATION_SECS,
            temperature: DEFAULT_TEMPERATURE,
            top_k: DEFAULT_TOP_K,
            top_p: DEFAULT_TOP_P,
        }
    }
}

/// An accepted generation request. Only obtainable through [`GenerationRequest::validate`],
/// so every value of this type satisfies the field domains.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GenerationRequest {
    prompt: String,
    model_size: ModelSize,
    params: GenerationParams,
}

impl GenerationRequest {
    pub fn validate(draft: GenerationDraft, max_duration: f64) -> Result<Self, ValidationError> {
        let prompt = draft.prompt.trim();
        if prompt.is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }

        if !draft.duration.is_finite() || draft.duration <= 0.0 {
            return Err(ValidationError::InvalidDuration(draft.duration));
        }
        if draft.duration > max_duration {
            return Err(ValidationError::DurationTooLong {
                requested: draft.duration,
                max: max_duration,
            });
        }

        let model_size: ModelSize = draft.model_size.parse()?;

        if !draft.temperature.is_finite() || draft.temperature < 0.0 {
            return Err(ValidationError::InvalidTemperature(draft.temperature));
        }

        let top_k = u32::try_from(draft.top_k).map_err(|_| ValidationError::InvalidTopK(draft.top_k))?;

        if !(0.0..=1.0).contains(&draft.top_p) {
            return Err(ValidationError::InvalidTopP(draft.top_p));
        }

        Ok(Self {
            prompt: prompt.to_string(),
            model_size,
            params: GenerationParams {
                duration: draft.duration,
                temperature: draft.temperature,
                top_k,
                top_p: draft.top_p,
            },
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn model_size(&self) -> ModelSize {
        self.model_size
    }

    pub fn params(&self) -> GenerationParams {
        self.params
    }
}
