use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Checkpoint sizes of the MusicGen family that a loader may be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Small,
    Medium,
    Large,
    Melody,
}

impl ModelSize {
    /// Selector used in requests and responses
    pub fn id(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Melody => "melody",
        }
    }

    /// Pretrained checkpoint name understood by the inference backend
    pub fn checkpoint(&self) -> String {
        format!("facebook/musicgen-{}", self.id())
    }

    /// Rough parameter count, used for log lines only
    pub fn parameters(&self) -> &'static str {
        match self {
            Self::Small => "300M",
            Self::Medium | Self::Melody => "1.5B",
            Self::Large => "3.3B",
        }
    }

    pub fn all() -> [ModelSize; 4] {
        [Self::Small, Self::Medium, Self::Large, Self::Melody]
    }
}

impl Default for ModelSize {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ModelSize {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::all()
            .into_iter()
            .find(|size| size.id() == wanted)
            .ok_or_else(|| ValidationError::UnknownModelSize(s.to_string()))
    }
}

/// Compute device class a model runs on, as reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Mps,
}

impl ComputeDevice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::Mps => "mps",
        }
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComputeDevice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "mps" => Ok(Self::Mps),
            other => Err(format!("unknown device class '{other}'")),
        }
    }
}
