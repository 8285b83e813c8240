use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use mg_core::{ComputeDevice, ModelSize, RetentionPolicy, ServiceConfig};
use thiserror::Error;
use tracing::info;

const PREFIX: &str = "MUSICGEN_";

#[derive(Error, Debug, PartialEq)]
#[error("{key}='{value}' is invalid: {reason}")]
pub struct ConfigError {
    pub key: String,
    pub value: String,
    pub reason: String,
}

/// Which implementation serves model loads.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelBackend {
    /// In-process procedural generator.
    Synth,
    /// External inference service reachable over HTTP.
    Remote { url: String, device: ComputeDevice },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub output_dir: PathBuf,
    pub backend: ModelBackend,
    pub model_sizes: Vec<ModelSize>,
    pub preload: Option<ModelSize>,
    pub cors_origins: Vec<String>,
    pub service: ServiceConfig,
}

impl AppConfig {
    /// Read configuration from the environment, after merging an optional `.env` file.
    pub fn load() -> anyhow::Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded environment from {}", path.display()),
            Err(err) if err.not_found() => {}
            Err(err) => return Err(err.into()),
        }

        Ok(Self::from_lookup(|key| env::var(key).ok())?)
    }

    /// Build configuration from `lookup`, which maps an unprefixed key to its raw value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let backend = match vars.raw("MODEL_BACKEND").as_deref().map(str::trim) {
            None | Some("synth") => ModelBackend::Synth,
            Some("remote") => ModelBackend::Remote {
                url: vars.string("MODEL_SERVICE_URL", "http://127.0.0.1:5000"),
                device: vars.parse("DEVICE", ComputeDevice::Cuda)?,
            },
            Some(other) => return Err(vars.invalid("MODEL_BACKEND", other, "expected 'synth' or 'remote'")),
        };

        let model_sizes = match vars.raw("MODEL_SIZES") {
            None => ModelSize::all().to_vec(),
            Some(raw) => split_list(&raw)
                .map(|item| item.parse::<ModelSize>().map_err(|e| vars.invalid("MODEL_SIZES", &raw, e)))
                .collect::<Result<Vec<_>, _>>()?,
        };

        let preload = match vars.raw("PRELOAD_MODEL") {
            None => Some(ModelSize::Medium),
            Some(raw) if matches!(raw.trim(), "" | "none" | "off") => None,
            Some(raw) => Some(raw.parse::<ModelSize>().map_err(|e| vars.invalid("PRELOAD_MODEL", &raw, e))?),
        };

        let retention_secs: u64 = vars.parse("JOB_RETENTION_SECS", 24 * 60 * 60)?;
        let max_jobs: usize = vars.parse("MAX_JOBS", 10_000)?;
        let timeout_secs: u64 = vars.parse("GENERATION_TIMEOUT_SECS", 600)?;

        let max_duration_secs: f64 = vars.parse("MAX_DURATION_SECS", 300.0)?;
        if !max_duration_secs.is_finite() || max_duration_secs <= 0.0 {
            return Err(vars.invalid("MAX_DURATION_SECS", &max_duration_secs.to_string(), "must be positive"));
        }

        let service = ServiceConfig {
            workers: vars.parse("WORKERS", 1)?,
            queue_capacity: vars.parse("QUEUE_CAPACITY", 64)?,
            generation_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            max_duration_secs,
            retention: RetentionPolicy {
                max_age: (retention_secs > 0).then(|| Duration::from_secs(retention_secs)),
                max_jobs: (max_jobs > 0).then_some(max_jobs),
            },
            sweep_interval: Duration::from_secs(vars.parse("SWEEP_INTERVAL_SECS", 60)?),
            ..ServiceConfig::default()
        };
        if service.workers == 0 || service.queue_capacity == 0 {
            return Err(vars.invalid("WORKERS/QUEUE_CAPACITY", "0", "must be at least 1"));
        }

        Ok(Self {
            host: vars.string("HOST", "0.0.0.0"),
            port: vars.parse("PORT", 8000)?,
            output_dir: PathBuf::from(vars.string("OUTPUT_DIR", "generated_audio")),
            backend,
            model_sizes,
            preload,
            cors_origins: split_list(&vars.string("CORS_ORIGINS", "http://localhost:3000,https://*.vercel.app"))
                .map(str::to_string)
                .collect(),
            service,
        })
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{PREFIX}{key}"))
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.raw(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e| self.invalid(key, &raw, e)),
        }
    }

    fn invalid(&self, key: &str, value: &str, reason: impl Display) -> ConfigError {
        ConfigError {
            key: format!("{PREFIX}{key}"),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|item| !item.is_empty())
}
