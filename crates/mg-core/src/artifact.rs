use std::io;
use std::path::{Path, PathBuf};

use std::fmt;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::{debug, info};

use crate::error::ArtifactError;
use crate::job::{AudioRef, JobId};
use crate::model::Waveform;

/// Loudness target for stored audio, in dBFS RMS.
pub const TARGET_LOUDNESS_DB: f32 = -14.0;
/// Level above which the soft compressor starts bending peaks.
const COMPRESSOR_KNEE: f32 = 0.8;

/// An open stored artifact, read incrementally.
pub struct ArtifactReader {
    /// Size in bytes.
    pub len: u64,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl fmt::Debug for ArtifactReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactReader").field("len", &self.len).finish_non_exhaustive()
    }
}

/// Durable storage for finished audio, addressed by job id.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Encode and persist `waveform` for `id`. Blocking; runs on the generation thread.
    fn save(&self, id: JobId, waveform: &Waveform, sample_rate: u32) -> Result<AudioRef, ArtifactError>;

    async fn load(&self, audio: &AudioRef) -> Result<ArtifactReader, ArtifactError>;

    async fn remove(&self, audio: &AudioRef) -> Result<(), ArtifactError>;
}

/// Stores `<job id>.wav` files in one directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        info!("Storing generated audio in {}", root.display());
        Ok(Self { root })
    }

    fn path_for(&self, audio: &AudioRef) -> Result<PathBuf, ArtifactError> {
        // Only plain file names; anything that could escape the root is unknown.
        let name = Path::new(&audio.file_name);
        match name.file_name() {
            Some(file) if file == name.as_os_str() => Ok(self.root.join(file)),
            _ => Err(ArtifactError::NotFound(audio.file_name.clone())),
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    fn save(&self, id: JobId, waveform: &Waveform, sample_rate: u32) -> Result<AudioRef, ArtifactError> {
        if waveform.is_empty() {
            return Err(ArtifactError::EmptyWaveform);
        }

        let audio = AudioRef::for_job(id);
        let path = self.path_for(&audio)?;
        let partial = path.with_extension("wav.part");

        write_wav(&partial, waveform, sample_rate)?;
        std::fs::rename(&partial, &path)?;

        debug!(job_id = %id, path = %path.display(), "stored audio");
        Ok(audio)
    }

    async fn load(&self, audio: &AudioRef) -> Result<ArtifactReader, ArtifactError> {
        let path = self.path_for(audio)?;
        let file = tokio::fs::File::open(&path).await.map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => ArtifactError::NotFound(audio.file_name.clone()),
            _ => ArtifactError::Io(err),
        })?;
        let len = file.metadata().await?.len();
        Ok(ArtifactReader {
            len,
            reader: Box::new(file),
        })
    }

    async fn remove(&self, audio: &AudioRef) -> Result<(), ArtifactError> {
        let path = self.path_for(audio)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// 16-bit PCM WAV, loudness-normalized.
fn write_wav(path: &Path, waveform: &Waveform, sample_rate: u32) -> Result<(), ArtifactError> {
    let spec = hound::WavSpec {
        channels: waveform.channels.max(1),
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut samples = waveform.samples.clone();
    normalize_loudness(&mut samples, TARGET_LOUDNESS_DB);

    let mut writer = hound::WavWriter::create(path, spec)?;
    for s in samples {
        writer.write_sample((s * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Scale to the target RMS level, then soft-compress peaks so nothing clips.
pub fn normalize_loudness(samples: &mut [f32], target_db: f32) {
    let finite = samples.iter().filter(|s| s.is_finite());
    let (sum, count) = finite.fold((0.0f64, 0usize), |(sum, n), s| (sum + (*s as f64).powi(2), n + 1));
    if count == 0 || sum == 0.0 {
        samples.iter_mut().for_each(|s| *s = 0.0);
        return;
    }

    let rms = (sum / count as f64).sqrt() as f32;
    let gain = 10f32.powf(target_db / 20.0) / rms;

    for s in samples.iter_mut() {
        let x = if s.is_finite() { *s * gain } else { 0.0 };
        *s = soft_clip(x);
    }
}

fn soft_clip(x: f32) -> f32 {
    let magnitude = x.abs();
    if magnitude <= COMPRESSOR_KNEE {
        return x;
    }
    let headroom = 1.0 - COMPRESSOR_KNEE;
    let bent = COMPRESSOR_KNEE + headroom * ((magnitude - COMPRESSOR_KNEE) / headroom).tanh();
    bent.copysign(x)
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    fn tone(frames: usize) -> Waveform {
        Waveform::mono((0..frames).map(|i| (i as f32 * 0.05).sin() * 0.1).collect())
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_normalize_reaches_target_without_clipping() {
        let mut quiet: Vec<f32> = (0..10_000).map(|i| (i as f32 * 0.01).sin() * 0.01).collect();
        normalize_loudness(&mut quiet, TARGET_LOUDNESS_DB);
        let level_db = 20.0 * rms(&quiet).log10();
        assert!((level_db - TARGET_LOUDNESS_DB).abs() < 0.5, "got {level_db} dBFS");

        let mut hot = vec![0.0, 5.0, -5.0, f32::NAN];
        normalize_loudness(&mut hot, 0.0);
        assert!(hot.iter().all(|s| s.is_finite() && s.abs() < 1.0));
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut silence = vec![0.0; 16];
        normalize_loudness(&mut silence, TARGET_LOUDNESS_DB);
        assert!(silence.iter().all(|s| *s == 0.0));
    }

    #[tokio::test]
    async fn test_save_then_load_wav() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path().join("audio")).unwrap();
        let id = JobId::new();

        let audio = store.save(id, &tone(8_000), 16_000).unwrap();
        assert_eq!(audio.file_name, format!("{id}.wav"));

        let mut stored = store.load(&audio).await.unwrap();
        let mut bytes = Vec::new();
        stored.reader.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes.len() as u64, stored.len);
        assert_eq!(&bytes[..4], b"RIFF");

        let reader = hound::WavReader::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 8_000);
        assert!(!dir.path().join("audio").join(format!("{id}.wav.part")).exists());
    }

    #[tokio::test]
    async fn test_missing_and_hostile_names_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();

        let missing = AudioRef::for_job(JobId::new());
        assert!(matches!(store.load(&missing).await, Err(ArtifactError::NotFound(_))));

        let escape = AudioRef {
            file_name: "../secret.wav".into(),
        };
        assert!(matches!(store.load(&escape).await, Err(ArtifactError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();
        let audio = store.save(JobId::new(), &tone(100), 8_000).unwrap();

        store.remove(&audio).await.unwrap();
        store.remove(&audio).await.unwrap();
        assert!(matches!(store.load(&audio).await, Err(ArtifactError::NotFound(_))));
    }

    #[test]
    fn test_empty_waveform_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();
        let err = store.save(JobId::new(), &Waveform::mono(Vec::new()), 8_000).unwrap_err();
        assert!(matches!(err, ArtifactError::EmptyWaveform));
    }
}
