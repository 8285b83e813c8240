//! Procedural stand-in for the neural model.
//!
//! Renders a short arpeggiated phrase whose key, mode and tempo are derived from the
//! prompt text, so the whole service can run end to end without weights or a GPU.
//! Output is deterministic for a given prompt and parameter set.

use std::f32::consts::TAU;

use super::{ModelLoader, MusicModel, Waveform};
use crate::error::ModelError;
use crate::model_types::{ComputeDevice, ModelSize};
use crate::request::GenerationParams;

pub const SYNTH_SAMPLE_RATE: u32 = 32_000;

const MAJOR: [i32; 7] = [0, 2, 4, 5, 7, 9, 11];
const MINOR: [i32; 7] = [0, 2, 3, 5, 7, 8, 10];

#[derive(Debug, Clone)]
pub struct SynthLoader {
    sizes: Vec<ModelSize>,
}

impl SynthLoader {
    /// Loader restricted to `sizes`; everything else fails to load.
    pub fn new(sizes: Vec<ModelSize>) -> Self {
        Self { sizes }
    }
}

impl Default for SynthLoader {
    fn default() -> Self {
        Self::new(ModelSize::all().to_vec())
    }
}

impl ModelLoader for SynthLoader {
    fn load(&self, size: ModelSize) -> Result<Box<dyn MusicModel>, ModelError> {
        if !self.sizes.contains(&size) {
            return Err(ModelError::UnsupportedSize(size));
        }
        Ok(Box::new(SynthModel {
            size,
            name: size.checkpoint(),
            params: GenerationParams::default(),
        }))
    }

    fn device(&self) -> ComputeDevice {
        ComputeDevice::Cpu
    }
}

struct SynthModel {
    size: ModelSize,
    name: String,
    params: GenerationParams,
}

impl MusicModel for SynthModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> ModelSize {
        self.size
    }

    fn sample_rate(&self) -> u32 {
        SYNTH_SAMPLE_RATE
    }

    fn set_generation_params(&mut self, params: GenerationParams) {
        self.params = params;
    }

    fn generate(&mut self, prompts: &[String]) -> Result<Vec<Waveform>, ModelError> {
        prompts.iter().map(|prompt| self.render(prompt)).collect()
    }
}

impl SynthModel {
    fn render(&self, prompt: &str) -> Result<Waveform, ModelError> {
        let frames = (self.params.duration * SYNTH_SAMPLE_RATE as f64).round() as usize;
        if frames == 0 {
            return Err(ModelError::Inference("requested duration rounds to zero samples".into()));
        }

        let style = Style::from_prompt(prompt);
        let mut rng = Lcg(style.seed);
        let partials = match self.size {
            ModelSize::Small => 1,
            ModelSize::Medium => 2,
            ModelSize::Melody => 3,
            ModelSize::Large => 4,
        };

        // Candidate scale degrees, narrowed by top_k.
        let candidates = match self.params.top_k {
            0 => 7,
            k => (k as usize).clamp(1, 7),
        };
        let wander = self.params.temperature.clamp(0.0, 2.0) as f32;

        let beat_frames = (60.0 / style.bpm * SYNTH_SAMPLE_RATE as f32) as usize;
        let mut samples = vec![0.0f32; frames];
        let mut degree = 0usize;

        for (beat, start) in (0..frames).step_by(beat_frames.max(1)).enumerate() {
            let step = if rng.next_f32() < wander * 0.5 {
                rng.next_usize(candidates)
            } else {
                [0, 2, 4, 2][beat % 4]
            };
            degree = (degree + step) % 7;

            let melody = midi_to_hz(style.root + 12 + style.scale[degree]);
            let bass = midi_to_hz(style.root + style.scale[[0, 3, 4, 0][(beat / 4) % 4]]);
            let end = (start + beat_frames).min(frames);

            for (offset, sample) in samples[start..end].iter_mut().enumerate() {
                let t = offset as f32 / SYNTH_SAMPLE_RATE as f32;
                let envelope = (t / 0.01).min(1.0) * (-3.0 * t).exp();
                let mut voice = 0.0;
                for partial in 1..=partials {
                    voice += (TAU * melody * partial as f32 * t).sin() / partial as f32;
                }
                *sample += 0.5 * envelope * voice + 0.25 * (TAU * bass * t).sin() * (-1.5 * t).exp();
            }
        }

        let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        if peak > 0.0 {
            let gain = 0.8 / peak;
            samples.iter_mut().for_each(|s| *s *= gain);
        }

        Ok(Waveform::mono(samples))
    }
}

struct Style {
    seed: u64,
    root: i32,
    bpm: f32,
    scale: &'static [i32; 7],
}

impl Style {
    fn from_prompt(prompt: &str) -> Self {
        let lower = prompt.to_lowercase();
        let seed = lower
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |hash, b| (hash ^ b as u64).wrapping_mul(0x0100_0000_01b3));

        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));
        let bpm = if has(&["calm", "ambient", "slow", "sleep", "piano"]) {
            72.0
        } else if has(&["dance", "techno", "fast", "energetic", "drum"]) {
            128.0
        } else {
            90.0 + (seed % 24) as f32
        };
        let scale = if has(&["sad", "dark", "minor", "melanchol"]) {
            &MINOR
        } else {
            &MAJOR
        };

        Self {
            seed,
            root: 45 + (seed % 12) as i32,
            bpm,
            scale,
        }
    }
}

fn midi_to_hz(note: i32) -> f32 {
    440.0 * 2f32.powf((note - 69) as f32 / 12.0)
}

struct Lcg(u64);

impl Lcg {
    fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) as u32
    }

    fn next_f32(&mut self) -> f32 {
        self.next_u32() as f32 / (1u64 << 31) as f32
    }

    fn next_usize(&mut self, bound: usize) -> usize {
        self.next_u32() as usize % bound.max(1)
    }
}
