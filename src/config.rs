use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::defaults;
use crate::error::{EdgescribeError, InferenceError, Result};

/// Top-level configuration, one section per pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub chunking: ChunkingConfig,
    pub inference: InferenceConfig,
    pub reconcile: ReconcileConfig,
}

/// Capture and preprocessing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub gain: f64,
    pub min_audio_energy: f64,
}

/// Chunk window settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Chunk window in seconds. When unset, the window required by the
    /// model variant is used.
    pub chunk_duration: Option<f64>,
    pub overlap_duration: f64,
}

/// Inference settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InferenceConfig {
    pub model_variant: ModelVariant,
    /// Path to the model file. When unset, the CLI resolves a default
    /// location based on the variant.
    pub model_path: Option<PathBuf>,
    /// Per-chunk inference deadline in seconds. When unset, twice the
    /// chunk window is used.
    pub timeout_secs: Option<f64>,
    pub skip_silence: bool,
    pub min_words: usize,
}

/// Overlap reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Trailing words remembered for overlap matching.
    pub tail_words: usize,
    /// Seconds an out-of-order transcript is held before the reorder
    /// buffer gives up on the missing sequence.
    pub reorder_timeout_secs: f64,
}

/// Which whisper model the session runs.
///
/// Each variant fixes the chunk window it was tuned for: the smaller
/// model needs longer windows to stay accurate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    Tiny,
    #[default]
    Base,
}

impl ModelVariant {
    /// Chunk window this variant requires, in seconds.
    pub fn window_secs(&self) -> f64 {
        match self {
            ModelVariant::Tiny => 10.0,
            ModelVariant::Base => 5.0,
        }
    }

    /// Conventional ggml model file name for this variant.
    pub fn model_file(&self) -> &'static str {
        match self {
            ModelVariant::Tiny => "ggml-tiny.en.bin",
            ModelVariant::Base => "ggml-base.en.bin",
        }
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelVariant::Tiny => write!(f, "tiny"),
            ModelVariant::Base => write!(f, "base"),
        }
    }
}

impl FromStr for ModelVariant {
    type Err = EdgescribeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tiny" | "tiny.en" => Ok(ModelVariant::Tiny),
            "base" | "base.en" => Ok(ModelVariant::Base),
            other => Err(EdgescribeError::ConfigInvalidValue {
                key: "model_variant".to_string(),
                message: format!("unknown variant '{}', expected 'tiny' or 'base'", other),
            }),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SOURCE_SAMPLE_RATE,
            channels: defaults::SOURCE_CHANNELS,
            gain: defaults::GAIN,
            min_audio_energy: defaults::MIN_AUDIO_ENERGY,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_duration: None,
            overlap_duration: defaults::OVERLAP_SECS,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model_variant: ModelVariant::default(),
            model_path: None,
            timeout_secs: None,
            skip_silence: true,
            min_words: defaults::MIN_WORDS,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            tail_words: defaults::RECONCILE_TAIL_WORDS,
            reorder_timeout_secs: defaults::REORDER_TIMEOUT.as_secs_f64(),
        }
    }
}

impl Config {
    /// Read a configuration file. Sections and keys the file leaves out
    /// fall back to their defaults; malformed TOML is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Like `load`, but a missing file means "use defaults".
    ///
    /// A file that exists but does not parse still panics: running a
    /// session with silently ignored settings is worse than refusing to
    /// start.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(EdgescribeError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(e) => panic!("Config file {} is unreadable: {}", path.display(), e),
        }
    }

    /// Fold in overrides from the process environment.
    ///
    /// Recognized: EDGESCRIBE_MODEL_VARIANT, EDGESCRIBE_AUDIO_DEVICE,
    /// EDGESCRIBE_GAIN. Unset and empty variables leave the value alone;
    /// unparseable ones are reported and skipped.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(variant) = std::env::var("EDGESCRIBE_MODEL_VARIANT")
            && !variant.is_empty()
        {
            match variant.parse() {
                Ok(v) => self.inference.model_variant = v,
                Err(_) => eprintln!(
                    "Warning: ignoring EDGESCRIBE_MODEL_VARIANT='{}' (expected 'tiny' or 'base')",
                    variant
                ),
            }
        }

        if let Ok(device) = std::env::var("EDGESCRIBE_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        if let Ok(gain) = std::env::var("EDGESCRIBE_GAIN")
            && !gain.is_empty()
        {
            match gain.parse::<f64>() {
                Ok(g) => self.audio.gain = g,
                Err(_) => eprintln!(
                    "Warning: ignoring EDGESCRIBE_GAIN='{}' (expected a number)",
                    gain
                ),
            }
        }

        self
    }

    /// Where the configuration lives when no --config flag is given:
    /// `$XDG_CONFIG_HOME/edgescribe/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .expect("no config directory on this platform")
            .join("edgescribe")
            .join("config.toml")
    }

    /// Effective chunk window in seconds.
    ///
    /// Falls back to the window required by the configured model variant
    /// when no explicit duration is set.
    pub fn chunk_duration(&self) -> f64 {
        self.chunking
            .chunk_duration
            .unwrap_or_else(|| self.inference.model_variant.window_secs())
    }

    /// Chunk window in samples at the pipeline rate.
    pub fn chunk_samples(&self) -> usize {
        (self.chunk_duration() * defaults::TARGET_SAMPLE_RATE as f64).round() as usize
    }

    /// Overlap in samples at the pipeline rate.
    pub fn overlap_samples(&self) -> usize {
        (self.chunking.overlap_duration * defaults::TARGET_SAMPLE_RATE as f64).round() as usize
    }

    /// Effective per-chunk inference deadline.
    pub fn inference_timeout(&self) -> Duration {
        match self.inference.timeout_secs {
            Some(secs) => Duration::from_secs_f64(secs),
            None => {
                Duration::from_secs_f64(self.chunk_duration() * defaults::INFERENCE_TIMEOUT_FACTOR)
            }
        }
    }

    /// How long the reconciler holds out-of-order transcripts.
    pub fn reorder_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.reconcile.reorder_timeout_secs)
    }

    /// Validate the configuration, failing on the first invalid value.
    ///
    /// Called once at startup so a broken config never reaches the
    /// pipeline threads.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be positive"));
        }
        if self.audio.channels == 0 {
            return Err(invalid("audio.channels", "must be at least 1"));
        }
        if !self.audio.gain.is_finite() || self.audio.gain <= 0.0 {
            return Err(invalid("audio.gain", "must be a positive number"));
        }
        if !self.audio.min_audio_energy.is_finite() || self.audio.min_audio_energy < 0.0 {
            return Err(invalid("audio.min_audio_energy", "must not be negative"));
        }

        let window = self.inference.model_variant.window_secs();
        if let Some(configured) = self.chunking.chunk_duration {
            if !configured.is_finite() || configured <= 0.0 {
                return Err(invalid("chunking.chunk_duration", "must be positive"));
            }
            if (configured - window).abs() > 1e-9 {
                return Err(InferenceError::ModelMismatch {
                    configured_secs: configured,
                    required_secs: window,
                }
                .into());
            }
        }

        let chunk = self.chunk_duration();
        if !self.chunking.overlap_duration.is_finite() || self.chunking.overlap_duration < 0.0 {
            return Err(invalid("chunking.overlap_duration", "must not be negative"));
        }
        if self.chunking.overlap_duration >= chunk {
            return Err(invalid(
                "chunking.overlap_duration",
                "must be shorter than the chunk window",
            ));
        }

        if let Some(timeout) = self.inference.timeout_secs
            && (!timeout.is_finite() || timeout <= 0.0)
        {
            return Err(invalid("inference.timeout_secs", "must be positive"));
        }

        if self.reconcile.tail_words == 0 {
            return Err(invalid("reconcile.tail_words", "must be at least 1"));
        }
        if !self.reconcile.reorder_timeout_secs.is_finite()
            || self.reconcile.reorder_timeout_secs <= 0.0
        {
            return Err(invalid("reconcile.reorder_timeout_secs", "must be positive"));
        }

        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> EdgescribeError {
    EdgescribeError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
