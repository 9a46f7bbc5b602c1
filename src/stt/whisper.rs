//! Whisper engine behind the [`Transcriber`] trait.
//!
//! Compiled only with the `whisper` feature, which needs cmake for the
//! bundled whisper.cpp:
//!
//! ```bash
//! cargo build --features whisper
//! ```

use std::path::PathBuf;
use std::sync::{Mutex, Once};
use std::time::Duration;

use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

use crate::config::ModelVariant;
use crate::error::{EdgescribeError, Result};
use crate::stt::transcriber::Transcriber;

static HOOKS: Once = Once::new();

fn inference_error(message: String) -> EdgescribeError {
    EdgescribeError::Transcription { message }
}

/// Settings for loading the Whisper engine.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// ggml model file on disk.
    pub model_path: PathBuf,
    /// Variant the file is expected to contain. Fixes the window the
    /// engine wants per chunk.
    pub variant: ModelVariant,
    /// Inference thread count; `None` leaves it to the library.
    pub threads: Option<usize>,
}

impl WhisperConfig {
    /// Settings for a variant at its conventional model location.
    pub fn for_variant(variant: ModelVariant) -> Self {
        Self {
            model_path: PathBuf::from("models").join(variant.model_file()),
            variant,
            threads: None,
        }
    }
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self::for_variant(ModelVariant::default())
    }
}

/// [`Transcriber`] backed by whisper.cpp.
///
/// The context sits behind a Mutex because the trait is `Sync`. The
/// engine station keeps at most one inference in flight, so the lock
/// is uncontended in normal operation.
pub struct WhisperTranscriber {
    context: Mutex<WhisperContext>,
    config: WhisperConfig,
    model_name: String,
}

impl std::fmt::Debug for WhisperTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperTranscriber")
            .field("config", &self.config)
            .field("model_name", &self.model_name)
            .finish_non_exhaustive()
    }
}

impl WhisperTranscriber {
    /// Loads the model file and readies the engine.
    ///
    /// # Errors
    /// [`EdgescribeError::ModelNotFound`] when the file is missing,
    /// [`EdgescribeError::Transcription`] when whisper.cpp rejects it.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        // Route whisper.cpp logging away from stderr exactly once.
        HOOKS.call_once(install_logging_hooks);

        if !config.model_path.exists() {
            return Err(EdgescribeError::ModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }

        let model_name = match config.model_path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_string(),
            None => "unknown".to_string(),
        };

        let path = config
            .model_path
            .to_str()
            .ok_or_else(|| inference_error("model path is not valid UTF-8".to_string()))?;
        let context = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|e| inference_error(format!("could not load Whisper model: {}", e)))?;

        Ok(Self {
            context: Mutex::new(context),
            config,
            model_name,
        })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }

    fn inference_params(&self) -> FullParams<'_, '_> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        // The supported variants are English-only models.
        params.set_language(Some("en"));
        if let Some(threads) = self.config.threads {
            params.set_n_threads(threads as i32);
        }
        // Whisper.cpp chatter would tear up the terminal transcript.
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, audio: &[f32]) -> Result<String> {
        let context = self
            .context
            .lock()
            .map_err(|e| inference_error(format!("whisper context lock poisoned: {}", e)))?;

        // Fresh state per call keeps the context itself immutable.
        let mut state = context
            .create_state()
            .map_err(|e| inference_error(format!("could not create Whisper state: {}", e)))?;

        state
            .full(self.inference_params(), audio)
            .map_err(|e| inference_error(format!("Whisper inference failed: {}", e)))?;

        let text: String = state.as_iter().map(|segment| segment.to_string()).collect();
        Ok(text.trim().to_string())
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        // Loading already succeeded in new().
        true
    }

    fn required_window(&self) -> Option<Duration> {
        Some(Duration::from_secs_f64(self.config.variant.window_secs()))
    }
}
