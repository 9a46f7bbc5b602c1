//! Error types for edgescribe.
//!
//! The taxonomy mirrors the three failure domains of the pipeline: audio
//! capture, inference, and reconciliation. Capture and inference errors can
//! be fatal; reconciliation produces warnings that are surfaced inline and
//! counted, never propagated as errors.

use thiserror::Error;

/// Errors raised by the capture side of the pipeline.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The audio device failed in a way that leaves its state unknown.
    /// Always fatal; restarting capture is the caller's decision.
    #[error("Audio device lost: {message}")]
    DeviceLost { message: String },

    /// No audio arrived within the read timeout. Recovered locally.
    #[error("Audio read timed out after {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    /// The capture ring was full and the oldest frame was dropped.
    /// Recovered locally; the overrun counter tracks total drops.
    #[error("Capture buffer overrun: {dropped} frame(s) dropped so far")]
    Overrun { dropped: u64 },
}

/// Errors raised by the inference side of the pipeline.
#[derive(Error, Debug)]
pub enum InferenceError {
    /// A single inference call exceeded its deadline. Recovered locally:
    /// the chunk is emitted as a degraded empty result.
    #[error("Inference timed out after {timeout_ms}ms on chunk {sequence}")]
    Timeout { sequence: u64, timeout_ms: u64 },

    /// Too many consecutive inference failures; the engine is presumed
    /// unresponsive. Fatal.
    #[error("Inference engine unavailable after {failures} consecutive failures")]
    EngineUnavailable { failures: u32 },

    /// The configured chunk window does not match the window the loaded
    /// model requires. Fatal, detected at startup before any audio flows.
    #[error(
        "Chunk window of {configured_secs}s does not match the model's required window of {required_secs}s"
    )]
    ModelMismatch {
        configured_secs: f64,
        required_secs: f64,
    },
}

/// Non-fatal conditions detected while stitching chunk transcripts.
///
/// Carried on the reconciled output rather than returned as errors: losing
/// a warning must never lose words.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileWarning {
    /// No overlap match was found between consecutive chunks; the full new
    /// text was appended and may repeat a few words.
    #[error("Possible duplication at chunk {chunk_sequence}: no overlap match found")]
    PossibleDuplication { chunk_sequence: u64 },

    /// A missing sequence number was force-flushed past after the reorder
    /// wait expired.
    #[error("Sequence gap: expected chunk {expected}, resumed at chunk {resumed}")]
    SequenceGap { expected: u64, resumed: u64 },
}

/// Top-level error type for the crate.
#[derive(Error, Debug)]
pub enum EdgescribeError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    // Configuration loading and validation
    #[error("Invalid value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Could not parse configuration: {0}")]
    Config(#[from] toml::de::Error),

    // Capture backend setup, before a stream exists
    #[error("Audio capture error: {message}")]
    AudioCapture { message: String },

    #[error("No audio input device named {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio file error: {message}")]
    AudioFile { message: String },

    // Transcriber backend: model loading and inference internals
    #[error("Model file not found at {path}")]
    ModelNotFound { path: String },

    #[error("Transcription failed: {message}")]
    Transcription { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl EdgescribeError {
    /// True if this error ends the session (as opposed to a condition the
    /// pipeline recovered from and merely reported).
    pub fn is_fatal(&self) -> bool {
        match self {
            EdgescribeError::Capture(CaptureError::DeviceLost { .. }) => true,
            EdgescribeError::Capture(_) => false,
            EdgescribeError::Inference(InferenceError::Timeout { .. }) => false,
            EdgescribeError::Inference(_) => true,
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, EdgescribeError>;
