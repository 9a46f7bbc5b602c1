//! Speech-to-text engines.

pub mod transcriber;
#[cfg(feature = "whisper")]
pub mod whisper;

pub use transcriber::{MockTranscriber, Transcriber};
#[cfg(feature = "whisper")]
pub use whisper::{WhisperConfig, WhisperTranscriber};
