//! Audio capture and preprocessing.
//!
//! Sources deliver interleaved i16 PCM at whatever rate and channel
//! count the hardware speaks; the preprocessor turns that into the
//! gained mono 16kHz f32 stream the rest of the pipeline expects.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod preprocess;
pub mod ring;
pub mod source;
pub mod wav;

#[cfg(feature = "cpal-audio")]
pub use capture::{CpalAudioSource, list_devices, silence_backend_logs};
pub use preprocess::{LinearResampler, PreprocessStation, Preprocessor};
pub use ring::{CaptureEvent, RingCapture, RingConfig};
pub use source::{AudioSource, MockAudioSource, ReadOutcome, SourceSpec};
pub use wav::WavAudioSource;
