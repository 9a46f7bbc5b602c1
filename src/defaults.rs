//! Default configuration constants for edgescribe.
//!
//! This module provides shared constants used across different configuration types
//! to ensure consistency and eliminate duplication.

use std::time::Duration;

/// Target sample rate for inference in Hz.
///
/// 16kHz is the standard rate for speech recognition models; everything the
/// preprocessor emits is resampled to this rate.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Default capture sample rate in Hz.
///
/// Cheap USB capture cards commonly run fixed at 48kHz; the preprocessor
/// downsamples to the 16kHz inference rate.
pub const SOURCE_SAMPLE_RATE: u32 = 48_000;

/// Default capture channel count.
///
/// Many capture devices only expose a stereo stream; all channels are
/// averaged into mono during preprocessing.
pub const SOURCE_CHANNELS: u16 = 2;

/// Default input gain applied after resampling.
///
/// Line-level input from typical capture hardware is quiet; 30x brings
/// normal speech into the range the models were trained on. Samples are
/// hard-clipped to [-1, 1] after gain.
pub const GAIN: f64 = 30.0;

/// Minimum RMS energy for a chunk to be worth transcribing.
///
/// Measured on the gained signal. Chunks below this are silence/ambient
/// noise — inference is skipped entirely and an empty result is emitted.
/// Energy gating only annotates; it never discards samples.
pub const MIN_AUDIO_ENERGY: f64 = 0.03;

/// Default overlap between consecutive chunks in seconds.
///
/// The trailing second of each chunk is replayed at the start of the next
/// one so the reconciler can line up the boundary words.
pub const OVERLAP_SECS: f64 = 1.0;

/// Duration of a single capture frame in milliseconds.
///
/// Capture reads in 100ms slices: small enough that the ring reacts quickly
/// to a stalled consumer, large enough to keep the per-read overhead low.
pub const FRAME_MS: u64 = 100;

/// Capture ring capacity expressed in seconds of audio.
///
/// Sized to a few chunk durations so inference hiccups are absorbed without
/// dropping audio; beyond this the oldest frames are evicted and counted.
pub const CAPTURE_BUFFER_SECS: f64 = 15.0;

/// How long the capture thread waits on the device per read.
pub const CAPTURE_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Inference deadline as a multiple of the chunk duration.
///
/// An engine that cannot keep up with 2x real time on its own window size
/// is effectively unusable for live streaming.
pub const INFERENCE_TIMEOUT_FACTOR: f64 = 2.0;

/// Consecutive inference failures tolerated before the engine is declared
/// unavailable and the session ends.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Number of trailing words remembered for overlap matching.
///
/// At normal speaking pace one second of overlap holds roughly 2-4 words;
/// six leaves headroom for fast speech without matching deep into the
/// previous chunk.
pub const RECONCILE_TAIL_WORDS: usize = 6;

/// How long an out-of-order transcript is held before the reorder buffer
/// force-flushes past the missing sequence number.
pub const REORDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimum number of words in an engine result.
///
/// Shorter results on overlapping windows are almost always decoder noise
/// ("Thanks.", "you") and are emptied before reconciliation. Set to 0 to
/// disable.
pub const MIN_WORDS: usize = 2;

/// Bounded channel capacities between pipeline stages.
///
/// Frames are small and frequent; chunks and results are large and rare.
/// Backpressure from a slow stage is meant to reach the capture ring, which
/// absorbs it by dropping oldest.
pub const FRAME_BUFFER: usize = 64;
pub const CHUNK_BUFFER: usize = 8;
pub const RESULT_BUFFER: usize = 16;
pub const APPEND_BUFFER: usize = 16;
