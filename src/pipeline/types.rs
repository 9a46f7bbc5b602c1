//! Data types flowing between pipeline stations.

use std::time::Instant;

use crate::error::ReconcileWarning;

/// A frame of raw interleaved PCM straight off the capture device.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Interleaved PCM samples (16-bit signed integers).
    pub samples: Vec<i16>,
    /// Number of interleaved channels.
    pub channels: u16,
    /// Sample rate of the source device in Hz.
    pub sample_rate: u32,
    /// Monotonic frame counter assigned by the capture thread.
    ///
    /// Gaps in this counter mean frames were evicted on overrun.
    pub sequence: u64,
    /// Timestamp when this frame was read from the device.
    pub captured_at: Instant,
}

impl AudioFrame {
    /// Creates a new audio frame, stamping it with the current time.
    pub fn new(samples: Vec<i16>, channels: u16, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Number of per-channel sample frames in this buffer.
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Duration of this frame in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

/// Mono 16 kHz audio after mix-down, resampling, gain and the energy gate.
#[derive(Debug, Clone)]
pub struct PreprocessedFrame {
    /// Normalized mono samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// RMS energy of the gained signal.
    pub energy: f64,
    /// Whether the energy fell below the configured floor.
    ///
    /// Silent frames still flow downstream; the flag only annotates.
    pub is_silence: bool,
    /// How many samples were clipped by the gain stage.
    pub clipped: usize,
}

/// A fixed-size window of audio ready for transcription.
///
/// Consecutive chunks overlap by a configured margin so words cut at a
/// window edge reappear intact at the start of the next window.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Strictly increasing chunk number, starting at 0.
    pub sequence: u64,
    /// Mono samples at the pipeline rate. Always a full window; the
    /// final chunk is zero-padded up to it.
    pub samples: Vec<f32>,
    /// Sample rate of `samples` in Hz.
    pub sample_rate: u32,
    /// Stream time of the first sample, in seconds.
    pub start_time: f64,
    /// Stream time just past the last real (non-padding) sample.
    pub end_time: f64,
    /// Seconds of audio shared with the previous chunk.
    pub overlap_with_previous: f64,
    /// RMS energy over the real samples only.
    pub energy: f64,
    /// Whether the real samples fell below the energy floor.
    pub is_silence: bool,
    /// Whether this is the last chunk of the stream.
    pub is_final: bool,
    /// Number of trailing zero samples appended to fill the window.
    pub padded_samples: usize,
}

impl AudioChunk {
    /// Number of real (non-padding) samples.
    pub fn audio_samples(&self) -> usize {
        self.samples.len().saturating_sub(self.padded_samples)
    }

    /// Duration of the real audio in seconds.
    pub fn audio_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.audio_samples() as f64 / self.sample_rate as f64
    }

    /// Duration of the full window, padding included.
    pub fn window_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Transcription output for a single chunk.
#[derive(Debug, Clone)]
pub struct TranscriptResult {
    /// Sequence number of the chunk this text came from.
    pub chunk_sequence: u64,
    /// Cleaned transcript text. Empty when the chunk was skipped or
    /// inference failed.
    pub text: String,
    /// RMS energy of the source chunk.
    pub energy: f64,
    /// Whether the source chunk was below the energy floor.
    pub is_silence: bool,
    /// Whether inference failed or timed out for this chunk.
    pub degraded: bool,
    /// Whether the source chunk was the last of the stream.
    pub is_final: bool,
}

impl TranscriptResult {
    /// Result for a chunk whose inference was skipped as silence.
    pub fn silent(chunk: &AudioChunk) -> Self {
        Self {
            chunk_sequence: chunk.sequence,
            text: String::new(),
            energy: chunk.energy,
            is_silence: true,
            degraded: false,
            is_final: chunk.is_final,
        }
    }

    /// Empty result standing in for a failed or timed-out inference.
    pub fn degraded(chunk: &AudioChunk) -> Self {
        Self {
            chunk_sequence: chunk.sequence,
            text: String::new(),
            energy: chunk.energy,
            is_silence: chunk.is_silence,
            degraded: true,
            is_final: chunk.is_final,
        }
    }

    /// Successful result carrying cleaned transcript text.
    pub fn from_text(chunk: &AudioChunk, text: String) -> Self {
        Self {
            chunk_sequence: chunk.sequence,
            text,
            energy: chunk.energy,
            is_silence: chunk.is_silence,
            degraded: false,
            is_final: chunk.is_final,
        }
    }
}

/// Deduplicated text ready to be appended to the running transcript.
#[derive(Debug, Clone)]
pub struct TranscriptAppend {
    /// Sequence number of the chunk this text came from.
    pub chunk_sequence: u64,
    /// Text to append. Never empty.
    pub text: String,
    /// Reconciliation warning raised while producing this append, if any.
    pub warning: Option<ReconcileWarning>,
}
