//! Sample-count-driven chunk scheduling.
//!
//! The scheduler accumulates preprocessed samples and cuts a window
//! of exactly `chunk_duration * 16000` samples every cadence, where
//! cadence is the window minus the configured overlap. Wall-clock
//! time never drives a cut, so a stalled upstream can delay chunks
//! but never misalign them.

use std::sync::Arc;

use crate::audio::preprocess::rms;
use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::stats::SessionCounters;
use crate::pipeline::types::{AudioChunk, PreprocessedFrame};

/// Cuts overlapping fixed-length windows out of the sample stream.
pub struct ChunkScheduler {
    window_samples: usize,
    overlap_samples: usize,
    cadence_samples: usize,
    sample_rate: u32,
    min_energy: f64,
    buffer: Vec<f32>,
    next_sequence: u64,
    /// Stream position of `buffer[0]`, in samples since session start.
    buffer_start: u64,
}

impl ChunkScheduler {
    /// `overlap_samples` must be smaller than `window_samples`;
    /// configuration validation enforces that before a scheduler is
    /// ever built.
    pub fn new(
        window_samples: usize,
        overlap_samples: usize,
        sample_rate: u32,
        min_energy: f64,
    ) -> Self {
        debug_assert!(window_samples > 0);
        debug_assert!(overlap_samples < window_samples);
        Self {
            window_samples,
            overlap_samples,
            cadence_samples: window_samples - overlap_samples,
            sample_rate,
            min_energy,
            buffer: Vec::with_capacity(window_samples * 2),
            next_sequence: 0,
            buffer_start: 0,
        }
    }

    /// Adds samples and returns every full window now due.
    ///
    /// Sequence numbers are consecutive starting at zero; a window's
    /// trailing `overlap_samples` are retained as the head of the
    /// next one.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioChunk> {
        self.buffer.extend_from_slice(samples);

        let mut chunks = Vec::new();
        while self.buffer.len() >= self.window_samples {
            let window = self.buffer[..self.window_samples].to_vec();
            chunks.push(self.build_chunk(window, 0, false));
            self.buffer.drain(..self.cadence_samples);
            self.buffer_start += self.cadence_samples as u64;
        }
        chunks
    }

    /// Flushes the remainder at end of stream.
    ///
    /// Returns a zero-padded final chunk when real samples beyond the
    /// carried overlap are left, and nothing when the stream ended
    /// exactly on a window boundary.
    pub fn finish(&mut self) -> Option<AudioChunk> {
        let carried = if self.next_sequence == 0 {
            0
        } else {
            self.overlap_samples
        };
        if self.buffer.len() <= carried {
            self.buffer.clear();
            return None;
        }

        let mut samples = std::mem::take(&mut self.buffer);
        let padded = self.window_samples - samples.len();
        samples.resize(self.window_samples, 0.0);
        Some(self.build_chunk(samples, padded, true))
    }

    fn build_chunk(&mut self, samples: Vec<f32>, padded: usize, is_final: bool) -> AudioChunk {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let rate = self.sample_rate as f64;
        let real = self.window_samples - padded;
        let start_time = self.buffer_start as f64 / rate;
        let end_time = (self.buffer_start + real as u64) as f64 / rate;
        let overlap_with_previous = if sequence == 0 {
            0.0
        } else {
            self.overlap_samples as f64 / rate
        };

        // Padding would dilute the measurement, so energy covers the
        // real span only.
        let energy = rms(&samples[..real]);

        AudioChunk {
            sequence,
            samples,
            sample_rate: self.sample_rate,
            start_time,
            end_time,
            overlap_with_previous,
            energy,
            is_silence: energy < self.min_energy,
            is_final,
            padded_samples: padded,
        }
    }
}

/// Station wrapper between the preprocessor and the engine.
pub struct SchedulerStation {
    scheduler: ChunkScheduler,
    counters: Arc<SessionCounters>,
}

impl SchedulerStation {
    pub fn new(scheduler: ChunkScheduler, counters: Arc<SessionCounters>) -> Self {
        Self {
            scheduler,
            counters,
        }
    }
}

impl Station for SchedulerStation {
    type Input = PreprocessedFrame;
    type Output = AudioChunk;

    fn process(&mut self, input: PreprocessedFrame) -> Result<Vec<AudioChunk>, StationError> {
        let chunks = self.scheduler.push(&input.samples);
        for chunk in &chunks {
            self.counters.record_chunk(chunk.is_silence);
        }
        Ok(chunks)
    }

    fn flush(&mut self) -> Result<Vec<AudioChunk>, StationError> {
        match self.scheduler.finish() {
            Some(chunk) => {
                self.counters.record_chunk(chunk.is_silence);
                Ok(vec![chunk])
            }
            None => Ok(Vec::new()),
        }
    }

    fn name(&self) -> &'static str {
        "Scheduler"
    }
}
