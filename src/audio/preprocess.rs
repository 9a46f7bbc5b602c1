//! Frame preprocessing: mix-down, resampling, gain and the energy gate.
//!
//! Every captured frame goes through the same fixed chain: average all
//! channels into one, resample to the model rate, apply gain with a
//! hard clip, then measure RMS energy against the silence threshold.
//! The gate only annotates frames; no audio is ever discarded here.

use std::sync::Arc;

use crate::audio::source::SourceSpec;
use crate::defaults;
use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::stats::SessionCounters;
use crate::pipeline::types::{AudioFrame, PreprocessedFrame};

/// Streaming linear-interpolation resampler.
///
/// Unlike a one-shot conversion, this carries its fractional read
/// position and the last input sample across calls, so the total
/// output length over a whole stream stays within one sample of
/// `input_len * to_rate / from_rate` no matter how the input is
/// split into frames.
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    /// Input samples advanced per output sample.
    step: f64,
    /// Position of the next output sample in input-sample units,
    /// relative to the start of the next `process` call. Negative
    /// values fall between the carried tail and the first new sample.
    src_pos: f64,
    /// Last input sample of the previous call.
    tail: Option<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate,
            to_rate,
            step: from_rate as f64 / to_rate as f64,
            src_pos: 0.0,
            tail: None,
        }
    }

    /// Resamples one frame, holding back outputs that need samples
    /// from the next frame.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.from_rate == self.to_rate {
            return input.to_vec();
        }
        if input.is_empty() {
            return Vec::new();
        }

        let expected = (input.len() as f64 / self.step) as usize + 2;
        let mut output = Vec::with_capacity(expected);
        let last = input.len() as f64 - 1.0;

        while self.src_pos <= last {
            let sample = if self.src_pos < 0.0 {
                // Between the previous frame's last sample and input[0]
                let tail = self.tail.unwrap_or(input[0]);
                let fraction = (self.src_pos + 1.0) as f32;
                tail + (input[0] - tail) * fraction
            } else {
                let index = self.src_pos.floor() as usize;
                let fraction = (self.src_pos - index as f64) as f32;
                if index + 1 < input.len() {
                    input[index] + (input[index + 1] - input[index]) * fraction
                } else {
                    input[index]
                }
            };
            output.push(sample);
            self.src_pos += self.step;
        }

        // Keep the position relative to the next frame so it never
        // grows over a long session.
        self.src_pos -= input.len() as f64;
        self.tail = input.last().copied();

        output
    }

    /// Emits the outputs still owed at end of stream by holding the
    /// last input sample.
    pub fn flush(&mut self) -> Vec<f32> {
        let mut output = Vec::new();
        if self.from_rate == self.to_rate {
            return output;
        }
        if let Some(tail) = self.tail.take() {
            while self.src_pos < 0.0 {
                output.push(tail);
                self.src_pos += self.step;
            }
        }
        self.src_pos = 0.0;
        output
    }
}

/// Root-mean-square energy of a sample block.
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt()
}

/// Converts raw capture frames into gated mono 16 kHz float audio.
pub struct Preprocessor {
    channels: u16,
    gain: f32,
    min_energy: f64,
    resampler: LinearResampler,
}

impl Preprocessor {
    pub fn new(spec: SourceSpec, gain: f64, min_energy: f64) -> Self {
        Self {
            channels: spec.channels,
            gain: gain as f32,
            min_energy,
            resampler: LinearResampler::new(spec.sample_rate, defaults::TARGET_SAMPLE_RATE),
        }
    }

    /// Runs one frame through the full chain.
    pub fn process(&mut self, frame: &AudioFrame) -> PreprocessedFrame {
        let channels = if frame.channels >= 1 {
            frame.channels
        } else {
            self.channels.max(1)
        };
        let mono = mix_down(&frame.samples, channels);
        let resampled = self.resampler.process(&mono);
        self.finish_block(resampled)
    }

    /// Drains the resampler at end of stream.
    pub fn flush(&mut self) -> Option<PreprocessedFrame> {
        let held = self.resampler.flush();
        if held.is_empty() {
            return None;
        }
        Some(self.finish_block(held))
    }

    /// Gain, hard clip and the energy gate. Shared by `process` and
    /// `flush` so held-back samples get the same treatment.
    fn finish_block(&self, mut samples: Vec<f32>) -> PreprocessedFrame {
        let mut clipped = 0usize;
        for sample in samples.iter_mut() {
            let amplified = *sample * self.gain;
            if amplified > 1.0 {
                *sample = 1.0;
                clipped += 1;
            } else if amplified < -1.0 {
                *sample = -1.0;
                clipped += 1;
            } else {
                *sample = amplified;
            }
        }

        let energy = rms(&samples);
        PreprocessedFrame {
            samples,
            energy,
            is_silence: energy < self.min_energy,
            clipped,
        }
    }
}

/// Averages all channels into mono normalized floats.
///
/// Summing in i32 cannot overflow for any real channel count; the
/// clamp is applied to the mixed value, never per channel. A stream
/// truncated mid-frame gets its last partial frame averaged over the
/// channels actually present.
fn mix_down(samples: &[i16], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.iter().map(|&s| s as f32 / 32768.0).collect();
    }

    samples
        .chunks(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            let mixed = sum as f32 / frame.len() as f32 / 32768.0;
            mixed.clamp(-1.0, 1.0)
        })
        .collect()
}

/// Station wrapper feeding the chunk scheduler.
pub struct PreprocessStation {
    inner: Preprocessor,
    counters: Arc<SessionCounters>,
}

impl PreprocessStation {
    pub fn new(preprocessor: Preprocessor, counters: Arc<SessionCounters>) -> Self {
        Self {
            inner: preprocessor,
            counters,
        }
    }

    fn record(&self, frame: &PreprocessedFrame) {
        self.counters.record_clipped_samples(frame.clipped as u64);
        self.counters.record_audio_samples(frame.samples.len() as u64);
    }
}

impl Station for PreprocessStation {
    type Input = AudioFrame;
    type Output = PreprocessedFrame;

    fn process(&mut self, input: AudioFrame) -> Result<Vec<PreprocessedFrame>, StationError> {
        let processed = self.inner.process(&input);
        if processed.samples.is_empty() {
            // The resampler is still waiting for more input
            return Ok(Vec::new());
        }
        self.record(&processed);
        Ok(vec![processed])
    }

    fn flush(&mut self) -> Result<Vec<PreprocessedFrame>, StationError> {
        match self.inner.flush() {
            Some(frame) => {
                self.record(&frame);
                Ok(vec![frame])
            }
            None => Ok(Vec::new()),
        }
    }

    fn name(&self) -> &'static str {
        "Preprocess"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(sample_rate: u32, channels: u16) -> SourceSpec {
        SourceSpec {
            sample_rate,
            channels,
        }
    }

    fn frame(samples: Vec<i16>, channels: u16, sample_rate: u32) -> AudioFrame {
        AudioFrame::new(samples, channels, sample_rate, 0)
    }

    fn sine_f32(frequency: f64, amplitude: f32, sample_rate: u32, count: usize) -> Vec<f32> {
        (0..count)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin() as f32
            })
            .collect()
    }

    #[test]
    fn test_mix_down_averages_all_channels() {
        let mono = mix_down(&[300, 600, 900], 3);
        assert_eq!(mono.len(), 1);
        let expected = 600.0 / 32768.0;
        assert!((mono[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_mix_down_stereo_cancels_opposites() {
        let mono = mix_down(&[-1000, 1000, 500, 500], 2);
        assert_eq!(mono.len(), 2);
        assert!(mono[0].abs() < 1e-6);
        assert!((mono[1] - 500.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_mix_down_mono_passthrough() {
        let mono = mix_down(&[100, -200, 300], 1);
        assert_eq!(mono.len(), 3);
        assert!((mono[1] - (-200.0 / 32768.0)).abs() < 1e-6);
    }

    #[test]
    fn test_mix_down_extremes_stay_in_range() {
        let mono = mix_down(&[i16::MIN, i16::MIN, i16::MAX, i16::MAX], 2);
        assert!(mono.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_mix_down_keeps_a_trailing_partial_frame() {
        // A truncated stereo stream can end mid-frame; the lone left
        // sample is averaged over the channels actually present.
        let mono = mix_down(&[400, 800, 1000], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 600.0 / 32768.0).abs() < 1e-6);
        assert!((mono[1] - 1000.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_resampler_identity_is_passthrough() {
        let mut resampler = LinearResampler::new(16_000, 16_000);
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resampler.process(&input), input);
        assert!(resampler.flush().is_empty());
    }

    #[test]
    fn test_resampler_48k_to_16k_total_length() {
        let mut resampler = LinearResampler::new(48_000, 16_000);
        let mut total = 0usize;
        // One second of input split into 100ms frames
        for _ in 0..10 {
            let block = vec![0.25_f32; 4800];
            total += resampler.process(&block).len();
        }
        total += resampler.flush().len();
        assert_eq!(total, 16_000);
    }

    #[test]
    fn test_resampler_cumulative_length_is_frame_split_independent() {
        // Same input delivered in uneven pieces must produce the same
        // total output length.
        let input: Vec<f32> = sine_f32(440.0, 0.5, 48_000, 48_000);

        let mut whole = LinearResampler::new(48_000, 16_000);
        let mut whole_total = whole.process(&input).len();
        whole_total += whole.flush().len();

        let mut pieces = LinearResampler::new(48_000, 16_000);
        let mut pieces_total = 0usize;
        for chunk in input.chunks(977) {
            pieces_total += pieces.process(chunk).len();
        }
        pieces_total += pieces.flush().len();

        assert_eq!(whole_total, pieces_total);
        assert_eq!(whole_total, 16_000);
    }

    #[test]
    fn test_resampler_odd_ratio_length_within_one_sample() {
        let mut resampler = LinearResampler::new(44_100, 16_000);
        let input = vec![0.1_f32; 44_100];
        let mut total = resampler.process(&input).len();
        total += resampler.flush().len();
        let ideal = 16_000i64;
        assert!((total as i64 - ideal).abs() <= 1, "total was {}", total);
    }

    #[test]
    fn test_resampler_flush_emits_held_samples() {
        // 1001 samples at 44.1kHz leave exactly one output pending
        // past the final input sample.
        let mut resampler = LinearResampler::new(44_100, 16_000);
        let emitted = resampler.process(&vec![0.5_f32; 1001]).len();
        let flushed = resampler.flush().len();
        assert_eq!(emitted + flushed, 364);
        assert_eq!(flushed, 1);
    }

    #[test]
    fn test_resampler_sine_round_trip_preserves_rms() {
        let original = sine_f32(440.0, 0.5, 48_000, 48_000);
        let source_rms = rms(&original);

        let mut down = LinearResampler::new(48_000, 16_000);
        let mut reduced = down.process(&original);
        reduced.extend(down.flush());

        let mut up = LinearResampler::new(16_000, 48_000);
        let mut restored = up.process(&reduced);
        restored.extend(up.flush());

        assert!((restored.len() as i64 - 48_000).abs() <= 1);
        let restored_rms = rms(&restored);
        let drift = (restored_rms - source_rms).abs() / source_rms;
        assert!(drift < 0.02, "rms drifted by {:.4}", drift);
    }

    #[test]
    fn test_rms_of_known_signal() {
        // A constant signal's RMS is its magnitude
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-9);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn test_gain_applies_and_counts_clipping() {
        let mut preprocessor = Preprocessor::new(spec(16_000, 1), 4.0, 0.0);
        // 0.3 * 4 clips, 0.1 * 4 does not; -0.5 * 4 clips negative
        let samples = vec![
            (0.3_f32 * 32768.0) as i16,
            (0.1_f32 * 32768.0) as i16,
            (-0.5_f32 * 32768.0) as i16,
        ];
        let out = preprocessor.process(&frame(samples, 1, 16_000));

        assert_eq!(out.clipped, 2);
        assert!((out.samples[0] - 1.0).abs() < 1e-6);
        assert!((out.samples[1] - 0.4).abs() < 1e-2);
        assert!((out.samples[2] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_energy_gate_annotates_but_keeps_samples() {
        let mut preprocessor = Preprocessor::new(spec(16_000, 1), 1.0, 0.03);
        let quiet = vec![10_i16; 1600];
        let out = preprocessor.process(&frame(quiet, 1, 16_000));

        assert!(out.is_silence);
        assert_eq!(out.samples.len(), 1600);
        assert!(out.energy < 0.03);
    }

    #[test]
    fn test_loud_frame_passes_energy_gate() {
        let mut preprocessor = Preprocessor::new(spec(16_000, 1), 1.0, 0.03);
        let loud = vec![8000_i16; 1600];
        let out = preprocessor.process(&frame(loud, 1, 16_000));

        assert!(!out.is_silence);
        assert!(out.energy > 0.2);
    }

    #[test]
    fn test_gate_measures_energy_after_gain() {
        // Quiet at the mic but above the threshold once amplified
        let mut preprocessor = Preprocessor::new(spec(16_000, 1), 30.0, 0.03);
        let samples = vec![100_i16; 1600];
        let out = preprocessor.process(&frame(samples, 1, 16_000));

        assert!(!out.is_silence);
        let expected = 100.0 / 32768.0 * 30.0;
        assert!((out.energy - expected as f64).abs() < 1e-3);
    }

    #[test]
    fn test_full_chain_stereo_48k() {
        let mut preprocessor = Preprocessor::new(spec(48_000, 2), 1.0, 0.0);
        // 100ms of stereo at 48kHz
        let samples = vec![1000_i16; 9600];
        let out = preprocessor.process(&frame(samples, 2, 48_000));

        assert!((out.samples.len() as i64 - 1600).abs() <= 1);
        assert!(out.samples.iter().all(|s| (*s - 1000.0 / 32768.0).abs() < 1e-4));
    }

    #[test]
    fn test_preprocessor_flush_drains_resampler() {
        let mut preprocessor = Preprocessor::new(spec(44_100, 1), 1.0, 0.0);
        let out = preprocessor.process(&frame(vec![500_i16; 1001], 1, 44_100));
        assert!(!out.samples.is_empty());

        let tail = preprocessor.flush().expect("one sample still held");
        assert_eq!(tail.samples.len(), 1);
        assert!(preprocessor.flush().is_none());
    }

    #[test]
    fn test_empty_frame_produces_empty_output() {
        let mut preprocessor = Preprocessor::new(spec(48_000, 2), 1.0, 0.03);
        let out = preprocessor.process(&frame(Vec::new(), 2, 48_000));
        assert!(out.samples.is_empty());
        assert_eq!(out.energy, 0.0);
    }

    #[test]
    fn test_station_counts_clipped_and_audio_samples() {
        let counters = SessionCounters::new();
        let preprocessor = Preprocessor::new(spec(16_000, 1), 10.0, 0.0);
        let mut station = PreprocessStation::new(preprocessor, Arc::clone(&counters));

        let loud = vec![20_000_i16; 1600];
        let outputs = station.process(frame(loud, 1, 16_000)).unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(counters.clipped_samples(), 1600);
        assert_eq!(counters.audio_samples(), 1600);
    }

    #[test]
    fn test_station_absorbs_frames_with_no_output_yet() {
        let counters = SessionCounters::new();
        let preprocessor = Preprocessor::new(spec(48_000, 1), 1.0, 0.0);
        let mut station = PreprocessStation::new(preprocessor, counters);

        // The first single-sample frame yields one output; the next
        // two fall between output positions and are absorbed.
        let first = station.process(frame(vec![100], 1, 48_000)).unwrap();
        assert_eq!(first.len(), 1);
        let second = station.process(frame(vec![100], 1, 48_000)).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_station_flush_emits_tail() {
        let counters = SessionCounters::new();
        let preprocessor = Preprocessor::new(spec(44_100, 1), 1.0, 0.0);
        let mut station = PreprocessStation::new(preprocessor, Arc::clone(&counters));

        station.process(frame(vec![500_i16; 1001], 1, 44_100)).unwrap();
        let tail = station.flush().unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].samples.len(), 1);
    }
}
