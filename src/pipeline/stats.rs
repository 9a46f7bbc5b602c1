//! Session counters and end-of-run reporting.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::defaults;

/// Counters shared across pipeline stations.
///
/// All counters only ever go up. Updates use relaxed ordering; the
/// report is a best-effort snapshot, not a transaction.
#[derive(Debug, Default)]
pub struct SessionCounters {
    frames_captured: AtomicU64,
    frames_dropped: AtomicU64,
    capture_timeouts: AtomicU64,
    clipped_samples: AtomicU64,
    audio_samples: AtomicU64,
    chunks_emitted: AtomicU64,
    silence_chunks: AtomicU64,
    degraded_chunks: AtomicU64,
    repeated_chunks: AtomicU64,
    inference_calls: AtomicU64,
    inference_ms: AtomicU64,
    words_emitted: AtomicU64,
    duplication_warnings: AtomicU64,
    gap_warnings: AtomicU64,
}

impl SessionCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_frame(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    /// Record frames evicted from the capture ring on overrun.
    pub fn record_dropped_frames(&self, count: u64) {
        self.frames_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_capture_timeout(&self) {
        self.capture_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clipped_samples(&self, count: u64) {
        self.clipped_samples.fetch_add(count, Ordering::Relaxed);
    }

    /// Record mono samples that made it through preprocessing.
    pub fn record_audio_samples(&self, count: u64) {
        self.audio_samples.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_chunk(&self, is_silence: bool) {
        self.chunks_emitted.fetch_add(1, Ordering::Relaxed);
        if is_silence {
            self.silence_chunks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_degraded_chunk(&self) {
        self.degraded_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_repeated_chunk(&self) {
        self.repeated_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inference(&self, took: Duration) {
        self.inference_calls.fetch_add(1, Ordering::Relaxed);
        self.inference_ms
            .fetch_add(took.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_words(&self, count: u64) {
        self.words_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_duplication_warning(&self) {
        self.duplication_warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gap_warning(&self) {
        self.gap_warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn capture_timeouts(&self) -> u64 {
        self.capture_timeouts.load(Ordering::Relaxed)
    }

    pub fn clipped_samples(&self) -> u64 {
        self.clipped_samples.load(Ordering::Relaxed)
    }

    pub fn audio_samples(&self) -> u64 {
        self.audio_samples.load(Ordering::Relaxed)
    }

    pub fn chunks_emitted(&self) -> u64 {
        self.chunks_emitted.load(Ordering::Relaxed)
    }

    pub fn silence_chunks(&self) -> u64 {
        self.silence_chunks.load(Ordering::Relaxed)
    }

    pub fn degraded_chunks(&self) -> u64 {
        self.degraded_chunks.load(Ordering::Relaxed)
    }

    pub fn repeated_chunks(&self) -> u64 {
        self.repeated_chunks.load(Ordering::Relaxed)
    }

    pub fn inference_calls(&self) -> u64 {
        self.inference_calls.load(Ordering::Relaxed)
    }

    pub fn words_emitted(&self) -> u64 {
        self.words_emitted.load(Ordering::Relaxed)
    }

    pub fn duplication_warnings(&self) -> u64 {
        self.duplication_warnings.load(Ordering::Relaxed)
    }

    pub fn gap_warnings(&self) -> u64 {
        self.gap_warnings.load(Ordering::Relaxed)
    }
}

/// Tracks one pipeline run from start to report.
pub struct SessionStats {
    counters: Arc<SessionCounters>,
    started: Instant,
}

impl SessionStats {
    /// Starts the session clock now.
    pub fn new(counters: Arc<SessionCounters>) -> Self {
        Self {
            counters,
            started: Instant::now(),
        }
    }

    pub fn counters(&self) -> Arc<SessionCounters> {
        Arc::clone(&self.counters)
    }

    /// Builds a report against the wall clock elapsed so far.
    pub fn report(&self) -> SessionReport {
        self.report_after(self.started.elapsed())
    }

    /// Builds a report for an explicit wall-clock duration.
    pub fn report_after(&self, wall_clock: Duration) -> SessionReport {
        let c = &self.counters;

        let audio_secs = c.audio_samples() as f64 / defaults::TARGET_SAMPLE_RATE as f64;
        let wall_clock_secs = wall_clock.as_secs_f64();
        let speed_factor = if wall_clock_secs > 0.0 {
            audio_secs / wall_clock_secs
        } else {
            0.0
        };
        let inference_calls = c.inference_calls();
        let avg_inference_secs = if inference_calls > 0 {
            (c.inference_ms.load(Ordering::Relaxed) as f64 / 1000.0) / inference_calls as f64
        } else {
            0.0
        };

        SessionReport {
            wall_clock_secs,
            audio_secs,
            speed_factor,
            frames_captured: c.frames_captured(),
            frames_dropped: c.frames_dropped(),
            capture_timeouts: c.capture_timeouts(),
            clipped_samples: c.clipped_samples(),
            chunks_emitted: c.chunks_emitted(),
            silence_chunks: c.silence_chunks(),
            degraded_chunks: c.degraded_chunks(),
            repeated_chunks: c.repeated_chunks(),
            inference_calls,
            avg_inference_secs,
            words_emitted: c.words_emitted(),
            duplication_warnings: c.duplication_warnings(),
            gap_warnings: c.gap_warnings(),
        }
    }
}

/// Snapshot of a session, ready to print or serialize.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub wall_clock_secs: f64,
    pub audio_secs: f64,
    /// Seconds of audio processed per wall-clock second. Above 1.0 the
    /// pipeline keeps up with real time.
    pub speed_factor: f64,
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub capture_timeouts: u64,
    pub clipped_samples: u64,
    pub chunks_emitted: u64,
    pub silence_chunks: u64,
    pub degraded_chunks: u64,
    pub repeated_chunks: u64,
    pub inference_calls: u64,
    pub avg_inference_secs: f64,
    pub words_emitted: u64,
    pub duplication_warnings: u64,
    pub gap_warnings: u64,
}

impl SessionReport {
    /// Prints a user-friendly summary of session performance.
    pub fn print_summary(&self) {
        eprintln!();
        eprintln!("=== Session Summary ===");
        eprintln!(
            "Processed {} of audio in {} wall clock ({:.1}x real-time)",
            format_duration(Duration::from_secs_f64(self.audio_secs)),
            format_duration(Duration::from_secs_f64(self.wall_clock_secs)),
            self.speed_factor
        );
        eprintln!();
        eprintln!(
            "  Chunks:       {} ({} silent, {} degraded, {} repeated)",
            self.chunks_emitted, self.silence_chunks, self.degraded_chunks, self.repeated_chunks
        );
        eprintln!(
            "  Inference:    {} call{}, avg {}",
            self.inference_calls,
            if self.inference_calls == 1 { "" } else { "s" },
            format_duration(Duration::from_secs_f64(self.avg_inference_secs))
        );
        eprintln!("  Words:        {}", self.words_emitted);
        eprintln!(
            "  Capture:      {} frames, {} dropped, {} timeouts",
            self.frames_captured, self.frames_dropped, self.capture_timeouts
        );
        if self.clipped_samples > 0 {
            eprintln!(
                "  Clipping:     {} samples hard-limited",
                self.clipped_samples
            );
        }
        if self.duplication_warnings > 0 || self.gap_warnings > 0 {
            eprintln!(
                "  Warnings:     {} possible duplication, {} sequence gaps",
                self.duplication_warnings, self.gap_warnings
            );
        }
    }

    /// Serializes the report as pretty JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Formats a duration as a human-friendly string.
/// Under 1s: "450ms", at or above 1s: "1.5s".
fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}
