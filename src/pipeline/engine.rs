//! Inference dispatch with timeout and failure-streak tracking.
//!
//! A single worker thread owns the transcriber, so at most one chunk
//! is ever being inferred. The station side enforces a per-chunk
//! timeout: a late reply degrades that chunk to an empty result and
//! the stream moves on. Three consecutive failures mean the engine is
//! not coming back and the whole pipeline shuts down.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::defaults;
use crate::error::{EdgescribeError, InferenceError};
use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::stats::SessionCounters;
use crate::pipeline::types::{AudioChunk, TranscriptResult};
use crate::stt::transcriber::Transcriber;

/// Strips non-speech annotations from decoder output.
///
/// Whisper-style decoders wrap annotations in `[…]`, `(…)` or `*…*`;
/// these never contain real speech. Unmatched opening delimiters are
/// kept as-is.
pub fn strip_annotations(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            '[' | '(' | '*' => {
                let close = match ch {
                    '[' => ']',
                    '(' => ')',
                    '*' => '*',
                    _ => unreachable!(),
                };
                chars.next();
                let mut skipped = String::new();
                let mut found_close = false;
                while let Some(&inner) = chars.peek() {
                    if inner == close {
                        chars.next();
                        found_close = true;
                        break;
                    }
                    skipped.push(inner);
                    chars.next();
                }
                if !found_close {
                    // Unmatched opener, keep the original characters
                    result.push(ch);
                    result.push_str(&skipped);
                }
            }
            _ => {
                result.push(ch);
                chars.next();
            }
        }
    }

    // Collapse runs of spaces left behind by removed annotations
    let mut prev_space = false;
    let collapsed: String = result
        .chars()
        .filter(|&c| {
            if c == ' ' {
                if prev_space {
                    return false;
                }
                prev_space = true;
            } else {
                prev_space = false;
            }
            true
        })
        .collect();
    collapsed.trim().to_string()
}

struct WorkRequest {
    sequence: u64,
    samples: Vec<f32>,
}

struct WorkReply {
    sequence: u64,
    outcome: std::result::Result<String, String>,
    took: Duration,
}

fn run_worker(
    transcriber: Arc<dyn Transcriber>,
    request_rx: Receiver<WorkRequest>,
    reply_tx: Sender<WorkReply>,
) {
    while let Ok(request) = request_rx.recv() {
        let started = Instant::now();
        let outcome = transcriber
            .transcribe(&request.samples)
            .map_err(|e| e.to_string());
        let reply = WorkReply {
            sequence: request.sequence,
            outcome,
            took: started.elapsed(),
        };
        if reply_tx.send(reply).is_err() {
            break;
        }
    }
}

enum ChunkFailure {
    Timeout { timeout_ms: u64 },
    WorkerBusy,
    Inference { message: String },
}

/// Station that turns audio chunks into transcript results.
pub struct EngineStation {
    request_tx: Option<Sender<WorkRequest>>,
    reply_rx: Receiver<WorkReply>,
    worker: Option<JoinHandle<()>>,
    timeout: Duration,
    skip_silence: bool,
    min_words: usize,
    max_failures: u32,
    consecutive_failures: u32,
    /// Sequence of a request whose reply never arrived in time.
    outstanding: Option<u64>,
    counters: Arc<SessionCounters>,
}

impl EngineStation {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        timeout: Duration,
        counters: Arc<SessionCounters>,
    ) -> Self {
        let (request_tx, request_rx) = bounded(1);
        let (reply_tx, reply_rx) = bounded(2);
        let worker = thread::spawn(move || run_worker(transcriber, request_rx, reply_tx));

        Self {
            request_tx: Some(request_tx),
            reply_rx,
            worker: Some(worker),
            timeout,
            skip_silence: true,
            min_words: defaults::MIN_WORDS,
            max_failures: defaults::MAX_CONSECUTIVE_FAILURES,
            consecutive_failures: 0,
            outstanding: None,
            counters,
        }
    }

    /// Whether chunks flagged silent bypass inference (on by default).
    pub fn with_skip_silence(mut self, skip: bool) -> Self {
        self.skip_silence = skip;
        self
    }

    /// Results with fewer words than this are treated as decoder
    /// noise and emptied. Zero disables the filter.
    pub fn with_min_words(mut self, min_words: usize) -> Self {
        self.min_words = min_words;
        self
    }

    /// Discards late replies from calls that already timed out.
    fn drain_stale_replies(&mut self) {
        while let Ok(reply) = self.reply_rx.try_recv() {
            if Some(reply.sequence) == self.outstanding {
                self.outstanding = None;
            }
        }
    }

    fn record_failure(
        &mut self,
        chunk: &AudioChunk,
        failure: ChunkFailure,
    ) -> Result<Vec<TranscriptResult>, StationError> {
        self.consecutive_failures += 1;
        self.counters.record_degraded_chunk();

        match failure {
            ChunkFailure::Timeout { timeout_ms } => {
                let error = InferenceError::Timeout {
                    sequence: chunk.sequence,
                    timeout_ms,
                };
                eprintln!("Warning: {}; emitting empty result", error);
            }
            ChunkFailure::WorkerBusy => {
                eprintln!(
                    "Warning: inference still busy with an earlier chunk; chunk {} degraded",
                    chunk.sequence
                );
            }
            ChunkFailure::Inference { message } => {
                eprintln!(
                    "Warning: inference failed on chunk {}: {}",
                    chunk.sequence, message
                );
            }
        }

        if self.consecutive_failures >= self.max_failures {
            let error = InferenceError::EngineUnavailable {
                failures: self.consecutive_failures,
            };
            return Err(StationError::Fatal(error.into()));
        }
        Ok(vec![TranscriptResult::degraded(chunk)])
    }

    fn finish_success(&mut self, chunk: &AudioChunk, raw: String, took: Duration) -> TranscriptResult {
        self.consecutive_failures = 0;
        self.counters.record_inference(took);

        let text = strip_annotations(&raw);
        let text = if self.min_words > 0 && text.split_whitespace().count() < self.min_words {
            String::new()
        } else {
            text
        };
        TranscriptResult::from_text(chunk, text)
    }
}

impl Station for EngineStation {
    type Input = AudioChunk;
    type Output = TranscriptResult;

    fn process(&mut self, chunk: AudioChunk) -> Result<Vec<TranscriptResult>, StationError> {
        // Silence never reaches the model and never touches the
        // failure streak.
        if chunk.is_silence && self.skip_silence {
            return Ok(vec![TranscriptResult::silent(&chunk)]);
        }

        self.drain_stale_replies();
        if self.outstanding.is_some() {
            // The worker is still stuck on a chunk that already timed
            // out; this one cannot be inferred in order.
            return self.record_failure(&chunk, ChunkFailure::WorkerBusy);
        }

        let request = WorkRequest {
            sequence: chunk.sequence,
            samples: chunk.samples.clone(),
        };
        let Some(request_tx) = self.request_tx.as_ref() else {
            return Err(StationError::Fatal(EdgescribeError::Transcription {
                message: "inference worker already shut down".to_string(),
            }));
        };
        if request_tx.send(request).is_err() {
            return Err(StationError::Fatal(EdgescribeError::Transcription {
                message: "inference worker thread died".to_string(),
            }));
        }

        match self.reply_rx.recv_timeout(self.timeout) {
            Ok(reply) => {
                debug_assert_eq!(reply.sequence, chunk.sequence);
                match reply.outcome {
                    Ok(raw) => Ok(vec![self.finish_success(&chunk, raw, reply.took)]),
                    Err(message) => {
                        self.record_failure(&chunk, ChunkFailure::Inference { message })
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                self.outstanding = Some(chunk.sequence);
                let timeout_ms = self.timeout.as_millis() as u64;
                self.record_failure(&chunk, ChunkFailure::Timeout { timeout_ms })
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(StationError::Fatal(EdgescribeError::Transcription {
                    message: "inference worker thread died".to_string(),
                }))
            }
        }
    }

    fn name(&self) -> &'static str {
        "Engine"
    }

    fn shutdown(&mut self) {
        // Closing the request channel ends the worker loop.
        self.request_tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.is_finished() {
                let _ = worker.join();
            }
            // A worker stuck mid-inference is detached; it exits on
            // its own once the call returns.
        }
    }
}

impl Drop for EngineStation {
    fn drop(&mut self) {
        self.shutdown();
    }
}
