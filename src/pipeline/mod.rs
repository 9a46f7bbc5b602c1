//! Streaming transcription pipeline.
//!
//! Implements a multi-station pipeline where each station runs in its own
//! thread, connected by bounded crossbeam channels for backpressure:
//!
//! ```text
//! RingCapture ─frames→ Preprocess ─mono 16kHz→ Scheduler ─chunks→
//!     Engine ─results→ Reconciler ─appends→ Sink
//! ```
//!
//! A slow stage pushes back through the channels until the capture ring
//! absorbs the overload by dropping its oldest frames.

pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod reconciler;
pub mod scheduler;
pub mod sink;
pub mod station;
pub mod stats;
pub mod types;

pub use engine::EngineStation;
pub use error::{CapturingReporter, ErrorReporter, LogReporter, StationError};
pub use orchestrator::{Pipeline, PipelineHandle, SessionOutcome};
pub use reconciler::{Clock, Reconciler, ReconcilerStation, SystemClock};
pub use scheduler::{ChunkScheduler, SchedulerStation};
pub use sink::{CollectorSink, FileSink, SinkStation, StdoutSink, TextSink};
pub use station::{Station, StationRunner};
pub use stats::{SessionCounters, SessionReport, SessionStats};
pub use types::{AudioChunk, AudioFrame, PreprocessedFrame, TranscriptAppend, TranscriptResult};
