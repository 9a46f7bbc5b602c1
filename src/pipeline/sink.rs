//! Transcript output targets.
//!
//! The pipeline ends in a `TextSink`: stdout for pipe use, a file for
//! long sessions, or an in-memory collector for library callers and
//! tests. Sinks receive the append-only reconciled stream; warnings
//! ride along and are surfaced per sink.

use crossbeam_channel::Sender;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::ReconcileWarning;
use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::stats::SessionCounters;
use crate::pipeline::types::TranscriptAppend;

/// Pluggable transcript output. Pairs with `AudioSource` on the
/// input side.
pub trait TextSink: Send + 'static {
    /// Writes one reconciled append.
    fn append(&mut self, text: &str) -> crate::Result<()>;

    /// Surfaces a reconciliation warning. Defaults to stderr.
    fn warn(&mut self, warning: &ReconcileWarning) {
        eprintln!("Warning: {}", warning);
    }

    /// Called on shutdown. Returns accumulated text if the sink
    /// keeps any.
    fn finish(&mut self) -> Option<String> {
        None
    }

    /// Name for logging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

/// Pipe mode: every append on its own stdout line.
pub struct StdoutSink;

impl TextSink for StdoutSink {
    fn append(&mut self, text: &str) -> crate::Result<()> {
        println!("{}", text);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdout"
    }
}

/// Appends the transcript to a file, flushed per append so a killed
/// session loses nothing.
pub struct FileSink {
    writer: BufWriter<std::fs::File>,
    path: PathBuf,
}

impl FileSink {
    pub fn create(path: &Path) -> crate::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TextSink for FileSink {
    fn append(&mut self, text: &str) -> crate::Result<()> {
        // Trailing space keeps consecutive appends flowing as prose
        self.writer.write_all(text.as_bytes())?;
        self.writer.write_all(b" ")?;
        self.writer.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Option<String> {
        let _ = self.writer.flush();
        None
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Accumulates the transcript in memory; `finish` hands it over.
/// Warnings are shared through a handle so tests can inspect them
/// after the pipeline owns the sink.
pub struct CollectorSink {
    transcript: String,
    warnings: Arc<Mutex<Vec<ReconcileWarning>>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self {
            transcript: String::new(),
            warnings: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn warnings_handle(&self) -> Arc<Mutex<Vec<ReconcileWarning>>> {
        Arc::clone(&self.warnings)
    }
}

impl Default for CollectorSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TextSink for CollectorSink {
    fn append(&mut self, text: &str) -> crate::Result<()> {
        if !self.transcript.is_empty() {
            self.transcript.push(' ');
        }
        self.transcript.push_str(text);
        Ok(())
    }

    fn warn(&mut self, warning: &ReconcileWarning) {
        if let Ok(mut seen) = self.warnings.lock() {
            seen.push(*warning);
        }
    }

    fn finish(&mut self) -> Option<String> {
        if self.transcript.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.transcript))
        }
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

/// Station wrapper for any `TextSink`.
pub struct SinkStation {
    sink: Box<dyn TextSink>,
    counters: Arc<SessionCounters>,
    result_tx: Option<Sender<Option<String>>>,
}

impl SinkStation {
    pub fn new(
        sink: Box<dyn TextSink>,
        counters: Arc<SessionCounters>,
        result_tx: Sender<Option<String>>,
    ) -> Self {
        Self {
            sink,
            counters,
            result_tx: Some(result_tx),
        }
    }
}

impl Station for SinkStation {
    type Input = TranscriptAppend;
    type Output = ();

    fn process(&mut self, input: TranscriptAppend) -> Result<Vec<()>, StationError> {
        if let Some(warning) = &input.warning {
            self.sink.warn(warning);
        }
        if input.text.trim().is_empty() {
            return Ok(Vec::new());
        }
        match self.sink.append(&input.text) {
            Ok(()) => {
                let words = input.text.split_whitespace().count();
                self.counters.record_words(words as u64);
                Ok(Vec::new())
            }
            Err(error) => Err(StationError::Recoverable(format!(
                "{} sink write failed: {}",
                self.sink.name(),
                error
            ))),
        }
    }

    fn name(&self) -> &'static str {
        self.sink.name()
    }

    fn shutdown(&mut self) {
        let transcript = self.sink.finish();
        let Some(tx) = self.result_tx.take() else {
            return;
        };
        if tx.send(transcript).is_err() {
            eprintln!("edgescribe: sink shutdown with no result receiver");
        }
    }
}
