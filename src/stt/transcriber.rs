//! The transcription seam between the pipeline and a speech model.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{EdgescribeError, Result};

/// A speech-to-text engine.
///
/// The pipeline only ever talks to this trait, so sessions run the
/// same against a loaded Whisper model or a scripted mock.
pub trait Transcriber: Send + Sync {
    /// Turns normalized mono 16 kHz samples into raw transcript text.
    fn transcribe(&self, audio: &[f32]) -> Result<String>;

    /// Name of the loaded model, for diagnostics.
    fn model_name(&self) -> &str;

    /// Whether the engine can take work right now.
    fn is_ready(&self) -> bool;

    /// Chunk window this engine was loaded for, if it insists on one.
    ///
    /// The pipeline refuses to start when the configured window
    /// disagrees with this value.
    fn required_window(&self) -> Option<Duration> {
        None
    }
}

impl<T: Transcriber + ?Sized> Transcriber for Arc<T> {
    fn transcribe(&self, audio: &[f32]) -> Result<String> {
        (**self).transcribe(audio)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn required_window(&self) -> Option<Duration> {
        (**self).required_window()
    }
}

/// Scriptable engine stand-in.
///
/// Answers every call with one fixed outcome unless individual calls
/// were queued up front with [`queue_response`](Self::queue_response) /
/// [`queue_failure`](Self::queue_failure); queued entries win until
/// they run out.
#[derive(Debug)]
pub struct MockTranscriber {
    model_name: String,
    /// The fixed outcome used once the queue is empty.
    outcome: std::result::Result<String, String>,
    delay: Option<Duration>,
    required_window: Option<Duration>,
    queue: Mutex<VecDeque<std::result::Result<String, String>>>,
    calls: AtomicUsize,
}

impl MockTranscriber {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            outcome: Ok("mock transcription".to_string()),
            delay: None,
            required_window: None,
            queue: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fixed text every unscripted call returns.
    pub fn with_response(mut self, response: &str) -> Self {
        self.outcome = Ok(response.to_string());
        self
    }

    /// Makes every unscripted call fail.
    pub fn with_failure(mut self) -> Self {
        self.outcome = Err("mock transcription failure".to_string());
        self
    }

    /// Sleeps this long inside every call, to provoke timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Window the mock claims its model was loaded for.
    pub fn with_required_window(mut self, window: Duration) -> Self {
        self.required_window = Some(window);
        self
    }

    /// Scripts the next unanswered call to succeed with `response`.
    pub fn queue_response(&self, response: &str) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(Ok(response.to_string()));
        }
    }

    /// Scripts the next unanswered call to fail with `message`.
    pub fn queue_failure(&self, message: &str) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(Err(message.to_string()));
        }
    }

    /// How many times `transcribe` ran, timeouts included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&self, _audio: &[f32]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let scripted = self.queue.lock().ok().and_then(|mut queue| queue.pop_front());
        scripted
            .unwrap_or_else(|| self.outcome.clone())
            .map_err(|message| EdgescribeError::Transcription { message })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        self.outcome.is_ok()
    }

    fn required_window(&self) -> Option<Duration> {
        self.required_window
    }
}
