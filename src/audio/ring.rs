//! Bounded capture ring between the audio device and the pipeline.
//!
//! A dedicated thread reads the source and pushes frames into a
//! bounded channel. When the consumer falls behind and the channel
//! fills up, the oldest frame is evicted to make room, so the
//! device-facing side never blocks. Lost frames are counted, never
//! silently ignored.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::source::{AudioSource, ReadOutcome, SourceSpec};
use crate::defaults;
use crate::error::{CaptureError, Result};
use crate::pipeline::stats::SessionCounters;
use crate::pipeline::types::AudioFrame;

/// Configuration for the capture ring.
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Maximum number of frames held in the ring.
    pub capacity: usize,
    /// Target duration of a single frame in milliseconds.
    pub frame_ms: u64,
    /// How long a single source read may block.
    pub read_timeout: Duration,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: (defaults::CAPTURE_BUFFER_SECS * 1000.0 / defaults::FRAME_MS as f64) as usize,
            frame_ms: defaults::FRAME_MS,
            read_timeout: defaults::CAPTURE_READ_TIMEOUT,
        }
    }
}

/// What a `pull` from the ring produced.
#[derive(Debug)]
pub enum CaptureEvent {
    /// The oldest buffered frame.
    Frame(AudioFrame),
    /// Nothing arrived within the timeout. The capture is still alive.
    NoData,
    /// The capture thread has ended and the ring is drained.
    Closed,
}

/// Continuously captures audio into a bounded ring of frames.
pub struct RingCapture {
    rx: Receiver<AudioFrame>,
    fatal: Arc<Mutex<Option<CaptureError>>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    spec: SourceSpec,
}

impl RingCapture {
    /// Opens the source and starts the capture thread.
    ///
    /// Fails fast when the source cannot be opened; no thread is
    /// spawned in that case.
    pub fn start(
        mut source: Box<dyn AudioSource>,
        config: RingConfig,
        counters: Arc<SessionCounters>,
    ) -> Result<Self> {
        source.open()?;
        let spec = source.spec();

        let frames_per_read =
            ((spec.sample_rate as u64 * config.frame_ms) / 1000).max(1) as usize;
        let read_timeout = config.read_timeout;

        let (tx, rx) = bounded(config.capacity.max(1));
        // The capture thread holds its own receiver to evict the
        // oldest frame when the ring is full.
        let evict_rx = rx.clone();

        let fatal: Arc<Mutex<Option<CaptureError>>> = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));

        let thread_fatal = Arc::clone(&fatal);
        let thread_running = Arc::clone(&running);

        let thread = thread::spawn(move || {
            let mut sequence: u64 = 0;
            let mut warned_overrun = false;

            while thread_running.load(Ordering::SeqCst) {
                match source.read(frames_per_read, read_timeout) {
                    Ok(ReadOutcome::Samples(samples)) if !samples.is_empty() => {
                        let frame =
                            AudioFrame::new(samples, spec.channels, spec.sample_rate, sequence);
                        sequence += 1;
                        counters.record_frame();

                        if !push_drop_oldest(&tx, &evict_rx, frame, &counters, &mut warned_overrun)
                        {
                            // Consumer side is gone
                            break;
                        }
                    }
                    Ok(ReadOutcome::Samples(_)) => {
                        // Empty read, try again
                    }
                    Ok(ReadOutcome::TimedOut) => {
                        counters.record_capture_timeout();
                    }
                    Ok(ReadOutcome::EndOfStream) => break,
                    Err(error) => {
                        if let Ok(mut slot) = thread_fatal.lock() {
                            *slot = Some(error);
                        }
                        break;
                    }
                }
            }

            source.close();
            // Dropping tx here disconnects the ring once it drains.
        });

        Ok(Self {
            rx,
            fatal,
            running,
            thread: Some(thread),
            spec,
        })
    }

    /// Takes the oldest buffered frame, waiting up to `timeout`.
    ///
    /// Buffered frames are always delivered before a capture failure
    /// is surfaced; a fatal error is returned once, after which the
    /// ring reads as closed.
    pub fn pull(&self, timeout: Duration) -> std::result::Result<CaptureEvent, CaptureError> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(CaptureEvent::Frame(frame)),
            Err(RecvTimeoutError::Timeout) => {
                if let Ok(mut slot) = self.fatal.lock()
                    && let Some(error) = slot.take()
                {
                    return Err(error);
                }
                Ok(CaptureEvent::NoData)
            }
            Err(RecvTimeoutError::Disconnected) => {
                if let Ok(mut slot) = self.fatal.lock()
                    && let Some(error) = slot.take()
                {
                    return Err(error);
                }
                Ok(CaptureEvent::Closed)
            }
        }
    }

    /// Stream parameters of the wrapped source.
    pub fn spec(&self) -> SourceSpec {
        self.spec
    }

    /// True while the capture thread is alive.
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Asks the capture thread to stop and waits for it.
    ///
    /// Blocks for at most one read timeout. Frames already buffered
    /// stay pullable until the ring reads as closed.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for RingCapture {
    fn drop(&mut self) {
        // Signal without joining so drop never blocks; the thread
        // exits on its next read.
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Pushes a frame, evicting the oldest one when the ring is full.
///
/// Returns false when the consumer side has disconnected.
fn push_drop_oldest(
    tx: &Sender<AudioFrame>,
    evict_rx: &Receiver<AudioFrame>,
    frame: AudioFrame,
    counters: &SessionCounters,
    warned_overrun: &mut bool,
) -> bool {
    let mut frame = frame;
    loop {
        match tx.try_send(frame) {
            Ok(()) => return true,
            Err(TrySendError::Full(returned)) => {
                frame = returned;
                // Either we evict the oldest frame or the consumer
                // drained one in the meantime; both free a slot.
                if evict_rx.try_recv().is_ok() {
                    counters.record_dropped_frames(1);
                    if !*warned_overrun {
                        *warned_overrun = true;
                        let overrun = CaptureError::Overrun {
                            dropped: counters.frames_dropped(),
                        };
                        eprintln!("Warning: {}", overrun);
                    }
                }
            }
            Err(TrySendError::Disconnected(_)) => return false,
        }
    }
}
