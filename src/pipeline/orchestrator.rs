//! Wires the stations into a running transcription session.
//!
//! Audio flows capture ring -> preprocess -> scheduler -> engine ->
//! reconciler -> sink, each station in its own thread, connected by
//! bounded channels. Backpressure from a slow stage reaches the
//! capture ring, which absorbs it by dropping the oldest frames.

use crate::audio::preprocess::{PreprocessStation, Preprocessor};
use crate::audio::ring::{CaptureEvent, RingCapture, RingConfig};
use crate::audio::source::AudioSource;
use crate::config::Config;
use crate::defaults;
use crate::error::{EdgescribeError, InferenceError, Result};
use crate::pipeline::engine::EngineStation;
use crate::pipeline::error::{CapturingReporter, ErrorReporter};
use crate::pipeline::reconciler::{Reconciler, ReconcilerStation};
use crate::pipeline::scheduler::{ChunkScheduler, SchedulerStation};
use crate::pipeline::sink::{SinkStation, TextSink};
use crate::pipeline::station::StationRunner;
use crate::pipeline::stats::{SessionCounters, SessionReport, SessionStats};
use crate::stt::transcriber::Transcriber;
use crossbeam_channel::{Receiver, SendTimeoutError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the feed thread re-checks the stop flag while pulling
/// from the ring or pushing into a full frame channel.
const FEED_POLL: Duration = Duration::from_millis(100);

/// Builds and starts transcription sessions from a validated config.
pub struct Pipeline {
    config: Config,
    ring: RingConfig,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ring: RingConfig::default(),
        }
    }

    /// Overrides the capture ring parameters.
    pub fn with_ring_config(mut self, ring: RingConfig) -> Self {
        self.ring = ring;
        self
    }

    /// Starts a session: opens the source, spawns every station and
    /// begins streaming.
    ///
    /// Fails fast before any audio flows when the config is invalid,
    /// the engine is not ready, or the configured chunk window does
    /// not match the window the engine requires.
    pub fn start(
        self,
        source: Box<dyn AudioSource>,
        transcriber: Arc<dyn Transcriber>,
        sink: Box<dyn TextSink>,
    ) -> Result<PipelineHandle> {
        self.config.validate()?;

        if !transcriber.is_ready() {
            return Err(EdgescribeError::Transcription {
                message: format!("model '{}' is not ready", transcriber.model_name()),
            });
        }
        if let Some(required) = transcriber.required_window() {
            let configured = self.config.chunk_duration();
            if (configured - required.as_secs_f64()).abs() > 1e-9 {
                return Err(InferenceError::ModelMismatch {
                    configured_secs: configured,
                    required_secs: required.as_secs_f64(),
                }
                .into());
            }
        }

        let counters = SessionCounters::new();
        let stats = SessionStats::new(Arc::clone(&counters));
        let reporter = Arc::new(CapturingReporter::new());
        let running = Arc::new(AtomicBool::new(true));

        let capture = RingCapture::start(source, self.ring, Arc::clone(&counters))?;
        let spec = capture.spec();

        // Channels between stations
        let (frame_tx, frame_rx) = bounded(defaults::FRAME_BUFFER);
        let (processed_tx, processed_rx) = bounded(defaults::FRAME_BUFFER);
        let (chunk_tx, chunk_rx) = bounded(defaults::CHUNK_BUFFER);
        let (result_tx, result_rx) = bounded(defaults::RESULT_BUFFER);
        let (append_tx, append_rx) = bounded(defaults::APPEND_BUFFER);
        let (transcript_tx, transcript_rx) = bounded(1);

        // Stations
        let preprocess = PreprocessStation::new(
            Preprocessor::new(
                spec,
                self.config.audio.gain,
                self.config.audio.min_audio_energy,
            ),
            Arc::clone(&counters),
        );

        let scheduler = SchedulerStation::new(
            ChunkScheduler::new(
                self.config.chunk_samples(),
                self.config.overlap_samples(),
                defaults::TARGET_SAMPLE_RATE,
                self.config.audio.min_audio_energy,
            ),
            Arc::clone(&counters),
        );

        let engine = EngineStation::new(
            transcriber,
            self.config.inference_timeout(),
            Arc::clone(&counters),
        )
        .with_skip_silence(self.config.inference.skip_silence)
        .with_min_words(self.config.inference.min_words);

        let reconciler = ReconcilerStation::new(
            Reconciler::new(self.config.overlap_samples() > 0, Arc::clone(&counters))
                .with_tail_words(self.config.reconcile.tail_words)
                .with_reorder_timeout(self.config.reorder_timeout()),
        );

        let sink = SinkStation::new(sink, Arc::clone(&counters), transcript_tx);

        // Station runners
        let preprocess_runner =
            StationRunner::spawn(preprocess, frame_rx, processed_tx, reporter.clone());
        let scheduler_runner =
            StationRunner::spawn(scheduler, processed_rx, chunk_tx, reporter.clone());
        let engine_runner = StationRunner::spawn(engine, chunk_rx, result_tx, reporter.clone());
        let reconciler_runner =
            StationRunner::spawn(reconciler, result_rx, append_tx, reporter.clone());

        // The sink is the terminal station; its output channel only
        // satisfies the runner and never carries anything.
        let (sink_done_tx, sink_done_rx) = bounded::<()>(1);
        let sink_runner = StationRunner::spawn(sink, append_rx, sink_done_tx, reporter.clone());

        // Feed thread: moves frames from the capture ring into the
        // pipeline. Uses timeouts on both sides so a stop request is
        // never missed while the ring is quiet or downstream is busy.
        let feed_running = Arc::clone(&running);
        let feed_reporter = Arc::clone(&reporter);
        let feed = thread::spawn(move || {
            let mut capture = capture;

            'feed: while feed_running.load(Ordering::SeqCst) {
                match capture.pull(FEED_POLL) {
                    Ok(CaptureEvent::Frame(frame)) => {
                        let mut frame = frame;
                        loop {
                            match frame_tx.send_timeout(frame, FEED_POLL) {
                                Ok(()) => break,
                                Err(SendTimeoutError::Timeout(returned)) => {
                                    if !feed_running.load(Ordering::SeqCst) {
                                        break 'feed;
                                    }
                                    frame = returned;
                                }
                                Err(SendTimeoutError::Disconnected(_)) => break 'feed,
                            }
                        }
                    }
                    Ok(CaptureEvent::NoData) => {}
                    Ok(CaptureEvent::Closed) => break,
                    Err(error) => {
                        feed_reporter.fatal("Capture", error.into());
                        break;
                    }
                }
            }

            capture.stop();
            // frame_tx drops here, which flushes and winds down every
            // downstream station in turn.
        });

        Ok(PipelineHandle {
            running,
            feed: Some(feed),
            stations: Some(StationThreads {
                preprocess: preprocess_runner,
                scheduler: scheduler_runner,
                engine: engine_runner,
                reconciler: reconciler_runner,
                sink: sink_runner,
            }),
            _sink_done: sink_done_rx,
            transcript_rx,
            reporter,
            stats,
        })
    }
}

/// The five station runners, joined in stream order during wind-down.
struct StationThreads {
    preprocess: StationRunner,
    scheduler: StationRunner,
    engine: StationRunner,
    reconciler: StationRunner,
    sink: StationRunner,
}

impl StationThreads {
    fn all_finished(&self) -> bool {
        self.preprocess.is_finished()
            && self.scheduler.is_finished()
            && self.engine.is_finished()
            && self.reconciler.is_finished()
            && self.sink.is_finished()
    }

    fn join_all(self) {
        for result in [
            self.preprocess.join(),
            self.scheduler.join(),
            self.engine.join(),
            self.reconciler.join(),
            self.sink.join(),
        ] {
            if let Err(message) = result {
                eprintln!("edgescribe: {}", message);
            }
        }
    }
}

/// Handle to a running transcription session.
pub struct PipelineHandle {
    /// Flag to signal shutdown
    running: Arc<AtomicBool>,
    feed: Option<JoinHandle<()>>,
    stations: Option<StationThreads>,
    _sink_done: Receiver<()>,
    transcript_rx: Receiver<Option<String>>,
    reporter: Arc<CapturingReporter>,
    stats: SessionStats,
}

impl PipelineHandle {
    /// Signals the capture side to stop.
    ///
    /// Audio already in flight keeps flowing until every station has
    /// drained; use `finish` to wait for that and collect the outcome.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// True while any pipeline thread is alive.
    pub fn is_running(&self) -> bool {
        let feed_alive = self.feed.as_ref().map(|t| !t.is_finished()).unwrap_or(false);
        let stations_alive = self
            .stations
            .as_ref()
            .map(|s| !s.all_finished())
            .unwrap_or(false);
        feed_alive || stations_alive
    }

    /// True once any station has reported a fatal error.
    ///
    /// The pipeline winds itself down after a fatal; callers polling
    /// this can move straight to `finish`.
    pub fn has_failed(&self) -> bool {
        self.reporter.has_fatal()
    }

    /// Snapshot of the session counters against the wall clock so far.
    pub fn report(&self) -> SessionReport {
        self.stats.report()
    }

    pub fn counters(&self) -> Arc<SessionCounters> {
        self.stats.counters()
    }

    /// Signals stop, drains the pipeline and collects the outcome.
    pub fn finish(mut self) -> SessionOutcome {
        self.stop();
        self.wind_down()
    }

    /// Waits for the session to end on its own and collects the
    /// outcome. Meant for finite sources; a microphone session never
    /// ends by itself, stop it with `finish`.
    pub fn wait(mut self) -> SessionOutcome {
        self.wind_down()
    }

    fn wind_down(&mut self) -> SessionOutcome {
        if let Some(feed) = self.feed.take()
            && feed.join().is_err()
        {
            eprintln!("edgescribe: capture feed thread panicked");
        }
        if let Some(stations) = self.stations.take() {
            stations.join_all();
        }

        // The sink sent the transcript during its shutdown.
        let transcript = self.transcript_rx.try_recv().ok().flatten();

        SessionOutcome {
            report: self.stats.report(),
            failure: self.reporter.take_fatal(),
            transcript,
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        // Signal without joining so drop never blocks; threads wind
        // down on their own once the feed stops.
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Everything a finished session leaves behind.
#[derive(Debug)]
pub struct SessionOutcome {
    /// Final counter snapshot, valid even when the session failed.
    pub report: SessionReport,
    /// First fatal error when the session ended on one.
    pub failure: Option<EdgescribeError>,
    /// Full transcript when the sink kept one.
    pub transcript: Option<String>,
}

impl SessionOutcome {
    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }
}
