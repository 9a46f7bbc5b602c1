//! The station abstraction: one worker thread per pipeline stage.
//!
//! A [`Station`] turns inputs into zero or more outputs; a
//! [`StationRunner`] owns the thread that feeds it from a channel and
//! forwards whatever comes out. Dropping the input sender upstream is
//! the shutdown signal, and it travels down the pipeline one stage at
//! a time as each runner finishes flushing.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::pipeline::error::{ErrorReporter, StationError};

/// One stage of the streaming pipeline.
pub trait Station: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Handles one input. An empty vec means the input was absorbed,
    /// either buffered for later or dropped on purpose.
    fn process(&mut self, input: Self::Input) -> Result<Vec<Self::Output>, StationError>;

    /// Drains whatever the station is still holding once its input
    /// channel closes. Skipped when the station died on a fatal error.
    fn flush(&mut self) -> Result<Vec<Self::Output>, StationError> {
        Ok(Vec::new())
    }

    /// Stable name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Last call before the worker thread exits; release resources here.
    fn shutdown(&mut self) {}
}

/// Owns the worker thread of one station.
pub struct StationRunner {
    thread: Option<JoinHandle<()>>,
    name: &'static str,
}

impl StationRunner {
    /// Starts `station` on its own thread, wired between two channels.
    pub fn spawn<S: Station>(
        mut station: S,
        input: Receiver<S::Input>,
        output: Sender<S::Output>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let name = station.name();
        let thread = thread::spawn(move || run(&mut station, input, output, reporter));
        Self {
            thread: Some(thread),
            name,
        }
    }

    /// Blocks until the station thread exits.
    pub fn join(mut self) -> Result<(), String> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| format!("Station '{}' thread panicked", self.name)),
            None => Ok(()),
        }
    }

    /// Whether the station thread has already exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Sends `outputs` downstream in order. False means the receiving side
/// hung up and the station has nobody left to produce for.
fn deliver<T>(outputs: Vec<T>, output: &Sender<T>) -> bool {
    outputs.into_iter().all(|item| output.send(item).is_ok())
}

/// The station loop. Returning drops the input receiver, which
/// unblocks the upstream sender and carries the shutdown onward.
fn run<S: Station>(
    station: &mut S,
    input: Receiver<S::Input>,
    output: Sender<S::Output>,
    reporter: Arc<dyn ErrorReporter>,
) {
    let name = station.name();

    for item in input.iter() {
        match station.process(item) {
            Ok(outputs) => {
                if !deliver(outputs, &output) {
                    station.shutdown();
                    return;
                }
            }
            Err(StationError::Recoverable(message)) => reporter.recoverable(name, &message),
            Err(StationError::Fatal(error)) => {
                reporter.fatal(name, error);
                station.shutdown();
                return;
            }
        }
    }

    // Input closed normally: hand buffered state downstream.
    match station.flush() {
        Ok(outputs) => {
            deliver(outputs, &output);
        }
        Err(StationError::Recoverable(message)) => reporter.recoverable(name, &message),
        Err(StationError::Fatal(error)) => reporter.fatal(name, error),
    }

    station.shutdown();
}
