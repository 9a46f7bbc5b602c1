//! Error types and reporting for pipeline stations.

use crate::error::EdgescribeError;
use std::fmt;
use std::sync::Mutex;

/// How badly a station's `process` call went.
#[derive(Debug)]
pub enum StationError {
    /// The item was lost but the station can keep going.
    Recoverable(String),
    /// The station, and with it the pipeline, has to stop.
    Fatal(EdgescribeError),
}

impl fmt::Display for StationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationError::Recoverable(msg) => write!(f, "recoverable: {}", msg),
            StationError::Fatal(err) => write!(f, "fatal: {}", err),
        }
    }
}

impl std::error::Error for StationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StationError::Recoverable(_) => None,
            StationError::Fatal(err) => Some(err),
        }
    }
}

/// Where station threads send errors they cannot handle themselves.
pub trait ErrorReporter: Send + Sync {
    /// Reports a recoverable error. The station keeps processing.
    fn recoverable(&self, station: &str, message: &str);

    /// Reports a fatal error. The reporting station is about to stop.
    fn fatal(&self, station: &str, error: EdgescribeError);
}

/// Reporter that writes everything to stderr and keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn recoverable(&self, station: &str, message: &str) {
        eprintln!("[{}] recoverable: {}", station, message);
    }

    fn fatal(&self, station: &str, error: EdgescribeError) {
        eprintln!("[{}] fatal: {}", station, error);
    }
}

/// Reporter that logs to stderr and keeps the first fatal error so the
/// session outcome can carry it after the pipeline winds down.
#[derive(Debug, Default)]
pub struct CapturingReporter {
    first_fatal: Mutex<Option<EdgescribeError>>,
}

impl CapturingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any station reported a fatal error.
    pub fn has_fatal(&self) -> bool {
        self.first_fatal
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Removes and returns the first fatal error, if any.
    pub fn take_fatal(&self) -> Option<EdgescribeError> {
        self.first_fatal.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl ErrorReporter for CapturingReporter {
    fn recoverable(&self, station: &str, message: &str) {
        eprintln!("[{}] recoverable: {}", station, message);
    }

    fn fatal(&self, station: &str, error: EdgescribeError) {
        eprintln!("[{}] fatal: {}", station, error);
        if let Ok(mut slot) = self.first_fatal.lock()
            && slot.is_none()
        {
            *slot = Some(error);
        }
    }
}
