//! edgescribe - continuous speech-to-text for edge devices
//!
//! Captures audio, slices it into overlapping fixed-size windows, runs
//! each window through a speech-to-text engine, and stitches the
//! per-window transcripts back into one append-only text stream. Built
//! for hardware where inference barely keeps up with real time: capture
//! never blocks, inference never runs more than one window at a time,
//! and every degradation (dropped frames, timed-out chunks, suspect
//! joins) is counted and reported instead of silently swallowed.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod pipeline;
pub mod stt;

// The seams a session is assembled from.
pub use audio::source::{AudioSource, ReadOutcome, SourceSpec};
pub use pipeline::sink::{CollectorSink, FileSink, StdoutSink, TextSink};
pub use stt::transcriber::Transcriber;

// Session assembly and reporting.
pub use config::{Config, ModelVariant};
pub use error::{EdgescribeError, Result};
pub use pipeline::orchestrator::{Pipeline, PipelineHandle, SessionOutcome};
pub use pipeline::stats::{SessionCounters, SessionReport};

// Scripted stand-ins for the device and the model.
pub use audio::source::MockAudioSource;
pub use stt::transcriber::MockTranscriber;

// Station plumbing, for assembling custom pipelines.
pub use pipeline::error::{ErrorReporter, StationError};
pub use pipeline::station::Station;

/// Version reported by `--version`: the crate version, plus the git
/// short hash when the build script could determine one.
pub fn version_string() -> String {
    let base = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH").filter(|hash| !hash.is_empty()) {
        Some(hash) => format!("{}+{}", base, hash),
        None => base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_embeds_the_package_version() {
        assert!(version_string().starts_with(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_version_string_appends_hash_only_when_known() {
        let version = version_string();
        match option_env!("GIT_HASH").filter(|hash| !hash.is_empty()) {
            Some(hash) => {
                assert_eq!(version, format!("{}+{}", env!("CARGO_PKG_VERSION"), hash));
            }
            None => assert_eq!(version, env!("CARGO_PKG_VERSION")),
        }
    }
}
