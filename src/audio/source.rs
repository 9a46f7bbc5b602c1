use crate::error::CaptureError;
use std::collections::VecDeque;
use std::time::Duration;

/// Stream parameters a source delivers audio in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Outcome of a single blocking read from an audio source.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// Interleaved PCM samples. May be shorter than requested.
    Samples(Vec<i16>),
    /// No data arrived within the timeout. The source is still alive.
    TimedOut,
    /// The source has no more audio and never will.
    EndOfStream,
}

/// Trait for audio producers feeding the capture ring.
///
/// This trait allows swapping implementations (microphone, WAV file,
/// stdin, mock). Implementations are owned by the capture thread, so
/// only `Send` is required.
pub trait AudioSource: Send {
    /// Open the device or file. Called once before the first read.
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Read up to `max_frames` frames, blocking at most `timeout`.
    ///
    /// A frame is one sample per channel; the returned buffer is
    /// interleaved.
    fn read(&mut self, max_frames: usize, timeout: Duration) -> Result<ReadOutcome, CaptureError>;

    /// Release the device. Reads after close are an error.
    fn close(&mut self);

    /// Stream parameters this source delivers.
    fn spec(&self) -> SourceSpec;

    /// Whether the source ends on its own (file) rather than running
    /// until stopped (microphone).
    fn is_finite(&self) -> bool {
        false
    }

    /// Short name for diagnostics.
    fn name(&self) -> &str;
}

enum ScriptedRead {
    Samples(Vec<i16>),
    TimedOut,
    Error(CaptureError),
}

/// Mock audio source for testing
///
/// Plays back a scripted sequence of reads. Once the script is
/// exhausted it reports end of stream, or times out forever when
/// built with `endless()`.
pub struct MockAudioSource {
    spec: SourceSpec,
    script: VecDeque<ScriptedRead>,
    endless: bool,
    opened: bool,
    open_failure: Option<String>,
    reads: usize,
}

impl MockAudioSource {
    /// Create a mock source with the given stream parameters
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            spec: SourceSpec {
                sample_rate,
                channels,
            },
            script: VecDeque::new(),
            endless: false,
            opened: false,
            open_failure: None,
            reads: 0,
        }
    }

    /// Queue a buffer of interleaved samples for one read
    pub fn with_frame(mut self, samples: Vec<i16>) -> Self {
        self.script.push_back(ScriptedRead::Samples(samples));
        self
    }

    /// Queue several buffers at once
    pub fn with_frames(mut self, frames: Vec<Vec<i16>>) -> Self {
        for samples in frames {
            self.script.push_back(ScriptedRead::Samples(samples));
        }
        self
    }

    /// Queue one read that times out
    pub fn with_timeout(mut self) -> Self {
        self.script.push_back(ScriptedRead::TimedOut);
        self
    }

    /// Queue one read that fails with the given error
    pub fn with_error(mut self, error: CaptureError) -> Self {
        self.script.push_back(ScriptedRead::Error(error));
        self
    }

    /// Keep timing out instead of ending once the script is exhausted
    pub fn endless(mut self) -> Self {
        self.endless = true;
        self
    }

    /// Make `open` fail with a lost-device error
    pub fn with_open_failure(mut self, message: &str) -> Self {
        self.open_failure = Some(message.to_string());
        self
    }

    /// Number of reads performed so far
    pub fn read_count(&self) -> usize {
        self.reads
    }
}

impl AudioSource for MockAudioSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        if let Some(message) = &self.open_failure {
            return Err(CaptureError::DeviceLost {
                message: message.clone(),
            });
        }
        self.opened = true;
        Ok(())
    }

    fn read(&mut self, _max_frames: usize, _timeout: Duration) -> Result<ReadOutcome, CaptureError> {
        if !self.opened {
            return Err(CaptureError::DeviceLost {
                message: "source not opened".to_string(),
            });
        }
        self.reads += 1;

        match self.script.pop_front() {
            Some(ScriptedRead::Samples(samples)) => Ok(ReadOutcome::Samples(samples)),
            Some(ScriptedRead::TimedOut) => Ok(ReadOutcome::TimedOut),
            Some(ScriptedRead::Error(error)) => Err(error),
            None if self.endless => Ok(ReadOutcome::TimedOut),
            None => Ok(ReadOutcome::EndOfStream),
        }
    }

    fn close(&mut self) {
        self.opened = false;
    }

    fn spec(&self) -> SourceSpec {
        self.spec
    }

    fn is_finite(&self) -> bool {
        !self.endless
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_source_plays_back_script() {
        let mut source = MockAudioSource::new(48_000, 2)
            .with_frame(vec![1, 2, 3, 4])
            .with_timeout()
            .with_frame(vec![5, 6]);
        source.open().unwrap();

        assert_eq!(
            source.read(1024, Duration::from_millis(10)).unwrap(),
            ReadOutcome::Samples(vec![1, 2, 3, 4])
        );
        assert_eq!(
            source.read(1024, Duration::from_millis(10)).unwrap(),
            ReadOutcome::TimedOut
        );
        assert_eq!(
            source.read(1024, Duration::from_millis(10)).unwrap(),
            ReadOutcome::Samples(vec![5, 6])
        );
    }

    #[test]
    fn test_mock_source_ends_after_script() {
        let mut source = MockAudioSource::new(16_000, 1).with_frame(vec![1]);
        source.open().unwrap();

        let _ = source.read(1024, Duration::from_millis(10)).unwrap();
        assert_eq!(
            source.read(1024, Duration::from_millis(10)).unwrap(),
            ReadOutcome::EndOfStream
        );
        assert!(source.is_finite());
    }

    #[test]
    fn test_endless_mock_source_times_out_instead_of_ending() {
        let mut source = MockAudioSource::new(16_000, 1).endless();
        source.open().unwrap();

        assert_eq!(
            source.read(1024, Duration::from_millis(10)).unwrap(),
            ReadOutcome::TimedOut
        );
        assert!(!source.is_finite());
    }

    #[test]
    fn test_mock_source_scripted_error() {
        let mut source = MockAudioSource::new(16_000, 1)
            .with_error(CaptureError::DeviceLost {
                message: "unplugged".to_string(),
            });
        source.open().unwrap();

        let err = source.read(1024, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, CaptureError::DeviceLost { .. }));
    }

    #[test]
    fn test_mock_source_open_failure() {
        let mut source = MockAudioSource::new(16_000, 1).with_open_failure("no such device");

        let err = source.open().unwrap_err();
        assert_eq!(err.to_string(), "Audio device lost: no such device");
    }

    #[test]
    fn test_mock_source_read_before_open_fails() {
        let mut source = MockAudioSource::new(16_000, 1).with_frame(vec![1]);

        assert!(source.read(1024, Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_mock_source_read_after_close_fails() {
        let mut source = MockAudioSource::new(16_000, 1).with_frame(vec![1]);
        source.open().unwrap();
        source.close();

        assert!(source.read(1024, Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_mock_source_counts_reads() {
        let mut source = MockAudioSource::new(16_000, 1)
            .with_frame(vec![1])
            .with_frame(vec![2]);
        source.open().unwrap();

        assert_eq!(source.read_count(), 0);
        let _ = source.read(1024, Duration::from_millis(10));
        let _ = source.read(1024, Duration::from_millis(10));
        assert_eq!(source.read_count(), 2);
    }

    #[test]
    fn test_source_spec() {
        let source = MockAudioSource::new(48_000, 2);
        assert_eq!(
            source.spec(),
            SourceSpec {
                sample_rate: 48_000,
                channels: 2
            }
        );
        assert_eq!(source.name(), "mock");
    }
}
