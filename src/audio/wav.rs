//! WAV playback source for file and pipe sessions.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use crate::audio::source::{AudioSource, ReadOutcome, SourceSpec};
use crate::error::{CaptureError, EdgescribeError, Result};

fn file_error(message: String) -> EdgescribeError {
    EdgescribeError::AudioFile { message }
}

/// Replays a decoded WAV recording as an [`AudioSource`].
///
/// Samples come out raw, in the file's own rate and channel layout.
/// Mix-down and resampling happen downstream in the preprocessor,
/// exactly as for live capture, so a file session exercises the same
/// path a microphone does.
pub struct WavAudioSource {
    samples: Vec<i16>,
    spec: SourceSpec,
    cursor: usize,
}

impl WavAudioSource {
    /// Decodes a whole WAV stream into memory.
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Result<Self> {
        let mut decoder = hound::WavReader::new(reader)
            .map_err(|e| file_error(format!("could not parse WAV input: {}", e)))?;

        let header = decoder.spec();
        if header.channels == 0 {
            return Err(file_error("WAV header declares zero channels".to_string()));
        }

        let samples = decoder
            .samples::<i16>()
            .collect::<std::result::Result<Vec<i16>, _>>()
            .map_err(|e| file_error(format!("could not decode WAV samples: {}", e)))?;

        Ok(Self {
            samples,
            spec: SourceSpec {
                sample_rate: header.sample_rate,
                channels: header.channels,
            },
            cursor: 0,
        })
    }

    /// Opens and decodes a WAV file on disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| file_error(format!("could not open {}: {}", path.display(), e)))?;
        Self::from_reader(Box::new(std::io::BufReader::new(file)))
    }

    /// Decodes a WAV stream piped in on stdin.
    ///
    /// Stdin is slurped into memory first; the lock handle itself is
    /// not `Send` and cannot cross into the capture thread.
    pub fn from_stdin() -> Result<Self> {
        let mut buffer = Vec::new();
        std::io::copy(&mut std::io::stdin().lock(), &mut buffer)
            .map_err(|e| file_error(format!("could not read WAV from stdin: {}", e)))?;
        Self::from_reader(Box::new(std::io::Cursor::new(buffer)))
    }

    /// Length of the recording in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.spec.sample_rate == 0 {
            return 0.0;
        }
        let frames = self.samples.len() / self.spec.channels as usize;
        frames as f64 / self.spec.sample_rate as f64
    }
}

impl AudioSource for WavAudioSource {
    fn open(&mut self) -> std::result::Result<(), CaptureError> {
        Ok(())
    }

    fn read(
        &mut self,
        max_frames: usize,
        _timeout: Duration,
    ) -> std::result::Result<ReadOutcome, CaptureError> {
        if self.cursor >= self.samples.len() {
            return Ok(ReadOutcome::EndOfStream);
        }

        let requested = max_frames * self.spec.channels as usize;
        let end = (self.cursor + requested).min(self.samples.len());
        let batch = self.samples[self.cursor..end].to_vec();
        self.cursor = end;

        Ok(ReadOutcome::Samples(batch))
    }

    fn close(&mut self) {}

    fn spec(&self) -> SourceSpec {
        self.spec
    }

    fn is_finite(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "wav"
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Encodes 16-bit PCM into an in-memory WAV byte stream.
    fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(
            &mut buffer,
            hound::WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            },
        )
        .unwrap();
        for sample in samples.iter().copied() {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
        buffer.into_inner()
    }

    fn decode(bytes: Vec<u8>) -> Result<WavAudioSource> {
        WavAudioSource::from_reader(Box::new(Cursor::new(bytes)))
    }

    fn tick() -> Duration {
        Duration::from_millis(10)
    }

    #[test]
    fn test_mono_file_decodes_untouched() {
        let pcm = vec![100i16, -250, 300, -450, 500];
        let source = decode(wav_bytes(16_000, 1, &pcm)).unwrap();

        assert_eq!(source.samples, pcm);
        assert_eq!(source.cursor, 0);
        assert_eq!(
            source.spec(),
            SourceSpec {
                sample_rate: 16_000,
                channels: 1
            }
        );
    }

    #[test]
    fn test_stereo_interleaving_survives_decoding() {
        // Left/right pairs must stay interleaved for the downmix stage.
        let pcm = vec![100i16, -100, 300, -300, 500, -500];
        let source = decode(wav_bytes(48_000, 2, &pcm)).unwrap();

        assert_eq!(source.samples, pcm);
        assert_eq!(source.spec().channels, 2);
    }

    #[test]
    fn test_read_hands_out_the_requested_frame_count() {
        let mut source = decode(wav_bytes(16_000, 1, &vec![7i16; 5_000])).unwrap();
        source.open().unwrap();

        for _ in 0..3 {
            match source.read(1_600, tick()).unwrap() {
                ReadOutcome::Samples(batch) => assert_eq!(batch.len(), 1_600),
                other => panic!("expected samples, got {:?}", other),
            }
        }
        // 5000 - 3 * 1600 leaves a short tail batch.
        match source.read(1_600, tick()).unwrap() {
            ReadOutcome::Samples(batch) => assert_eq!(batch.len(), 200),
            other => panic!("expected samples, got {:?}", other),
        }
    }

    #[test]
    fn test_read_counts_frames_not_interleaved_samples() {
        // 60 stereo frames are 120 interleaved values.
        let mut source = decode(wav_bytes(48_000, 2, &vec![1i16; 200])).unwrap();
        source.open().unwrap();

        match source.read(60, tick()).unwrap() {
            ReadOutcome::Samples(batch) => assert_eq!(batch.len(), 120),
            other => panic!("expected samples, got {:?}", other),
        }
    }

    #[test]
    fn test_end_of_stream_is_sticky() {
        let mut source = decode(wav_bytes(16_000, 1, &vec![1i16; 100])).unwrap();
        source.open().unwrap();

        match source.read(1_600, tick()).unwrap() {
            ReadOutcome::Samples(batch) => assert_eq!(batch.len(), 100),
            other => panic!("expected samples, got {:?}", other),
        }
        for _ in 0..2 {
            assert_eq!(source.read(1_600, tick()).unwrap(), ReadOutcome::EndOfStream);
        }
    }

    #[test]
    fn test_wav_source_identifies_as_finite() {
        let source = decode(wav_bytes(16_000, 1, &[1i16; 10])).unwrap();
        assert!(source.is_finite());
        assert_eq!(source.name(), "wav");
    }

    #[test]
    fn test_duration_divides_by_channel_count() {
        // 96000 interleaved stereo values at 48 kHz last one second.
        let source = decode(wav_bytes(48_000, 2, &vec![0i16; 96_000])).unwrap();
        assert!((source.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_file_error_names_the_path() {
        let missing = Path::new("/tmp/edgescribe_missing_fixture.wav");
        match WavAudioSource::from_path(missing) {
            Err(EdgescribeError::AudioFile { message }) => {
                assert!(message.contains("edgescribe_missing_fixture.wav"));
            }
            other => panic!("expected AudioFile error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_byte_streams_that_are_not_wav_are_rejected() {
        let not_riff: &[u8] = b"XXXX\x00\x00\x00\x00WAVEfmt ";
        let riff_not_wave: &[u8] = b"RIFF\x24\x00\x00\x00XXXX\x00\x00\x00\x00";
        let cases: [(&str, Vec<u8>); 6] = [
            ("empty stream", Vec::new()),
            ("tiny header fragment", b"RIFF\x00\x00".to_vec()),
            ("wrong magic bytes", not_riff.to_vec()),
            ("riff but not wave", riff_not_wave.to_vec()),
            ("all zero bytes", vec![0u8; 1_000]),
            (
                "deterministic noise",
                (0..500u32).map(|i| ((i * 17 + 42) % 256) as u8).collect(),
            ),
        ];

        for (label, bytes) in cases {
            let result = decode(bytes);
            assert!(result.is_err(), "{} should fail to decode", label);
            assert!(matches!(
                result,
                Err(EdgescribeError::AudioFile { .. })
            ));
        }
    }

    #[test]
    fn test_truncated_sample_data_does_not_panic() {
        let mut bytes = wav_bytes(16_000, 1, &vec![100i16; 10]);
        bytes.truncate(bytes.len() - 1);
        // Either outcome is acceptable; decoding must simply not panic.
        let _ = decode(bytes);
    }
}
