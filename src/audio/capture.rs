//! Microphone capture through CPAL (Cross-Platform Audio Library).
//!
//! The stream delivers interleaved i16 at a known rate and channel
//! count; downmixing and resampling are the preprocessor's job. `open`
//! first requests the configured format (PipeWire/PulseAudio convert
//! transparently), then falls back to the device's native format for
//! setups that accept a non-native config but never deliver data.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::audio::source::{AudioSource, ReadOutcome, SourceSpec};
use crate::error::{CaptureError, EdgescribeError, Result};

/// Probing audio backends makes ALSA/JACK/PipeWire write complaints
/// straight to fd 2, past anything Rust-level. Parking stderr on
/// /dev/null for the duration of `f` is the only reliable silencer.
///
/// Restores the original stderr before returning. Not safe if another
/// thread redirects fd 2 at the same time; we only call it during
/// single-threaded startup.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Quiet the audio backends before CPAL touches them.
///
/// Must run before any thread is spawned: `set_var` is unsound once
/// other threads may read the environment.
pub fn silence_backend_logs() {
    // SAFETY: called once from main, ahead of all thread spawns.
    unsafe {
        // Keep JACK from trying (and failing, loudly) to start a server.
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        // PipeWire and ALSA both babble at their default log levels.
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Sound servers that follow the desktop's own input selection.
const SOUND_SERVERS: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// ALSA device names that never carry a usable microphone signal.
const PLAYBACK_ONLY_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

/// How long a freshly started stream gets to prove its callback fires.
const CALLBACK_PROBE: Duration = Duration::from_millis(200);

fn matches_any(name: &str, patterns: &[&str]) -> bool {
    let lower = name.to_lowercase();
    patterns
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

/// Output-side ALSA aliases (surround splits, HDMI, S/PDIF) show up in
/// the input enumeration on many cards. Hide them.
fn is_playback_only(name: &str) -> bool {
    matches_any(name, PLAYBACK_ONLY_PATTERNS)
}

fn is_sound_server(name: &str) -> bool {
    matches_any(name, SOUND_SERVERS)
}

/// Enumerate capture devices worth offering for voice input.
///
/// Playback-only aliases are hidden, and sound-server entries get a
/// ` [recommended]` suffix since they track the desktop's mic choice.
pub fn list_devices() -> Result<Vec<String>> {
    let names: Vec<String> = with_suppressed_stderr(|| {
        cpal::default_host()
            .input_devices()
            .map(|devices| devices.filter_map(|device| device.name().ok()).collect())
    })
    .map_err(|e| EdgescribeError::AudioCapture {
        message: format!("Could not enumerate input devices: {}", e),
    })?;

    Ok(names
        .into_iter()
        .filter(|name| !is_playback_only(name))
        .map(|name| {
            if is_sound_server(&name) {
                format!("{} [recommended]", name)
            } else {
                name
            }
        })
        .collect())
}

/// Resolve the device to capture from when none was named: a sound
/// server if one is registered (so the desktop's input selection wins),
/// otherwise whatever CPAL considers the default input.
fn best_default_device() -> Result<cpal::Device> {
    let host = cpal::default_host();

    let server = host.input_devices().ok().and_then(|mut devices| {
        devices.find(|device| device.name().is_ok_and(|name| is_sound_server(&name)))
    });
    if let Some(device) = server {
        return Ok(device);
    }

    host.default_input_device()
        .ok_or_else(|| EdgescribeError::AudioDeviceNotFound {
            device: "default".to_string(),
        })
}

/// Find an input device by exact name.
fn find_device(name: &str) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let mut devices = host
        .input_devices()
        .map_err(|e| EdgescribeError::AudioCapture {
            message: format!("Could not enumerate input devices: {}", e),
        })?;

    devices
        .find(|device| device.name().is_ok_and(|n| n == name))
        .ok_or_else(|| EdgescribeError::AudioDeviceNotFound {
            device: name.to_string(),
        })
}

fn f32_to_i16(data: &[f32]) -> Vec<i16> {
    data.iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

/// Empties anything an abandoned stream left in the data queue.
fn drain_queued(rx: &Receiver<Vec<i16>>) {
    while rx.try_recv().is_ok() {}
}

/// cpal::Stream is !Send on some backends, but the capture thread owns
/// the source outright once the session starts.
///
/// SAFETY: the stream is created in `open` and only reached through
/// `&mut self` afterwards, so access stays exclusive across the move.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone source backed by a CPAL input stream.
///
/// The device is resolved up front so a bad device name fails at
/// construction, not mid-session. `read` hands out whole interleaved
/// frames only; a callback batch that exceeds the request is carried
/// over to the next read.
pub struct CpalAudioSource {
    device: cpal::Device,
    label: String,
    requested: SourceSpec,
    spec: SourceSpec,
    stream: Option<SendableStream>,
    data_rx: Option<Receiver<Vec<i16>>>,
    pending: VecDeque<i16>,
    callback_count: Arc<AtomicU64>,
    stream_failure: Arc<Mutex<Option<String>>>,
}

impl CpalAudioSource {
    /// Create a source for the named device, or the best default when
    /// `device_name` is None. `requested` is the capture format asked of
    /// the device; `open` falls back to the device's native format when
    /// the request is not honored.
    ///
    /// # Errors
    /// Returns `AudioDeviceNotFound` for an unknown name and
    /// `AudioCapture` when enumeration fails.
    pub fn new(device_name: Option<&str>, requested: SourceSpec) -> Result<Self> {
        let device = with_suppressed_stderr(|| match device_name {
            Some(name) => find_device(name),
            None => best_default_device(),
        })?;

        let label = device.name().unwrap_or_else(|_| "unknown".to_string());

        Ok(Self {
            device,
            label,
            requested,
            spec: requested,
            stream: None,
            data_rx: None,
            pending: VecDeque::new(),
            callback_count: Arc::new(AtomicU64::new(0)),
            stream_failure: Arc::new(Mutex::new(None)),
        })
    }

    fn error_callback(&self) -> impl FnMut(cpal::StreamError) + Send + 'static {
        let failure = Arc::clone(&self.stream_failure);
        move |error: cpal::StreamError| {
            eprintln!("edgescribe: audio stream error: {}", error);
            if let Ok(mut slot) = failure.lock()
                && slot.is_none()
            {
                *slot = Some(error.to_string());
            }
        }
    }

    /// Try to build a stream at the requested format, i16 first then f32.
    /// Returns None when the device rejects both.
    fn build_requested_stream(&self, data_tx: Sender<Vec<i16>>) -> Option<cpal::Stream> {
        let stream_config = cpal::StreamConfig {
            channels: self.requested.channels,
            sample_rate: cpal::SampleRate(self.requested.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        // i16 first; sound servers convert transparently.
        let counter = Arc::clone(&self.callback_count);
        let tx = data_tx.clone();
        if let Ok(stream) = self.device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                // A send failure means the reader is gone; close() stops the stream.
                tx.send(data.to_vec()).ok();
            },
            self.error_callback(),
            None,
        ) {
            return Some(stream);
        }

        // f32 for devices that only expose float formats.
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                data_tx.send(f32_to_i16(data)).ok();
            },
            self.error_callback(),
            None,
        ) {
            return Some(stream);
        }

        None
    }

    /// Build a stream at the device's default/native config. The actual
    /// format is returned alongside the stream.
    fn build_native_stream(
        &self,
        data_tx: Sender<Vec<i16>>,
    ) -> std::result::Result<(cpal::Stream, SourceSpec), CaptureError> {
        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| CaptureError::DeviceLost {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let spec = SourceSpec {
            sample_rate: default_config.sample_rate().0,
            channels: default_config.channels(),
        };
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        let counter = Arc::clone(&self.callback_count);
        let stream = match default_config.sample_format() {
            cpal::SampleFormat::I16 => self.device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    data_tx.send(data.to_vec()).ok();
                },
                self.error_callback(),
                None,
            ),
            cpal::SampleFormat::F32 => self.device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    data_tx.send(f32_to_i16(data)).ok();
                },
                self.error_callback(),
                None,
            ),
            fmt => {
                return Err(CaptureError::DeviceLost {
                    message: format!(
                        "device captures in {:?}, which edgescribe cannot read; \
                         pick a different input with --device",
                        fmt
                    ),
                });
            }
        };

        let stream = stream.map_err(|e| CaptureError::DeviceLost {
            message: format!("Failed to build native input stream: {}", e),
        })?;
        Ok((stream, spec))
    }

    fn take_stream_failure(&self) -> Option<String> {
        self.stream_failure
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
    }
}

impl AudioSource for CpalAudioSource {
    fn open(&mut self) -> std::result::Result<(), CaptureError> {
        if self.stream.is_some() {
            return Ok(()); // Already open
        }

        let (data_tx, data_rx) = unbounded();
        self.callback_count.store(0, Ordering::Relaxed);

        // Preferred path: the configured capture format.
        if let Some(stream) = self.build_requested_stream(data_tx.clone())
            && stream.play().is_ok()
        {
            // Some PipeWire-ALSA setups accept a non-native config but
            // never fire the data callback. Give the stream a moment to
            // prove itself before falling back.
            std::thread::sleep(CALLBACK_PROBE);
            if self.callback_count.load(Ordering::Relaxed) > 0 {
                self.spec = self.requested;
                self.stream = Some(SendableStream(stream));
                self.data_rx = Some(data_rx);
                return Ok(());
            }
            // Silent stream; drop it and capture natively instead.
        }

        // Frames queued during the probe carry the requested format,
        // not the native one.
        drain_queued(&data_rx);

        let (stream, spec) = self.build_native_stream(data_tx)?;
        stream.play().map_err(|e| CaptureError::DeviceLost {
            message: format!("Failed to start audio stream: {}", e),
        })?;

        eprintln!(
            "edgescribe: capturing at the device's native format ({}ch/{}Hz)",
            spec.channels, spec.sample_rate
        );
        self.spec = spec;
        self.stream = Some(SendableStream(stream));
        self.data_rx = Some(data_rx);
        Ok(())
    }

    fn read(
        &mut self,
        max_frames: usize,
        timeout: Duration,
    ) -> std::result::Result<ReadOutcome, CaptureError> {
        let rx = match &self.data_rx {
            Some(rx) => rx.clone(),
            None => {
                return Err(CaptureError::DeviceLost {
                    message: "capture stream is not open".to_string(),
                });
            }
        };

        let channels = self.spec.channels.max(1) as usize;
        let max_frames = max_frames.max(1);
        let max_samples = max_frames * channels;

        // Drain whatever the callback has queued since the last read.
        while self.pending.len() < max_samples {
            match rx.try_recv() {
                Ok(batch) => self.pending.extend(batch),
                Err(_) => break,
            }
        }

        if self.pending.is_empty() {
            // Buffered audio is always delivered before a failure surfaces.
            if let Some(message) = self.take_stream_failure() {
                return Err(CaptureError::DeviceLost { message });
            }
            match rx.recv_timeout(timeout) {
                Ok(batch) => self.pending.extend(batch),
                Err(RecvTimeoutError::Timeout) => return Ok(ReadOutcome::TimedOut),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CaptureError::DeviceLost {
                        message: "capture stream ended unexpectedly".to_string(),
                    });
                }
            }
        }

        // Hand out whole frames only; an interleaved frame is never split.
        let frames = (self.pending.len() / channels).min(max_frames);
        let take = frames * channels;
        if take == 0 {
            return Ok(ReadOutcome::TimedOut);
        }
        Ok(ReadOutcome::Samples(self.pending.drain(..take).collect()))
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take()
            && let Err(error) = stream.0.pause()
        {
            eprintln!("edgescribe: failed to stop audio stream: {}", error);
        }
        self.data_rx = None;
        self.pending.clear();
    }

    /// Stream parameters. Accurate once `open` has settled on the
    /// requested or native format.
    fn spec(&self) -> SourceSpec {
        self.spec
    }

    fn is_finite(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requested() -> SourceSpec {
        SourceSpec {
            sample_rate: 48_000,
            channels: 2,
        }
    }

    #[test]
    fn test_device_classification() {
        // Hidden from listings: output-side aliases.
        for name in ["surround51", "front:CARD=PCH", "HDMI Output", "Digital Output S/PDIF"] {
            assert!(is_playback_only(name), "{name} should be hidden");
            assert!(!is_sound_server(name), "{name} is not a sound server");
        }
        // Recommended: sound servers, any capitalization.
        for name in ["pipewire", "PipeWire", "pulse", "PulseAudio"] {
            assert!(is_sound_server(name), "{name} should be recommended");
            assert!(!is_playback_only(name), "{name} should stay listed");
        }
        // Plain hardware entries: listed, not recommended.
        for name in ["Built-in Audio", "hw:0,0", "default"] {
            assert!(!is_playback_only(name), "{name} should stay listed");
            assert!(!is_sound_server(name), "{name} is not a sound server");
        }
    }

    #[test]
    fn test_f32_to_i16_clamps_out_of_range() {
        let converted = f32_to_i16(&[0.0, 1.0, -1.0, 2.0, -2.0]);
        assert_eq!(converted[0], 0);
        assert_eq!(converted[1], i16::MAX);
        assert_eq!(converted[3], i16::MAX);
        assert_eq!(converted[4], -i16::MAX);
    }

    #[test]
    fn test_drain_queued_discards_backlog_but_keeps_the_channel_usable() {
        let (tx, rx) = unbounded();
        tx.send(vec![1i16, 2]).unwrap();
        tx.send(vec![3i16]).unwrap();

        drain_queued(&rx);
        assert!(rx.try_recv().is_err());

        // Only the backlog goes; later batches still arrive.
        tx.send(vec![4i16]).unwrap();
        assert_eq!(rx.try_recv().unwrap(), vec![4i16]);
    }

    #[test]
    fn test_unknown_device_name_fails_at_construction() {
        let source = CpalAudioSource::new(Some("NoSuchMicrophone::v0"), requested());
        match source {
            Err(EdgescribeError::AudioDeviceNotFound { device }) => {
                assert_eq!(device, "NoSuchMicrophone::v0");
            }
            // Machines without a working audio backend fail enumeration instead.
            Err(EdgescribeError::AudioCapture { .. }) => {}
            other => panic!("Expected a device error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_listing_hides_playback_aliases() {
        let devices = list_devices().expect("Failed to list devices");
        assert!(!devices.is_empty(), "Expected at least one audio device");
        for device in &devices {
            assert!(
                !device.to_lowercase().contains("hdmi"),
                "playback alias leaked into the listing: {}",
                device
            );
        }
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_default_device_reports_requested_spec_before_open() {
        let source =
            CpalAudioSource::new(None, requested()).expect("Failed to create audio source");
        assert_eq!(source.spec(), requested());
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_open_read_close_cycle() {
        let mut source =
            CpalAudioSource::new(None, requested()).expect("Failed to create audio source");
        source.open().expect("Failed to open capture");

        // May time out on a silent machine; either outcome is fine.
        let outcome = source
            .read(4800, Duration::from_millis(500))
            .expect("Read failed");
        if let ReadOutcome::Samples(samples) = outcome {
            assert_eq!(samples.len() % source.spec().channels as usize, 0);
        }

        source.close();
        assert!(source.read(4800, Duration::from_millis(10)).is_err());
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_open_twice_is_harmless() {
        let mut source =
            CpalAudioSource::new(None, requested()).expect("Failed to create audio source");
        source.open().expect("first open");
        source.open().expect("second open");
        source.close();
    }
}
