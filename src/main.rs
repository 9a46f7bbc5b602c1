use anyhow::Result;
use clap::Parser;
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use edgescribe::audio::WavAudioSource;
use edgescribe::cli::{Cli, Commands, ConfigAction};
use edgescribe::config::Config;
use edgescribe::{AudioSource, FileSink, Pipeline, StdoutSink, TextSink, Transcriber};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_signum: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install a Ctrl+C handler that requests a clean shutdown.
///
/// The handler only stores to an atomic, which is async-signal-safe; the
/// main loop notices the flag and winds the pipeline down normally so the
/// transcript tail is not lost.
fn install_sigint_handler() {
    // SAFETY: on_sigint is async-signal-safe (a single atomic store)
    unsafe {
        libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        None => run_session(&cli)?,
        #[cfg(feature = "cpal-audio")]
        Some(Commands::Devices) => list_audio_devices()?,
        Some(Commands::Check) => run_check(&cli)?,
        Some(Commands::Config { action }) => handle_config_command(action, cli.config.as_deref())?,
    }

    Ok(())
}

/// Load configuration and fold in environment and CLI overrides.
///
/// Priority order, highest first:
/// 1. Command-line flags
/// 2. Environment variables
/// 3. Config file (--config path, or ~/.config/edgescribe/config.toml)
/// 4. Built-in defaults
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if let Some(path) = &cli.config {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())
    };

    config = config.with_env_overrides();
    cli.apply_overrides(&mut config)?;
    Ok(config)
}

/// Run a live transcription session until the source ends, the duration
/// limit is reached, or the user interrupts.
fn run_session(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;

    let source = open_source(cli, &config)?;
    let sink = open_sink(cli)?;
    let transcriber = build_transcriber(&config)?;

    if !cli.quiet {
        eprintln!(
            "edgescribe {} — model '{}', {}s windows, {}s overlap (Ctrl+C to stop)",
            edgescribe::version_string(),
            transcriber.model_name(),
            config.chunk_duration(),
            config.chunking.overlap_duration,
        );
    }

    let handle = Pipeline::new(config).start(source, transcriber, sink)?;

    install_sigint_handler();
    let deadline = cli
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    while handle.is_running() {
        if INTERRUPTED.load(Ordering::SeqCst) {
            if !cli.quiet {
                eprintln!("\nStopping...");
            }
            break;
        }
        if let Some(deadline) = deadline
            && Instant::now() >= deadline
        {
            if !cli.quiet {
                eprintln!("\nSession limit reached, stopping...");
            }
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let outcome = handle.finish();

    if !cli.quiet && cli.verbose >= 1 {
        outcome.report.print_summary();
    }
    if !cli.quiet && cli.verbose >= 2 {
        println!("{}", outcome.report.to_json());
    }

    if let Some(failure) = outcome.failure {
        anyhow::bail!("session ended abnormally: {}", failure);
    }
    Ok(())
}

/// Where a session's audio comes from, decided before anything opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode<'a> {
    WavFile(&'a Path),
    StdinPipe,
    Microphone,
}

/// `--input` always wins; otherwise piped stdin is read as WAV data,
/// and a terminal on stdin means a live microphone session.
fn input_mode(input: Option<&Path>, stdin_is_terminal: bool) -> InputMode<'_> {
    match input {
        Some(path) => InputMode::WavFile(path),
        None if !stdin_is_terminal => InputMode::StdinPipe,
        None => InputMode::Microphone,
    }
}

/// Pick the audio source: a WAV file when --input is given, piped WAV
/// data when stdin is not a terminal, the microphone otherwise.
fn open_source(cli: &Cli, config: &Config) -> Result<Box<dyn AudioSource>> {
    match input_mode(cli.input.as_deref(), std::io::stdin().is_terminal()) {
        InputMode::WavFile(path) => Ok(Box::new(WavAudioSource::from_path(path)?)),
        InputMode::StdinPipe => Ok(Box::new(WavAudioSource::from_stdin()?)),
        InputMode::Microphone => open_microphone(cli, config),
    }
}

#[cfg(feature = "cpal-audio")]
fn open_microphone(cli: &Cli, config: &Config) -> Result<Box<dyn AudioSource>> {
    let requested = edgescribe::SourceSpec {
        sample_rate: config.audio.sample_rate,
        channels: config.audio.channels,
    };
    edgescribe::audio::silence_backend_logs();
    let source =
        edgescribe::audio::CpalAudioSource::new(config.audio.device.as_deref(), requested)?;
    if !cli.quiet {
        eprintln!("Capturing from '{}'", source.name());
    }
    Ok(Box::new(source))
}

#[cfg(not(feature = "cpal-audio"))]
fn open_microphone(_cli: &Cli, _config: &Config) -> Result<Box<dyn AudioSource>> {
    anyhow::bail!(
        "this build has no microphone support (cpal-audio feature); \
         use --input FILE or pipe WAV data on stdin"
    )
}

/// Pick the transcript sink: a file when --output is given, stdout
/// otherwise.
fn open_sink(cli: &Cli) -> Result<Box<dyn TextSink>> {
    match &cli.output {
        Some(path) => Ok(Box::new(FileSink::create(path)?)),
        None => Ok(Box::new(StdoutSink)),
    }
}

#[cfg(feature = "whisper")]
fn build_transcriber(config: &Config) -> Result<Arc<dyn Transcriber>> {
    use edgescribe::stt::{WhisperConfig, WhisperTranscriber};

    let mut whisper_config = WhisperConfig::for_variant(config.inference.model_variant);
    if let Some(path) = &config.inference.model_path {
        whisper_config.model_path = path.clone();
    }

    let transcriber = WhisperTranscriber::new(whisper_config)?;
    Ok(Arc::new(transcriber))
}

#[cfg(not(feature = "whisper"))]
fn build_transcriber(_config: &Config) -> Result<Arc<dyn Transcriber>> {
    anyhow::bail!("this build has no speech-to-text engine (whisper feature)")
}

/// List available audio input devices.
#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<()> {
    let devices = edgescribe::audio::list_devices()?;

    if devices.is_empty() {
        eprintln!("No audio input devices found");
        std::process::exit(1);
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

/// Verify that the configuration, model file, and audio backend are
/// usable, without starting a session.
fn run_check(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let mut healthy = true;

    match config.validate() {
        Ok(()) => println!("configuration  {}", "ok".green()),
        Err(error) => {
            healthy = false;
            println!("configuration  {}", format!("invalid: {}", error).red());
        }
    }

    #[cfg(feature = "whisper")]
    {
        let model_path = config.inference.model_path.clone().unwrap_or_else(|| {
            edgescribe::stt::WhisperConfig::for_variant(config.inference.model_variant).model_path
        });
        if model_path.exists() {
            println!("model          {} ({})", "ok".green(), model_path.display());
        } else {
            healthy = false;
            println!(
                "model          {}",
                format!("missing: {}", model_path.display()).red()
            );
        }
    }
    #[cfg(not(feature = "whisper"))]
    println!("model          {}", "skipped (built without whisper)".dimmed());

    #[cfg(feature = "cpal-audio")]
    {
        match edgescribe::audio::list_devices() {
            Ok(devices) if !devices.is_empty() => {
                println!(
                    "audio input    {} ({} device{})",
                    "ok".green(),
                    devices.len(),
                    if devices.len() == 1 { "" } else { "s" }
                );
            }
            Ok(_) => {
                healthy = false;
                println!("audio input    {}", "no devices found".red());
            }
            Err(error) => {
                healthy = false;
                println!("audio input    {}", format!("unavailable: {}", error).red());
            }
        }
    }
    #[cfg(not(feature = "cpal-audio"))]
    println!(
        "audio input    {}",
        "skipped (built without cpal-audio)".dimmed()
    );

    if !healthy {
        std::process::exit(1);
    }
    Ok(())
}

/// Handle configuration inspection commands.
fn handle_config_command(action: &ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Show => {
            let config = Config::load_or_default(&config_path).with_env_overrides();
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
        ConfigAction::Dump => {
            print!("{}", toml::to_string_pretty(&Config::default())?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_piped_stdin_selects_wav_pipe_mode() {
        assert_eq!(input_mode(None, false), InputMode::StdinPipe);
    }

    #[test]
    fn test_terminal_stdin_selects_the_microphone() {
        assert_eq!(input_mode(None, true), InputMode::Microphone);
    }

    #[test]
    fn test_input_flag_wins_over_a_piped_stdin() {
        let path = Path::new("meeting.wav");
        assert_eq!(input_mode(Some(path), false), InputMode::WavFile(path));
        assert_eq!(input_mode(Some(path), true), InputMode::WavFile(path));
    }
}
