//! Command-line surface, parsed with clap derive.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::error::Result;

/// Continuous speech-to-text for edge devices
#[derive(Parser, Debug)]
#[command(
    name = "edgescribe",
    version,
    about = "Continuous low-latency speech-to-text for edge devices"
)]
pub struct Cli {
    /// What to do; omit to start a live session
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file to use instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress the live transcript; only report errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: session summary, -vv: full diagnostics)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Audio input device (e.g., pipewire)
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Model variant: tiny (10s windows) or base (5s windows)
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Path to a ggml model file (overrides the variant's default location)
    #[arg(long, value_name = "PATH")]
    pub model_path: Option<PathBuf>,

    /// Transcribe a WAV file instead of the microphone
    #[arg(long, short = 'i', value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Append the transcript to a file instead of printing to stdout
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Stop the session after this long. Examples: 30s, 5m, 1h30m
    #[arg(long, short = 'd', value_name = "DURATION", value_parser = parse_duration_secs)]
    pub duration: Option<u64>,

    /// Overlap between consecutive chunk windows in seconds
    #[arg(long, value_name = "SECONDS")]
    pub overlap: Option<f64>,

    /// Input gain multiplier applied before clipping
    #[arg(long, value_name = "FACTOR")]
    pub gain: Option<f64>,
}

/// Turns a duration argument into whole seconds.
///
/// Accepts everything `humantime` does (`30s`, `5m`, `1h30m`,
/// `2minutes`) plus bare numbers, which are read as seconds.
fn parse_duration_secs(raw: &str) -> std::result::Result<u64, String> {
    let raw = raw.trim();
    match raw.parse::<u64>() {
        Ok(secs) => Ok(secs),
        Err(_) => humantime::parse_duration(raw)
            .map(|duration| duration.as_secs())
            .map_err(|e| e.to_string()),
    }
}

/// Subcommands beyond the default live session
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List capture devices usable for voice input
    #[cfg(feature = "cpal-audio")]
    Devices,

    /// Check that the configuration and model are usable
    Check,

    /// View configuration
    Config {
        /// What to inspect
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration inspection actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path in use
    Path,
    /// Dump a configuration template with default values
    Dump,
}

impl Cli {
    /// Fold command-line overrides into a loaded configuration.
    ///
    /// Only flags the user actually passed are applied; everything else
    /// keeps the file (or default) value. Validation happens later, when
    /// the pipeline starts.
    pub fn apply_overrides(&self, config: &mut Config) -> Result<()> {
        if let Some(device) = &self.device {
            config.audio.device = Some(device.clone());
        }
        if let Some(model) = &self.model {
            config.inference.model_variant = model.parse()?;
        }
        if let Some(path) = &self.model_path {
            config.inference.model_path = Some(path.clone());
        }
        if let Some(overlap) = self.overlap {
            config.chunking.overlap_duration = overlap;
        }
        if let Some(gain) = self.gain {
            config.audio.gain = gain;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelVariant;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from([&["edgescribe"], args].concat()).unwrap()
    }

    #[test]
    fn test_bare_invocation_runs_the_default_session() {
        let cli = parse(&[]);
        assert!(cli.command.is_none());
        assert!(cli.config.is_none() && cli.device.is_none() && cli.model.is_none());
        assert!(cli.input.is_none() && cli.output.is_none() && cli.duration.is_none());
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_verbosity_accumulates_across_flag_spellings() {
        assert_eq!(parse(&["-v"]).verbose, 1);
        assert_eq!(parse(&["-vv"]).verbose, 2);
        assert_eq!(parse(&["-v", "-v"]).verbose, 2);
        assert!(parse(&["-q"]).quiet);
    }

    #[test]
    fn test_session_tuning_flags() {
        let cli = parse(&["--device", "pipewire", "--model", "tiny", "--overlap", "0.5"]);
        assert_eq!(cli.device.as_deref(), Some("pipewire"));
        assert_eq!(cli.model.as_deref(), Some("tiny"));
        assert_eq!(cli.overlap, Some(0.5));
    }

    #[test]
    fn test_file_session_flags() {
        let cli = parse(&["-i", "meeting.wav", "-o", "notes.txt"]);
        assert_eq!(cli.input, Some(PathBuf::from("meeting.wav")));
        assert_eq!(cli.output, Some(PathBuf::from("notes.txt")));
    }

    #[test]
    fn test_config_path_is_global_before_and_after_subcommand() {
        let before = parse(&["--config", "/etc/edgescribe.toml", "check"]);
        let after = parse(&["check", "--config", "/etc/edgescribe.toml"]);
        assert_eq!(before.config, after.config);
        assert_eq!(before.config, Some(PathBuf::from("/etc/edgescribe.toml")));
        assert!(matches!(after.command, Some(Commands::Check)));
    }

    #[test]
    #[cfg(feature = "cpal-audio")]
    fn test_devices_subcommand_parses() {
        assert!(matches!(parse(&["devices"]).command, Some(Commands::Devices)));
    }

    #[test]
    fn test_unknown_subcommand_is_rejected() {
        let err = Cli::try_parse_from(["edgescribe", "frobnicate"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn test_help_and_version_short_circuit_with_display_kinds() {
        let help = Cli::try_parse_from(["edgescribe", "--help"]).unwrap_err();
        assert_eq!(help.kind(), clap::error::ErrorKind::DisplayHelp);

        let version = Cli::try_parse_from(["edgescribe", "--version"]).unwrap_err();
        assert_eq!(version.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_durations_parse_in_every_supported_spelling() {
        for (raw, secs) in [
            ("45", 45),
            ("0", 0),
            ("10s", 10),
            ("5m", 300),
            ("2h", 7_200),
            ("1h30m", 5_400),
            ("2m30s", 150),
            ("5minutes", 300),
            (" 30 ", 30),
        ] {
            assert_eq!(parse_duration_secs(raw).unwrap(), secs, "input {:?}", raw);
        }
    }

    #[test]
    fn test_malformed_durations_are_rejected() {
        for raw in ["abc", "10x", "", "-5", "1.5"] {
            assert!(parse_duration_secs(raw).is_err(), "input {:?}", raw);
        }
    }

    #[test]
    fn test_duration_flag_goes_through_the_parser() {
        assert_eq!(parse(&["-d", "2m"]).duration, Some(120));
        assert_eq!(parse(&["--duration", "45"]).duration, Some(45));
    }

    #[test]
    fn test_config_inspection_actions() {
        for (arg, want) in [
            ("show", ConfigAction::Show),
            ("path", ConfigAction::Path),
            ("dump", ConfigAction::Dump),
        ] {
            match parse(&["config", arg]).command {
                Some(Commands::Config { action }) => {
                    assert_eq!(
                        std::mem::discriminant(&action),
                        std::mem::discriminant(&want)
                    );
                }
                other => panic!("expected config subcommand, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_config_without_action_shows_help() {
        let err = Cli::try_parse_from(["edgescribe", "config"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn test_apply_overrides_updates_only_passed_flags() {
        let cli = parse(&["--model", "tiny", "--gain", "12.5"]);

        let mut config = Config::default();
        let default_overlap = config.chunking.overlap_duration;
        cli.apply_overrides(&mut config).unwrap();

        assert_eq!(config.inference.model_variant, ModelVariant::Tiny);
        assert_eq!(config.audio.gain, 12.5);
        assert_eq!(config.chunking.overlap_duration, default_overlap);
        assert!(config.audio.device.is_none());
    }

    #[test]
    fn test_apply_overrides_device_and_model_path() {
        let cli = parse(&["--device", "hw:1", "--model-path", "/models/custom.bin"]);

        let mut config = Config::default();
        cli.apply_overrides(&mut config).unwrap();

        assert_eq!(config.audio.device.as_deref(), Some("hw:1"));
        assert_eq!(
            config.inference.model_path,
            Some(PathBuf::from("/models/custom.bin"))
        );
    }

    #[test]
    fn test_apply_overrides_rejects_unknown_model() {
        let cli = parse(&["--model", "enormous"]);
        let mut config = Config::default();

        let err = cli.apply_overrides(&mut config).unwrap_err();
        assert!(err.to_string().contains("enormous"));
    }

    #[test]
    fn test_no_overrides_leaves_config_untouched() {
        let cli = parse(&[]);
        let mut config = Config::default();
        let before = config.clone();

        cli.apply_overrides(&mut config).unwrap();
        assert_eq!(config, before);
    }
}
