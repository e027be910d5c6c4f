//! Command-line interface for `trx`
//!
//! Handles argument parsing, merging with the config file, and logging
//! setup.

use clap::{Args, Parser, Subcommand};
use file_rotate::{compression::Compression, suffix::AppendCount, ContentLimit, FileRotate};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{FileConfig, SessionConfig};
use crate::constants::{LOG_BACKUP_COUNT, LOG_MAX_BYTES};
use crate::error::{Error, Result};

/// Send or receive raw PCM audio over TCP
#[derive(Parser, Debug)]
#[command(name = "trx")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML config file (default: per-user trx.toml if present)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Also log messages to this file
    #[arg(long = "log", global = true, value_name = "FILENAME")]
    pub log_file: Option<PathBuf>,

    /// Do not log to stderr
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Log debug messages also
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List available audio devices and quit
    ListDevices {
        /// Print the device list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Capture audio and transmit it to a listening receiver
    #[command(visible_alias = "tx")]
    Transmit {
        #[command(flatten)]
        audio: AudioArgs,

        #[command(flatten)]
        network: NetworkArgs,

        /// Max duration of audio to capture and send (0 = unlimited)
        #[arg(long, value_name = "SECS")]
        duration: Option<f64>,
    },

    /// Listen for a transmitter and play what it sends
    #[command(visible_alias = "rx")]
    Receive {
        #[command(flatten)]
        audio: AudioArgs,

        #[command(flatten)]
        network: NetworkArgs,

        /// Also write received audio to this WAV file
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

/// Common audio options
#[derive(Args, Debug, Default, Clone)]
pub struct AudioArgs {
    /// Sample rate in Hz [default: 44100]
    #[arg(long, value_name = "HZ")]
    pub rate: Option<u32>,

    /// Frames per buffer [default: 1024]
    #[arg(long, value_name = "FRAMES")]
    pub chunk_size: Option<usize>,

    /// Number of audio channels [default: 1]
    #[arg(long, value_name = "QTY")]
    pub channels: Option<u16>,

    /// Audio device index from `list-devices` [default: system default]
    #[arg(long = "dev", value_name = "ID")]
    pub device: Option<usize>,
}

/// Network options
#[derive(Args, Debug, Default, Clone)]
pub struct NetworkArgs {
    /// Transmit: receiver host. Receive: bind address (empty for any)
    #[arg(long, value_name = "ADDR")]
    pub host: Option<String>,

    /// TCP port number [default: 50007]
    #[arg(long, value_name = "NUM")]
    pub port: Option<u16>,

    /// TCP socket timeout in seconds [default: 1.0]
    #[arg(long = "timeout", value_name = "SECS")]
    pub timeout: Option<f64>,
}

impl AudioArgs {
    fn apply(&self, config: &mut SessionConfig) {
        if let Some(rate) = self.rate {
            config.rate = rate;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(channels) = self.channels {
            config.channels = channels;
        }
        if self.device.is_some() {
            config.device = self.device;
        }
    }
}

impl NetworkArgs {
    fn apply(&self, config: &mut SessionConfig) -> Result<()> {
        if let Some(ref host) = self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.timeout {
            config.socket_timeout = seconds("--timeout", secs)?;
        }
        Ok(())
    }
}

fn seconds(flag: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::Config(format!("{} must be a non-negative number of seconds", flag)))
}

impl Cli {
    /// Resolve the session configuration: defaults, then the config file,
    /// then command-line flags.
    pub fn session_config(&self, file: &FileConfig) -> Result<SessionConfig> {
        let mut config = SessionConfig::default();
        config.apply_file(file);

        match &self.command {
            Command::ListDevices { .. } => {}
            Command::Transmit {
                audio,
                network,
                duration,
            } => {
                audio.apply(&mut config);
                network.apply(&mut config)?;
                if let Some(secs) = *duration {
                    let duration = seconds("--duration", secs)?;
                    config.duration = (!duration.is_zero()).then_some(duration);
                }
            }
            Command::Receive {
                audio,
                network,
                output,
            } => {
                audio.apply(&mut config);
                network.apply(&mut config)?;
                config.output = output.clone();
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Log level from flags and the config file's `[logging]` section
    pub fn log_level(&self, file: &FileConfig) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            file.logging.level.clone().unwrap_or_else(|| "info".to_string())
        }
    }

    /// Log file from the flag, else the config file
    pub fn log_file<'a>(&'a self, file: &'a FileConfig) -> Option<&'a Path> {
        self.log_file
            .as_deref()
            .or(file.logging.file.as_deref())
    }
}

/// Appending log file that rolls over to `<path>.1` .. `<path>.<backups>`
/// once it reaches `max_bytes`.
pub fn rotating_log(path: &Path, max_bytes: usize, backups: usize) -> Result<FileRotate<AppendCount>> {
    // Surface a bad path now rather than on the first log line
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::Config(format!("cannot open log file '{}': {}", path.display(), e)))?;

    Ok(FileRotate::new(
        path,
        AppendCount::new(backups),
        ContentLimit::Bytes(max_bytes),
        Compression::None,
        #[cfg(unix)]
        None,
    ))
}

/// Install the global subscriber: stderr unless `quiet`, plus a rotating
/// file layer when `log_file` is set. `RUST_LOG` overrides `level`.
pub fn init_logging(level: &str, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_layer = (!quiet).then(|| fmt::layer().with_writer(std::io::stderr));

    let file_layer = match log_file {
        Some(path) => {
            let file = rotating_log(path, LOG_MAX_BYTES, LOG_BACKUP_COUNT)?;
            eprintln!("Logging to {}", path.display());
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(e.to_string()))
}
