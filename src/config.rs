//! Session configuration
//!
//! A [`SessionConfig`] is built once at startup from built-in defaults, an
//! optional TOML file and command-line overrides (in increasing order of
//! precedence), then handed to a sender or receiver and never mutated.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunk::ChunkLayout;
use crate::constants::*;
use crate::error::{Error, NetworkError, Result};

/// Immutable configuration for one sender or receiver session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Sample rate in Hz
    pub rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Frames per chunk
    pub chunk_size: usize,
    /// Device index from `list-devices`, `None` for the host default
    pub device: Option<usize>,
    /// Receiver address for the sender, bind address for the receiver
    pub host: String,
    pub port: u16,
    /// Timeout applied to connect, accept, read and write
    pub socket_timeout: Duration,
    /// Sender only: stop after this much audio
    pub duration: Option<Duration>,
    /// Receiver only: also archive received audio to this WAV file
    pub output: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            device: None,
            host: String::new(),
            port: DEFAULT_PORT,
            socket_timeout: Duration::from_secs_f64(DEFAULT_SOCKET_TIMEOUT_SECS),
            duration: None,
            output: None,
        }
    }
}

impl SessionConfig {
    /// Reject values no audio device or socket can work with
    pub fn validate(&self) -> Result<()> {
        if self.rate == 0 {
            return Err(Error::Config("sample rate must be positive".into()));
        }
        if self.channels == 0 {
            return Err(Error::Config("channel count must be positive".into()));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk size must be positive".into()));
        }
        if self.socket_timeout.is_zero() {
            return Err(Error::Config("socket timeout must be positive".into()));
        }
        Ok(())
    }

    pub fn layout(&self) -> ChunkLayout {
        ChunkLayout::new(self.chunk_size, self.channels)
    }

    /// Bytes in one chunk on the wire
    pub fn chunk_bytes(&self) -> usize {
        self.layout().bytes()
    }

    /// Number of chunks the sender transmits, `None` when unlimited.
    ///
    /// `rate / chunk_size * duration` truncated to a whole chunk, computed on
    /// integers so exact durations are not lost to float error. A duration
    /// shorter than one chunk sends nothing.
    pub fn chunk_limit(&self) -> Option<u64> {
        let duration = self.duration.filter(|d| !d.is_zero())?;
        let numerator = self.rate as u128 * duration.as_nanos();
        let denominator = self.chunk_size as u128 * 1_000_000_000;
        Some((numerator / denominator) as u64)
    }

    /// Address the receiver listens on. An empty host binds all interfaces.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        if self.host.is_empty() {
            return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port));
        }
        resolve(&self.host, self.port)
    }

    /// Address the sender connects to. An empty host means this machine.
    pub fn remote_addr(&self) -> Result<SocketAddr> {
        if self.host.is_empty() {
            return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.port));
        }
        resolve(&self.host, self.port)
    }

    /// Overlay values set in a config file. CLI overrides go on top after.
    pub fn apply_file(&mut self, file: &FileConfig) {
        let audio = &file.audio;
        if let Some(rate) = audio.rate {
            self.rate = rate;
        }
        if let Some(channels) = audio.channels {
            self.channels = channels;
        }
        if let Some(chunk_size) = audio.chunk_size {
            self.chunk_size = chunk_size;
        }
        if audio.device.is_some() {
            self.device = audio.device;
        }

        let network = &file.network;
        if let Some(ref host) = network.host {
            self.host = host.clone();
        }
        if let Some(port) = network.port {
            self.port = port;
        }
        if let Some(secs) = network.timeout_secs {
            if secs.is_finite() && secs > 0.0 {
                self.socket_timeout = Duration::from_secs_f64(secs);
            }
        }
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| NetworkError::InvalidAddress(format!("{}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| NetworkError::InvalidAddress(format!("{}:{}", host, port)).into())
}

/// TOML configuration file structure
///
/// ```toml
/// [audio]
/// rate = 48000
/// channels = 2
///
/// [network]
/// host = "192.168.1.20"
/// timeout_secs = 0.5
///
/// [logging]
/// level = "debug"
/// ```
#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub audio: AudioSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AudioSection {
    pub rate: Option<u32>,
    pub channels: Option<u16>,
    pub chunk_size: Option<usize>,
    pub device: Option<usize>,
}

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NetworkSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub timeout_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub file: Option<PathBuf>,
}

impl FileConfig {
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load an explicit config file. A missing file is an error here.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::parse(&contents)
            .map_err(|e| Error::Config(format!("failed to parse '{}': {}", path.display(), e)))
    }

    /// Load the explicit file if given, else the per-user default file if it
    /// exists, else an empty configuration.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }
}

/// `<config dir>/trx.toml` for the current user
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "audio-trx")
        .map(|dirs| dirs.config_dir().join("trx.toml"))
}
