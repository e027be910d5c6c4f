//! # Audio TRX
//!
//! Raw PCM audio relay over TCP between two hosts.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────┐                ┌──────────────────────────────┐
//! │          SENDER              │                │          RECEIVER            │
//! │  ┌────────────┐              │                │              ┌────────────┐  │
//! │  │ Input dev  │ cpal thread  │                │  cpal thread │ Output dev │  │
//! │  └─────┬──────┘              │                │              └─────▲──────┘  │
//! │        ▼                     │                │                    │         │
//! │  ┌────────────┐              │   TCP stream   │              ┌─────┴──────┐  │
//! │  │  Capture   │──► s16le ────┼───────────────►┼── s16le ────►│  Playback  │  │
//! │  │  (chunks)  │   chunks     │  (no framing)  │   chunks     │  (+ WAV)   │  │
//! │  └────────────┘              │                │              └────────────┘  │
//! └──────────────────────────────┘                └──────────────────────────────┘
//! ```
//!
//! The sender captures fixed-size chunks and writes them back to back; the
//! receiver reads the same chunk size and plays each one as it arrives. The
//! receiver serves one sender at a time. A separate [`echo`] service answers
//! one read per connection for connectivity checks.

pub mod archive;
pub mod audio;
pub mod chunk;
pub mod cli;
pub mod config;
pub mod echo;
pub mod error;
pub mod lifecycle;
pub mod network;
#[cfg(feature = "receiver")]
pub mod receiver;
#[cfg(feature = "sender")]
pub mod sender;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default sample rate in Hz
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default frames per chunk
    pub const DEFAULT_CHUNK_SIZE: usize = 1024;

    /// Default TCP port for the audio stream
    pub const DEFAULT_PORT: u16 = 50007;

    /// Default connect/accept/read/write timeout
    pub const DEFAULT_SOCKET_TIMEOUT_SECS: f64 = 1.0;

    /// Bytes per sample on the wire (signed 16-bit little endian)
    pub const SAMPLE_WIDTH: usize = 2;

    /// Pending connections the receiver queues while serving
    pub const LISTEN_BACKLOG: i32 = 1;

    /// How often a nonblocking accept is retried
    pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

    /// Longest a device may go without delivering or taking audio
    pub const DEVICE_STALL_TIMEOUT: Duration = Duration::from_secs(5);

    /// Capture callback blocks buffered before overflow
    pub const CAPTURE_QUEUE_BLOCKS: usize = 64;

    /// Chunks buffered ahead of the playback callback
    pub const PLAYBACK_QUEUE_CHUNKS: usize = 8;

    /// Largest single read the echo service answers
    pub const ECHO_MAX_READ: usize = 1024;

    /// Size at which the `--log` file is rotated
    pub const LOG_MAX_BYTES: usize = 20_000_000;

    /// Rotated log files kept next to the live one
    pub const LOG_BACKUP_COUNT: usize = 5;

    /// Echo service listen address
    pub const DEFAULT_ECHO_ADDR: &str = "0.0.0.0:7";
}
