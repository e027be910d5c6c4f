//! Error types for the audio relay

use std::io;
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether this error is the result of a shutdown interrupting a
    /// blocking call, which is a normal way for a session to end.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == io::ErrorKind::Interrupted,
            Error::Network(NetworkError::Io(e)) => e.kind() == io::ErrorKind::Interrupted,
            Error::Audio(AudioError::Stopped) => true,
            _ => false,
        }
    }
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Stream stopped")]
    Stopped,

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Accept failed: {0}")]
    AcceptFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Timeout")]
    Timeout,

    #[error(transparent)]
    Io(io::Error),
}

impl NetworkError {
    /// Map a socket write failure. Timeouts keep their own variant so the
    /// caller can tell a stalled peer from a broken one.
    pub fn send(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => NetworkError::Timeout,
            io::ErrorKind::Interrupted => NetworkError::Io(err),
            _ => NetworkError::SendFailed(err.to_string()),
        }
    }

    /// Map a socket read failure.
    pub fn receive(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::Interrupted => NetworkError::Io(err),
            _ => NetworkError::ReceiveFailed(err.to_string()),
        }
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
