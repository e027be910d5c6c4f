//! Audio subsystem module
//!
//! The relay loops only ever see the blocking traits below. The cpal
//! implementations turn cpal's callback streams into blocking chunk reads
//! and writes; tests substitute in-memory implementations.

pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;

pub use buffer::{ChunkAssembler, SampleFeed, StreamCounters};
pub use capture::{CpalCapture, CpalCaptureOpener};
pub use device::{list_devices, DeviceInfo};
pub use playback::{CpalPlayback, CpalPlaybackOpener};

use crate::chunk::AudioChunk;
use crate::config::SessionConfig;
use crate::error::Result;

/// An open device stream owned by a session
pub trait AudioStream {
    /// Stop and close the stream. Calling it again does nothing.
    fn stop(&mut self);
}

/// Blocking source of captured chunks
pub trait CaptureSource: AudioStream {
    /// Block until one full chunk has been captured
    fn read_chunk(&mut self) -> Result<AudioChunk>;
}

/// Blocking sink for chunks to play
pub trait PlaybackSink: AudioStream {
    /// Queue raw s16le bytes for playback, blocking while the device is behind
    fn write_chunk(&mut self, data: &[u8]) -> Result<()>;
}

/// Opens a capture stream for a session
pub trait CaptureOpener {
    type Source: CaptureSource;

    fn open(&mut self, config: &SessionConfig) -> Result<Self::Source>;
}

/// Opens a playback stream, once per served connection
pub trait PlaybackOpener {
    type Sink: PlaybackSink;

    fn open(&mut self, config: &SessionConfig) -> Result<Self::Sink>;
}
