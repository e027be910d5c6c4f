//! In-memory audio streams for driving sender and receiver over loopback

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use audio_trx::audio::{AudioStream, CaptureOpener, CaptureSource, PlaybackOpener, PlaybackSink};
use audio_trx::chunk::{AudioChunk, ChunkLayout};
use audio_trx::config::SessionConfig;
use audio_trx::Result;

/// Capture source whose n-th chunk holds a ramp starting at `base + n`
pub struct RampSource {
    layout: ChunkLayout,
    base: i16,
    produced: i16,
}

impl AudioStream for RampSource {
    fn stop(&mut self) {}
}

impl CaptureSource for RampSource {
    fn read_chunk(&mut self) -> Result<AudioChunk> {
        let start = self.base.wrapping_add(self.produced);
        self.produced = self.produced.wrapping_add(1);
        let samples: Vec<i16> = (0..self.layout.samples())
            .map(|i| start.wrapping_add(i as i16))
            .collect();
        Ok(AudioChunk::from_samples(&samples))
    }
}

pub struct RampOpener {
    pub base: i16,
}

impl CaptureOpener for RampOpener {
    type Source = RampSource;

    fn open(&mut self, config: &SessionConfig) -> Result<RampSource> {
        Ok(RampSource {
            layout: config.layout(),
            base: self.base,
            produced: 0,
        })
    }
}

/// Expected bytes of the n-th chunk from a [`RampSource`]
pub fn ramp_chunk(layout: ChunkLayout, base: i16, n: i16) -> Vec<u8> {
    let start = base.wrapping_add(n);
    let samples: Vec<i16> = (0..layout.samples())
        .map(|i| start.wrapping_add(i as i16))
        .collect();
    AudioChunk::from_samples(&samples).as_bytes().to_vec()
}

/// Shared record of everything played through [`RecordingSink`]s
#[derive(Clone, Default)]
pub struct Playback {
    pub chunks: Arc<Mutex<Vec<Vec<u8>>>>,
    pub opened: Arc<Mutex<usize>>,
    pub stopped: Arc<Mutex<usize>>,
    active: Arc<Mutex<usize>>,
    pub max_active: Arc<Mutex<usize>>,
}

impl Playback {
    pub fn opened(&self) -> usize {
        *self.opened.lock()
    }

    pub fn stopped(&self) -> usize {
        *self.stopped.lock()
    }
}

pub struct RecordingSink {
    playback: Playback,
    stopped: bool,
}

impl AudioStream for RecordingSink {
    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        *self.playback.active.lock() -= 1;
        *self.playback.stopped.lock() += 1;
    }
}

impl PlaybackSink for RecordingSink {
    fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        self.playback.chunks.lock().push(data.to_vec());
        Ok(())
    }
}

impl PlaybackOpener for Playback {
    type Sink = RecordingSink;

    fn open(&mut self, _config: &SessionConfig) -> Result<RecordingSink> {
        *self.opened.lock() += 1;
        let mut active = self.active.lock();
        *active += 1;
        let mut max = self.max_active.lock();
        *max = (*max).max(*active);
        Ok(RecordingSink {
            playback: self.clone(),
            stopped: false,
        })
    }
}

pub fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}

/// Loopback receiver config on an ephemeral port
pub fn loopback_config(rate: u32, channels: u16, chunk_size: usize) -> SessionConfig {
    SessionConfig {
        rate,
        channels,
        chunk_size,
        host: "127.0.0.1".into(),
        port: 0,
        ..Default::default()
    }
}

/// Duration whose chunk limit comes out at exactly `chunks`
pub fn duration_for_chunks(chunks: u64, rate: u32, chunk_size: usize) -> Duration {
    let nanos = (chunks as u128 * chunk_size as u128 * 1_000_000_000).div_ceil(rate as u128);
    Duration::from_nanos(nanos as u64)
}
