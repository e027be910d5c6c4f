//! Buffers between cpal callbacks and the blocking relay loops
//!
//! cpal delivers and requests samples in whatever block size the driver
//! picks. On the capture side [`ChunkAssembler`] regroups those blocks into
//! fixed-size chunks; on the playback side [`SampleFeed`] hands queued
//! samples to the output callback one at a time.

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::chunk::{AudioChunk, ChunkLayout};
use crate::error::AudioError;
use crate::lifecycle::CancelToken;

/// Regroups captured sample blocks into chunks of exactly `layout.samples()`
pub struct ChunkAssembler {
    layout: ChunkLayout,
    pending: Vec<i16>,
}

impl ChunkAssembler {
    pub fn new(layout: ChunkLayout) -> Self {
        Self {
            layout,
            pending: Vec::with_capacity(layout.samples() * 2),
        }
    }

    /// Append a block of captured samples
    pub fn push(&mut self, samples: &[i16]) {
        self.pending.extend_from_slice(samples);
    }

    /// Take the next full chunk, if one has accumulated
    pub fn pop_chunk(&mut self) -> Option<AudioChunk> {
        let n = self.layout.samples();
        if self.pending.len() < n {
            return None;
        }
        let chunk = AudioChunk::from_samples(&self.pending[..n]);
        self.pending.drain(..n);
        Some(chunk)
    }

    /// Samples waiting for the next chunk
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Output-callback side of the playback queue
pub struct SampleFeed {
    rx: Receiver<Vec<i16>>,
    current: Vec<i16>,
    pos: usize,
    counters: StreamCounters,
}

impl SampleFeed {
    pub fn new(rx: Receiver<Vec<i16>>, counters: StreamCounters) -> Self {
        Self {
            rx,
            current: Vec::new(),
            pos: 0,
            counters,
        }
    }

    /// Next queued sample, or `None` on underrun
    pub fn next_sample(&mut self) -> Option<i16> {
        while self.pos >= self.current.len() {
            match self.rx.try_recv() {
                Ok(block) => {
                    self.current = block;
                    self.pos = 0;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
        let sample = self.current[self.pos];
        self.pos += 1;
        Some(sample)
    }

    /// Fill an output buffer, padding with silence on underrun
    pub fn fill<T>(&mut self, out: &mut [T], convert: impl Fn(i16) -> T) {
        let mut starved = false;
        for slot in out.iter_mut() {
            *slot = match self.next_sample() {
                Some(s) => convert(s),
                None => {
                    starved = true;
                    convert(0)
                }
            };
        }
        if starved {
            self.counters.record_underrun();
        }
    }
}

/// Overflow/underrun counts shared between a callback and its owner
#[derive(Clone, Default)]
pub struct StreamCounters {
    overflows: Arc<AtomicUsize>,
    underruns: Arc<AtomicUsize>,
}

impl StreamCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_overflow(&self) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn overflows(&self) -> usize {
        self.overflows.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }
}

/// Bounds on how long the relay thread waits on a device queue
#[derive(Debug, Clone)]
pub struct DeviceWait {
    /// How often `cancel` is checked, normally the socket timeout
    pub poll: Duration,
    /// How long the device may go quiet before it counts as failed
    pub stall: Duration,
    pub cancel: CancelToken,
}

impl DeviceWait {
    /// Block for the next captured block. Cancellation ends the wait with
    /// [`AudioError::Stopped`] within one `poll` interval.
    pub fn recv(&self, rx: &Receiver<Vec<i16>>) -> Result<Vec<i16>, AudioError> {
        let deadline = Instant::now() + self.stall;
        loop {
            let wait = self.poll.min(deadline.saturating_duration_since(Instant::now()));
            match rx.recv_timeout(wait) {
                Ok(block) => return Ok(block),
                Err(RecvTimeoutError::Disconnected) => return Err(AudioError::Stopped),
                Err(RecvTimeoutError::Timeout) => {
                    if self.cancel.is_cancelled() {
                        return Err(AudioError::Stopped);
                    }
                    if Instant::now() >= deadline {
                        return Err(AudioError::StreamError(format!(
                            "no audio from capture device for {:?}",
                            self.stall
                        )));
                    }
                }
            }
        }
    }

    /// Queue a block for playback, blocking while the queue is full
    pub fn send(&self, tx: &Sender<Vec<i16>>, block: Vec<i16>) -> Result<(), AudioError> {
        let deadline = Instant::now() + self.stall;
        let mut block = block;
        loop {
            let wait = self.poll.min(deadline.saturating_duration_since(Instant::now()));
            match tx.send_timeout(block, wait) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Disconnected(_)) => return Err(AudioError::Stopped),
                Err(SendTimeoutError::Timeout(returned)) => {
                    if self.cancel.is_cancelled() {
                        return Err(AudioError::Stopped);
                    }
                    if Instant::now() >= deadline {
                        return Err(AudioError::StreamError(format!(
                            "playback device consumed nothing for {:?}",
                            self.stall
                        )));
                    }
                    block = returned;
                }
            }
        }
    }
}
