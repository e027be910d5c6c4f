//! Audio playback on output devices
//!
//! [`CpalPlayback::write_chunk`] queues decoded samples on a bounded
//! channel and blocks while it is full, so the relay thread runs at the
//! device's pace. The output callback drains the queue and plays silence
//! when it runs dry.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::audio::buffer::{DeviceWait, SampleFeed, StreamCounters};
use crate::audio::device::{find_device, negotiate, Direction};
use crate::audio::{AudioStream, PlaybackOpener, PlaybackSink};
use crate::chunk::decode_samples;
use crate::config::SessionConfig;
use crate::constants::{DEVICE_STALL_TIMEOUT, PLAYBACK_QUEUE_CHUNKS};
use crate::error::{AudioError, Result};
use crate::lifecycle::CancelToken;

/// Blocking playback stream on one output device
pub struct CpalPlayback {
    stream: Option<cpal::Stream>,
    tx: Sender<Vec<i16>>,
    error_rx: Receiver<AudioError>,
    counters: StreamCounters,
    wait: DeviceWait,
    /// Upper bound on waiting for queued audio to play out on stop
    drain_timeout: Duration,
}

impl CpalPlayback {
    /// Open and start an output stream for the session's device and format.
    /// Writes give up once `cancel` is tripped.
    pub fn open(config: &SessionConfig, cancel: CancelToken) -> Result<Self> {
        let device = find_device(config.device, Direction::Output)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let negotiated = negotiate(
            &device,
            Direction::Output,
            config.rate,
            config.channels,
            config.chunk_size,
        )?;

        info!(
            device = %device_name,
            rate = config.rate,
            channels = config.channels,
            format = ?negotiated.sample_format,
            "Opening playback stream"
        );

        let (tx, rx) = bounded::<Vec<i16>>(PLAYBACK_QUEUE_CHUNKS);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let counters = StreamCounters::new();
        let feed = SampleFeed::new(rx, counters.clone());

        let stream_config = &negotiated.config;
        let stream = match negotiated.sample_format {
            SampleFormat::I8 => build::<i8>(&device, stream_config, feed, error_tx),
            SampleFormat::I16 => build::<i16>(&device, stream_config, feed, error_tx),
            SampleFormat::I32 => build::<i32>(&device, stream_config, feed, error_tx),
            SampleFormat::U8 => build::<u8>(&device, stream_config, feed, error_tx),
            SampleFormat::U16 => build::<u16>(&device, stream_config, feed, error_tx),
            SampleFormat::U32 => build::<u32>(&device, stream_config, feed, error_tx),
            SampleFormat::F32 => build::<f32>(&device, stream_config, feed, error_tx),
            SampleFormat::F64 => build::<f64>(&device, stream_config, feed, error_tx),
            other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
        }?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let chunk_secs = config.chunk_size as f64 / config.rate as f64;
        let drain_timeout =
            Duration::from_secs_f64(chunk_secs * (PLAYBACK_QUEUE_CHUNKS + 1) as f64);

        Ok(Self {
            stream: Some(stream),
            tx,
            error_rx,
            counters,
            wait: DeviceWait {
                poll: config.socket_timeout,
                stall: DEVICE_STALL_TIMEOUT.max(config.socket_timeout),
                cancel,
            },
            drain_timeout,
        })
    }

    /// Output callbacks that ran out of queued audio
    pub fn underruns(&self) -> usize {
        self.counters.underruns()
    }

    fn drain(&self) {
        let deadline = Instant::now() + self.drain_timeout;
        while !self.tx.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

fn build<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut feed: SampleFeed,
    error_tx: Sender<AudioError>,
) -> std::result::Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<i16> + Send + 'static,
{
    device
        .build_output_stream(
            config,
            move |out: &mut [T], _: &cpal::OutputCallbackInfo| {
                feed.fill(out, |s| T::from_sample(s));
            },
            move |err| {
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

impl AudioStream for CpalPlayback {
    fn stop(&mut self) {
        if self.stream.is_none() {
            return;
        }
        self.drain();
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!(error = %e, "Failed to pause playback stream");
            }
            drop(stream);
            info!(underruns = self.counters.underruns(), "Playback stream closed");
        }
    }
}

impl PlaybackSink for CpalPlayback {
    fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if self.stream.is_none() {
            return Err(AudioError::Stopped.into());
        }
        if let Ok(err) = self.error_rx.try_recv() {
            return Err(err.into());
        }
        self.wait.send(&self.tx, decode_samples(data))?;
        Ok(())
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens [`CpalPlayback`] streams tied to one cancellation token
#[derive(Debug, Default, Clone)]
pub struct CpalPlaybackOpener {
    cancel: CancelToken,
}

impl CpalPlaybackOpener {
    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }
}

impl PlaybackOpener for CpalPlaybackOpener {
    type Sink = CpalPlayback;

    fn open(&mut self, config: &SessionConfig) -> Result<CpalPlayback> {
        CpalPlayback::open(config, self.cancel.clone())
    }
}
