//! Audio capture from input devices
//!
//! cpal pushes samples from its own callback thread. The callback converts
//! them to i16 and hands each block over a bounded channel; the relay
//! thread blocks in [`CpalCapture::read_chunk`] until a full chunk is ready.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::audio::buffer::{ChunkAssembler, DeviceWait, StreamCounters};
use crate::audio::device::{find_device, negotiate, Direction};
use crate::audio::{AudioStream, CaptureOpener, CaptureSource};
use crate::chunk::AudioChunk;
use crate::config::SessionConfig;
use crate::constants::{CAPTURE_QUEUE_BLOCKS, DEVICE_STALL_TIMEOUT};
use crate::error::{AudioError, Result};
use crate::lifecycle::CancelToken;

/// Blocking capture stream on one input device
pub struct CpalCapture {
    stream: Option<cpal::Stream>,
    rx: Receiver<Vec<i16>>,
    error_rx: Receiver<AudioError>,
    assembler: ChunkAssembler,
    counters: StreamCounters,
    reported_overflows: usize,
    wait: DeviceWait,
}

impl CpalCapture {
    /// Open and start an input stream for the session's device and format.
    /// Reads give up once `cancel` is tripped.
    pub fn open(config: &SessionConfig, cancel: CancelToken) -> Result<Self> {
        let device = find_device(config.device, Direction::Input)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let negotiated = negotiate(
            &device,
            Direction::Input,
            config.rate,
            config.channels,
            config.chunk_size,
        )?;

        info!(
            device = %device_name,
            rate = config.rate,
            channels = config.channels,
            format = ?negotiated.sample_format,
            buffer = ?negotiated.config.buffer_size,
            "Opening capture stream"
        );

        let (tx, rx) = bounded::<Vec<i16>>(CAPTURE_QUEUE_BLOCKS);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let counters = StreamCounters::new();

        let stream_config = &negotiated.config;
        let stream = match negotiated.sample_format {
            SampleFormat::I8 => build::<i8>(&device, stream_config, tx, error_tx, counters.clone()),
            SampleFormat::I16 => build::<i16>(&device, stream_config, tx, error_tx, counters.clone()),
            SampleFormat::I32 => build::<i32>(&device, stream_config, tx, error_tx, counters.clone()),
            SampleFormat::U8 => build::<u8>(&device, stream_config, tx, error_tx, counters.clone()),
            SampleFormat::U16 => build::<u16>(&device, stream_config, tx, error_tx, counters.clone()),
            SampleFormat::U32 => build::<u32>(&device, stream_config, tx, error_tx, counters.clone()),
            SampleFormat::F32 => build::<f32>(&device, stream_config, tx, error_tx, counters.clone()),
            SampleFormat::F64 => build::<f64>(&device, stream_config, tx, error_tx, counters.clone()),
            other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
        }?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        Ok(Self {
            stream: Some(stream),
            rx,
            error_rx,
            assembler: ChunkAssembler::new(config.layout()),
            counters,
            reported_overflows: 0,
            wait: DeviceWait {
                poll: config.socket_timeout,
                stall: DEVICE_STALL_TIMEOUT.max(config.socket_timeout),
                cancel,
            },
        })
    }

    /// Callback blocks dropped because the relay thread fell behind
    pub fn overflows(&self) -> usize {
        self.counters.overflows()
    }

    fn report_overflows(&mut self) {
        let overflows = self.counters.overflows();
        if overflows > self.reported_overflows {
            debug!(
                dropped = overflows - self.reported_overflows,
                total = overflows,
                "Capture overrun"
            );
            self.reported_overflows = overflows;
        }
    }
}

fn build<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tx: Sender<Vec<i16>>,
    error_tx: Sender<AudioError>,
    counters: StreamCounters,
) -> std::result::Result<cpal::Stream, AudioError>
where
    T: SizedSample + Send + 'static,
    i16: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let block: Vec<i16> = data.iter().map(|s| i16::from_sample(*s)).collect();
                if let Err(TrySendError::Full(_)) = tx.try_send(block) {
                    counters.record_overflow();
                }
            },
            move |err| {
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

impl AudioStream for CpalCapture {
    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!(error = %e, "Failed to pause capture stream");
            }
            drop(stream);
            self.assembler.clear();
            info!(overruns = self.counters.overflows(), "Capture stream closed");
        }
    }
}

impl CaptureSource for CpalCapture {
    fn read_chunk(&mut self) -> Result<AudioChunk> {
        loop {
            if let Some(chunk) = self.assembler.pop_chunk() {
                self.report_overflows();
                return Ok(chunk);
            }
            if self.stream.is_none() {
                return Err(AudioError::Stopped.into());
            }
            if let Ok(err) = self.error_rx.try_recv() {
                return Err(err.into());
            }
            let block = self.wait.recv(&self.rx)?;
            self.assembler.push(&block);
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens [`CpalCapture`] streams tied to one cancellation token
#[derive(Debug, Default, Clone)]
pub struct CpalCaptureOpener {
    cancel: CancelToken,
}

impl CpalCaptureOpener {
    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }
}

impl CaptureOpener for CpalCaptureOpener {
    type Source = CpalCapture;

    fn open(&mut self, config: &SessionConfig) -> Result<CpalCapture> {
        CpalCapture::open(config, self.cancel.clone())
    }
}
