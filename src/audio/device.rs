//! Audio device enumeration and lookup
//!
//! Devices are addressed by their position in the default host's device
//! list, which is what `list-devices` prints and `--dev` accepts.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, SampleRate, SupportedBufferSize, SupportedStreamConfigRange};
use serde::Serialize;

use crate::error::AudioError;

/// Diagnostic description of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default_input: bool,
    pub is_default_output: bool,
    pub default_sample_rate: Option<u32>,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
}

impl DeviceInfo {
    pub fn is_default(&self) -> bool {
        self.is_default_input || self.is_default_output
    }

    /// `0: hw:Generic (DEFAULT OUTPUT)` style heading line
    pub fn heading(&self) -> String {
        let marker = match (self.is_default_input, self.is_default_output) {
            (true, true) => " (DEFAULT)",
            (true, false) => " (DEFAULT INPUT)",
            (false, true) => " (DEFAULT OUTPUT)",
            (false, false) => "",
        };
        format!("{}: {}{}", self.index, self.name, marker)
    }

    /// Heading plus indented details, as printed by `list-devices`
    pub fn describe(&self) -> String {
        format!(
            "{}\n    Default sample rate: {}\n    Max input/output channels: {}/{}",
            self.heading(),
            self.default_sample_rate.unwrap_or(0),
            self.max_input_channels,
            self.max_output_channels
        )
    }
}

/// Which way a stream moves audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// List all devices known to the default host
pub fn list_devices() -> Result<Vec<DeviceInfo>, AudioError> {
    let host = cpal::default_host();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    let devices = host
        .devices()
        .map_err(|e| AudioError::CpalError(e.to_string()))?;

    let mut infos = Vec::new();
    for (index, device) in devices.enumerate() {
        let name = device.name().unwrap_or_else(|_| "?".to_string());

        let input_ranges: Vec<SupportedStreamConfigRange> = device
            .supported_input_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default();
        let output_ranges: Vec<SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default();

        let default_sample_rate = device
            .default_output_config()
            .or_else(|_| device.default_input_config())
            .map(|c| c.sample_rate().0)
            .ok();

        infos.push(DeviceInfo {
            index,
            is_default_input: default_input_name.as_ref() == Some(&name),
            is_default_output: default_output_name.as_ref() == Some(&name),
            name,
            default_sample_rate,
            max_input_channels: max_channels(&input_ranges),
            max_output_channels: max_channels(&output_ranges),
        });
    }

    Ok(infos)
}

fn max_channels(ranges: &[SupportedStreamConfigRange]) -> u16 {
    ranges.iter().map(|r| r.channels()).max().unwrap_or(0)
}

/// Resolve `--dev` for the given direction. `None` picks the host default.
pub fn find_device(index: Option<usize>, direction: Direction) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    let Some(index) = index else {
        let device = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        return device
            .ok_or_else(|| AudioError::DeviceNotFound(format!("no default {} device", direction)));
    };

    let device = host
        .devices()
        .map_err(|e| AudioError::CpalError(e.to_string()))?
        .nth(index)
        .ok_or_else(|| AudioError::DeviceNotFound(format!("no device with index {}", index)))?;

    let has_direction = match direction {
        Direction::Input => device.supported_input_configs().map(|mut c| c.next().is_some()),
        Direction::Output => device.supported_output_configs().map(|mut c| c.next().is_some()),
    }
    .unwrap_or(false);

    if !has_direction {
        return Err(AudioError::DeviceNotFound(format!(
            "device {} has no {} channels",
            index, direction
        )));
    }

    Ok(device)
}

/// Concrete stream settings negotiated for a device
#[derive(Debug, Clone)]
pub struct NegotiatedConfig {
    pub config: cpal::StreamConfig,
    pub sample_format: SampleFormat,
}

/// Pick a stream configuration for the requested rate and channel count.
///
/// Prefers a native 16-bit format so no conversion happens, and a fixed
/// buffer of `chunk_size` frames when the device allows it.
pub fn negotiate(
    device: &cpal::Device,
    direction: Direction,
    rate: u32,
    channels: u16,
    chunk_size: usize,
) -> Result<NegotiatedConfig, AudioError> {
    let ranges: Vec<SupportedStreamConfigRange> = match direction {
        Direction::Input => device.supported_input_configs().map(|c| c.collect::<Vec<_>>()),
        Direction::Output => device.supported_output_configs().map(|c| c.collect::<Vec<_>>()),
    }
    .map_err(|e| AudioError::CpalError(e.to_string()))?;

    let rate = SampleRate(rate);
    let mut candidates: Vec<&SupportedStreamConfigRange> = ranges
        .iter()
        .filter(|r| r.channels() == channels)
        .filter(|r| r.min_sample_rate() <= rate && rate <= r.max_sample_rate())
        .collect();
    candidates.sort_by_key(|r| format_rank(r.sample_format()));

    let range = candidates.first().ok_or_else(|| {
        AudioError::UnsupportedFormat(format!(
            "{} {} channel(s) at {} Hz not supported",
            direction, channels, rate.0
        ))
    })?;

    let buffer_size = match range.buffer_size() {
        SupportedBufferSize::Range { min, max }
            if (*min as usize..=*max as usize).contains(&chunk_size) =>
        {
            cpal::BufferSize::Fixed(chunk_size as u32)
        }
        _ => cpal::BufferSize::Default,
    };

    Ok(NegotiatedConfig {
        config: cpal::StreamConfig {
            channels,
            sample_rate: rate,
            buffer_size,
        },
        sample_format: range.sample_format(),
    })
}

fn format_rank(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::I16 => 0,
        SampleFormat::F32 => 1,
        SampleFormat::I32 => 2,
        _ => 3,
    }
}
