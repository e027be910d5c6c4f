//! WAV archive of received audio
//!
//! The receiver can append every chunk it plays to a 16-bit PCM WAV file.
//! The header (channels, sample width, frame rate) is fixed when the file is
//! created; hound patches the data length on [`WavArchive::finalize`].

use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::chunk::decode_samples;
use crate::constants::SAMPLE_WIDTH;
use crate::error::{Error, Result};

/// Append-only WAV writer
pub struct WavArchive {
    writer: Option<WavWriter<BufWriter<File>>>,
    path: PathBuf,
    frames_written: u64,
    channels: u16,
}

impl WavArchive {
    /// Create (or truncate) `path` with a header for `rate` Hz, `channels`
    pub fn create(path: impl AsRef<Path>, rate: u32, channels: u16) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: (SAMPLE_WIDTH * 8) as u16,
            sample_format: SampleFormat::Int,
        };

        let writer = WavWriter::create(&path, spec)
            .map_err(|e| Error::Archive(format!("failed to create '{}': {}", path.display(), e)))?;

        info!(path = %path.display(), rate, channels, "Archiving received audio");

        Ok(Self {
            writer: Some(writer),
            path,
            frames_written: 0,
            channels,
        })
    }

    /// Append raw s16le bytes.
    ///
    /// Only whole frames are written. A trailing partial frame (a sender cut
    /// off mid-write) is dropped so channels stay aligned and the header
    /// can still be finalized.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Archive("archive already finalized".into()))?;

        let frame_bytes = self.channels as usize * SAMPLE_WIDTH;
        let whole = data.len() - data.len() % frame_bytes;
        if whole < data.len() {
            debug!(dropped = data.len() - whole, "Partial frame not archived");
        }

        let samples = decode_samples(&data[..whole]);
        for &sample in &samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Archive(format!("failed to write sample: {}", e)))?;
        }
        self.frames_written += (samples.len() / self.channels as usize) as u64;
        Ok(())
    }

    /// Write the final header. Safe to call more than once.
    pub fn finalize(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| Error::Archive(format!("failed to finalize WAV file: {}", e)))?;
            debug!(path = %self.path.display(), frames = self.frames_written, "Archive finalized");
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Drop for WavArchive {
    fn drop(&mut self) {
        let _ = self.finalize();
    }
}
