//! Fixed-size PCM chunks
//!
//! Everything on the wire is signed 16-bit little-endian interleaved PCM.
//! A chunk is `chunk_size` frames of `channels` samples each, so its byte
//! length is always `chunk_size * channels * 2`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::SAMPLE_WIDTH;

/// Shape of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    chunk_size: usize,
    channels: u16,
}

impl ChunkLayout {
    pub fn new(chunk_size: usize, channels: u16) -> Self {
        Self { chunk_size, channels }
    }

    /// Frames per chunk
    pub fn frames(&self) -> usize {
        self.chunk_size
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Interleaved samples per chunk
    pub fn samples(&self) -> usize {
        self.chunk_size * self.channels as usize
    }

    /// Bytes per chunk
    pub fn bytes(&self) -> usize {
        self.samples() * SAMPLE_WIDTH
    }
}

/// One chunk of encoded PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    data: Bytes,
}

impl AudioChunk {
    /// Encode interleaved samples as s16le
    pub fn from_samples(samples: &[i16]) -> Self {
        let mut buf = BytesMut::with_capacity(samples.len() * SAMPLE_WIDTH);
        for &s in samples {
            buf.put_i16_le(s);
        }
        Self { data: buf.freeze() }
    }

    /// Wrap bytes that are already s16le
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// A chunk of silence with the given layout
    pub fn silence(layout: ChunkLayout) -> Self {
        Self {
            data: Bytes::from(vec![0u8; layout.bytes()]),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode back to samples. A trailing odd byte is ignored.
    pub fn samples(&self) -> Vec<i16> {
        decode_samples(&self.data)
    }
}

/// Decode s16le bytes into samples, ignoring a trailing odd byte
pub fn decode_samples(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(SAMPLE_WIDTH)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
