//! Sender loop: capture a chunk, send it, repeat
//!
//! Capture and send strictly alternate on one thread. A write failure is
//! fatal to the session; there is no retry, reconnect or extra buffering,
//! so a slow network shows up as capture overruns on the device side.

use std::io::Write;
use tracing::{debug, info, info_span, trace, warn};

use crate::audio::{CaptureOpener, CaptureSource};
use crate::config::SessionConfig;
use crate::error::{Error, NetworkError, Result};
use crate::lifecycle::CancelToken;
use crate::network::connect;
use crate::session::Session;

/// What a finished send session did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendSummary {
    pub chunks_sent: u64,
    pub bytes_sent: u64,
    /// Ended by cancellation rather than by reaching the duration limit
    pub cancelled: bool,
}

/// Streams captured audio to one receiver
pub struct AudioSender<O: CaptureOpener> {
    config: SessionConfig,
    opener: O,
    cancel: CancelToken,
}

impl<O: CaptureOpener> AudioSender<O> {
    pub fn new(config: SessionConfig, opener: O, cancel: CancelToken) -> Self {
        Self {
            config,
            opener,
            cancel,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connect, open the capture stream and send until the duration limit
    /// is reached or the session is cancelled. The session is always shut
    /// down before this returns.
    pub fn run(&mut self) -> Result<SendSummary> {
        self.config.validate()?;
        let addr = self.config.remote_addr()?;

        let span = info_span!("sender", remote = %addr);
        let mut session = Session::new(span.clone());
        let _enter = span.enter();

        info!("Opening socket connection");
        session.attach_socket(connect(addr, self.config.socket_timeout)?);

        info!("Opening audio stream");
        session.attach_audio(self.opener.open(&self.config)?);

        let limit = self.config.chunk_limit();
        info!(
            rate = self.config.rate,
            channels = self.config.channels,
            chunk_size = self.config.chunk_size,
            limit = ?limit,
            "Begin audio capture"
        );

        let result = self.send_loop(&mut session, limit);
        match &result {
            Ok(summary) => info!(
                chunks = summary.chunks_sent,
                bytes = summary.bytes_sent,
                cancelled = summary.cancelled,
                "Finished audio capture"
            ),
            Err(e) => warn!(error = %e, "Audio capture aborted"),
        }

        session.shutdown();
        result
    }

    fn send_loop<S: CaptureSource>(
        &self,
        session: &mut Session<S>,
        limit: Option<u64>,
    ) -> Result<SendSummary> {
        let mut summary = SendSummary::default();
        let Some((source, socket)) = session.io() else {
            return Ok(summary);
        };

        while limit.map_or(true, |limit| summary.chunks_sent < limit) {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let sent = source.read_chunk().and_then(|chunk| {
                socket
                    .write_all(chunk.as_bytes())
                    .map_err(|e| Error::from(NetworkError::send(e)))?;
                Ok(chunk.len())
            });

            match sent {
                Ok(bytes) => {
                    summary.chunks_sent += 1;
                    summary.bytes_sent += bytes as u64;
                    trace!(chunk = summary.chunks_sent, "Chunk sent");
                }
                Err(e) if e.is_interrupted() || self.cancel.is_cancelled() => {
                    debug!(error = %e, "Send interrupted by shutdown");
                    summary.cancelled = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(summary)
    }
}
