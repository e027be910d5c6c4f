//! Session: one audio stream paired with one socket
//!
//! A [`Session`] exclusively owns both handles for as long as a sender runs
//! or a receiver serves one connection. [`Session::shutdown`] stops and
//! closes the audio stream first, then the socket. It runs at most once no
//! matter how often it is called, and `Drop` calls it, so every exit path
//! (normal end, error, cancellation, panic unwinding) releases both handles.

use std::net::{Shutdown, SocketAddr, TcpStream};
use tracing::{debug, info, Span};

use crate::audio::AudioStream;

/// Live pairing of an audio stream and a socket
pub struct Session<A: AudioStream> {
    audio: Option<A>,
    socket: Option<TcpStream>,
    peer: Option<SocketAddr>,
    span: Span,
    closed: bool,
}

impl<A: AudioStream> Session<A> {
    /// Start an empty session logging under `span`
    pub fn new(span: Span) -> Self {
        Self {
            audio: None,
            socket: None,
            peer: None,
            span,
            closed: false,
        }
    }

    pub fn attach_socket(&mut self, socket: TcpStream) {
        self.peer = socket.peer_addr().ok();
        self.socket = Some(socket);
    }

    pub fn attach_audio(&mut self, audio: A) {
        self.audio = Some(audio);
    }

    /// Both handles, once both are attached and the session is still open
    pub fn io(&mut self) -> Option<(&mut A, &mut TcpStream)> {
        match (self.audio.as_mut(), self.socket.as_mut()) {
            (Some(audio), Some(socket)) => Some((audio, socket)),
            _ => None,
        }
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// The session's logging context
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn is_open(&self) -> bool {
        !self.closed
    }

    /// Release the audio stream, then the socket. Idempotent.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let _enter = self.span.enter();
        info!("Shutting down");

        if let Some(mut audio) = self.audio.take() {
            audio.stop();
        }
        if let Some(socket) = self.socket.take() {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                // Already closed by the peer
                debug!(error = %e, "Socket shutdown");
            }
        }
    }
}

impl<A: AudioStream> Drop for Session<A> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
