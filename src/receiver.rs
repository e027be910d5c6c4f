//! Receiver loop: accept one sender at a time and play what it sends
//!
//! ```text
//! Idle -> Listening -> Serving(peer) -> Listening -> ... -> ShuttingDown
//! ```
//!
//! The listening socket has a backlog of one and connections are served
//! inline, so a second sender waits in the backlog until the first one
//! disconnects. Accept timeouts just loop back to check for cancellation.

use parking_lot::Mutex;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use tracing::{error, info, info_span, trace, warn};

use crate::archive::WavArchive;
use crate::audio::{PlaybackOpener, PlaybackSink};
use crate::config::SessionConfig;
use crate::constants::LISTEN_BACKLOG;
use crate::error::{Error, NetworkError, Result};
use crate::lifecycle::CancelToken;
use crate::network::{read_full, Listener};
use crate::session::Session;

/// Where the receiver is in its accept/serve cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    Listening,
    Serving(SocketAddr),
    ShuttingDown,
}

/// Cloneable view of a running receiver, for other threads
#[derive(Clone)]
pub struct ReceiverHandle {
    state: Arc<Mutex<ReceiverState>>,
    local_addr: Arc<Mutex<Option<SocketAddr>>>,
    cancel: CancelToken,
}

impl ReceiverHandle {
    pub fn state(&self) -> ReceiverState {
        *self.state.lock()
    }

    /// Bound address, once listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Ask the receiver to stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn set_state(&self, state: ReceiverState) {
        *self.state.lock() = state;
    }
}

/// Totals over the receiver's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveSummary {
    pub connections: u64,
    pub chunks_received: u64,
    pub bytes_received: u64,
}

/// Plays audio from one sender at a time
pub struct AudioReceiver<O: PlaybackOpener> {
    config: SessionConfig,
    opener: O,
    cancel: CancelToken,
    archive: Option<WavArchive>,
    handle: ReceiverHandle,
}

impl<O: PlaybackOpener> AudioReceiver<O> {
    pub fn new(config: SessionConfig, opener: O, cancel: CancelToken) -> Self {
        let handle = ReceiverHandle {
            state: Arc::new(Mutex::new(ReceiverState::Idle)),
            local_addr: Arc::new(Mutex::new(None)),
            cancel: cancel.clone(),
        };
        Self {
            config,
            opener,
            cancel,
            archive: None,
            handle,
        }
    }

    /// Also append everything received to `archive`
    pub fn with_archive(mut self, archive: WavArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn handle(&self) -> ReceiverHandle {
        self.handle.clone()
    }

    /// Listen and serve connections until cancelled or a fatal error
    pub fn run(&mut self) -> Result<ReceiveSummary> {
        self.config.validate()?;
        let addr = self.config.bind_addr()?;

        let span = info_span!("receiver", listen = %addr);
        let _enter = span.enter();

        let listener = Listener::bind(addr, LISTEN_BACKLOG)?;
        *self.handle.local_addr.lock() = Some(listener.local_addr());
        self.handle.set_state(ReceiverState::Listening);
        info!(address = %listener.local_addr(), "Waiting for new connection...");

        let mut summary = ReceiveSummary::default();
        let result = self.accept_loop(&listener, &mut summary);

        self.handle.set_state(ReceiverState::ShuttingDown);
        info!(
            connections = summary.connections,
            chunks = summary.chunks_received,
            "Shutting down receiver"
        );
        drop(listener);

        let finalized = match self.archive.as_mut() {
            Some(archive) => archive.finalize(),
            None => Ok(()),
        };
        result.and(finalized).map(|_| summary)
    }

    fn accept_loop(&mut self, listener: &Listener, summary: &mut ReceiveSummary) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let (stream, peer) = match listener.accept_timeout(self.config.socket_timeout)? {
                Some(accepted) => accepted,
                None => continue,
            };

            info!(peer = %peer, "New connection");
            self.handle.set_state(ReceiverState::Serving(peer));
            summary.connections += 1;

            match self.serve(stream, peer, summary) {
                Ok(()) => {}
                Err(e) if e.is_interrupted() || self.cancel.is_cancelled() => return Ok(()),
                // Device and archive failures will not fix themselves
                Err(e @ Error::Audio(_)) | Err(e @ Error::Archive(_)) => return Err(e),
                Err(e) => error!(peer = %peer, error = %e, "Connection failed"),
            }

            self.handle.set_state(ReceiverState::Listening);
            info!("Waiting for new connection...");
        }
    }

    /// Relay one connection to a fresh playback stream until the peer closes
    fn serve(&mut self, stream: TcpStream, peer: SocketAddr, summary: &mut ReceiveSummary) -> Result<()> {
        stream.set_read_timeout(Some(self.config.socket_timeout))?;

        let span = info_span!("connection", peer = %peer);
        let mut session = Session::new(span.clone());
        let _enter = span.enter();
        session.attach_socket(stream);

        info!("Receiving audio...");
        session.attach_audio(self.opener.open(&self.config)?);

        let result = relay(
            &mut session,
            self.config.chunk_bytes(),
            self.archive.as_mut(),
            &self.cancel,
            summary,
        );
        match &result {
            Ok(chunks) => info!(chunks, "Data stopped"),
            Err(e) => warn!(error = %e, "Data interrupted"),
        }

        session.shutdown();
        result.map(|_| ())
    }
}

fn relay<S: PlaybackSink>(
    session: &mut Session<S>,
    chunk_bytes: usize,
    mut archive: Option<&mut WavArchive>,
    cancel: &CancelToken,
    summary: &mut ReceiveSummary,
) -> Result<u64> {
    let Some((sink, socket)) = session.io() else {
        return Ok(0);
    };

    let mut buf = vec![0u8; chunk_bytes];
    let mut chunks = 0u64;
    loop {
        let n = read_full(socket, &mut buf, cancel).map_err(NetworkError::receive)?;
        if n == 0 {
            break;
        }

        let data = &buf[..n];
        sink.write_chunk(data)?;
        if let Some(archive) = archive.as_deref_mut() {
            archive.append(data)?;
        }

        chunks += 1;
        summary.chunks_received += 1;
        summary.bytes_received += n as u64;
        trace!(chunk = chunks, bytes = n, "Chunk received");

        if n < chunk_bytes {
            // Peer closed mid-chunk; the tail has been played
            break;
        }
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioStream;
    use std::io::Write;
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Clone, Default)]
    struct Recorded {
        chunks: Arc<Mutex<Vec<Vec<u8>>>>,
        opened: Arc<Mutex<usize>>,
        stopped: Arc<Mutex<usize>>,
    }

    struct RecordingSink(Recorded);

    impl AudioStream for RecordingSink {
        fn stop(&mut self) {
            *self.0.stopped.lock() += 1;
        }
    }

    impl PlaybackSink for RecordingSink {
        fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
            self.0.chunks.lock().push(data.to_vec());
            Ok(())
        }
    }

    impl PlaybackOpener for Recorded {
        type Sink = RecordingSink;

        fn open(&mut self, _config: &SessionConfig) -> Result<RecordingSink> {
            *self.opened.lock() += 1;
            Ok(RecordingSink(self.clone()))
        }
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            host: "127.0.0.1".into(),
            port: 0,
            chunk_size: 4,
            channels: 1,
            socket_timeout: Duration::from_millis(100),
            ..Default::default()
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting");
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn spawn(
        recorded: Recorded,
    ) -> (ReceiverHandle, thread::JoinHandle<Result<ReceiveSummary>>) {
        let mut receiver = AudioReceiver::new(test_config(), recorded, CancelToken::new());
        let handle = receiver.handle();
        let join = thread::spawn(move || receiver.run());
        wait_for(|| handle.local_addr().is_some());
        (handle, join)
    }

    #[test]
    fn test_trailing_partial_chunk_is_played() {
        let recorded = Recorded::default();
        let (handle, join) = spawn(recorded.clone());

        let mut client = TcpStream::connect(handle.local_addr().unwrap()).unwrap();
        client.write_all(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]).unwrap();
        drop(client);

        wait_for(|| *recorded.stopped.lock() == 1);
        handle.cancel();
        let summary = join.join().unwrap().unwrap();

        let chunks = recorded.chunks.lock().clone();
        assert_eq!(chunks, vec![vec![1, 2, 3, 4, 5, 6, 7, 8], vec![9, 10, 11]]);
        assert_eq!(summary.connections, 1);
        assert_eq!(summary.chunks_received, 2);
        assert_eq!(summary.bytes_received, 11);
        assert_eq!(handle.state(), ReceiverState::ShuttingDown);
    }

    #[test]
    fn test_serves_connections_in_sequence() {
        let recorded = Recorded::default();
        let (handle, join) = spawn(recorded.clone());
        let addr = handle.local_addr().unwrap();

        for round in 0..3u8 {
            let mut client = TcpStream::connect(addr).unwrap();
            client.write_all(&[round; 8]).unwrap();
            drop(client);
            wait_for(|| *recorded.stopped.lock() == round as usize + 1);
        }

        handle.cancel();
        let summary = join.join().unwrap().unwrap();
        assert_eq!(summary.connections, 3);
        assert_eq!(*recorded.opened.lock(), 3);
        assert_eq!(recorded.chunks.lock().len(), 3);
    }

    #[test]
    fn test_open_failure_is_fatal() {
        struct Broken;
        impl PlaybackOpener for Broken {
            type Sink = RecordingSink;
            fn open(&mut self, _config: &SessionConfig) -> Result<RecordingSink> {
                Err(crate::error::AudioError::DeviceNotFound("no output".into()).into())
            }
        }

        let mut receiver = AudioReceiver::new(test_config(), Broken, CancelToken::new());
        let handle = receiver.handle();
        let join = thread::spawn(move || receiver.run());
        wait_for(|| handle.local_addr().is_some());

        let _client = TcpStream::connect(handle.local_addr().unwrap()).unwrap();
        let err = join.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::Audio(_)));
    }

    #[test]
    fn test_bind_conflict() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = test_config();
        config.port = taken.local_addr().unwrap().port();
        let mut receiver = AudioReceiver::new(config, Recorded::default(), CancelToken::new());
        assert!(matches!(
            receiver.run(),
            Err(Error::Network(NetworkError::BindFailed(_)))
        ));
    }
}
