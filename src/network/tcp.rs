//! TCP plumbing for the relay
//!
//! Every blocking socket operation here is bounded by the session's socket
//! timeout so the relay loops get a chance to observe cancellation.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::constants::ACCEPT_POLL_INTERVAL;
use crate::error::{NetworkError, Result};
use crate::lifecycle::CancelToken;

/// Connect to a receiver and apply the socket timeout to reads and writes
pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", addr, e)))?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    Ok(stream)
}

/// Listening socket with a short backlog and timed accepts
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind with `SO_REUSEADDR` and listen with the given backlog
    pub fn bind(addr: SocketAddr, backlog: i32) -> Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        socket.set_reuse_address(true)?;
        socket
            .bind(&SockAddr::from(addr))
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;
        socket
            .listen(backlog)
            .map_err(|e| NetworkError::BindFailed(format!("listen on {}: {}", addr, e)))?;
        // accept() is polled so it can give up after the socket timeout
        socket.set_nonblocking(true)?;

        let inner: TcpListener = socket.into();
        let local_addr = inner.local_addr()?;
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait up to `timeout` for a connection. `Ok(None)` means the timeout
    /// passed with nobody connecting, which is not an error.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<Option<(TcpStream, SocketAddr)>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.inner.accept() {
                Ok((stream, peer)) => {
                    // Some platforms hand out sockets inheriting O_NONBLOCK
                    stream.set_nonblocking(false)?;
                    return Ok(Some((stream, peer)));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL.min(deadline - now));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    debug!("accept interrupted, retrying");
                }
                Err(e) => return Err(NetworkError::AcceptFailed(e.to_string()).into()),
            }
        }
    }
}

/// Fill `buf` from `reader`, returning fewer bytes only when the peer closed.
///
/// Read timeouts are not errors: they check `cancel` and keep reading. Once
/// cancelled, the next timeout fails with `ErrorKind::Interrupted`.
pub fn read_full<R: Read>(reader: &mut R, buf: &mut [u8], cancel: &CancelToken) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                if cancel.is_cancelled() {
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "session cancelled"));
                }
            }
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
