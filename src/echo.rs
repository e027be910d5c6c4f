//! Echo service.
//!
//! Each connection gets exactly one exchange: the server reads once (at
//! most [`ECHO_MAX_READ`] bytes), logs who sent what, writes the bytes back
//! unchanged and closes the connection. There is no framing; whatever a
//! single read returns is what gets echoed.
//!
//! ```text
//! client: hello
//! server: hello <close>
//! ```

use bytes::Bytes;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, error, info};

use crate::constants::ECHO_MAX_READ;
use crate::error::{NetworkError, Result};

/// Connection-per-request echo server
pub struct EchoServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl EchoServer {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!(address = %self.local_addr, "Echo server listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Echo server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer).await {
                                debug!(peer = %peer, error = %e, "Connection error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }
    }
}

/// Echo one read's worth of bytes back to the peer, then close.
///
/// Returns the number of bytes echoed.
pub async fn handle_connection(mut stream: TcpStream, peer: SocketAddr) -> io::Result<usize> {
    let mut buf = [0u8; ECHO_MAX_READ];
    let n = stream.read(&mut buf).await?;
    let data = Bytes::copy_from_slice(&buf[..n]);

    info!(peer = %peer.ip(), bytes = n, data = ?data, "{} wrote", peer.ip());

    stream.write_all(&data).await?;
    stream.shutdown().await?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    async fn start() -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<Result<()>>) {
        let server = EchoServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(server.run(async move {
            let _ = stop_rx.await;
        }));
        (addr, stop_tx, join)
    }

    async fn exchange(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(payload).await.unwrap();
        let mut echoed = Vec::new();
        client.read_to_end(&mut echoed).await.unwrap();
        echoed
    }

    #[tokio::test]
    async fn test_echo_unmodified() {
        let (addr, stop, join) = start().await;

        assert_eq!(exchange(addr, b"hello\r\n").await, b"hello\r\n");

        let binary: Vec<u8> = (0..=255u8).collect();
        assert_eq!(exchange(addr, &binary).await, binary);

        let _ = stop.send(());
        join.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_echo_full_buffer() {
        let (addr, stop, join) = start().await;

        let payload: Vec<u8> = (0..ECHO_MAX_READ).map(|i| (i % 251) as u8).collect();
        assert_eq!(exchange(addr, &payload).await, payload);

        let _ = stop.send(());
        join.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_empty_connection() {
        let (addr, stop, join) = start().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.shutdown().await.unwrap();
        let mut echoed = Vec::new();
        client.read_to_end(&mut echoed).await.unwrap();
        assert!(echoed.is_empty());

        let _ = stop.send(());
        join.await.unwrap().unwrap();
    }
}
