use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::error::{TransferError, TransferResult};

/// Run `fut`, failing with `TimedOut` if it takes longer than `limit`
async fn bounded<T, F>(limit: Option<Duration>, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no progress within {}", humantime::format_duration(limit)),
            )
        })?,
        None => fut.await,
    }
}

/// One accepted or established TCP connection.
///
/// Every read and write is bounded by the configured I/O timeout; the
/// caller decides which [`TransferError`] a failure turns into.
pub struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    io_timeout: Option<Duration>,
}

impl Connection {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, io_timeout: Option<Duration>) -> Self {
        Self {
            stream,
            peer_addr,
            io_timeout,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read up to `buf.len()` bytes. `Ok(0)` means the peer closed.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        bounded(self.io_timeout, self.stream.read(buf)).await
    }

    /// Read whatever is already buffered without waiting. `None` if
    /// nothing is available right now.
    pub fn try_read_chunk(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.stream.try_read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write the whole buffer
    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        bounded(self.io_timeout, self.stream.write_all(data)).await
    }

    /// Read a single acknowledgment byte. `None` if the peer closed first.
    pub async fn read_ack(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.read_chunk(&mut byte).await? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Flush and close our write half so the peer sees EOF
    pub async fn shutdown(&mut self) -> io::Result<()> {
        bounded(self.io_timeout, async {
            self.stream.flush().await?;
            self.stream.shutdown().await
        })
        .await
    }
}

/// A bound listener waiting for one inbound transfer
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind and listen on `host:port`. Port 0 picks a free port.
    pub async fn bind(host: &str, port: u16) -> TransferResult<Self> {
        let inner = TcpListener::bind((host, port))
            .await
            .map_err(|e| TransferError::Connection(format!("cannot bind {}:{}: {}", host, port, e)))?;
        let local_addr = inner
            .local_addr()
            .map_err(|e| TransferError::Connection(format!("cannot read bound address: {}", e)))?;

        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the first client. Waiting for a client is not bounded by
    /// the I/O timeout; the returned connection is.
    pub async fn accept(self, io_timeout: Option<Duration>) -> TransferResult<Connection> {
        let (stream, peer_addr) = self
            .inner
            .accept()
            .await
            .map_err(|e| TransferError::Connection(format!("accept failed: {}", e)))?;
        debug!(%peer_addr, "accepted connection");

        // Listener drops here: one connection per receiver
        Ok(Connection::new(stream, peer_addr, io_timeout))
    }
}

/// Connect to a remote receiver
pub async fn connect(host: &str, port: u16, io_timeout: Option<Duration>) -> TransferResult<Connection> {
    let stream = bounded(io_timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|e| TransferError::Connection(format!("cannot connect to {}:{}: {}", host, port, e)))?;
    let peer_addr = stream
        .peer_addr()
        .map_err(|e| TransferError::Connection(format!("cannot read peer address: {}", e)))?;

    Ok(Connection::new(stream, peer_addr, io_timeout))
}
