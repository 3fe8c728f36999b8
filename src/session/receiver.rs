use std::net::SocketAddr;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::state::{ReceiverState, StateTracker};
use super::TransferReport;
use crate::config::{TransferConfig, ACK_BYTE};
use crate::error::{TransferError, TransferResult};
use crate::network::{Connection, Listener};
use crate::progress::transfer_bar;
use crate::protocol::{FrameParser, FrameScan, TransferMetadata};
use crate::transfer::{ensure_directory, FileWriter};

/// Receiving side: serves exactly one connection, then is consumed
pub struct Receiver {
    config: TransferConfig,
    listener: Listener,
    state: StateTracker<ReceiverState>,
}

impl Receiver {
    /// Create the receive directory and start listening on `host:port`
    pub async fn bind(config: TransferConfig, host: &str, port: u16) -> TransferResult<Self> {
        config.validate()?;
        ensure_directory(&config.receive_dir).await?;
        let listener = Listener::bind(host, port).await?;
        info!(addr = %listener.local_addr(), dir = %config.receive_dir.display(), "listening");

        Ok(Self {
            config,
            listener,
            state: StateTracker::new("receiver", ReceiverState::Listening),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Accept the first connection and receive its file
    pub async fn receive(self) -> TransferResult<TransferReport> {
        debug!(addr = %self.local_addr(), "waiting for sender");
        let Receiver {
            config,
            listener,
            mut state,
        } = self;

        let result = run(&config, listener, &mut state).await;
        if let Err(err) = &result {
            state.abort(err);
        }
        debug!(state = ?state.current(), "receiver finished");
        result
    }
}

async fn run(
    config: &TransferConfig,
    listener: Listener,
    state: &mut StateTracker<ReceiverState>,
) -> TransferResult<TransferReport> {
    let mut conn = listener.accept(config.io_timeout).await?;
    let peer = conn.peer_addr();
    state.advance(ReceiverState::Connected);
    info!(%peer, "connection accepted");
    let start = Instant::now();

    state.advance(ReceiverState::MetadataPending);
    let (metadata, carried) = read_metadata(config, &mut conn).await?;
    info!(file = %metadata.filename, bytes = metadata.filesize, "receiving file");

    if config.handshake {
        conn.write_all(&[ACK_BYTE])
            .await
            .map_err(|e| TransferError::Acknowledgement(format!("cannot send acknowledgement: {}", e)))?;
    }
    state.advance(ReceiverState::BodyPending);

    let expected = metadata.filesize;
    let destination = config.receive_dir.join(&metadata.filename);
    let mut writer = FileWriter::create(&destination, expected)?;
    let bar = transfer_bar(&metadata.filename, expected, config.show_progress);

    // Body bytes that arrived in the same reads as the metadata
    let keep = carried.len().min(usize::try_from(expected).unwrap_or(usize::MAX));
    if keep < carried.len() {
        warn!(extra = carried.len() - keep, "discarding bytes past the declared filesize");
    }
    if keep > 0 {
        debug!(bytes = keep, "body bytes carried over from metadata read");
        writer.write_chunk(&carried[..keep]).await?;
        bar.inc(keep as u64);
    }

    let mut buf = vec![0u8; config.buffer_size];
    while !writer.is_complete() {
        let remaining = expected - writer.bytes_written();
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));

        let n = match conn.read_chunk(&mut buf[..want]).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "read failed during body");
                0
            }
        };
        if n == 0 {
            bar.abandon();
            return Err(TransferError::IncompleteTransfer {
                received: writer.bytes_written(),
                expected,
            });
        }

        writer.write_chunk(&buf[..n]).await?;
        bar.inc(n as u64);
    }
    bar.finish_and_clear();

    let bytes = writer.bytes_written();
    let (path, sha256) = writer.finalize().await?;
    state.advance(ReceiverState::Complete);

    let report = TransferReport {
        filename: metadata.filename,
        filesize: expected,
        bytes,
        elapsed: start.elapsed(),
        sha256,
        path,
        peer,
    };
    report.log("file received");

    Ok(report)
}

/// Accumulate reads until the metadata frame is complete. Returns the
/// metadata and any body bytes that followed it.
async fn read_metadata(
    config: &TransferConfig,
    conn: &mut Connection,
) -> TransferResult<(TransferMetadata, Vec<u8>)> {
    let parser = FrameParser::new(&config.separator, config.max_metadata_len, config.handshake);
    let mut accumulated = Vec::with_capacity(config.buffer_size);
    let mut buf = vec![0u8; config.buffer_size];
    let mut sealed = false;
    let mut need_read = true;

    loop {
        if need_read {
            let n = conn
                .read_chunk(&mut buf)
                .await
                .map_err(|e| TransferError::Connection(format!("reading metadata: {}", e)))?;
            sealed = n == 0;
            accumulated.extend_from_slice(&buf[..n]);
        }

        match parser.scan(&accumulated, sealed)? {
            FrameScan::Complete { metadata, body_start } => {
                accumulated.drain(..body_start);
                return Ok((metadata, accumulated));
            }
            _ if sealed => {
                return Err(TransferError::MalformedMetadata(
                    "connection closed inside the metadata frame".into(),
                ));
            }
            FrameScan::SizeUnterminated if config.handshake => {
                // The sender sends nothing more until we acknowledge, so the
                // rest of the filesize is either buffered already or not coming.
                match conn
                    .try_read_chunk(&mut buf)
                    .map_err(|e| TransferError::Connection(format!("reading metadata: {}", e)))?
                {
                    Some(n) => {
                        sealed = n == 0;
                        accumulated.extend_from_slice(&buf[..n]);
                    }
                    None => sealed = true,
                }
                need_read = false;
            }
            FrameScan::Incomplete | FrameScan::SizeUnterminated => need_read = true,
        }
    }
}
