use std::path::Path;
use std::time::Instant;

use tracing::{debug, info};

use super::state::{SenderState, StateTracker};
use super::TransferReport;
use crate::config::{TransferConfig, ACK_BYTE};
use crate::error::{TransferError, TransferResult};
use crate::network::{self, Connection};
use crate::progress::transfer_bar;
use crate::transfer::{get_file_metadata, FileChunker};

/// Sending side: one file over one outbound connection
pub struct Sender {
    config: TransferConfig,
}

impl Sender {
    pub fn new(config: TransferConfig) -> TransferResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Send `path` to the receiver listening on `host:port`
    pub async fn send(&self, path: &Path, host: &str, port: u16) -> TransferResult<TransferReport> {
        let mut state = StateTracker::new("sender", SenderState::Idle);
        let result = self.run(path, host, port, &mut state).await;
        if let Err(err) = &result {
            state.abort(err);
        }
        debug!(state = ?state.current(), "sender finished");
        result
    }

    async fn run(
        &self,
        path: &Path,
        host: &str,
        port: u16,
        state: &mut StateTracker<SenderState>,
    ) -> TransferResult<TransferReport> {
        let metadata = get_file_metadata(path, &self.config.separator).await?;
        let mut chunker = FileChunker::open(path, metadata.filesize, self.config.buffer_size).await?;

        state.advance(SenderState::Connecting);
        let mut conn = network::connect(host, port, self.config.io_timeout).await?;
        let peer = conn.peer_addr();
        info!(
            file = %metadata.filename,
            bytes = metadata.filesize,
            %peer,
            "sending file"
        );
        let start = Instant::now();

        conn.write_all(&metadata.encode(&self.config.separator))
            .await
            .map_err(TransferError::Transmission)?;
        state.advance(SenderState::MetadataSent);

        if self.config.handshake {
            self.await_ack(&mut conn).await?;
            debug!("metadata acknowledged");
        }
        state.advance(SenderState::BodySending);

        let bar = transfer_bar(&metadata.filename, metadata.filesize, self.config.show_progress);
        while let Some(chunk) = chunker.next_chunk().await? {
            conn.write_all(chunk).await.map_err(TransferError::Transmission)?;
            bar.inc(chunk.len() as u64);
        }
        conn.shutdown().await.map_err(TransferError::Transmission)?;
        bar.finish_and_clear();

        let bytes = chunker.bytes_read();
        let report = TransferReport {
            filename: metadata.filename,
            filesize: metadata.filesize,
            bytes,
            elapsed: start.elapsed(),
            sha256: chunker.finish(),
            path: path.to_path_buf(),
            peer,
        };
        state.advance(SenderState::Complete);
        report.log("file sent");

        Ok(report)
    }

    async fn await_ack(&self, conn: &mut Connection) -> TransferResult<()> {
        match conn.read_ack().await {
            Ok(Some(ACK_BYTE)) => Ok(()),
            Ok(Some(other)) => Err(TransferError::Acknowledgement(format!(
                "expected {:#04x}, got {:#04x}",
                ACK_BYTE, other
            ))),
            Ok(None) => Err(TransferError::Acknowledgement(
                "receiver closed the connection before acknowledging".into(),
            )),
            Err(e) => Err(TransferError::Acknowledgement(e.to_string())),
        }
    }
}
