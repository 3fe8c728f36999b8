//! Transfer sessions: one connection, one file, then done.

mod receiver;
mod sender;
pub mod state;

pub use receiver::Receiver;
pub use sender::Sender;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

/// Outcome of a completed transfer, on either side
#[derive(Debug, Clone)]
pub struct TransferReport {
    /// Basename carried in the metadata frame
    pub filename: String,
    pub filesize: u64,
    /// Body bytes actually moved; equals `filesize` on success
    pub bytes: u64,
    pub elapsed: Duration,
    /// Hex SHA-256 of the body, for comparing both ends out of band
    pub sha256: String,
    /// Source path on the sender, destination path on the receiver
    pub path: PathBuf,
    pub peer: SocketAddr,
}

impl TransferReport {
    fn log(&self, what: &str) {
        info!(
            file = %self.filename,
            bytes = self.bytes,
            declared = self.filesize,
            peer = %self.peer,
            sha256 = %self.sha256,
            elapsed = %humantime::format_duration(self.elapsed),
            path = %self.path.display(),
            "{}",
            what
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TransferConfig, SEPARATOR};
    use crate::error::TransferError;
    use crate::network::Listener;
    use rand::RngCore;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn test_config(recv_dir: &Path) -> TransferConfig {
        TransferConfig::new()
            .with_receive_dir(recv_dir)
            .with_io_timeout(Some(Duration::from_secs(5)))
    }

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut data);
        data
    }

    fn frame(name: &str, size: usize) -> Vec<u8> {
        format!("{}{}{}", name, SEPARATOR, size).into_bytes()
    }

    /// Send `content` as `name` through a loopback receiver
    async fn round_trip(name: &str, content: &[u8], config: TransferConfig) -> (TransferReport, TransferReport) {
        let src_dir = TempDir::new().unwrap();
        let recv_dir = TempDir::new().unwrap();
        let source = src_dir.path().join(name);
        std::fs::write(&source, content).unwrap();

        let receiver = Receiver::bind(config.clone().with_receive_dir(recv_dir.path()), "127.0.0.1", 0)
            .await
            .unwrap();
        let port = receiver.local_addr().port();
        let server = tokio::spawn(receiver.receive());

        let sent = Sender::new(config).unwrap().send(&source, "127.0.0.1", port).await.unwrap();
        let received = server.await.unwrap().unwrap();

        assert_eq!(received.path, recv_dir.path().join(name));
        assert_eq!(std::fs::read(&received.path).unwrap(), content);
        (sent, received)
    }

    /// Bind a receiver and return it with a raw client already connected
    async fn raw_session(config: TransferConfig) -> (tokio::task::JoinHandle<crate::error::TransferResult<TransferReport>>, TcpStream) {
        let receiver = Receiver::bind(config, "127.0.0.1", 0).await.unwrap();
        let port = receiver.local_addr().port();
        let server = tokio::spawn(receiver.receive());
        let client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn test_round_trip_small_text() {
        let config = test_config(Path::new("."));
        let (sent, received) = round_trip("testfile.txt", b"This is a test file for transmission.", config).await;
        assert_eq!(sent.sha256, received.sha256);
        assert_eq!(received.bytes, 37);
        assert_eq!(received.filename, "testfile.txt");
    }

    #[tokio::test]
    async fn test_round_trip_empty_file() {
        let (sent, received) = round_trip("empty", b"", test_config(Path::new("."))).await;
        assert_eq!(sent.bytes, 0);
        assert_eq!(received.bytes, 0);
    }

    #[tokio::test]
    async fn test_round_trip_body_containing_separator() {
        let mut content = b"<SEPARATOR>42<SEPARATOR>".to_vec();
        content.extend(random_bytes(5000));
        content.extend_from_slice(SEPARATOR.as_bytes());

        let (sent, received) = round_trip("tricky.bin", &content, test_config(Path::new("."))).await;
        assert_eq!(sent.sha256, received.sha256);
    }

    #[tokio::test]
    async fn test_chunk_size_does_not_change_content() {
        let content = random_bytes(3000);
        for buffer_size in [1, 7, 4096, content.len()] {
            let config = test_config(Path::new(".")).with_buffer_size(buffer_size);
            let (_, received) = round_trip("chunks.bin", &content, config).await;
            assert_eq!(received.bytes, content.len() as u64, "buffer size {}", buffer_size);
        }
    }

    #[tokio::test]
    async fn test_round_trip_without_handshake() {
        // A body starting with a digit would merge into the filesize field
        let mut content = b"#!".to_vec();
        content.extend(random_bytes(10_000));

        let config = test_config(Path::new(".")).with_handshake(false);
        let (sent, received) = round_trip("plain.bin", &content, config).await;
        assert_eq!(sent.sha256, received.sha256);
    }

    #[tokio::test]
    async fn test_concrete_scenario_port_5001() {
        let src_dir = TempDir::new().unwrap();
        let recv_dir = TempDir::new().unwrap();
        let source = src_dir.path().join("testfile.bin");
        let content = random_bytes(8192);
        std::fs::write(&source, &content).unwrap();

        let config = test_config(recv_dir.path());
        let receiver = Receiver::bind(config.clone(), "127.0.0.1", 5001).await.unwrap();
        let server = tokio::spawn(receiver.receive());

        Sender::new(config).unwrap().send(&source, "127.0.0.1", 5001).await.unwrap();
        let report = server.await.unwrap().unwrap();

        let output = std::fs::read(recv_dir.path().join("testfile.bin")).unwrap();
        assert_eq!(output.len(), 8192);
        assert_eq!(output, content);
        assert_eq!(report.filesize, 8192);
    }

    #[tokio::test]
    async fn test_metadata_and_body_in_one_read() {
        let body = b"hello, this body shares a segment with the metadata".to_vec();

        for carried in [0, 1, 10, body.len()] {
            let recv_dir = TempDir::new().unwrap();
            let config = test_config(recv_dir.path()).with_handshake(false);
            let (server, mut client) = raw_session(config).await;

            let mut first = frame("joined.txt", body.len());
            first.extend_from_slice(&body[..carried]);
            client.write_all(&first).await.unwrap();
            client.write_all(&body[carried..]).await.unwrap();
            client.shutdown().await.unwrap();

            let report = server.await.unwrap().unwrap();
            assert_eq!(std::fs::read(&report.path).unwrap(), body, "carried {}", carried);
        }
    }

    #[tokio::test]
    async fn test_traversal_name_written_as_basename() {
        let recv_dir = TempDir::new().unwrap();
        let (server, mut client) = raw_session(test_config(recv_dir.path())).await;

        client.write_all(&frame("../../etc/passwd", 5)).await.unwrap();
        let mut ack = [0u8; 1];
        client.read_exact(&mut ack).await.unwrap();
        assert_eq!(ack[0], b'1');
        client.write_all(b"hello").await.unwrap();
        client.shutdown().await.unwrap();

        let report = server.await.unwrap().unwrap();
        assert_eq!(report.path, recv_dir.path().join("passwd"));
        assert_eq!(std::fs::read(&report.path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_early_close_is_incomplete() {
        let recv_dir = TempDir::new().unwrap();
        let config = test_config(recv_dir.path()).with_handshake(false);
        let (server, mut client) = raw_session(config).await;

        let mut bytes = frame("data.bin", 100);
        bytes.extend_from_slice(b"abcdefghij");
        client.write_all(&bytes).await.unwrap();
        client.shutdown().await.unwrap();

        let err = server.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            TransferError::IncompleteTransfer { received: 10, expected: 100 }
        ));
        assert_eq!(std::fs::read_dir(recv_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_bytes_past_filesize_are_dropped() {
        let recv_dir = TempDir::new().unwrap();
        let config = test_config(recv_dir.path()).with_handshake(false);
        let (server, mut client) = raw_session(config).await;

        let mut bytes = frame("short.txt", 3);
        bytes.extend_from_slice(b"abcEXTRA");
        client.write_all(&bytes).await.unwrap();
        client.shutdown().await.unwrap();

        let report = server.await.unwrap().unwrap();
        assert_eq!(std::fs::read(&report.path).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_missing_separator_is_malformed() {
        let recv_dir = TempDir::new().unwrap();
        let (server, mut client) = raw_session(test_config(recv_dir.path())).await;

        client.write_all(&[b'a'; 2000]).await.unwrap();
        // The receiver may already have reset the connection
        let _ = client.shutdown().await;

        let err = server.await.unwrap().unwrap_err();
        assert!(matches!(err, TransferError::MalformedMetadata(_)));
    }

    #[tokio::test]
    async fn test_existing_file_is_overwritten() {
        let recv_dir = TempDir::new().unwrap();
        std::fs::write(recv_dir.path().join("same.txt"), b"previous contents").unwrap();
        let (server, mut client) = raw_session(test_config(recv_dir.path())).await;

        client.write_all(&frame("same.txt", 3)).await.unwrap();
        let mut ack = [0u8; 1];
        client.read_exact(&mut ack).await.unwrap();
        client.write_all(b"new").await.unwrap();
        client.shutdown().await.unwrap();

        server.await.unwrap().unwrap();
        assert_eq!(std::fs::read(recv_dir.path().join("same.txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_wrong_ack_byte() {
        let src_dir = TempDir::new().unwrap();
        let source = src_dir.path().join("a.txt");
        std::fs::write(&source, b"data").unwrap();

        let listener = Listener::bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().port();
        let fake = tokio::spawn(async move {
            let mut conn = listener.accept(None).await.unwrap();
            let mut buf = [0u8; 64];
            conn.read_chunk(&mut buf).await.unwrap();
            conn.write_all(b"0").await.unwrap();
            // Hold the connection until the sender gives up
            let _ = conn.read_chunk(&mut buf).await;
        });

        let config = test_config(Path::new("."));
        let err = Sender::new(config).unwrap().send(&source, "127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, TransferError::Acknowledgement(_)));
        fake.await.unwrap();
    }

    #[tokio::test]
    async fn test_ack_never_arrives() {
        let src_dir = TempDir::new().unwrap();
        let source = src_dir.path().join("a.txt");
        std::fs::write(&source, b"data").unwrap();

        let listener = Listener::bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().port();
        let fake = tokio::spawn(async move {
            let mut conn = listener.accept(None).await.unwrap();
            let mut buf = [0u8; 64];
            conn.read_chunk(&mut buf).await.unwrap();
            // Never acknowledge; wait for the sender to hang up
            let _ = conn.read_chunk(&mut buf).await;
        });

        let config = test_config(Path::new(".")).with_io_timeout(Some(Duration::from_millis(100)));
        let err = Sender::new(config).unwrap().send(&source, "127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, TransferError::Acknowledgement(_)));
        fake.await.unwrap();
    }

    #[tokio::test]
    async fn test_stalled_body_is_incomplete() {
        let recv_dir = TempDir::new().unwrap();
        let config = test_config(recv_dir.path())
            .with_handshake(false)
            .with_io_timeout(Some(Duration::from_millis(100)));
        let (server, mut client) = raw_session(config).await;

        let mut bytes = frame("slow.bin", 100);
        bytes.extend_from_slice(b"abc");
        client.write_all(&bytes).await.unwrap();

        // The client stays connected but sends nothing more
        let err = server.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            TransferError::IncompleteTransfer { received: 3, expected: 100 }
        ));
        assert_eq!(std::fs::read_dir(recv_dir.path()).unwrap().count(), 0);
        drop(client);
    }

    #[tokio::test]
    async fn test_silent_client_is_connection_error() {
        let recv_dir = TempDir::new().unwrap();
        let config = test_config(recv_dir.path()).with_io_timeout(Some(Duration::from_millis(100)));
        let (server, client) = raw_session(config).await;

        let err = server.await.unwrap().unwrap_err();
        assert!(matches!(err, TransferError::Connection(_)));
        assert_eq!(std::fs::read_dir(recv_dir.path()).unwrap().count(), 0);
        drop(client);
    }

    #[tokio::test]
    async fn test_send_name_containing_separator() {
        let src_dir = TempDir::new().unwrap();
        let source = src_dir.path().join("a<SEPARATOR>5");
        std::fs::write(&source, b"hello world").unwrap();

        let listener = Listener::bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().port();

        let err = Sender::new(test_config(Path::new(".")).with_handshake(false))
            .unwrap()
            .send(&source, "127.0.0.1", port)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));

        // Rejected before connecting: nothing is waiting in the backlog
        let pending = tokio::time::timeout(Duration::from_millis(100), listener.accept(None)).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_round_trip_long_filename() {
        let recv_dir = TempDir::new().unwrap();
        let name = "a".repeat(250);
        let (sent, received) = round_trip(&name, b"long", test_config(recv_dir.path())).await;
        assert_eq!(received.filename, name);
        assert_eq!(sent.sha256, received.sha256);
    }

    #[tokio::test]
    async fn test_send_to_closed_port() {
        let src_dir = TempDir::new().unwrap();
        let source = src_dir.path().join("a.txt");
        std::fs::write(&source, b"data").unwrap();

        let port = {
            let listener = Listener::bind("127.0.0.1", 0).await.unwrap();
            listener.local_addr().port()
        };

        let err = Sender::new(test_config(Path::new(".")))
            .unwrap()
            .send(&source, "127.0.0.1", port)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Connection(_)));
    }

    #[tokio::test]
    async fn test_send_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Sender::new(test_config(Path::new(".")))
            .unwrap()
            .send(&dir.path().join("nope.bin"), "127.0.0.1", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
    }

    #[tokio::test]
    async fn test_receiver_creates_directory() {
        let base = TempDir::new().unwrap();
        let nested = base.path().join("incoming").join("today");

        let receiver = Receiver::bind(test_config(&nested), "127.0.0.1", 0).await.unwrap();
        assert!(nested.is_dir());
        drop(receiver);
    }
}
