//! Relay connection transport - framed reads, serialized writes, dialing.
//!
//! The relay link is one TCP connection carrying every frame between the
//! ship and offshore processes. This module owns the byte-level discipline
//! on that link:
//!
//! - [`FrameReader`] wraps the read half plus a [`FrameBuffer`] and yields
//!   whole frames, reporting peer closure as `Ok(None)` (end of stream) at
//!   any offset, including mid-frame.
//! - [`RelayWriter`] wraps the write half behind an async mutex and writes
//!   each frame as one contiguous buffer, so concurrent senders can never
//!   interleave bytes of two frames.
//! - [`connect_with_retry`] performs the ship-side bounded dial loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::{RelayError, Result};
use crate::protocol::{build_frame, Frame, FrameBuffer, FrameType};

/// Read buffer size for relay socket reads.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Framed reader over the relay connection's read half.
///
/// Exactly one component may read the relay at a time (the dispatcher
/// worker, or a tunnel's outbound pump running inside it); the reader is
/// therefore owned, not shared.
pub struct FrameReader<R> {
    stream: R,
    buffer: FrameBuffer,
    chunk: Box<[u8]>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a read half.
    pub fn new(stream: R) -> Self {
        Self {
            stream,
            buffer: FrameBuffer::new(),
            chunk: vec![0u8; READ_CHUNK_SIZE].into_boxed_slice(),
        }
    }

    /// Read the next complete frame.
    ///
    /// Returns `Ok(None)` when the peer closes the stream, whether between
    /// frames or in the middle of one; a short read is connection loss,
    /// never a malformed frame.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.buffer.next_frame() {
                return Ok(Some(frame));
            }

            let n = self.stream.read(&mut self.chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.buffer.extend(&self.chunk[..n]);
        }
    }
}

/// Serialized writer over the relay connection's write half.
///
/// Cloneable handle; every `send` holds the lock for exactly one whole
/// frame, which is the mutual-exclusion unit the protocol requires for
/// writes (a tunnel's inbound pump shares this handle with nothing else
/// that writes concurrently, but the discipline is kept regardless).
pub struct RelayWriter<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for RelayWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: AsyncWrite + Unpin> RelayWriter<W> {
    /// Wrap a write half.
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Send one frame, atomically with respect to other senders.
    pub async fn send(&self, frame_type: FrameType, payload: &[u8]) -> std::io::Result<()> {
        let buf = build_frame(frame_type, payload);
        let mut writer = self.inner.lock().await;
        writer.write_all(&buf).await?;
        writer.flush().await
    }
}

/// Dial the offshore relay, retrying up to `attempts` times with `delay`
/// between attempts.
///
/// Exhausting all attempts returns [`RelayError::RelayUnavailable`]; the ship
/// binary turns that into a non-zero exit, since there is no running
/// without a relay.
pub async fn connect_with_retry(
    addr: &str,
    attempts: u32,
    delay: Duration,
) -> Result<TcpStream> {
    for attempt in 1..=attempts {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                tracing::info!(%addr, "connected to offshore relay");
                return Ok(stream);
            }
            Err(e) => {
                tracing::warn!(%addr, attempt, attempts, error = %e, "relay connect failed");
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(RelayError::RelayUnavailable { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HEADER_SIZE;
    use tokio::io::duplex;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_reader_yields_frames_in_order() {
        let (mut tx, rx) = duplex(4096);
        let mut reader = FrameReader::new(rx);

        tx.write_all(&build_frame(FrameType::Request, b"one"))
            .await
            .unwrap();
        tx.write_all(&build_frame(FrameType::Response, b"two"))
            .await
            .unwrap();

        let first = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(first.frame_type(), FrameType::Request);
        assert_eq!(first.payload(), b"one");

        let second = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(second.frame_type(), FrameType::Response);
        assert_eq!(second.payload(), b"two");
    }

    #[tokio::test]
    async fn test_reader_end_of_stream_between_frames() {
        let (mut tx, rx) = duplex(4096);
        let mut reader = FrameReader::new(rx);

        tx.write_all(&build_frame(FrameType::Response, b"done"))
            .await
            .unwrap();
        drop(tx);

        assert!(reader.next_frame().await.unwrap().is_some());
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_end_of_stream_mid_payload() {
        let (mut tx, rx) = duplex(4096);
        let mut reader = FrameReader::new(rx);

        // Complete header claiming 10 payload bytes, then only 4, then close.
        let frame_bytes = build_frame(FrameType::TunnelData, b"0123456789");
        tx.write_all(&frame_bytes[..HEADER_SIZE + 4]).await.unwrap();
        drop(tx);

        // End of stream, not an error and not a short frame.
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_end_of_stream_mid_header() {
        let (mut tx, rx) = duplex(4096);
        let mut reader = FrameReader::new(rx);

        tx.write_all(&[0, 0]).await.unwrap();
        drop(tx);

        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writer_frames_are_contiguous() {
        let (tx, rx) = duplex(4096);
        let writer = RelayWriter::new(tx);
        let mut reader = FrameReader::new(rx);

        // Two clones sending concurrently must never interleave frame bytes.
        let a = writer.clone();
        let b = writer.clone();
        let send_a = tokio::spawn(async move {
            for _ in 0..20 {
                a.send(FrameType::TunnelData, b"aaaaaaaaaa").await.unwrap();
            }
        });
        let send_b = tokio::spawn(async move {
            for _ in 0..20 {
                b.send(FrameType::TunnelData, b"bbbbbbbbbb").await.unwrap();
            }
        });
        send_a.await.unwrap();
        send_b.await.unwrap();
        drop(writer);

        let mut seen = 0;
        while let Some(frame) = reader.next_frame().await.unwrap() {
            let payload = frame.payload();
            assert!(payload == b"aaaaaaaaaa" || payload == b"bbbbbbbbbb");
            seen += 1;
        }
        assert_eq!(seen, 40);
    }

    #[tokio::test]
    async fn test_connect_with_retry_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let stream = connect_with_retry(&addr, 3, Duration::from_millis(10))
            .await
            .unwrap();
        drop(stream);
        drop(listener);
    }

    #[tokio::test]
    async fn test_connect_with_retry_exhaustion() {
        // Bind then drop to get an address that refuses connections.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = connect_with_retry(&addr, 3, Duration::from_millis(5))
            .await
            .unwrap_err();
        match err {
            RelayError::RelayUnavailable { attempts } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
    }
}
