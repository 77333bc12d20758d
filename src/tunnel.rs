//! Bidirectional byte pump for CONNECT tunnels.
//!
//! After a tunnel is established, both endpoints run the same pair of
//! pumps until the session ends:
//!
//! ```text
//! relay ──TUNNEL_DATA──> [outbound pump] ──bytes──> local socket
//! relay <──TUNNEL_DATA── [inbound pump] <──bytes── local socket
//! ```
//!
//! "Local socket" is the client connection on the ship and the destination
//! connection offshore. The pumps are two futures joined in the owning
//! task and share one cancellation token, so teardown is prompt whichever
//! side closes first: the outbound pump cancels on `TUNNEL_CLOSE` or relay
//! end-of-stream, the inbound pump cancels after the local socket closes
//! and always sends one best-effort `TUNNEL_CLOSE` so the peer's outbound
//! pump unblocks too.
//!
//! The caller owns the relay `FrameReader` for the whole session, which is
//! what keeps tunnel frames from racing a concurrent exchange on a
//! connection that has no exchange identifiers.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::protocol::FrameType;
use crate::transport::{FrameReader, RelayWriter};

/// Read size for the local-socket side of a tunnel.
pub const TUNNEL_CHUNK_SIZE: usize = 4096;

/// Run one tunnel session to completion.
///
/// `initial` carries any client bytes that were read past the CONNECT head
/// before the tunnel existed; they are flushed as the first `TUNNEL_DATA`
/// frame. The local socket is shut down once both pumps have stopped.
pub async fn run_tunnel<L, R, W>(
    local: L,
    reader: &mut FrameReader<R>,
    writer: &RelayWriter<W>,
    initial: Bytes,
) where
    L: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (local_read, local_write) = tokio::io::split(local);
    let done = CancellationToken::new();

    let (mut local_write, _) = tokio::join!(
        relay_to_local(reader, local_write, &done),
        local_to_relay(local_read, writer, &done, initial),
    );

    let _ = local_write.shutdown().await;
    tracing::debug!("tunnel session ended");
}

/// Outbound pump: relay frames to local-socket bytes.
///
/// Returns the write half so the session can shut the socket down after
/// both pumps stop. This pump is the sole relay reader for the session's
/// duration and is never raced with cancellation, so no frame bytes can
/// be lost to a dropped read.
async fn relay_to_local<R, L>(
    reader: &mut FrameReader<R>,
    mut local_write: L,
    done: &CancellationToken,
) -> L
where
    R: AsyncRead + Unpin,
    L: AsyncWrite + Unpin,
{
    loop {
        match reader.next_frame().await {
            Ok(Some(frame)) => match frame.frame_type() {
                FrameType::TunnelData => {
                    if local_write.write_all(&frame.payload).await.is_err() {
                        break;
                    }
                }
                FrameType::TunnelClose => break,
                other => {
                    tracing::trace!(frame_type = ?other, "ignoring frame inside tunnel");
                }
            },
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "relay read failed inside tunnel");
                break;
            }
        }
    }
    done.cancel();
    local_write
}

/// Inbound pump: local-socket bytes to relay frames.
///
/// Stops on local close/error or cancellation; always sends one
/// best-effort `TUNNEL_CLOSE` on the way out.
async fn local_to_relay<L, W>(
    mut local_read: L,
    writer: &RelayWriter<W>,
    done: &CancellationToken,
    initial: Bytes,
) where
    L: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; TUNNEL_CHUNK_SIZE];

    if !initial.is_empty() && writer.send(FrameType::TunnelData, &initial).await.is_err() {
        let _ = writer.send(FrameType::TunnelClose, &[]).await;
        done.cancel();
        return;
    }

    loop {
        let n = tokio::select! {
            biased;
            _ = done.cancelled() => break,
            read = local_read.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
        };
        if writer.send(FrameType::TunnelData, &buf[..n]).await.is_err() {
            break;
        }
    }

    let _ = writer.send(FrameType::TunnelClose, &[]).await;
    done.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::build_frame;
    use std::time::Duration;
    use tokio::io::duplex;

    /// Helper: relay pair as (near frame reader, near writer, far stream).
    fn relay_pair() -> (
        FrameReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
        RelayWriter<tokio::io::WriteHalf<tokio::io::DuplexStream>>,
        tokio::io::DuplexStream,
    ) {
        let (near, far) = duplex(64 * 1024);
        let (near_read, near_write) = tokio::io::split(near);
        (FrameReader::new(near_read), RelayWriter::new(near_write), far)
    }

    #[tokio::test]
    async fn test_tunnel_data_flows_both_ways() {
        let (mut reader, writer, far) = relay_pair();
        let (local, mut local_peer) = duplex(4096);

        let session = tokio::spawn(async move {
            run_tunnel(local, &mut reader, &writer, Bytes::new()).await;
        });

        let (far_read, mut far_write) = tokio::io::split(far);
        let mut far_reader = FrameReader::new(far_read);

        // Peer -> local direction.
        far_write
            .write_all(&build_frame(FrameType::TunnelData, b"from-peer"))
            .await
            .unwrap();
        let mut got = [0u8; 9];
        local_peer.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"from-peer");

        // Local -> peer direction.
        local_peer.write_all(b"from-local").await.unwrap();
        let frame = far_reader.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.frame_type(), FrameType::TunnelData);
        assert_eq!(frame.payload(), b"from-local");

        // Peer closes the session; both pumps stop.
        far_write
            .write_all(&build_frame(FrameType::TunnelClose, b""))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .expect("session ends after peer close")
            .unwrap();

        // The answering close from the inbound pump reaches the peer.
        loop {
            let frame = far_reader.next_frame().await.unwrap().unwrap();
            if frame.frame_type() == FrameType::TunnelClose {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_local_close_sends_tunnel_close() {
        let (mut reader, writer, far) = relay_pair();
        let (local, local_peer) = duplex(4096);

        let session = tokio::spawn(async move {
            run_tunnel(local, &mut reader, &writer, Bytes::new()).await;
        });

        // Local side goes away immediately.
        drop(local_peer);

        let (far_read, mut far_write) = tokio::io::split(far);
        let mut far_reader = FrameReader::new(far_read);
        let frame = far_reader.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.frame_type(), FrameType::TunnelClose);

        // Peer answers with its own close, unblocking the outbound pump.
        far_write
            .write_all(&build_frame(FrameType::TunnelClose, b""))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .expect("session ends after close handshake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_initial_bytes_flushed_first() {
        let (mut reader, writer, far) = relay_pair();
        let (local, mut local_peer) = duplex(4096);

        let session = tokio::spawn(async move {
            run_tunnel(local, &mut reader, &writer, Bytes::from_static(b"early")).await;
        });

        let (far_read, mut far_write) = tokio::io::split(far);
        let mut far_reader = FrameReader::new(far_read);

        let frame = far_reader.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.frame_type(), FrameType::TunnelData);
        assert_eq!(frame.payload(), b"early");

        local_peer.write_all(b"later").await.unwrap();
        let frame = far_reader.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.payload(), b"later");

        far_write
            .write_all(&build_frame(FrameType::TunnelClose, b""))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_relay_end_of_stream_ends_session() {
        let (mut reader, writer, far) = relay_pair();
        let (local, _local_peer) = duplex(4096);

        let session = tokio::spawn(async move {
            run_tunnel(local, &mut reader, &writer, Bytes::new()).await;
        });

        drop(far);

        tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .expect("session ends on relay loss")
            .unwrap();
    }
}
