//! Request dispatcher - serializes client traffic into single-flight
//! exchanges on the relay connection.
//!
//! The framing protocol carries no exchange identifiers: frames correlate
//! purely by temporal order, so exactly one exchange may be in flight on
//! the relay at any instant. Rather than guarding the connection with a
//! mutex in every handler, the connection's two halves are moved into a
//! dedicated worker task and all client activity funnels through an mpsc
//! queue in strict FIFO order:
//!
//! ```text
//! Client task 1 ─┐
//! Client task 2 ─┼─► mpsc::Sender<Submission> ─► Worker ─► relay socket
//! Client task N ─┘
//! ```
//!
//! A plain submission is one REQUEST frame followed by a read loop until
//! the next RESPONSE frame. A CONNECT submission hands the worker the
//! client socket; the establishment exchange and the entire tunnel session
//! then run inside the worker, which is what lets a tunnel monopolize the
//! connection without any other exchange interleaving with it.
//!
//! Once the relay fails, every waiting and future submission resolves with
//! a synthetic `502 Bad Gateway`; reconnection is not attempted.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{RelayError, Result};
use crate::http;
use crate::protocol::FrameType;
use crate::transport::{FrameReader, RelayWriter};
use crate::tunnel;

/// Queue capacity for pending submissions.
pub const QUEUE_CAPACITY: usize = 64;

/// One unit of client work queued for the relay connection.
enum Submission {
    /// A plain HTTP exchange: request bytes out, response bytes back.
    Exchange {
        payload: Bytes,
        reply: oneshot::Sender<Bytes>,
    },
    /// A CONNECT tunnel: establishment exchange, then the whole session.
    Tunnel {
        head: Bytes,
        client: TcpStream,
        carry: Bytes,
    },
}

/// Handle for submitting client traffic to the relay worker.
///
/// Cheaply cloneable; one per client-handling task.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Submission>,
}

impl Dispatcher {
    /// Spawn the worker task that owns the relay connection halves.
    pub fn spawn<R, W>(reader: FrameReader<R>, writer: RelayWriter<W>) -> (Self, JoinHandle<()>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let task = tokio::spawn(worker_loop(rx, reader, writer));
        (Self { tx }, task)
    }

    /// Submit one raw HTTP request and wait for the raw response.
    ///
    /// Callable concurrently; submissions are served strictly in
    /// submission order. Any relay failure resolves to a synthetic
    /// `502 Bad Gateway` rather than an error.
    pub async fn submit(&self, payload: Bytes) -> Bytes {
        let (reply, response) = oneshot::channel();
        if self
            .tx
            .send(Submission::Exchange { payload, reply })
            .await
            .is_err()
        {
            return http::bad_gateway();
        }
        response.await.unwrap_or_else(|_| http::bad_gateway())
    }

    /// Submit a CONNECT request, handing the client socket to the worker.
    ///
    /// The worker writes the establishment response to the client itself
    /// and, on a `200`, pumps the tunnel to completion. `carry` holds any
    /// client bytes over-read past the CONNECT head.
    pub async fn submit_tunnel(&self, head: Bytes, client: TcpStream, carry: Bytes) {
        if let Err(mpsc::error::SendError(submission)) = self
            .tx
            .send(Submission::Tunnel {
                head,
                client,
                carry,
            })
            .await
        {
            // Worker gone: answer the client here.
            if let Submission::Tunnel { mut client, .. } = submission {
                let _ = client.write_all(&http::bad_gateway()).await;
            }
        }
    }
}

/// Worker: drains the queue one submission at a time, holding exclusive
/// access to the relay connection for the duration of each exchange.
async fn worker_loop<R, W>(
    mut rx: mpsc::Receiver<Submission>,
    mut reader: FrameReader<R>,
    writer: RelayWriter<W>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut relay_down = false;

    while let Some(submission) = rx.recv().await {
        match submission {
            Submission::Exchange { payload, reply } => {
                let response = if relay_down {
                    http::bad_gateway()
                } else {
                    match run_exchange(&mut reader, &writer, &payload).await {
                        Ok(response) => response,
                        Err(e) => {
                            relay_down = true;
                            tracing::error!(error = %e, "relay connection failed mid-exchange");
                            http::bad_gateway()
                        }
                    }
                };
                // Receiver may have given up; nothing to do then.
                let _ = reply.send(response);
            }

            Submission::Tunnel {
                head,
                mut client,
                carry,
            } => {
                if relay_down {
                    let _ = client.write_all(&http::bad_gateway()).await;
                    continue;
                }
                match run_exchange(&mut reader, &writer, &head).await {
                    Ok(response) => {
                        let delivered = client.write_all(&response).await.is_ok();
                        if response.starts_with(b"HTTP/1.1 200") {
                            // Even if the client vanished, run the session:
                            // the inbound pump fails instantly and tears the
                            // peer's half down with a TUNNEL_CLOSE.
                            if !delivered {
                                tracing::debug!("client gone before tunnel start");
                            }
                            tunnel::run_tunnel(client, &mut reader, &writer, carry).await;
                        }
                    }
                    Err(e) => {
                        relay_down = true;
                        tracing::error!(error = %e, "relay connection failed mid-exchange");
                        let _ = client.write_all(&http::bad_gateway()).await;
                    }
                }
            }
        }
    }
}

/// One REQUEST/RESPONSE exchange: send the request frame, then read frames
/// until a RESPONSE arrives. Non-RESPONSE frames (stragglers from a
/// previous tunnel teardown) are ignored.
async fn run_exchange<R, W>(
    reader: &mut FrameReader<R>,
    writer: &RelayWriter<W>,
    payload: &[u8],
) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.send(FrameType::Request, payload).await?;

    loop {
        match reader.next_frame().await? {
            None => return Err(RelayError::ConnectionClosed),
            Some(frame) if frame.is_response() => return Ok(frame.payload),
            Some(frame) => {
                tracing::trace!(
                    frame_type = ?frame.frame_type(),
                    "ignoring frame while awaiting response"
                );
            }
        }
    }
}
