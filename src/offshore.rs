//! Offshore relay: accepts the ship's connection and performs the real
//! outbound work.
//!
//! One relay peer is serviced at a time; after a disconnect the listener
//! goes back to accepting. Within a connection, frames are read in a
//! loop: `REQUEST` frames are processed (a `CONNECT` establishment runs
//! its whole tunnel session inline before the loop resumes, which keeps
//! the exchange order on the identifier-less stream intact), all other
//! frame types are ignored at top level.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

use crate::config::OffshoreConfig;
use crate::error::{RelayError, Result};
use crate::http;
use crate::protocol::FrameType;
use crate::transport::{FrameReader, RelayWriter};
use crate::tunnel;

/// Connect timeout for `CONNECT host:port` destinations.
pub const TUNNEL_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Total timeout for a plain destination request.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the outbound HTTP client used for plain requests.
///
/// Redirects stay disabled so the destination's own 3xx travels back to
/// the client untouched.
pub fn build_http_client() -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(UPSTREAM_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    Ok(client)
}

/// Run the offshore process: accept one ship at a time, forever.
pub async fn run_offshore(config: OffshoreConfig) -> Result<()> {
    let http_client = build_http_client()?;
    let listener = TcpListener::bind(config.listen_addr()).await?;
    tracing::info!(addr = %config.listen_addr(), "offshore relay listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "ship connected");
        if let Err(e) = serve_relay(stream, &http_client).await {
            tracing::warn!(%peer, error = %e, "relay connection error");
        }
        tracing::info!(%peer, "ship disconnected");
    }
}

/// Serve one relay connection until the peer goes away.
pub async fn serve_relay<S>(stream: S, http_client: &reqwest::Client) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FrameReader::new(read_half);
    let writer = RelayWriter::new(write_half);

    while let Some(frame) = reader.next_frame().await? {
        match frame.frame_type() {
            FrameType::Request => {
                handle_request(frame.payload, &mut reader, &writer, http_client).await?;
            }
            other => {
                tracing::trace!(frame_type = ?other, "ignoring frame outside an exchange");
            }
        }
    }
    Ok(())
}

/// Process one REQUEST payload and send exactly one RESPONSE frame, or,
/// for an established tunnel, the RESPONSE followed by the whole tunnel
/// session.
///
/// Errors returned from here are relay-connection failures only; anything
/// that goes wrong with the request itself becomes a synthetic HTTP
/// response on the wire (400 unparsable, 502 unreachable destination,
/// 500 otherwise).
async fn handle_request<R, W>(
    payload: Bytes,
    reader: &mut FrameReader<R>,
    writer: &RelayWriter<W>,
    http_client: &reqwest::Client,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let command = match http::parse_command(&payload) {
        Ok(command) => command,
        Err(e) => {
            tracing::debug!(error = %e, "unparsable request payload");
            writer
                .send(FrameType::Response, &http::bad_request())
                .await?;
            return Ok(());
        }
    };

    match command {
        http::ProxyCommand::Connect { authority } => {
            match tokio::time::timeout(TUNNEL_CONNECT_TIMEOUT, TcpStream::connect(&authority))
                .await
            {
                Ok(Ok(target)) => {
                    tracing::debug!(%authority, "tunnel established");
                    writer
                        .send(FrameType::Response, &http::connection_established())
                        .await?;
                    tunnel::run_tunnel(target, reader, writer, Bytes::new()).await;
                    tracing::debug!(%authority, "tunnel closed");
                }
                Ok(Err(e)) => {
                    tracing::debug!(%authority, error = %e, "tunnel dial failed");
                    writer.send(FrameType::Response, &http::bad_gateway()).await?;
                }
                Err(_) => {
                    tracing::debug!(%authority, "tunnel dial timed out");
                    writer.send(FrameType::Response, &http::bad_gateway()).await?;
                }
            }
        }

        http::ProxyCommand::Plain(request) => {
            let response = match http::execute_plain(http_client, &request).await {
                Ok(bytes) => bytes,
                Err(RelayError::Upstream(e)) => {
                    tracing::debug!(url = %request.url, error = %e, "destination unreachable");
                    http::bad_gateway().to_vec()
                }
                Err(e) => {
                    tracing::warn!(url = %request.url, error = %e, "request processing failed");
                    http::internal_error().to_vec()
                }
            };
            writer.send(FrameType::Response, &response).await?;
        }
    }
    Ok(())
}
