//! Ship front-end: the local HTTP proxy listener.
//!
//! Accepts ordinary proxy connections from clients, reassembles each
//! request into one contiguous byte buffer and funnels it through the
//! [`Dispatcher`]. Plain requests get their relayed response written back
//! verbatim; `CONNECT` requests hand the whole client socket to the
//! dispatcher worker, which runs the tunnel session.
//!
//! The relay connection is dialed before the listener is bound: a ship
//! with no relay is useless, so dial exhaustion aborts startup.

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::config::ShipConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::http;
use crate::transport::{connect_with_retry, FrameReader, RelayWriter};

/// Run the ship process: dial the relay, then serve proxy clients forever.
pub async fn run_ship(config: ShipConfig) -> Result<()> {
    let relay = connect_with_retry(
        &config.offshore_addr(),
        config.connect_attempts,
        config.connect_backoff,
    )
    .await?;

    let (relay_read, relay_write) = relay.into_split();
    let (dispatcher, _worker) =
        Dispatcher::spawn(FrameReader::new(relay_read), RelayWriter::new(relay_write));

    let listener = TcpListener::bind(config.listen_addr()).await?;
    tracing::info!(addr = %config.listen_addr(), "ship proxy listening");

    loop {
        let (client, peer) = listener.accept().await?;
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            tracing::debug!(%peer, "client connected");
            handle_client(client, dispatcher).await;
            tracing::debug!(%peer, "client finished");
        });
    }
}

/// Serve one proxy client connection.
///
/// Loops over requests (keep-alive) until the client closes or a request
/// cannot be parsed. A `CONNECT` request ends the loop: the socket moves
/// into the dispatcher for the tunnel's lifetime.
pub async fn handle_client(mut client: TcpStream, dispatcher: Dispatcher) {
    let mut carry = BytesMut::new();

    loop {
        let head = match http::read_request_head(&mut client, &mut carry).await {
            Ok(Some(head)) => head,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(error = %e, "rejecting client request");
                let _ = client.write_all(&http::bad_request()).await;
                return;
            }
        };

        if head.method.eq_ignore_ascii_case("CONNECT") {
            tracing::debug!(target = %head.target, "tunnel requested");
            let carry = carry.split().freeze();
            dispatcher.submit_tunnel(head.raw, client, carry).await;
            return;
        }

        tracing::debug!(method = %head.method, target = %head.target, "relaying request");
        let payload = match assemble_payload(&mut client, &mut carry, &head).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(error = %e, "client body read failed");
                return;
            }
        };

        let response = dispatcher.submit(payload).await;
        if client.write_all(&response).await.is_err() {
            return;
        }
    }
}

/// Head plus exactly `Content-Length` body bytes, as one buffer.
async fn assemble_payload(
    client: &mut TcpStream,
    carry: &mut BytesMut,
    head: &http::RequestHead,
) -> Result<Bytes> {
    if head.content_length == 0 {
        return Ok(head.raw.clone());
    }
    let body = http::read_body(client, carry, head.content_length).await?;
    let mut payload = BytesMut::with_capacity(head.raw.len() + body.len());
    payload.extend_from_slice(&head.raw);
    payload.extend_from_slice(&body);
    Ok(payload.freeze())
}
