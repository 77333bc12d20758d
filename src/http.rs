//! HTTP translation between proxy byte streams and relay frame payloads.
//!
//! Two halves live here:
//!
//! - Ship side: reading one request head (request line + headers + blank
//!   line) byte-exactly off a client socket, so the REQUEST payload carries
//!   what the client actually sent, plus exact-length body reads.
//! - Offshore side: parsing a REQUEST payload back into something
//!   executable (a `CONNECT` authority or a plain request), running plain
//!   requests through `reqwest`, and flattening the destination's response
//!   into raw `status-line CRLF (header CRLF)* CRLF body` bytes.
//!
//! Synthetic responses (200 established / 400 / 500 / 502) are built here
//! too so both endpoints agree on their shape.

use bytes::{Bytes, BytesMut};
use reqwest::header::{HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{RelayError, Result};

/// Upper bound on a request head; a client that sends more without a blank
/// line is not speaking HTTP.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Synthetic response for a successfully established tunnel.
pub fn connection_established() -> Bytes {
    Bytes::from_static(b"HTTP/1.1 200 Connection established\r\n\r\n")
}

/// Synthetic `400 Bad Request` with empty body.
pub fn bad_request() -> Bytes {
    synthetic(400, "Bad Request")
}

/// Synthetic `500 Internal Server Error` with empty body.
pub fn internal_error() -> Bytes {
    synthetic(500, "Internal Server Error")
}

/// Synthetic `502 Bad Gateway` with empty body.
pub fn bad_gateway() -> Bytes {
    synthetic(502, "Bad Gateway")
}

fn synthetic(status: u16, reason: &str) -> Bytes {
    Bytes::from(format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Length: 0\r\n\r\n"
    ))
}

/// One parsed request head as read off a ship-side client socket.
#[derive(Debug)]
pub struct RequestHead {
    /// Request method, verbatim.
    pub method: String,
    /// Request target (origin-form path, absolute-form URI, or
    /// `host:port` for CONNECT), verbatim.
    pub target: String,
    /// Declared body length; 0 when absent or unparsable.
    pub content_length: usize,
    /// The head bytes exactly as received, including the final blank line.
    pub raw: Bytes,
}

/// Read one request head from `stream`.
///
/// `carry` buffers bytes read past the head (pipelined data or the start
/// of the body); callers hand the same buffer back on the next call so
/// nothing is lost between requests on a keep-alive connection.
///
/// Returns `Ok(None)` on a clean close before any byte of a new request.
pub async fn read_request_head<R>(
    stream: &mut R,
    carry: &mut BytesMut,
) -> Result<Option<RequestHead>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(end) = find_head_end(carry) {
            let raw = carry.split_to(end).freeze();
            return parse_head(raw).map(Some);
        }

        if carry.len() > MAX_HEAD_SIZE {
            return Err(RelayError::BadRequest("request head too large".into()));
        }

        let n = stream.read_buf(carry).await?;
        if n == 0 {
            if carry.is_empty() {
                return Ok(None);
            }
            return Err(RelayError::BadRequest(
                "connection closed mid-request".into(),
            ));
        }
    }
}

/// Read exactly `len` body bytes, consuming `carry` first.
pub async fn read_body<R>(stream: &mut R, carry: &mut BytesMut, len: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut body = BytesMut::with_capacity(len);
    let take = len.min(carry.len());
    body.extend_from_slice(&carry.split_to(take));

    let mut chunk = [0u8; 4096];
    while body.len() < len {
        let want = (len - body.len()).min(chunk.len());
        let n = stream.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Err(RelayError::BadRequest(
                "connection closed mid-body".into(),
            ));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Ok(body.freeze())
}

/// Index just past the `\r\n\r\n` terminating the head, if buffered.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn parse_head(raw: Bytes) -> Result<RequestHead> {
    let text = String::from_utf8_lossy(&raw);
    let request_line = text.split("\r\n").next().unwrap_or("");
    let mut parts = request_line.split_whitespace();

    let method = parts
        .next()
        .ok_or_else(|| RelayError::BadRequest("empty request line".into()))?
        .to_string();
    let target = parts
        .next()
        .ok_or_else(|| RelayError::BadRequest("request line has no target".into()))?
        .to_string();

    let content_length = header_value(&text, "content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    Ok(RequestHead {
        method,
        target,
        content_length,
        raw,
    })
}

/// Case-insensitive single-header lookup over a raw head.
fn header_value(head: &str, name: &str) -> Option<String> {
    for line in head.split("\r\n").skip(1) {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case(name) {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

/// A REQUEST payload decoded on the offshore side.
#[derive(Debug)]
pub enum ProxyCommand {
    /// `CONNECT host:port`: open a raw tunnel to `authority`.
    Connect {
        /// The `host:port` target, verbatim from the request line.
        authority: String,
    },
    /// Any other method: execute against the destination and relay back.
    Plain(PlainRequest),
}

/// A non-CONNECT request ready for execution.
#[derive(Debug)]
pub struct PlainRequest {
    /// Request method, verbatim.
    pub method: String,
    /// Fully qualified destination URL.
    pub url: String,
    /// Header name/value pairs as received.
    pub headers: Vec<(String, String)>,
    /// Request body (bytes after the first blank line).
    pub body: Bytes,
}

/// Decode a REQUEST frame payload.
///
/// The first line must split into at least two whitespace-separated
/// tokens; a plain request additionally needs a `Host` header or an
/// absolute-form target to name its destination. Anything else is a
/// [`RelayError::BadRequest`], which the caller answers with `400`.
pub fn parse_command(payload: &[u8]) -> Result<ProxyCommand> {
    let (head_bytes, body_bytes) = match find_head_end(payload) {
        Some(end) => (&payload[..end], &payload[end..]),
        None => (payload, &payload[payload.len()..]),
    };
    let head = String::from_utf8_lossy(head_bytes);

    let request_line = head.split("\r\n").next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let (method, target) = match (parts.next(), parts.next()) {
        (Some(m), Some(t)) => (m.to_string(), t.to_string()),
        _ => {
            return Err(RelayError::BadRequest(
                "request line needs a method and target".into(),
            ))
        }
    };

    if method.eq_ignore_ascii_case("CONNECT") {
        return Ok(ProxyCommand::Connect { authority: target });
    }

    let headers: Vec<(String, String)> = head
        .split("\r\n")
        .skip(1)
        .filter_map(|line| {
            line.split_once(':')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect();

    let host = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("host"))
        .map(|(_, value)| value.clone())
        .or_else(|| authority_from_target(&target))
        .ok_or_else(|| {
            RelayError::BadRequest("no Host header and target is not absolute-form".into())
        })?;

    let url = format!("http://{}{}", host, path_from_target(&target));

    Ok(ProxyCommand::Plain(PlainRequest {
        method,
        url,
        headers,
        body: Bytes::copy_from_slice(body_bytes),
    }))
}

/// Authority (`host[:port]`) from an absolute-form target, if it is one.
fn authority_from_target(target: &str) -> Option<String> {
    let rest = target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))?;
    let authority = rest.split('/').next().unwrap_or("");
    if authority.is_empty() {
        None
    } else {
        Some(authority.to_string())
    }
}

/// Path (+ query) from the target: the part after the authority for an
/// absolute-form URI, the target verbatim otherwise.
fn path_from_target(target: &str) -> String {
    let rest = match target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))
    {
        Some(rest) => rest,
        None => return target.to_string(),
    };
    match rest.find('/') {
        Some(idx) => rest[idx..].to_string(),
        None => "/".to_string(),
    }
}

/// Hop-by-hop headers that must not be forwarded to the destination.
fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Execute a plain request against its destination and flatten the
/// response to raw HTTP/1.1 bytes.
///
/// End-to-end request headers are forwarded; hop-by-hop headers, `Host`
/// and `Content-Length` are regenerated by the client. Errors map to the
/// caller's 500/502 taxonomy: [`RelayError::RequestBuild`] for a request
/// that cannot be constructed, [`RelayError::Upstream`] for a destination
/// that cannot be reached or misbehaves.
pub async fn execute_plain(client: &reqwest::Client, request: &PlainRequest) -> Result<Vec<u8>> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|_| RelayError::RequestBuild(format!("invalid method {:?}", request.method)))?;

    let mut builder = client.request(method, &request.url);
    for (name, value) in &request.headers {
        if is_hop_by_hop(name)
            || name.eq_ignore_ascii_case("host")
            || name.eq_ignore_ascii_case("content-length")
        {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            tracing::debug!(header = %name, "skipping unparsable request header");
            continue;
        };
        builder = builder.header(name, value);
    }
    if !request.body.is_empty() {
        builder = builder.body(request.body.clone());
    }

    let response = builder.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;

    Ok(encode_response(status, &headers, &body))
}

/// Flatten a destination response to `status-line CRLF (header CRLF)* CRLF
/// body`.
///
/// Headers are preserved as received, except `Transfer-Encoding`: the body
/// arrives here already de-chunked, so the header is dropped and a
/// `Content-Length` is guaranteed to be present.
pub fn encode_response(
    status: reqwest::StatusCode,
    headers: &reqwest::header::HeaderMap,
    body: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 256);
    let reason = status.canonical_reason().unwrap_or("");
    out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", status.as_u16(), reason).as_bytes());

    let mut have_content_length = false;
    for (name, value) in headers.iter() {
        if name == &TRANSFER_ENCODING {
            continue;
        }
        if name == &CONTENT_LENGTH {
            have_content_length = true;
        }
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if !have_content_length {
        out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}
