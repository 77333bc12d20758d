//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame with header and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing between the
//! decode buffer and downstream consumers.

use bytes::Bytes;

use super::wire_format::{FrameType, Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from a type and payload.
    pub fn new(frame_type: FrameType, payload: Bytes) -> Self {
        Self {
            header: Header::new(frame_type, payload.len() as u32),
            payload,
        }
    }

    /// Create a frame from raw payload bytes (copies data).
    pub fn from_parts(frame_type: FrameType, payload: &[u8]) -> Self {
        Self::new(frame_type, Bytes::copy_from_slice(payload))
    }

    /// Typed view of the header's type byte.
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        self.header.frame_type()
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Check if this frame completes a request/response exchange.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.frame_type() == FrameType::Response
    }
}

/// Build a complete frame as a single byte vector.
///
/// Encodes the 5-byte header and appends the payload into one contiguous
/// buffer so the whole frame can go out in a single write.
pub fn build_frame(frame_type: FrameType, payload: &[u8]) -> Vec<u8> {
    let header = Header::new(frame_type, payload.len() as u32);
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
