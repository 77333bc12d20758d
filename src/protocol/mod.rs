//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the binary protocol for the relay link:
//! - 5-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed accessors

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    FrameType, Header, HEADER_SIZE, TYPE_REQUEST, TYPE_RESPONSE, TYPE_TUNNEL_CLOSE,
    TYPE_TUNNEL_DATA,
};
