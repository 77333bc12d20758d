//! # shorewire
//!
//! Ship-to-shore HTTP proxy relay over a single framed TCP link.
//!
//! A client machine on a restricted network ("ship") reaches arbitrary
//! HTTP/HTTPS destinations through a remote relay ("offshore") that it
//! dials once, outbound. All traffic between the two rides one TCP
//! connection as length-prefixed frames.
//!
//! ## Architecture
//!
//! ```text
//! client ──HTTP proxy──> ship ──frames──> offshore ──HTTP/TCP──> destination
//!                         │                  │
//!                         └── dispatcher ────┘ single-flight exchanges
//! ```
//!
//! The wire protocol carries no exchange identifiers: frames correlate by
//! temporal order alone, so the [`Dispatcher`] serializes every exchange
//! (and every CONNECT tunnel session) onto the connection one at a time.
//!
//! ## Wire format
//!
//! Each frame is `length:u32 BE | type:u8 | payload`, with types
//! `0=REQUEST`, `1=RESPONSE`, `2=TUNNEL_DATA`, `3=TUNNEL_CLOSE`. See
//! [`protocol`] for the codec and [`tunnel`] for the byte pumps.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod offshore;
pub mod protocol;
pub mod ship;
pub mod transport;
pub mod tunnel;

pub use dispatcher::Dispatcher;
pub use error::{RelayError, Result};
pub use protocol::{Frame, FrameType};
pub use transport::{connect_with_retry, FrameReader, RelayWriter};
