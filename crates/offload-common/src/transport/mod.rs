//! Offload Transport Layer
//!
//! Tag bytes and length-prefixed frames over TCP, in a blocking flavour for
//! the execution host and an async flavour for the gateway, bridge and client.
//!
//! - **[`JsonCodec`]**: encode/decode call envelopes and call results as frames
//! - **[`TcpTransport`]**: synchronous transport (used by execution hosts)
//! - **[`TcpTransportAsync`]**: async transport (used by gateway and clients)
//!
//! All transports reject frames larger than 100 MB.

pub mod codec;
pub mod tcp;

pub use codec::JsonCodec;
pub use tcp::{TcpTransport, TcpTransportAsync, MAX_FRAME_SIZE};
