//! Offload Common Types and Transport
//!
//! Shared protocol definitions for the computation offloading gateway, the
//! execution hosts behind it, and the device-side client.
//!
//! # Overview
//!
//! A client connects to the gateway, which leases an idle compute node and
//! bridges the connection to that node's execution host. The host loads the
//! application's code artifact and runs marshaled method calls against it.
//!
//! - **Protocol Layer**: tags, call envelopes, call results, error type
//! - **Transport Layer**: tag bytes plus length-prefixed frames over TCP
//!
//! # Example
//!
//! ```
//! use offload_common::{CallEnvelope, CallResult};
//! use serde_json::json;
//!
//! let envelope = CallEnvelope::new("Calc", "add")
//!     .param("int", json!(2))
//!     .param("int", json!(3));
//!
//! let result = CallResult::value("int", json!(5));
//! assert!(!result.is_error());
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
