//! Offload Client
//!
//! Device-side library for running calls through a computation offloading
//! gateway.
//!
//! ```no_run
//! use offload_client::OffloadClient;
//! use offload_common::CallEnvelope;
//! use serde_json::json;
//!
//! # async fn run() -> offload_common::Result<()> {
//! let mut client = OffloadClient::connect("127.0.0.1:4322").await?;
//! client.authenticate("device123").await?;
//! client.register_code("com.example.App", b"...").await?;
//!
//! let envelope = CallEnvelope::new("Calc", "add")
//!     .param("int", json!(2))
//!     .param("int", json!(3));
//! let result = client.compute(&envelope).await?;
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;

pub use client::{CodeStatus, OffloadClient};
