//! Connect-and-retry loop from a session bridge to its leased node.

use std::io::ErrorKind;
use std::time::Instant;

use tokio::net::TcpStream;
use tracing::{debug, info};

use offload_common::protocol::error::{OffloadError, Result};

use crate::config::ConnectRetryConfig;

/// How a failed connect attempt is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Nothing listening yet; retry after the reconnect interval.
    Refused,
    /// Network-level hiccup; retry after the short pause.
    Transient,
    /// Give up immediately.
    Fatal,
}

/// Classifies an I/O error raised while connecting.
pub fn classify(err: &std::io::Error) -> Disposition {
    match err.kind() {
        ErrorKind::ConnectionRefused => Disposition::Refused,
        ErrorKind::TimedOut
        | ErrorKind::HostUnreachable
        | ErrorKind::NetworkUnreachable
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted => Disposition::Transient,
        _ => Disposition::Fatal,
    }
}

enum AttemptError {
    Resolve(String),
    TimedOut,
    Io(std::io::Error),
}

/// Connects to `endpoint`, retrying according to `config`.
///
/// # Errors
///
/// - `NodeUnreachable` once the deadline passes
/// - `Io` for a non-retryable failure
pub async fn connect_with_retry(endpoint: &str, config: &ConnectRetryConfig) -> Result<TcpStream> {
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;

        let (pause, reason) = match attempt(endpoint, config).await {
            Ok(stream) => {
                info!("Connected to node {} after {} attempt(s)", endpoint, attempts);
                return Ok(stream);
            }
            Err(AttemptError::Resolve(msg)) => (config.transient_pause, msg),
            Err(AttemptError::TimedOut) => (config.transient_pause, "connect timed out".to_string()),
            Err(AttemptError::Io(e)) => match classify(&e) {
                Disposition::Refused => (config.reconnect_interval, e.to_string()),
                Disposition::Transient => (config.transient_pause, e.to_string()),
                Disposition::Fatal => return Err(OffloadError::Io(e)),
            },
        };

        if let Some(deadline) = config.deadline {
            if started.elapsed() + pause > deadline {
                return Err(OffloadError::NodeUnreachable(format!(
                    "{} after {} attempt(s): {}",
                    endpoint, attempts, reason
                )));
            }
        }

        debug!("Node {} not reachable yet ({}), retrying in {:?}", endpoint, reason, pause);
        tokio::time::sleep(pause).await;
    }
}

async fn attempt(endpoint: &str, config: &ConnectRetryConfig) -> std::result::Result<TcpStream, AttemptError> {
    let addrs: Vec<_> = tokio::net::lookup_host(endpoint)
        .await
        .map_err(|e| AttemptError::Resolve(format!("cannot resolve {}: {}", endpoint, e)))?
        .collect();

    if addrs.is_empty() {
        return Err(AttemptError::Resolve(format!("{} resolved to no addresses", endpoint)));
    }

    let mut last_err = AttemptError::TimedOut;
    for addr in addrs {
        match tokio::time::timeout(config.attempt_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => last_err = AttemptError::Io(e),
            Err(_) => last_err = AttemptError::TimedOut,
        }
    }
    Err(last_err)
}
