use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use offload_common::protocol::error::{OffloadError, Result};
use offload_common::protocol::tags::Tag;
use offload_common::transport::TcpTransportAsync;

use crate::bridge::{linger_close, SessionBridge};
use crate::config::{ConnectRetryConfig, GatewayConfig};
use crate::pool::{NodePool, SessionId};
use crate::trace::ExecutionLog;

/// Client-facing listener.
///
/// Reads the leading tag of every accepted connection. `PHONE_CONNECTION`
/// leases a node from the pool, powers it on and hands both to a
/// [`SessionBridge`] on its own task. Pool exhaustion is answered with
/// `NO_CAPACITY`; any other leading tag closes the connection. The gateway
/// keeps no per-session state.
pub struct Gateway {
    listener: TcpListener,
    pool: Arc<NodePool>,
    retry: ConnectRetryConfig,
    log: Option<ExecutionLog>,
    next_session: AtomicU64,
}

impl Gateway {
    /// Binds the listener described by `config`.
    pub async fn bind(config: GatewayConfig, pool: Arc<NodePool>) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind)
            .await
            .map_err(|e| OffloadError::Connection(format!("Failed to bind to {}: {}", config.bind, e)))?;

        Ok(Self {
            listener,
            pool,
            retry: config.retry,
            log: config.execution_log.map(ExecutionLog::new),
            next_session: AtomicU64::new(1),
        })
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| OffloadError::Connection(format!("Failed to get local addr: {}", e)))
    }

    pub fn pool(&self) -> &Arc<NodePool> {
        &self.pool
    }

    /// Accepts clients until the listener fails.
    pub async fn run(&self) -> Result<()> {
        info!("Gateway listening on {}", self.local_addr()?);

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let session = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
            debug!("Connection from {} assigned {}", peer_addr, session);

            let pool = self.pool.clone();
            let retry = self.retry.clone();
            let log = self.log.clone();
            tokio::spawn(async move {
                if let Err(e) = admit(stream, session, pool, retry, log).await {
                    warn!("{} rejected: {}", session, e);
                }
            });
        }
    }
}

/// Handles the leading tag of one connection.
async fn admit(
    mut stream: TcpStream,
    session: SessionId,
    pool: Arc<NodePool>,
    retry: ConnectRetryConfig,
    log: Option<ExecutionLog>,
) -> Result<()> {
    let tag = TcpTransportAsync::read_tag(&mut stream).await?;
    if tag != Tag::PhoneConnection {
        let _ = stream.shutdown().await;
        return Err(OffloadError::UnexpectedTag {
            expected: Tag::PhoneConnection.to_string(),
            got: tag.as_byte(),
        });
    }

    let Some(lease) = pool.acquire(session).await? else {
        info!("{} refused: no compute node available", session);
        let _ = TcpTransportAsync::write_tag(&mut stream, Tag::NoCapacity).await;
        linger_close(&mut stream).await;
        return Ok(());
    };

    if let Err(e) = pool.power_on(lease.node()).await {
        error!("{} could not power on node {}: {}", session, lease.node().id, e);
        let _ = stream.shutdown().await;
        pool.finish_lease(lease).await?;
        return Err(e);
    }

    let _ = stream.set_nodelay(true);
    let bridge = SessionBridge::new(stream, &lease, retry, log);
    bridge.run(lease, pool).await;
    Ok(())
}
