//! Per-session relay between one client socket and its leased node.
//!
//! # Lifecycle
//!
//! ```text
//! Connecting ──link up──▶ Ready ──first call──▶ Active
//!      │                    │                     │
//!      └────────────────────┴──────────┬──────────┘
//!                                      ▼
//!                                 Terminated
//! ```
//!
//! The node connection is dialed in a background task as soon as the bridge
//! is created. Meanwhile the command loop keeps serving the client: `PING`
//! and `PHONE_AUTHENTICATION` never touch the node, and the first command
//! that does waits for the link.
//!
//! Whatever ends the session (disconnect, EOF, protocol violation, I/O
//! failure, or a panic inside the loop), [`SessionBridge::run`] closes both
//! sockets and hands the lease back to the pool exactly once.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use offload_common::protocol::error::{OffloadError, Result};
use offload_common::protocol::names::{bare_file_name, short_artifact_name};
use offload_common::protocol::tags::Tag;
use offload_common::transport::codec::{ENVELOPE_FIELDS, RESULT_FIELDS};
use offload_common::transport::TcpTransportAsync;

use crate::config::ConnectRetryConfig;
use crate::connector::connect_with_retry;
use crate::pool::{Lease, NodePool, SessionId};
use crate::trace::ExecutionLog;

const LINGER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Node link still being dialed.
    Connecting,
    /// Node link up, no computation relayed yet.
    Ready,
    /// At least one computation relayed.
    Active,
    Terminated,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Connecting => "connecting",
            BridgeState::Ready => "ready",
            BridgeState::Active => "active",
            BridgeState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

enum NodeLink {
    Connecting(oneshot::Receiver<Result<TcpStream>>),
    Ready(TcpStream),
    Failed,
}

/// Outcome of waiting on the client while the node link is still pending.
enum Wake {
    Link(Result<TcpStream>),
    Client(Result<Tag>),
}

pub struct SessionBridge {
    session: SessionId,
    client: TcpStream,
    link: NodeLink,
    connector: Option<JoinHandle<()>>,
    state: BridgeState,
    client_id: Option<String>,
    app: Option<String>,
    log: Option<ExecutionLog>,
}

impl SessionBridge {
    /// Creates the bridge and starts dialing the leased node.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        client: TcpStream,
        lease: &Lease,
        retry: ConnectRetryConfig,
        log: Option<ExecutionLog>,
    ) -> Self {
        let (tx, rx) = oneshot::channel();
        let endpoint = lease.node().endpoint();
        let session = lease.session();

        let connector = tokio::spawn(async move {
            debug!("{} dialing node at {}", session, endpoint);
            let outcome = connect_with_retry(&endpoint, &retry).await;
            let _ = tx.send(outcome);
        });

        Self {
            session,
            client,
            link: NodeLink::Connecting(rx),
            connector: Some(connector),
            state: BridgeState::Connecting,
            client_id: None,
            app: None,
            log,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Runs the session to completion, then releases `lease`.
    pub async fn run(mut self, lease: Lease, pool: Arc<NodePool>) {
        let outcome = AssertUnwindSafe(self.command_loop()).catch_unwind().await;

        let clean = match outcome {
            Ok(Ok(())) => {
                info!("{} ended by client", self.session);
                true
            }
            Ok(Err(e)) => {
                warn!("{} aborted: {}", self.session, e);
                false
            }
            Err(_) => {
                error!("{} command loop panicked", self.session);
                false
            }
        };

        self.terminate(clean).await;

        if let Err(e) = pool.finish_lease(lease).await {
            error!("{} failed to release its node: {}", self.session, e);
        }
    }

    async fn command_loop(&mut self) -> Result<()> {
        loop {
            let tag = self.next_client_tag().await?;
            debug!("{} [{}] received {}", self.session, self.state, tag);

            match tag {
                Tag::Ping => TcpTransportAsync::write_tag(&mut self.client, Tag::Pong).await?,
                Tag::PhoneAuthentication => {
                    let id = TcpTransportAsync::receive_string(&mut self.client).await?;
                    info!("{} authenticated as {}", self.session, id);
                    self.client_id = Some(id);
                }
                Tag::CodeRegister => self.register_code().await?,
                Tag::ComputationRequest => {
                    self.ensure_link().await?;
                    let (_, node) = self.legs()?;
                    TcpTransportAsync::write_tag(node, Tag::ComputationRequest).await?;
                    self.relay_call().await?;
                }
                Tag::ComputationRequestWithFile => self.relay_call_with_file().await?,
                tag if tag.is_disconnect() => {
                    self.notify_node_disconnect().await;
                    return Ok(());
                }
                other => {
                    return Err(OffloadError::UnexpectedTag {
                        expected: "client command".to_string(),
                        got: other.as_byte(),
                    });
                }
            }
        }
    }

    /// Reads the next client tag. While the node link is still pending it
    /// also watches the connector, so a failed link ends the session even if
    /// the client is idle.
    async fn next_client_tag(&mut self) -> Result<Tag> {
        loop {
            let NodeLink::Connecting(ready) = &mut self.link else {
                return TcpTransportAsync::read_tag(&mut self.client).await;
            };

            let wake = tokio::select! {
                biased;
                outcome = ready => Wake::Link(outcome.unwrap_or_else(|_| Err(connector_gone()))),
                tag = TcpTransportAsync::read_tag(&mut self.client) => Wake::Client(tag),
            };

            match wake {
                Wake::Link(outcome) => self.settle_link(outcome).await?,
                Wake::Client(tag) => return tag,
            }
        }
    }

    /// Blocks until the node link is established.
    async fn ensure_link(&mut self) -> Result<()> {
        match &mut self.link {
            NodeLink::Ready(_) => Ok(()),
            NodeLink::Failed => Err(OffloadError::Connection("node link failed".to_string())),
            NodeLink::Connecting(ready) => {
                let outcome = ready.await.unwrap_or_else(|_| Err(connector_gone()));
                self.settle_link(outcome).await
            }
        }
    }

    async fn settle_link(&mut self, outcome: Result<TcpStream>) -> Result<()> {
        self.connector = None;
        match outcome {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                self.link = NodeLink::Ready(stream);
                self.state = BridgeState::Ready;
                info!("{} node link ready", self.session);
                Ok(())
            }
            Err(e) => {
                self.link = NodeLink::Failed;
                if matches!(e, OffloadError::NodeUnreachable(_)) {
                    let _ = TcpTransportAsync::write_tag(&mut self.client, Tag::NodeUnreachable).await;
                }
                Err(e)
            }
        }
    }

    /// Client and node streams, borrowed together.
    fn legs(&mut self) -> Result<(&mut TcpStream, &mut TcpStream)> {
        match &mut self.link {
            NodeLink::Ready(node) => Ok((&mut self.client, node)),
            _ => Err(OffloadError::Connection("node link not established".to_string())),
        }
    }

    async fn register_code(&mut self) -> Result<()> {
        let app_id = TcpTransportAsync::receive_string(&mut self.client).await?;
        let name = short_artifact_name(&app_id);
        if name.is_empty() {
            return Err(OffloadError::InvalidRequest(format!(
                "cannot derive artifact name from '{}'",
                app_id
            )));
        }

        self.ensure_link().await?;
        let session = self.session;
        let (client, node) = self.legs()?;

        TcpTransportAsync::write_tag(node, Tag::CodeRegister).await?;
        TcpTransportAsync::send_string(node, &name).await?;

        match TcpTransportAsync::read_tag(node).await? {
            Tag::CodePresent => {
                debug!("{} artifact {} already cached on node", session, name);
                TcpTransportAsync::write_tag(client, Tag::CodePresent).await?;
            }
            Tag::CodeRequest => {
                TcpTransportAsync::write_tag(client, Tag::CodeRequest).await?;
                let bytes = TcpTransportAsync::relay_frame(client, node).await?;
                info!("{} transferred artifact {} ({} bytes)", session, name, bytes);
            }
            other => {
                return Err(OffloadError::UnexpectedTag {
                    expected: "CODE_PRESENT or CODE_REQUEST".to_string(),
                    got: other.as_byte(),
                });
            }
        }

        self.app = Some(name);
        Ok(())
    }

    async fn relay_call_with_file(&mut self) -> Result<()> {
        let hint = TcpTransportAsync::receive_string(&mut self.client).await?;
        let file_name = bare_file_name(&hint);
        if file_name.is_empty() {
            return Err(OffloadError::InvalidRequest(format!(
                "cannot derive file name from '{}'",
                hint
            )));
        }

        self.ensure_link().await?;
        let session = self.session;
        let (client, node) = self.legs()?;

        TcpTransportAsync::write_tag(node, Tag::ComputationRequestWithFile).await?;
        TcpTransportAsync::send_string(node, &file_name).await?;
        TcpTransportAsync::write_tag(client, Tag::SendFileRequest).await?;
        let bytes = TcpTransportAsync::relay_frame(client, node).await?;
        debug!("{} relayed file {} ({} bytes)", session, file_name, bytes);

        self.relay_call().await
    }

    /// Relays the five call fields to the node and the two result fields
    /// back. The request tag has already been forwarded.
    async fn relay_call(&mut self) -> Result<()> {
        let started = Instant::now();
        let (client, node) = self.legs()?;

        for _ in 0..ENVELOPE_FIELDS {
            TcpTransportAsync::relay_frame(client, node).await?;
        }
        for _ in 0..RESULT_FIELDS {
            TcpTransportAsync::relay_frame(node, client).await?;
        }

        let elapsed = started.elapsed();
        self.state = BridgeState::Active;
        debug!(
            "{} computation for {} completed in {:?}",
            self.session,
            self.app.as_deref().unwrap_or("<unregistered>"),
            elapsed
        );

        if let Some(log) = &self.log {
            if let Err(e) = log.record(elapsed, self.session).await {
                warn!("{} could not write execution log: {}", self.session, e);
            }
        }
        Ok(())
    }

    async fn notify_node_disconnect(&mut self) {
        if let NodeLink::Ready(node) = &mut self.link {
            if let Err(e) = TcpTransportAsync::write_tag(node, Tag::PhoneDisconnection).await {
                debug!("{} could not notify node of disconnect: {}", self.session, e);
            }
        }
    }

    /// Closes both legs. After an abnormal end the client may still have
    /// unread bytes in flight; draining them first keeps the final tag we
    /// sent from being lost to a connection reset.
    async fn terminate(&mut self, clean: bool) {
        self.state = BridgeState::Terminated;

        if let Some(connector) = self.connector.take() {
            connector.abort();
        }

        if clean {
            let _ = self.client.shutdown().await;
        } else {
            linger_close(&mut self.client).await;
        }
        if let NodeLink::Ready(node) = &mut self.link {
            let _ = node.shutdown().await;
        }
        self.link = NodeLink::Failed;

        info!(
            "{} terminated (client {})",
            self.session,
            self.client_id.as_deref().unwrap_or("anonymous")
        );
    }
}

/// Half-closes `stream`, then discards whatever the peer still sends until
/// it closes too or [`LINGER`] elapses.
pub(crate) async fn linger_close(stream: &mut TcpStream) {
    let _ = stream.shutdown().await;
    let _ = tokio::time::timeout(LINGER, tokio::io::copy(stream, &mut tokio::io::sink())).await;
}

fn connector_gone() -> OffloadError {
    OffloadError::Connection("node connector stopped before reporting".to_string())
}
