use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use offload_common::protocol::envelope::{CallEnvelope, CallResult};
use offload_common::protocol::error::{OffloadError, Result};
use offload_common::protocol::tags::Tag;
use offload_common::transport::TcpTransportAsync;

/// Outcome of registering a code artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeStatus {
    /// The node already had the artifact; nothing was sent.
    Cached,
    /// The artifact bytes were transferred.
    Transferred,
}

/// One offloading session through a gateway.
///
/// A session is a single TCP connection: the gateway leases one node for it
/// and releases the node when the session ends. Calls are strictly
/// sequential.
pub struct OffloadClient {
    stream: TcpStream,
    gateway_addr: String,
}

impl OffloadClient {
    /// Opens a session. The gateway only reports `NO_CAPACITY` in reply to
    /// the first command, so a refused session surfaces there as
    /// [`OffloadError::NoCapacity`].
    pub async fn connect(gateway_addr: impl Into<String>) -> Result<Self> {
        let gateway_addr = gateway_addr.into();
        let mut stream = TcpStream::connect(&gateway_addr).await.map_err(|e| {
            OffloadError::Connection(format!("Failed to connect to {}: {}", gateway_addr, e))
        })?;
        let _ = stream.set_nodelay(true);

        TcpTransportAsync::write_tag(&mut stream, Tag::PhoneConnection).await?;
        debug!("Session opened with {}", gateway_addr);

        Ok(Self {
            stream,
            gateway_addr,
        })
    }

    pub fn gateway_addr(&self) -> &str {
        &self.gateway_addr
    }

    /// Round trip to the gateway; the node is not involved.
    pub async fn ping(&mut self) -> Result<Duration> {
        let started = Instant::now();
        TcpTransportAsync::write_tag(&mut self.stream, Tag::Ping).await?;
        self.expect_tag(Tag::Pong).await?;
        Ok(started.elapsed())
    }

    pub async fn authenticate(&mut self, client_id: &str) -> Result<()> {
        TcpTransportAsync::write_tag(&mut self.stream, Tag::PhoneAuthentication).await?;
        TcpTransportAsync::send_string(&mut self.stream, client_id).await
    }

    /// Registers the application `app_id`, sending `artifact` only if the
    /// node asks for it.
    pub async fn register_code(&mut self, app_id: &str, artifact: &[u8]) -> Result<CodeStatus> {
        TcpTransportAsync::write_tag(&mut self.stream, Tag::CodeRegister).await?;
        TcpTransportAsync::send_string(&mut self.stream, app_id).await?;

        match self.read_reply().await? {
            Tag::CodePresent => Ok(CodeStatus::Cached),
            Tag::CodeRequest => {
                TcpTransportAsync::send_frame(&mut self.stream, artifact).await?;
                debug!("Transferred artifact for {} ({} bytes)", app_id, artifact.len());
                Ok(CodeStatus::Transferred)
            }
            other => Err(unexpected("CODE_PRESENT or CODE_REQUEST", other)),
        }
    }

    pub async fn compute(&mut self, envelope: &CallEnvelope) -> Result<CallResult> {
        TcpTransportAsync::write_tag(&mut self.stream, Tag::ComputationRequest).await?;
        TcpTransportAsync::send_envelope(&mut self.stream, envelope).await?;
        self.read_result().await
    }

    /// Sends `data` as an auxiliary file, then runs the call. Only the
    /// final component of `path_hint` reaches the node.
    pub async fn compute_with_file(
        &mut self,
        path_hint: &str,
        data: &[u8],
        envelope: &CallEnvelope,
    ) -> Result<CallResult> {
        TcpTransportAsync::write_tag(&mut self.stream, Tag::ComputationRequestWithFile).await?;
        TcpTransportAsync::send_string(&mut self.stream, path_hint).await?;
        self.expect_tag(Tag::SendFileRequest).await?;
        TcpTransportAsync::send_frame(&mut self.stream, data).await?;
        TcpTransportAsync::send_envelope(&mut self.stream, envelope).await?;
        self.read_result().await
    }

    /// Ends the session; the gateway releases the node.
    pub async fn disconnect(mut self) -> Result<()> {
        TcpTransportAsync::write_tag(&mut self.stream, Tag::PhoneDisconnection).await?;
        let _ = self.stream.shutdown().await;
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<Tag> {
        match TcpTransportAsync::read_tag(&mut self.stream).await? {
            Tag::NoCapacity => Err(OffloadError::NoCapacity),
            Tag::NodeUnreachable => Err(OffloadError::NodeUnreachable(self.gateway_addr.clone())),
            Tag::ConnectionReleased => Err(OffloadError::Connection(
                "gateway closed the session".to_string(),
            )),
            tag => Ok(tag),
        }
    }

    async fn expect_tag(&mut self, expected: Tag) -> Result<()> {
        match self.read_reply().await? {
            tag if tag == expected => Ok(()),
            other => Err(unexpected(&expected.to_string(), other)),
        }
    }

    /// Reads a call result, recognizing a gateway tag sent in its place.
    ///
    /// A result starts with the return type name's length prefix. Frames are
    /// capped at 100 MiB, so that prefix never starts with 33 or 34.
    async fn read_result(&mut self) -> Result<CallResult> {
        let mut first = [0u8; 1];
        let peeked = self.stream.peek(&mut first).await?;
        if peeked == 0 {
            return Err(OffloadError::Connection("gateway closed the session".to_string()));
        }
        if is_gateway_tag(first[0]) {
            let tag = self.read_reply().await?;
            return Err(unexpected("call result", tag));
        }
        TcpTransportAsync::receive_result(&mut self.stream).await
    }
}

fn is_gateway_tag(byte: u8) -> bool {
    let byte = byte as i8;
    byte == Tag::NoCapacity.as_byte() || byte == Tag::NodeUnreachable.as_byte()
}

fn unexpected(expected: &str, got: Tag) -> OffloadError {
    OffloadError::UnexpectedTag {
        expected: expected.to_string(),
        got: got.as_byte(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn fake_gateway() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn test_ping_and_register_cached() {
        let (listener, addr) = fake_gateway().await;
        let server = tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            assert_eq!(TcpTransportAsync::read_tag(&mut s).await.unwrap(), Tag::PhoneConnection);
            assert_eq!(TcpTransportAsync::read_tag(&mut s).await.unwrap(), Tag::Ping);
            TcpTransportAsync::write_tag(&mut s, Tag::Pong).await.unwrap();
            assert_eq!(TcpTransportAsync::read_tag(&mut s).await.unwrap(), Tag::CodeRegister);
            assert_eq!(TcpTransportAsync::receive_string(&mut s).await.unwrap(), "com.example.App");
            TcpTransportAsync::write_tag(&mut s, Tag::CodePresent).await.unwrap();
            assert_eq!(TcpTransportAsync::read_tag(&mut s).await.unwrap(), Tag::PhoneDisconnection);
        });

        let mut client = OffloadClient::connect(&addr).await.unwrap();
        client.ping().await.unwrap();
        let status = client.register_code("com.example.App", b"code").await.unwrap();
        assert_eq!(status, CodeStatus::Cached);
        client.disconnect().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_capacity_is_typed() {
        let (listener, addr) = fake_gateway().await;
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let _ = TcpTransportAsync::read_tag(&mut s).await;
            TcpTransportAsync::write_tag(&mut s, Tag::NoCapacity).await.unwrap();
            let _ = tokio::io::copy(&mut s, &mut tokio::io::sink()).await;
        });

        let mut client = OffloadClient::connect(&addr).await.unwrap();
        assert!(matches!(client.ping().await, Err(OffloadError::NoCapacity)));
    }

    #[tokio::test]
    async fn test_unreachable_in_place_of_result() {
        let (listener, addr) = fake_gateway().await;
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let _ = TcpTransportAsync::read_tag(&mut s).await;
            TcpTransportAsync::write_tag(&mut s, Tag::NodeUnreachable).await.unwrap();
            let _ = tokio::io::copy(&mut s, &mut tokio::io::sink()).await;
        });

        let mut client = OffloadClient::connect(&addr).await.unwrap();
        let envelope = CallEnvelope::new("Calc", "add").param("int", json!(1));
        assert!(matches!(
            client.compute(&envelope).await,
            Err(OffloadError::NodeUnreachable(_))
        ));
    }
}
