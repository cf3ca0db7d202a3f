use serde::{Deserialize, Serialize};
use std::fmt;

use offload_common::protocol::error::{OffloadError, Result};

/// Lease state of a compute node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Available,
    Leased,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Available => f.write_str("available"),
            NodeStatus::Leased => f.write_str("leased"),
        }
    }
}

/// A compute node in the pool. Created at provisioning time; the gateway
/// only ever flips its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeNode {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub status: NodeStatus,
}

impl ComputeNode {
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
            status: NodeStatus::Available,
        }
    }

    /// `address:port` of the node's execution host.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Parses an inventory entry of the form `id=host:port`.
    ///
    /// # Example
    ///
    /// ```
    /// use offload_gateway::ComputeNode;
    ///
    /// let node = ComputeNode::parse_spec("node-1=10.0.0.5:6000").unwrap();
    /// assert_eq!(node.endpoint(), "10.0.0.5:6000");
    /// ```
    pub fn parse_spec(spec: &str) -> Result<Self> {
        let (id, endpoint) = spec.split_once('=').ok_or_else(|| {
            OffloadError::InvalidRequest(format!("node spec '{}' must look like id=host:port", spec))
        })?;
        let (address, port) = endpoint.rsplit_once(':').ok_or_else(|| {
            OffloadError::InvalidRequest(format!("node spec '{}' is missing a port", spec))
        })?;
        let port = port.parse::<u16>().map_err(|e| {
            OffloadError::InvalidRequest(format!("invalid port in node spec '{}': {}", spec, e))
        })?;

        if id.is_empty() || address.is_empty() {
            return Err(OffloadError::InvalidRequest(format!(
                "node spec '{}' has an empty id or address",
                spec
            )));
        }

        Ok(Self::new(id, address.trim_matches(['[', ']']), port))
    }
}
