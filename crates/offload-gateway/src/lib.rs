//! Offload Gateway
//!
//! Leases compute nodes to device clients and relays their sessions.
//!
//! - [`NodePool`]: persistent node table with atomic acquire/release
//! - [`Gateway`]: accept loop that turns `PHONE_CONNECTION` into a lease
//! - [`SessionBridge`]: per-session protocol relay with guaranteed cleanup

pub mod bridge;
pub mod config;
pub mod connector;
pub mod gateway;
pub mod node;
pub mod pool;
pub mod provisioning;
pub mod store;
pub mod trace;

pub use bridge::{BridgeState, SessionBridge};
pub use config::{ConnectRetryConfig, GatewayConfig};
pub use gateway::Gateway;
pub use node::{ComputeNode, NodeStatus};
pub use pool::{Lease, NodePool, PoolStats, SessionId};
pub use provisioning::{CommandProvisioner, NoopProvisioner, Provisioner};
pub use store::{JsonFileStore, MemoryStore, NodeStore};
pub use trace::ExecutionLog;
