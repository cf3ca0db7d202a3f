use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Mutex;
use tokio::task;
use tracing::{error, info, warn};

use offload_common::protocol::error::{OffloadError, Result};

use crate::node::{ComputeNode, NodeStatus};
use crate::provisioning::Provisioner;
use crate::store::{MemoryStore, NodeStore};

/// Identifier of one client session, unique within a gateway process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Exclusive binding of one node to one session.
///
/// Deliberately not `Clone`: handing the lease back to
/// [`NodePool::finish_lease`] consumes it, so a session cannot release twice.
#[derive(Debug)]
pub struct Lease {
    node: ComputeNode,
    session: SessionId,
}

impl Lease {
    pub fn node(&self) -> &ComputeNode {
        &self.node
    }

    pub fn session(&self) -> SessionId {
        self.session
    }
}

/// Counters describing pool activity since startup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub acquired: u64,
    pub rejected: u64,
    pub released: u64,
    pub powered_off: u64,
}

#[derive(Default)]
struct PoolCounters {
    acquired: AtomicU64,
    rejected: AtomicU64,
    released: AtomicU64,
    powered_off: AtomicU64,
}

struct PoolTable {
    nodes: Vec<ComputeNode>,
    store: Box<dyn NodeStore>,
}

impl PoolTable {
    /// Saves the table. Store writes may hit the disk, so on a multi-thread
    /// runtime the worker is handed off for the duration of the save.
    fn persist(&mut self) -> Result<()> {
        let Self { nodes, store } = self;
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                task::block_in_place(|| store.save(nodes.as_slice()))
            }
            _ => store.save(nodes.as_slice()),
        }
    }
}

/// Registry of compute nodes with atomic lease acquisition.
///
/// The whole status table sits behind one mutex. `acquire` performs
/// select-one, update-status and persist inside that single critical section,
/// so two concurrent callers can never be handed the same node. Nothing
/// inside the critical section waits on the network.
pub struct NodePool {
    table: Mutex<PoolTable>,
    provisioner: Arc<dyn Provisioner>,
    counters: PoolCounters,
}

impl NodePool {
    /// Opens a pool over an existing store.
    ///
    /// Nodes recorded as leased are left over from a previous gateway process
    /// (the pool has a single writer), so they are returned to `Available`.
    pub fn open(mut store: Box<dyn NodeStore>, provisioner: Arc<dyn Provisioner>) -> Result<Self> {
        let mut nodes = store.load()?;

        let mut seen = HashSet::new();
        for node in &nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(OffloadError::Store(format!("duplicate node id '{}'", node.id)));
            }
        }

        let mut stale = 0;
        for node in nodes.iter_mut().filter(|n| n.status == NodeStatus::Leased) {
            node.status = NodeStatus::Available;
            stale += 1;
        }

        let mut table = PoolTable { nodes, store };
        if stale > 0 {
            warn!("Recovered {} stale lease(s) from a previous run", stale);
            table.persist()?;
        }

        info!("Node pool opened with {} node(s)", table.nodes.len());

        Ok(Self {
            table: Mutex::new(table),
            provisioner,
            counters: PoolCounters::default(),
        })
    }

    /// Pool over a fixed in-memory node list.
    pub fn in_memory(nodes: Vec<ComputeNode>, provisioner: Arc<dyn Provisioner>) -> Result<Self> {
        Self::open(Box::new(MemoryStore::new(nodes)), provisioner)
    }

    /// Leases one available node to `session`.
    ///
    /// Returns `Ok(None)` immediately when every node is leased; callers
    /// surface that as "no capacity" instead of waiting.
    pub async fn acquire(&self, session: SessionId) -> Result<Option<Lease>> {
        let mut table = self.table.lock().await;

        let Some(index) = table
            .nodes
            .iter()
            .position(|n| n.status == NodeStatus::Available)
        else {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        table.nodes[index].status = NodeStatus::Leased;
        if let Err(e) = table.persist() {
            table.nodes[index].status = NodeStatus::Available;
            return Err(e);
        }

        self.counters.acquired.fetch_add(1, Ordering::Relaxed);
        let node = table.nodes[index].clone();
        info!("Leased node {} to {}", node.id, session);

        Ok(Some(Lease { node, session }))
    }

    /// Marks a node available again and returns its status before the call.
    ///
    /// Releasing an already-available node is a no-op. Unknown ids yield
    /// `Ok(None)`. A failed store write is logged and does not undo the
    /// release; the next table write records the node as available.
    pub async fn release(&self, node_id: &str) -> Result<Option<NodeStatus>> {
        let mut table = self.table.lock().await;

        let Some(index) = table.nodes.iter().position(|n| n.id == node_id) else {
            warn!("Release requested for unknown node {}", node_id);
            return Ok(None);
        };

        let previous = table.nodes[index].status;
        if previous == NodeStatus::Available {
            return Ok(Some(previous));
        }

        table.nodes[index].status = NodeStatus::Available;
        if let Err(e) = table.persist() {
            error!("Failed to persist release of node {}: {}", node_id, e);
        }

        self.counters.released.fetch_add(1, Ordering::Relaxed);
        Ok(Some(previous))
    }

    /// Ends a lease: releases the node and, if it was still recorded as
    /// leased, powers it off. Power-off failures are logged, not returned.
    pub async fn finish_lease(&self, lease: Lease) -> Result<()> {
        let previous = self.release(&lease.node.id).await?;
        info!("Released node {} from {}", lease.node.id, lease.session);

        if previous == Some(NodeStatus::Leased) {
            match self.power_off(&lease.node).await {
                Ok(()) => {
                    self.counters.powered_off.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => warn!("Failed to power off node {}: {}", lease.node.id, e),
            }
        }

        Ok(())
    }

    pub async fn power_on(&self, node: &ComputeNode) -> Result<()> {
        self.provisioner.power_on(node).await
    }

    pub async fn power_off(&self, node: &ComputeNode) -> Result<()> {
        self.provisioner.power_off(node).await
    }

    /// Current node table, cloned.
    pub async fn snapshot(&self) -> Vec<ComputeNode> {
        self.table.lock().await.nodes.clone()
    }

    pub async fn available_count(&self) -> usize {
        self.table
            .lock()
            .await
            .nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Available)
            .count()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquired: self.counters.acquired.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
            powered_off: self.counters.powered_off.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioning::NoopProvisioner;
    use crate::store::JsonFileStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingProvisioner {
        on: AtomicUsize,
        off: AtomicUsize,
    }

    #[async_trait]
    impl Provisioner for CountingProvisioner {
        async fn power_on(&self, _node: &ComputeNode) -> Result<()> {
            self.on.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn power_off(&self, _node: &ComputeNode) -> Result<()> {
            self.off.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingStore;

    impl NodeStore for FailingStore {
        fn load(&mut self) -> Result<Vec<ComputeNode>> {
            Ok(vec![ComputeNode::new("a", "h", 1)])
        }

        fn save(&mut self, _nodes: &[ComputeNode]) -> Result<()> {
            Err(OffloadError::Store("disk full".into()))
        }
    }

    fn nodes(n: usize) -> Vec<ComputeNode> {
        (0..n)
            .map(|i| ComputeNode::new(format!("node-{}", i), "127.0.0.1", 6000 + i as u16))
            .collect()
    }

    #[tokio::test]
    async fn test_acquire_flips_status() {
        let pool = NodePool::in_memory(nodes(1), Arc::new(NoopProvisioner)).unwrap();

        let lease = pool.acquire(SessionId(1)).await.unwrap().unwrap();
        assert_eq!(lease.node().id, "node-0");
        assert_eq!(lease.session(), SessionId(1));
        assert_eq!(pool.snapshot().await[0].status, NodeStatus::Leased);
    }

    #[tokio::test]
    async fn test_exhausted_pool_returns_none() {
        let pool = NodePool::in_memory(nodes(1), Arc::new(NoopProvisioner)).unwrap();

        let _held = pool.acquire(SessionId(1)).await.unwrap().unwrap();
        assert!(pool.acquire(SessionId(2)).await.unwrap().is_none());
        assert_eq!(pool.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_empty_pool_returns_none() {
        let pool = NodePool::in_memory(vec![], Arc::new(NoopProvisioner)).unwrap();
        assert!(pool.acquire(SessionId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_never_shares_a_node() {
        let pool = Arc::new(NodePool::in_memory(nodes(8), Arc::new(NoopProvisioner)).unwrap());

        let handles: Vec<_> = (0..40)
            .map(|i| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.acquire(SessionId(i)).await.unwrap() })
            })
            .collect();

        let mut leased_ids = HashSet::new();
        let mut granted = 0;
        for handle in handles {
            if let Some(lease) = handle.await.unwrap() {
                granted += 1;
                assert!(leased_ids.insert(lease.node().id.clone()), "node leased twice");
            }
        }

        assert_eq!(granted, 8);
        assert_eq!(pool.available_count().await, 0);
        assert_eq!(pool.stats().rejected, 32);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let pool = NodePool::in_memory(nodes(1), Arc::new(NoopProvisioner)).unwrap();
        let _lease = pool.acquire(SessionId(1)).await.unwrap().unwrap();

        assert_eq!(pool.release("node-0").await.unwrap(), Some(NodeStatus::Leased));
        assert_eq!(pool.release("node-0").await.unwrap(), Some(NodeStatus::Available));
        assert_eq!(pool.stats().released, 1);
    }

    #[tokio::test]
    async fn test_release_unknown_node() {
        let pool = NodePool::in_memory(nodes(1), Arc::new(NoopProvisioner)).unwrap();
        assert_eq!(pool.release("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_finish_lease_powers_off_once() {
        let provisioner = Arc::new(CountingProvisioner::default());
        let pool = NodePool::in_memory(nodes(1), provisioner.clone()).unwrap();

        let lease = pool.acquire(SessionId(1)).await.unwrap().unwrap();
        pool.finish_lease(lease).await.unwrap();

        assert_eq!(provisioner.off.load(Ordering::SeqCst), 1);
        assert_eq!(pool.snapshot().await[0].status, NodeStatus::Available);
        assert_eq!(pool.stats().powered_off, 1);
    }

    #[tokio::test]
    async fn test_finish_lease_skips_power_off_when_already_released() {
        let provisioner = Arc::new(CountingProvisioner::default());
        let pool = NodePool::in_memory(nodes(1), provisioner.clone()).unwrap();

        let lease = pool.acquire(SessionId(1)).await.unwrap().unwrap();
        pool.release("node-0").await.unwrap();
        pool.finish_lease(lease).await.unwrap();

        assert_eq!(provisioner.off.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_persist_reverts_acquire() {
        let pool = NodePool::open(Box::new(FailingStore), Arc::new(NoopProvisioner)).unwrap();

        assert!(pool.acquire(SessionId(1)).await.is_err());
        assert_eq!(pool.snapshot().await[0].status, NodeStatus::Available);
    }

    /// Accepts saves until the budget runs out, then fails every write.
    struct FlakyStore {
        nodes: Vec<ComputeNode>,
        saves_left: usize,
    }

    impl NodeStore for FlakyStore {
        fn load(&mut self) -> Result<Vec<ComputeNode>> {
            Ok(self.nodes.clone())
        }

        fn save(&mut self, nodes: &[ComputeNode]) -> Result<()> {
            if self.saves_left == 0 {
                return Err(OffloadError::Store("disk full".into()));
            }
            self.saves_left -= 1;
            self.nodes = nodes.to_vec();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_persist_does_not_block_release() {
        let provisioner = Arc::new(CountingProvisioner::default());
        let store = FlakyStore {
            nodes: nodes(1),
            saves_left: 1,
        };
        let pool = NodePool::open(Box::new(store), provisioner.clone()).unwrap();

        let lease = pool.acquire(SessionId(1)).await.unwrap().unwrap();
        pool.finish_lease(lease).await.unwrap();

        assert_eq!(pool.snapshot().await[0].status, NodeStatus::Available);
        assert_eq!(provisioner.off.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().released, 1);
        assert!(pool.acquire(SessionId(2)).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_file_backed_pool_on_multi_thread_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        let mut store = JsonFileStore::new(&path);
        store.save(&nodes(2)).unwrap();

        let pool = NodePool::open(Box::new(store), Arc::new(NoopProvisioner)).unwrap();
        let lease = pool.acquire(SessionId(1)).await.unwrap().unwrap();

        let on_disk: Vec<ComputeNode> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk[0].status, NodeStatus::Leased);

        pool.finish_lease(lease).await.unwrap();
        let on_disk: Vec<ComputeNode> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(on_disk.iter().all(|n| n.status == NodeStatus::Available));
    }

    #[tokio::test]
    async fn test_open_recovers_stale_leases() {
        let mut stale = nodes(2);
        stale[1].status = NodeStatus::Leased;

        let pool = NodePool::in_memory(stale, Arc::new(NoopProvisioner)).unwrap();
        assert_eq!(pool.available_count().await, 2);
    }

    #[tokio::test]
    async fn test_open_rejects_duplicate_ids() {
        let dup = vec![ComputeNode::new("x", "h", 1), ComputeNode::new("x", "h", 2)];
        assert!(NodePool::in_memory(dup, Arc::new(NoopProvisioner)).is_err());
    }
}
