//! End-to-end sessions: client → gateway → session bridge → execution host.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use offload_client::{CodeStatus, OffloadClient};
use offload_common::{CallEnvelope, CallResult, OffloadError};
use offload_gateway::{
    ComputeNode, ConnectRetryConfig, Gateway, GatewayConfig, NodePool, NodeStatus, NoopProvisioner,
};
use offload_host::{dispatch, ArtifactCache, ExecutionHost, ScriptLoader, ScriptModule};

const CALC: &str = r#"
    offload.define("Calc", "add", ["int", "int"], "int", function (self, a, b) {
        return a + b;
    });
    offload.define("Calc", "offset", ["int"], "int", function (self, a) {
        return a + self.base;
    });
"#;

struct Host {
    port: u16,
    dir: TempDir,
}

fn start_host() -> Host {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::open(dir.path()).unwrap();
    let host = ExecutionHost::bind("127.0.0.1:0", cache, Box::new(ScriptLoader)).unwrap();
    let port = host.local_addr().unwrap().port();
    thread::spawn(move || host.serve());
    Host { port, dir }
}

async fn start_gateway(hosts: &[&Host]) -> (String, Arc<NodePool>) {
    let nodes = hosts
        .iter()
        .enumerate()
        .map(|(i, h)| ComputeNode::new(format!("node-{}", i), "127.0.0.1", h.port))
        .collect();
    let pool = Arc::new(NodePool::in_memory(nodes, Arc::new(NoopProvisioner)).unwrap());

    let config = GatewayConfig::default()
        .with_bind("127.0.0.1:0")
        .with_retry(ConnectRetryConfig {
            deadline: Some(Duration::from_secs(5)),
            ..ConnectRetryConfig::default()
        });
    let gateway = Gateway::bind(config, pool.clone()).await.unwrap();
    let addr = gateway.local_addr().unwrap().to_string();
    tokio::spawn(async move { gateway.run().await });
    (addr, pool)
}

async fn wait_until_all_available(pool: &NodePool) {
    let total = pool.snapshot().await.len();
    for _ in 0..100 {
        if pool.available_count().await == total {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("nodes still leased: {:?}", pool.snapshot().await);
}

fn add(a: i32, b: i32) -> CallEnvelope {
    CallEnvelope::new("Calc", "add")
        .param("int", json!(a))
        .param("int", json!(b))
}

#[tokio::test]
async fn test_full_session_scenario() {
    let host = start_host();
    let (addr, pool) = start_gateway(&[&host]).await;

    let mut client = OffloadClient::connect(&addr).await.unwrap();
    client.authenticate("device123").await.unwrap();

    let status = client.register_code("com.example.App", CALC.as_bytes()).await.unwrap();
    assert_eq!(status, CodeStatus::Transferred);
    assert_eq!(pool.snapshot().await[0].status, NodeStatus::Leased);

    let result = client.compute(&add(2, 3)).await.unwrap();
    assert_eq!(result, CallResult::value("int", json!(5)));

    client.disconnect().await.unwrap();
    wait_until_all_available(&pool).await;

    let cached = std::fs::read(host.dir.path().join("artifacts").join("App")).unwrap();
    assert_eq!(cached, CALC.as_bytes());
}

#[tokio::test]
async fn test_code_cache_is_idempotent() {
    let host = start_host();
    let (addr, pool) = start_gateway(&[&host]).await;

    let mut first = OffloadClient::connect(&addr).await.unwrap();
    assert_eq!(
        first.register_code("com.example.App", CALC.as_bytes()).await.unwrap(),
        CodeStatus::Transferred
    );
    first.disconnect().await.unwrap();
    wait_until_all_available(&pool).await;

    let mut second = OffloadClient::connect(&addr).await.unwrap();
    assert_eq!(
        second.register_code("com.example.App", CALC.as_bytes()).await.unwrap(),
        CodeStatus::Cached
    );
    let result = second.compute(&add(40, 2)).await.unwrap();
    assert_eq!(result, CallResult::value("int", json!(42)));
    second.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_remote_result_matches_local_dispatch() {
    let host = start_host();
    let (addr, _pool) = start_gateway(&[&host]).await;

    let envelopes = vec![
        add(2, 3),
        CallEnvelope::new("Calc", "offset")
            .with_receiver(json!({"base": 100}))
            .param("int", json!(7)),
        CallEnvelope::new("Calc", "missing"),
        CallEnvelope::new("Nope", "add"),
    ];

    let mut local = ScriptModule::load("App", CALC.as_bytes()).unwrap();
    let mut client = OffloadClient::connect(&addr).await.unwrap();
    client.register_code("com.example.App", CALC.as_bytes()).await.unwrap();

    for envelope in &envelopes {
        let expected = dispatch(&mut local, envelope);
        let remote = client.compute(envelope).await.unwrap();
        assert_eq!(remote, expected, "{}.{}", envelope.target_type, envelope.method);
    }
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_file_arrives_before_call() {
    let host = start_host();
    let (addr, _pool) = start_gateway(&[&host]).await;

    let mut client = OffloadClient::connect(&addr).await.unwrap();
    client.register_code("com.example.App", CALC.as_bytes()).await.unwrap();

    let result = client
        .compute_with_file("/sdcard/offload/input.bin", b"0123456789", &add(1, 1))
        .await
        .unwrap();
    assert_eq!(result, CallResult::value("int", json!(2)));
    client.disconnect().await.unwrap();

    let stored = std::fs::read(host.dir.path().join("resources").join("input.bin")).unwrap();
    assert_eq!(stored, b"0123456789");
}

#[tokio::test]
async fn test_no_capacity_when_pool_exhausted() {
    let host = start_host();
    let (addr, pool) = start_gateway(&[&host]).await;

    let mut holder = OffloadClient::connect(&addr).await.unwrap();
    holder.ping().await.unwrap();

    let mut rejected = OffloadClient::connect(&addr).await.unwrap();
    assert!(matches!(rejected.ping().await, Err(OffloadError::NoCapacity)));
    assert_eq!(pool.stats().rejected, 1);

    holder.disconnect().await.unwrap();
    wait_until_all_available(&pool).await;

    let mut retry = OffloadClient::connect(&addr).await.unwrap();
    retry.ping().await.unwrap();
    retry.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_sessions_get_distinct_nodes() {
    let hosts = [start_host(), start_host()];
    let (addr, pool) = start_gateway(&[&hosts[0], &hosts[1]]).await;

    let mut a = OffloadClient::connect(&addr).await.unwrap();
    let mut b = OffloadClient::connect(&addr).await.unwrap();
    let (ra, rb) = tokio::join!(
        a.register_code("com.example.App", CALC.as_bytes()),
        b.register_code("com.example.App", CALC.as_bytes())
    );
    // Each node has its own cache, so both transfer.
    assert_eq!(ra.unwrap(), CodeStatus::Transferred);
    assert_eq!(rb.unwrap(), CodeStatus::Transferred);
    assert_eq!(pool.available_count().await, 0);

    a.disconnect().await.unwrap();
    b.disconnect().await.unwrap();
    wait_until_all_available(&pool).await;
}

#[tokio::test]
async fn test_every_lease_is_released_once() {
    let host = start_host();
    let (addr, pool) = start_gateway(&[&host]).await;

    for round in 0..3 {
        let mut client = OffloadClient::connect(&addr).await.unwrap();
        client.register_code("com.example.App", CALC.as_bytes()).await.unwrap();
        client.compute(&add(round, round)).await.unwrap();
        if round % 2 == 0 {
            client.disconnect().await.unwrap();
        } else {
            // Dropped without saying goodbye: EOF ends the session.
            drop(client);
        }
        wait_until_all_available(&pool).await;
    }

    // Power-off is counted just after the node is marked available.
    for _ in 0..100 {
        if pool.stats().powered_off == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let stats = pool.stats();
    assert_eq!(stats.acquired, 3);
    assert_eq!(stats.released, 3);
    assert_eq!(stats.powered_off, 3);
}

#[tokio::test]
async fn test_unreachable_node_reported_to_client() {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let pool = Arc::new(
        NodePool::in_memory(
            vec![ComputeNode::new("ghost", "127.0.0.1", port)],
            Arc::new(NoopProvisioner),
        )
        .unwrap(),
    );
    let config = GatewayConfig::default()
        .with_bind("127.0.0.1:0")
        .with_retry(ConnectRetryConfig {
            reconnect_interval: Duration::from_millis(20),
            transient_pause: Duration::from_millis(10),
            attempt_timeout: Duration::from_millis(200),
            deadline: Some(Duration::from_millis(200)),
        });
    let gateway = Gateway::bind(config, pool.clone()).await.unwrap();
    let addr = gateway.local_addr().unwrap().to_string();
    tokio::spawn(async move { gateway.run().await });

    let mut client = OffloadClient::connect(&addr).await.unwrap();
    let outcome = client.register_code("com.example.App", CALC.as_bytes()).await;
    assert!(matches!(outcome, Err(OffloadError::NodeUnreachable(_))));

    drop(client);
    wait_until_all_available(&pool).await;
}
