//! Shared fixtures for the discovery integration tests.
//!
//! Every test drives real multi-member scenarios against a single
//! [`MockZooKeeper`] ensemble: each simulated process gets its own session
//! and engine, and failures are injected by expiring sessions.

#![allow(dead_code)] // each test binary uses a subset of the fixtures

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use menagerie::discovery::{
    DataExchange, DiscoveryConfig, DiscoveryDataBag, DiscoveryEngine, DiscoveryEventType,
    DiscoveryListener, DiscoveryNotification, DiscoveryPaths,
};
use menagerie::types::NodeId;
use menagerie::zk::{CreateMode, MockZkSession, MockZooKeeper, ZooKeeperApi};

pub const BASE_PATH: &str = "/menagerie";
pub const CLUSTER: &str = "itest";

pub type TestEngine = DiscoveryEngine<MockZkSession>;

/// Listener that records every notification it receives.
#[derive(Default)]
pub struct RecordingListener {
    notifications: Mutex<Vec<DiscoveryNotification>>,
}

impl RecordingListener {
    pub fn all(&self) -> Vec<DiscoveryNotification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn of_type(&self, event_type: DiscoveryEventType) -> Vec<DiscoveryNotification> {
        self.all()
            .into_iter()
            .filter(|n| n.event_type == event_type)
            .collect()
    }

    pub fn count(&self, event_type: DiscoveryEventType) -> usize {
        self.of_type(event_type).len()
    }
}

impl DiscoveryListener for RecordingListener {
    fn on_discovery(&self, notification: DiscoveryNotification) {
        self.notifications.lock().unwrap().push(notification);
    }
}

/// Exchange collaborator with fixed payloads that records what it is
/// handed.
pub struct RecordingExchange {
    joining: Bytes,
    common: Bytes,
    received: Mutex<Vec<DiscoveryDataBag>>,
}

impl RecordingExchange {
    pub fn new(joining: &[u8], common: &[u8]) -> Self {
        Self {
            joining: Bytes::copy_from_slice(joining),
            common: Bytes::copy_from_slice(common),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn received(&self) -> Vec<DiscoveryDataBag> {
        self.received.lock().unwrap().clone()
    }
}

impl DataExchange for RecordingExchange {
    fn collect(&self, bag: &mut DiscoveryDataBag) {
        bag.joining_data = Some(self.joining.clone());
        bag.common_data = Some(self.common.clone());
    }

    fn on_exchange(&self, bag: DiscoveryDataBag) {
        self.received.lock().unwrap().push(bag);
    }
}

/// One simulated cluster member.
pub struct Member {
    pub id: NodeId,
    pub engine: TestEngine,
    pub listener: Arc<RecordingListener>,
    pub exchange: Arc<RecordingExchange>,
    pub session_id: u64,
}

/// Test configuration: ack every event so garbage collection is prompt.
pub fn test_config() -> DiscoveryConfig {
    let mut config = DiscoveryConfig::new(BASE_PATH, CLUSTER, "127.0.0.1:2181");
    config.ack_threshold = 1;
    config.join_warn_interval = Duration::from_secs(1);
    config
}

pub fn test_paths() -> DiscoveryPaths {
    DiscoveryPaths::new(BASE_PATH, CLUSTER)
}

/// Connect a session, build an engine, join, and return the member.
pub async fn join_member(zk: &MockZooKeeper) -> Member {
    join_member_with(zk, test_config()).await
}

pub async fn join_member_with(zk: &MockZooKeeper, config: DiscoveryConfig) -> Member {
    let member = prepare_member(zk, config);
    member.engine.join().await.expect("member failed to join");
    member
}

/// Build a member without joining, for tests that drive the join call
/// themselves.
pub fn prepare_member(zk: &MockZooKeeper, config: DiscoveryConfig) -> Member {
    let session = zk.connect();
    let session_id = session.session_id();
    let id = NodeId::random();
    let listener = Arc::new(RecordingListener::default());
    let exchange = Arc::new(RecordingExchange::new(b"joining-blob", b"common-blob"));
    let engine = DiscoveryEngine::new(
        config,
        session,
        id,
        listener.clone(),
        exchange.clone(),
    )
    .expect("engine construction failed");

    Member {
        id,
        engine,
        listener,
        exchange,
        session_id,
    }
}

/// Create the base path skeleton through a raw session.
pub async fn create_skeleton(session: &MockZkSession) {
    for dir in test_paths().all_dirs() {
        let _ = session.create(&dir, &[], CreateMode::Persistent).await;
    }
}

/// Poll a synchronous condition until it holds.
pub async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll an asynchronous condition until it holds.
pub async fn wait_until_async<F>(what: &str, cond: F)
where
    F: AsyncFn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond().await {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Comparable signature of a notification: type, version, subject, and
/// message bytes.
pub fn signature(
    n: &DiscoveryNotification,
) -> (DiscoveryEventType, u64, NodeId, Option<Vec<u8>>) {
    (
        n.event_type,
        n.topology_version.value(),
        n.node.id,
        n.message.as_ref().map(|m| m.to_vec()),
    )
}

/// Member ids of a notification's topology snapshot, in snapshot order.
pub fn snapshot_ids(n: &DiscoveryNotification) -> Vec<NodeId> {
    n.snapshot.iter().map(|node| node.id).collect()
}
