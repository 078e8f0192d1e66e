//! Discovery engine: join protocol, dispatch lane, public API.
//!
//! # Control flow
//!
//! ZooKeeper watch callbacks drive everything. All of them arrive as
//! messages on the session event stream, which a single dispatch task
//! consumes; every state transition (cluster view, event log, ack
//! tracking, listener notifications) happens on that task, behind one
//! mutex that the public query API shares. This serialized lane is what
//! makes the watcher-driven protocol race-free: callbacks never run
//! concurrently with each other.
//!
//! # Join sequence
//!
//! 1. collect the joining payload from the exchange collaborator
//! 2. ensure the base path skeleton exists (alive-node directory last)
//! 3. write `/joinData/<uuid>|` ephemeral-sequential, keep the sequence
//! 4. write `/aliveNodes/<uuid>|<seq>|` ephemeral-sequential; the
//!    trailing sequence becomes the internal id
//! 5. start the dispatch task: read the alive-set (coordinator election)
//!    and the event log (watched)
//! 6. block until the local join event has been replayed, warning
//!    periodically
//!
//! Session loss at any point is terminal: a joined node gets exactly one
//! `Segmented` notification, an un-joined node gets a join error. The host
//! restarts a fresh discovery instance if it wants back in.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{debug, error, info, warn};

use crate::discovery::codec::{Codec, JsonCodec};
use crate::discovery::config::DiscoveryConfig;
use crate::discovery::events::{AliveNodeRecord, DiscoveryEventsData, JoiningNodeData};
use crate::discovery::exchange::{DataExchange, DiscoveryDataBag};
use crate::discovery::listener::{
    DiscoveryEventType, DiscoveryListener, DiscoveryNotification,
};
use crate::discovery::node::ClusterNode;
use crate::discovery::paths::{self, DiscoveryPaths};
use crate::discovery::view::ClusterView;
use crate::error::{Error, Result};
use crate::types::{NodeId, TopologyVersion};
use crate::zk::{CreateMode, SessionEvent, WatchEvent, WatchKind, ZkClient, ZkError, ZooKeeperApi};

/// Wall clock in epoch milliseconds.
pub(super) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Completion latch for the local join. First completion wins.
pub(super) struct JoinLatch {
    result: StdMutex<Option<Result<()>>>,
    notify: Notify,
}

impl JoinLatch {
    fn new() -> Self {
        Self {
            result: StdMutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Complete the latch; later completions are ignored.
    pub(super) fn complete(&self, result: Result<()>) {
        let mut slot = self.result.lock().expect("join latch lock");
        if slot.is_none() {
            *slot = Some(result);
            self.notify.notify_waiters();
        }
    }

    /// Wait for completion, warning every `warn_interval`.
    async fn wait(&self, config: &DiscoveryConfig, node_id: NodeId) -> Result<()> {
        loop {
            let notified = self.notify.notified();
            if let Some(result) = self.result.lock().expect("join latch lock").clone() {
                return result;
            }
            if tokio::time::timeout(config.join_warn_interval, notified)
                .await
                .is_err()
            {
                warn!(
                    node_id = %node_id,
                    cluster = %config.cluster_name,
                    "waiting for local join event"
                );
            }
        }
    }
}

/// Mutable engine state, owned by the dispatch lane.
pub(super) struct DiscoveryState {
    /// Joined members.
    pub view: ClusterView,
    /// Event log; present once loaded or created.
    pub events: Option<DiscoveryEventsData>,
    /// Whether the local join event has been replayed.
    pub joined: bool,
    /// Whether this node is the coordinator.
    pub coordinator: bool,
    /// Terminal flag: segmented, stopped, or fatally failed.
    pub stopped: bool,
    /// Whether `join` has been called.
    pub join_started: bool,
    /// Cluster start time, learned from the event log (or generated by
    /// the first coordinator).
    pub grid_start_time: u64,
    /// The local member, with `order` / `internal_id` filled in on join.
    pub local: ClusterNode,
    /// Full path of the local alive token.
    pub local_alive_path: Option<String>,
    /// Full path of the local joining-payload scratch znode, until it is
    /// cleaned up after join.
    pub local_join_data_path: Option<String>,
    /// Replay progress written back as the acknowledgement record.
    pub local_record: AliveNodeRecord,
    /// Events processed since start, for ack batching.
    pub processed_count: u64,
    /// Alive token currently watched for the next-in-line election.
    pub predecessor_path: Option<String>,
}

impl DiscoveryState {
    fn new(local_id: NodeId) -> Self {
        Self {
            view: ClusterView::new(),
            events: None,
            joined: false,
            coordinator: false,
            stopped: false,
            join_started: false,
            grid_start_time: 0,
            local: ClusterNode::new(local_id),
            local_alive_path: None,
            local_join_data_path: None,
            local_record: AliveNodeRecord::default(),
            processed_count: 0,
            predecessor_path: None,
        }
    }
}

pub(super) struct EngineInner<Z, C> {
    pub config: DiscoveryConfig,
    pub paths: DiscoveryPaths,
    pub zk: ZkClient<Z>,
    pub codec: C,
    pub local_id: NodeId,
    pub listener: Arc<dyn DiscoveryListener>,
    pub exchange: Arc<dyn DataExchange>,
    pub state: Mutex<DiscoveryState>,
    pub join_latch: JoinLatch,
    pub shutdown: Notify,
}

/// ZooKeeper-backed cluster membership and discovery engine.
///
/// Generic over the raw ZooKeeper session (`Z`) and the wire codec (`C`);
/// see the crate docs for the collaborator contracts.
pub struct DiscoveryEngine<Z: ZooKeeperApi, C: Codec = JsonCodec> {
    inner: Arc<EngineInner<Z, C>>,
}

impl<Z: ZooKeeperApi, C: Codec> Clone for DiscoveryEngine<Z, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Z: ZooKeeperApi> DiscoveryEngine<Z, JsonCodec> {
    /// Engine with the default JSON codec.
    pub fn new(
        config: DiscoveryConfig,
        session: Z,
        local_id: NodeId,
        listener: Arc<dyn DiscoveryListener>,
        exchange: Arc<dyn DataExchange>,
    ) -> Result<Self> {
        Self::with_codec(config, session, local_id, listener, exchange, JsonCodec)
    }
}

impl<Z: ZooKeeperApi, C: Codec> DiscoveryEngine<Z, C> {
    /// Engine with an injected codec.
    pub fn with_codec(
        config: DiscoveryConfig,
        session: Z,
        local_id: NodeId,
        listener: Arc<dyn DiscoveryListener>,
        exchange: Arc<dyn DataExchange>,
        codec: C,
    ) -> Result<Self> {
        config.validate()?;
        let paths = DiscoveryPaths::new(&config.base_path, &config.cluster_name);
        Ok(Self {
            inner: Arc::new(EngineInner {
                paths,
                zk: ZkClient::new(session),
                codec,
                local_id,
                listener,
                exchange,
                state: Mutex::new(DiscoveryState::new(local_id)),
                join_latch: JoinLatch::new(),
                shutdown: Notify::new(),
                config,
            }),
        })
    }

    /// Join the cluster.
    ///
    /// Blocks until the local join event has been replayed (immediately
    /// for the first member of a new cluster), logging a warning every
    /// `join_warn_interval` while waiting. There is no hard deadline.
    pub async fn join(&self) -> Result<()> {
        let inner = &self.inner;

        {
            let mut state = inner.state.lock().await;
            if state.join_started {
                return Err(Error::Protocol("join already started".to_string()));
            }
            state.join_started = true;
        }

        // The event stream must be claimed before any watch registration
        // so nothing is lost before the dispatch task starts.
        let events_rx = inner
            .zk
            .take_session_events()
            .ok_or_else(|| Error::Protocol("session event stream already taken".to_string()))?;

        let mut bag = DiscoveryDataBag::new(inner.local_id);
        inner.exchange.collect(&mut bag);
        let joining = JoiningNodeData {
            node_id: inner.local_id,
            payload: bag.joining_data.unwrap_or_default(),
        };
        let join_bytes = inner.codec.encode(&joining)?;

        // The alive-node directory is created last; if it exists the whole
        // skeleton does.
        if inner
            .zk
            .exists(&inner.paths.alive_nodes, false)
            .await?
            .is_none()
        {
            inner
                .zk
                .create_all_if_needed(&inner.paths.all_dirs(), CreateMode::Persistent)
                .await?;
        }

        let join_data_path = inner
            .zk
            .create(
                &inner.paths.join_data_prefix(inner.local_id),
                &join_bytes,
                CreateMode::EphemeralSequential,
            )
            .await?;
        let join_seq = sequence_suffix(&join_data_path)?;

        let alive_path = inner
            .zk
            .create(
                &inner.paths.alive_node_prefix(inner.local_id, join_seq),
                &[],
                CreateMode::EphemeralSequential,
            )
            .await?;

        info!(
            node_id = %inner.local_id,
            cluster = %inner.config.cluster_name,
            alive_path = %alive_path,
            "joining cluster"
        );

        {
            let mut state = inner.state.lock().await;
            state.local_alive_path = Some(alive_path);
            state.local_join_data_path = Some(join_data_path);
        }

        let dispatch = Arc::clone(inner);
        tokio::spawn(async move { dispatch.run_dispatch(events_rx).await });

        inner.join_latch.wait(&inner.config, inner.local_id).await
    }

    /// The local member. `order` and `internal_id` are filled in once
    /// joined.
    pub async fn local_node(&self) -> ClusterNode {
        self.inner.state.lock().await.local.clone()
    }

    /// All joined members except the local one, in topology order.
    pub async fn remote_nodes(&self) -> Vec<ClusterNode> {
        let state = self.inner.state.lock().await;
        state.view.remote_nodes(self.inner.local_id)
    }

    /// Look up a joined member.
    pub async fn node(&self, id: NodeId) -> Option<ClusterNode> {
        let state = self.inner.state.lock().await;
        state.view.get_by_id(id).map(|n| (**n).clone())
    }

    /// All joined members, in topology order.
    pub async fn topology_snapshot(&self) -> Vec<ClusterNode> {
        self.inner.state.lock().await.view.snapshot()
    }

    /// Whether the member is currently in the local view.
    ///
    /// Placeholder for a real liveness probe: today this is equivalent to
    /// membership.
    pub async fn ping_node(&self, id: NodeId) -> bool {
        self.node(id).await.is_some()
    }

    /// Whether any alive token for this member exists in ZooKeeper right
    /// now. Unlike [`node`](Self::node), this scans the live alive-set.
    pub async fn known_node(&self, id: NodeId) -> Result<bool> {
        let children = self
            .inner
            .zk
            .get_children(&self.inner.paths.alive_nodes, false)
            .await?;
        Ok(children
            .iter()
            .any(|name| paths::alive_node_id(name) == Some(id)))
    }

    /// Cluster start time in epoch milliseconds; zero until joined.
    pub async fn grid_start_time(&self) -> u64 {
        self.inner.state.lock().await.grid_start_time
    }

    /// Whether this node is currently the coordinator.
    pub async fn is_coordinator(&self) -> bool {
        self.inner.state.lock().await.coordinator
    }

    /// Broadcast an opaque message to every member.
    ///
    /// Fire-and-forget: the call returns once the submission znode is
    /// written; delivery happens through the event log.
    pub async fn send_custom_message(&self, message: Bytes) -> Result<()> {
        self.inner
            .zk
            .create(
                &self.inner.paths.custom_event_prefix(self.inner.local_id),
                &message,
                CreateMode::PersistentSequential,
            )
            .await?;
        Ok(())
    }

    /// Stop the discovery instance: close the session (releasing the alive
    /// token, so the cluster observes a failure) and fail a pending join.
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if state.stopped {
                return;
            }
            state.stopped = true;
        }
        info!(node_id = %self.inner.local_id, "stopping discovery instance");
        self.inner.zk.close().await;
        self.inner.join_latch.complete(Err(Error::Stopped));
        // notify_one stores a permit, so the dispatch lane observes the
        // shutdown even if it is mid-handler right now.
        self.inner.shutdown.notify_one();
    }
}

/// Parse the numeric suffix ZooKeeper appended to a sequential znode.
fn sequence_suffix(path: &str) -> Result<u32> {
    let name = path.rsplit('/').next().unwrap_or(path);
    paths::trailing_sequence(name)
        .ok_or_else(|| Error::Protocol(format!("malformed sequential znode name: {path}")))
}

impl<Z: ZooKeeperApi, C: Codec> EngineInner<Z, C> {
    /// Dispatch lane: consumes session events until termination.
    async fn run_dispatch(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        if let Err(e) = self.startup().await {
            if is_session_loss(&e) {
                debug!(error = %e, "session lost during startup");
            } else {
                self.on_fatal_error(e).await;
                return;
            }
        }

        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = self.shutdown.notified() => break,
            };
            let Some(event) = event else { break };

            match event {
                SessionEvent::ConnectionLost => {
                    self.on_connection_lost().await;
                    break;
                }
                SessionEvent::Watch(watch) => {
                    if self.state.lock().await.stopped {
                        break;
                    }
                    if let Err(e) = self.on_watch_event(watch).await {
                        if is_session_loss(&e) {
                            // Terminal connection loss arrives as its own
                            // message; nothing to do here.
                            debug!(error = %e, "ignoring operation on dead session");
                        } else {
                            self.on_fatal_error(e).await;
                            break;
                        }
                    }
                }
            }
        }

        debug!(node_id = %self.local_id, "dispatch lane finished");
    }

    /// Initial reads: election plus the watched event-log read.
    async fn startup(&self) -> Result<()> {
        let children = self.zk.get_children(&self.paths.alive_nodes, false).await?;
        self.check_is_coordinator(children).await?;

        let data = self.zk.get_data(&self.paths.events, true).await?;
        let mut state = self.state.lock().await;
        if !state.coordinator && !data.is_empty() {
            self.on_events_update_bytes(&mut state, &data).await?;
        }
        Ok(())
    }

    /// Route one watch event.
    async fn on_watch_event(&self, watch: WatchEvent) -> Result<()> {
        match watch.kind {
            WatchKind::ChildrenChanged if watch.path == self.paths.alive_nodes => {
                if self.is_coordinator_now().await {
                    let children = self.zk.get_children(&self.paths.alive_nodes, true).await?;
                    self.generate_topology_events(children).await?;
                }
            }
            WatchKind::ChildrenChanged if watch.path == self.paths.custom_events => {
                if self.is_coordinator_now().await {
                    let children = self
                        .zk
                        .get_children(&self.paths.custom_events, true)
                        .await?;
                    self.generate_custom_events(children).await?;
                }
            }
            WatchKind::DataChanged if watch.path == self.paths.events => {
                if !self.is_coordinator_now().await {
                    let data = self.zk.get_data(&self.paths.events, true).await?;
                    let mut state = self.state.lock().await;
                    self.on_events_update_bytes(&mut state, &data).await?;
                }
            }
            WatchKind::DataChanged if self.paths.is_alive_node(&watch.path) => {
                if self.is_coordinator_now().await {
                    match self.zk.get_data(&watch.path, true).await {
                        Ok(data) => self.process_alive_node_data(&watch.path, &data).await?,
                        // The member disappeared between the watch firing
                        // and the read; the children watch handles it.
                        Err(ZkError::NoNode(_)) => {
                            debug!(path = %watch.path, "alive node gone before ack read")
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            WatchKind::Deleted => {
                let is_predecessor = {
                    let mut state = self.state.lock().await;
                    if state.predecessor_path.as_deref() == Some(watch.path.as_str()) {
                        state.predecessor_path = None;
                        !state.coordinator
                    } else {
                        false
                    }
                };
                if is_predecessor {
                    self.on_previous_node_fail().await?;
                }
            }
            _ => {
                debug!(path = %watch.path, kind = ?watch.kind, "ignoring watch event");
            }
        }
        Ok(())
    }

    pub(super) async fn is_coordinator_now(&self) -> bool {
        self.state.lock().await.coordinator
    }

    /// Terminal session loss: exactly one segmentation notification if
    /// joined, a join error otherwise.
    async fn on_connection_lost(&self) {
        warn!(node_id = %self.local_id, "zookeeper connection lost, local node is segmented");
        self.zk.mark_failed();

        let mut state = self.state.lock().await;
        if state.stopped {
            return;
        }
        state.stopped = true;

        if state.joined {
            let topology_version = state
                .events
                .as_ref()
                .map(|e| e.topology_version)
                .unwrap_or(state.local.order);
            let local = state.local.clone();
            drop(state);
            self.notify(
                DiscoveryEventType::Segmented,
                topology_version,
                local,
                Vec::new(),
                None,
            );
        } else {
            self.join_latch.complete(Err(Error::Segmented));
        }
    }

    /// Invariant violation or internal decode failure: stop the instance
    /// rather than risk diverging from the rest of the cluster.
    async fn on_fatal_error(&self, error: Error) {
        error!(
            node_id = %self.local_id,
            error = %error,
            "failed to process discovery data, stopping discovery instance"
        );
        self.join_latch.complete(Err(error));
        {
            let mut state = self.state.lock().await;
            state.stopped = true;
        }
        self.zk.close().await;
        self.shutdown.notify_one();
    }

    /// Deliver one notification to the host listener.
    pub(super) fn notify(
        &self,
        event_type: DiscoveryEventType,
        topology_version: TopologyVersion,
        node: ClusterNode,
        snapshot: Vec<ClusterNode>,
        message: Option<Bytes>,
    ) {
        debug!(
            event = %event_type,
            topology_version = topology_version.value(),
            node_id = %node.id,
            "notifying discovery listener"
        );
        self.listener.on_discovery(DiscoveryNotification {
            event_type,
            topology_version,
            node,
            snapshot,
            message,
        });
    }
}

/// Whether an error simply means the session is gone (the terminal
/// connection-loss message handles that case).
fn is_session_loss(error: &Error) -> bool {
    matches!(
        error,
        Error::Zk(ZkError::ClientFailed) | Error::Zk(ZkError::SessionExpired)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_suffix() {
        assert_eq!(
            sequence_suffix("/base/c/joinData/abc|0000000007").unwrap(),
            7
        );
        assert!(sequence_suffix("/base/c/joinData/abc|x").is_err());
    }

    #[tokio::test]
    async fn test_join_latch_first_completion_wins() {
        let latch = JoinLatch::new();
        latch.complete(Ok(()));
        latch.complete(Err(Error::Stopped));

        let config = DiscoveryConfig::new("/m", "c", "zk:2181");
        assert!(latch.wait(&config, NodeId::random()).await.is_ok());
    }
}
