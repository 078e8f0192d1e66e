//! Coordinator election and event generation.
//!
//! Every member runs the same election: sort the alive tokens by internal
//! id; the minimum is the coordinator, everyone else watches its floor
//! predecessor and re-reads the alive-set when that watch fires (or when
//! the predecessor is already gone). Re-reading instead of promoting
//! unconditionally keeps the election correct when several predecessors
//! fail inside one watch window.
//!
//! The coordinator is the sole writer of the event log: it turns alive-set
//! changes into Join/Fail events, custom submissions into Custom events,
//! persists the serialized log to `/evts` with version -1, replays it
//! locally, and sweeps acknowledgements so event payloads can be deleted.

use std::collections::BTreeMap;
use std::pin::Pin;

use tracing::{debug, info, warn};

use crate::discovery::codec::Codec;
use crate::discovery::engine::{DiscoveryState, EngineInner, now_millis};
use crate::discovery::events::{
    AliveNodeRecord, DiscoveryEvent, DiscoveryEventsData, EventKind, JoinedNodeData,
    JoiningNodeData,
};
use crate::discovery::exchange::DiscoveryDataBag;
use crate::discovery::listener::DiscoveryEventType;
use crate::discovery::node::ClusterNode;
use crate::discovery::paths;
use crate::error::{Error, Result};
use crate::types::{InternalId, TopologyVersion};
use crate::zk::{CreateMode, ZkError, ZooKeeperApi};

impl<Z: ZooKeeperApi, C: Codec> EngineInner<Z, C> {
    /// Run the election against one read of the alive-set.
    ///
    /// Returns an explicitly boxed future (rather than `async fn`) because
    /// this function and [`Self::on_previous_node_fail`] call each other;
    /// leaving both as plain `async fn` makes the compiler unable to prove
    /// the resulting future is `Send` due to the recursive cycle.
    pub(super) fn check_is_coordinator<'a>(
        &'a self,
        children: Vec<String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { self.check_is_coordinator_inner(children).await })
    }

    async fn check_is_coordinator_inner(&self, children: Vec<String>) -> Result<()> {
        if children.is_empty() {
            warn!(node_id = %self.local_id, "alive node list is empty, session may be gone");
            return Ok(());
        }

        let mut alives: BTreeMap<InternalId, String> = BTreeMap::new();
        let mut local_internal = None;

        for name in children {
            let internal = paths::alive_internal_id(&name).ok_or_else(|| {
                Error::Protocol(format!("malformed alive node name: {name}"))
            })?;
            if local_internal.is_none() && paths::alive_node_id(&name) == Some(self.local_id) {
                local_internal = Some(internal);
            }
            alives.insert(internal, name);
        }

        let Some(local_internal) = local_internal else {
            warn!(node_id = %self.local_id, "local alive token missing, session may be gone");
            return Ok(());
        };
        let Some((&min_internal, _)) = alives.first_key_value() else {
            return Ok(());
        };

        if min_internal == local_internal {
            return self.become_coordinator(&alives, local_internal).await;
        }

        // Watch the floor predecessor; its disappearance re-runs the
        // election.
        let Some((_, predecessor_name)) = alives.range(..local_internal).next_back() else {
            return Err(Error::Protocol(
                "non-minimal node has no predecessor".to_string(),
            ));
        };
        let predecessor_path = self.paths.alive_node(predecessor_name);

        info!(
            node_id = %self.local_id,
            predecessor = %predecessor_path,
            "discovery coordinator already exists, watching previous node"
        );

        {
            let mut state = self.state.lock().await;
            state.predecessor_path = Some(predecessor_path.clone());
        }

        if self.zk.exists(&predecessor_path, true).await?.is_none() {
            let mut state = self.state.lock().await;
            if state.predecessor_path.as_deref() == Some(predecessor_path.as_str()) {
                state.predecessor_path = None;
                drop(state);
                self.on_previous_node_fail().await?;
            }
        }

        Ok(())
    }

    /// The watched predecessor is gone: re-read the alive-set and re-run
    /// the election rather than promoting unconditionally.
    pub(super) async fn on_previous_node_fail(&self) -> Result<()> {
        info!(
            node_id = %self.local_id,
            "previous node failed, checking whether local node is the new coordinator"
        );
        let children = self.zk.get_children(&self.paths.alive_nodes, false).await?;
        let election: Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> =
            Box::pin(self.check_is_coordinator(children));
        election.await
    }

    /// Take over as coordinator.
    async fn become_coordinator(
        &self,
        alives: &BTreeMap<InternalId, String>,
        local_internal: InternalId,
    ) -> Result<()> {
        // Replay whatever log exists before taking over. When the previous
        // coordinator died right after emitting the local join event, this
        // is where the join completes.
        let data = self.zk.get_data(&self.paths.events, false).await?;

        {
            let mut state = self.state.lock().await;
            if !data.is_empty() {
                self.on_events_update_bytes(&mut state, &data).await?;
            }

            state.coordinator = true;
            state.predecessor_path = None;

            if state.joined {
                info!(node_id = %self.local_id, "node is the new discovery coordinator");
                self.rebuild_event_acks(&mut state).await?;
            } else {
                info!(node_id = %self.local_id, "node is the first cluster member");
                self.new_cluster_started(&mut state, local_internal).await?;
            }
        }

        // Steady-state watches, processing the returned snapshots right
        // away: joins that raced the election are picked up here.
        let children = self.zk.get_children(&self.paths.alive_nodes, true).await?;
        self.generate_topology_events(children).await?;

        let submissions = self
            .zk
            .get_children(&self.paths.custom_events, true)
            .await?;
        self.generate_custom_events(submissions).await?;

        for name in alives.values() {
            self.watch_alive_node(name).await?;
        }

        Ok(())
    }

    /// Rebuild every pending event's ack-set against the inherited
    /// topology. Members that are gone (including joiners that never
    /// arrived) drop out; events that become fully acknowledged are
    /// processed and removed.
    async fn rebuild_event_acks(&self, state: &mut DiscoveryState) -> Result<()> {
        let snapshot = state.view.snapshot();
        let exclude = state.local.internal_id;
        let mut completed = Vec::new();

        if let Some(events) = state.events.as_mut() {
            let ids: Vec<_> = events.events.keys().copied().collect();
            for id in ids {
                let Some(event) = events.events.get_mut(&id) else {
                    continue;
                };
                event.reset_remaining_acks(&snapshot, exclude);
                if event.all_acks_received()
                    && let Some(event) = events.events.remove(&id)
                {
                    completed.push(event);
                }
            }
        }

        for event in &completed {
            self.process_acked_event(event).await?;
        }
        Ok(())
    }

    /// First member of a new cluster: wipe leftovers from any previous
    /// incarnation, create the log with a synthetic join for self, and
    /// complete the local join immediately.
    async fn new_cluster_started(
        &self,
        state: &mut DiscoveryState,
        local_internal: InternalId,
    ) -> Result<()> {
        self.cleanup_previous_cluster_data().await?;

        state.joined = true;
        state.grid_start_time = now_millis();
        state.local.internal_id = local_internal;
        state.local.order = TopologyVersion::new(1);

        let mut events = DiscoveryEventsData::new(state.grid_start_time, TopologyVersion::new(1));
        let event_id = events.next_event_id();
        // Already acknowledged by the whole (one-member) cluster.
        events.add_event(DiscoveryEvent::new(
            event_id,
            TopologyVersion::new(1),
            EventKind::Join {
                node_id: self.local_id,
                internal_id: local_internal,
                joining: None,
            },
        ));
        state.local_record = AliveNodeRecord {
            last_processed_event_id: event_id,
        };
        state.processed_count = 1;

        let bytes = self.codec.encode(&events)?;
        self.zk.set_data(&self.paths.events, &bytes, -1).await?;
        state.events = Some(events);

        state.view.add(state.local.clone());
        let snapshot = state.view.snapshot();
        self.notify(
            DiscoveryEventType::NodeJoined,
            TopologyVersion::new(1),
            state.local.clone(),
            snapshot,
            None,
        );
        self.join_latch.complete(Ok(()));

        if let Some(scratch) = state.local_join_data_path.take() {
            let _ = self.zk.delete_if_exists(&scratch, -1).await;
        }

        Ok(())
    }

    /// Remove event payloads and custom submissions a previous cluster
    /// left behind.
    async fn cleanup_previous_cluster_data(&self) -> Result<()> {
        self.zk.set_data(&self.paths.events, &[], -1).await?;

        for child in self.zk.get_children(&self.paths.events, false).await? {
            let event_dir = format!("{}/{child}", self.paths.events);
            self.zk.delete_children(&event_dir).await?;
            self.zk.delete_if_exists(&event_dir, -1).await?;
        }

        self.zk.delete_children(&self.paths.custom_events).await?;
        Ok(())
    }

    /// Watch another member's alive token for acknowledgement updates,
    /// processing the current record immediately.
    async fn watch_alive_node(&self, name: &str) -> Result<()> {
        let path = self.paths.alive_node(name);
        {
            let state = self.state.lock().await;
            if state.local_alive_path.as_deref() == Some(path.as_str()) {
                return Ok(());
            }
        }

        match self.zk.get_data(&path, true).await {
            Ok(data) => self.process_alive_node_data(&path, &data).await,
            Err(ZkError::NoNode(_)) => {
                debug!(path = %path, "alive node gone before ack watch");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sweep a member's acknowledgement record over the pending events.
    pub(super) async fn process_alive_node_data(&self, path: &str, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let record: AliveNodeRecord = self.codec.decode(data)?;
        let name = path.rsplit('/').next().unwrap_or(path);
        let internal = paths::alive_internal_id(name)
            .ok_or_else(|| Error::Protocol(format!("malformed alive node name: {name}")))?;

        let mut completed = Vec::new();
        {
            let mut state = self.state.lock().await;
            if !state.coordinator {
                return Ok(());
            }
            debug!(
                internal_id = %internal,
                last_processed = %record.last_processed_event_id,
                "processing member acknowledgement"
            );
            if let Some(events) = state.events.as_mut() {
                let ids: Vec<_> = events.events.keys().copied().collect();
                for id in ids {
                    let Some(event) = events.events.get_mut(&id) else {
                        continue;
                    };
                    if event.on_ack_received(internal, record.last_processed_event_id)
                        && let Some(event) = events.events.remove(&id)
                    {
                        completed.push(event);
                    }
                }
            }
        }

        for event in &completed {
            self.process_acked_event(event).await?;
        }
        Ok(())
    }

    /// Turn one alive-set snapshot into Join/Fail events.
    pub(super) async fn generate_topology_events(&self, children: Vec<String>) -> Result<()> {
        let mut to_watch = Vec::new();

        {
            let mut state = self.state.lock().await;
            if !state.coordinator || state.stopped {
                return Ok(());
            }

            info!(alive = children.len(), "processing alive nodes change");

            let mut alives: BTreeMap<InternalId, String> = BTreeMap::new();
            for name in &children {
                let internal = paths::alive_internal_id(name).ok_or_else(|| {
                    Error::Protocol(format!("malformed alive node name: {name}"))
                })?;
                alives.insert(internal, name.clone());
            }

            let mut current_topology: BTreeMap<TopologyVersion, ClusterNode> = state
                .view
                .snapshot()
                .into_iter()
                .map(|n| (n.order, n))
                .collect();
            let mut new_events = false;

            // Joins, in ascending internal-id order.
            for (&internal, name) in &alives {
                if !state.view.contains_internal_id(internal) {
                    if self
                        .generate_node_join(&mut state, &mut current_topology, internal, name)
                        .await?
                    {
                        new_events = true;
                    }
                    to_watch.push(name.clone());
                }
            }

            // Failures: members whose alive token vanished.
            let known: Vec<(InternalId, ClusterNode)> = state
                .view
                .by_internal_id()
                .map(|(id, node)| (id, (**node).clone()))
                .collect();
            for (internal, node) in known {
                if !alives.contains_key(&internal) {
                    // Drop the failed member from every pending ack-set
                    // first; it will never acknowledge.
                    self.process_event_acks_on_node_fail(&mut state, internal)
                        .await?;
                    self.generate_node_fail(&mut state, &mut current_topology, node)?;
                    new_events = true;
                }
            }

            if new_events {
                self.persist_and_replay(&mut state).await?;
            }
        }

        for name in to_watch {
            self.watch_alive_node(&name).await?;
        }
        Ok(())
    }

    /// Serialize the log to `/evts` (version -1: single-writer discipline)
    /// and replay it locally.
    async fn persist_and_replay(&self, state: &mut DiscoveryState) -> Result<()> {
        let events = state
            .events
            .as_ref()
            .ok_or_else(|| Error::Protocol("coordinator has no event log".to_string()))?;
        let bytes = self.codec.encode(events)?;
        self.zk.set_data(&self.paths.events, &bytes, -1).await?;

        info!(
            topology_version = events.topology_version.value(),
            event_id = events.event_id_generator.value(),
            "discovery coordinator saved new events"
        );

        self.replay(state).await
    }

    /// Emit a Join for a new alive token. Returns false when the joiner
    /// died before the join could complete.
    async fn generate_node_join(
        &self,
        state: &mut DiscoveryState,
        current_topology: &mut BTreeMap<TopologyVersion, ClusterNode>,
        internal_id: InternalId,
        name: &str,
    ) -> Result<bool> {
        let node_id = paths::alive_node_id(name)
            .ok_or_else(|| Error::Protocol(format!("malformed alive node name: {name}")))?;
        let join_seq = paths::alive_join_sequence(name)
            .ok_or_else(|| Error::Protocol(format!("malformed alive node name: {name}")))?;

        let scratch = self.paths.join_data_scratch(node_id, join_seq);
        let join_bytes = match self.zk.get_data(&scratch, false).await {
            Ok(bytes) => bytes,
            Err(ZkError::NoNode(_)) => {
                warn!(
                    node_id = %node_id,
                    "failed to read joining node data, node left before join finished"
                );
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let joining: JoiningNodeData = match self.codec.decode(&join_bytes) {
            Ok(joining) => joining,
            Err(e) => {
                warn!(
                    node_id = %node_id,
                    error = %e,
                    "failed to decode joining node data, treating joiner as dead on arrival"
                );
                return Ok(false);
            }
        };
        if joining.node_id != node_id {
            return Err(Error::Protocol(format!(
                "joining data identity mismatch: {} under {name}",
                joining.node_id
            )));
        }

        let coordinator_internal = state.local.internal_id;
        let (event_id, order) = {
            let events = state
                .events
                .as_mut()
                .ok_or_else(|| Error::Protocol("coordinator has no event log".to_string()))?;
            events.topology_version = events.topology_version.next();
            (events.next_event_id(), events.topology_version)
        };

        let node = ClusterNode::placed(node_id, order, internal_id);

        // Exchange in both directions: consume the joiner's payload,
        // collect the common payload the joiner receives.
        self.exchange.on_exchange(DiscoveryDataBag::with_joining_data(
            node_id,
            joining.payload.clone(),
        ));
        let mut bag = DiscoveryDataBag::new(node_id);
        self.exchange.collect(&mut bag);

        let data_for_joined = JoinedNodeData {
            topology: current_topology.values().cloned().collect(),
            common_data: bag.common_data.unwrap_or_default(),
        };
        current_topology.insert(order, node);

        let mut event = DiscoveryEvent::new(event_id, order, EventKind::Join {
            node_id,
            internal_id,
            joining: Some(joining.payload),
        });
        // Post-join topology minus the coordinator: the joiner itself must
        // acknowledge before the joined-data znode may be deleted.
        event.reset_remaining_acks(current_topology.values(), coordinator_internal);

        // Payload znodes go in before the log write that references them.
        self.zk
            .create_if_needed(&self.paths.event_dir(event_id), &[], CreateMode::Persistent)
            .await?;
        self.zk
            .create_if_needed(
                &self.paths.join_event_payload(event_id),
                &join_bytes,
                CreateMode::Persistent,
            )
            .await?;
        let joined_bytes = self.codec.encode(&data_for_joined)?;
        self.zk
            .create_if_needed(
                &self.paths.joined_data(event_id),
                &joined_bytes,
                CreateMode::Persistent,
            )
            .await?;

        if let Some(events) = state.events.as_mut() {
            events.add_event(event);
        }

        info!(
            node_id = %node_id,
            topology_version = order.value(),
            internal_id = %internal_id,
            "generated node join event"
        );
        Ok(true)
    }

    /// Emit a Fail for a vanished member.
    fn generate_node_fail(
        &self,
        state: &mut DiscoveryState,
        current_topology: &mut BTreeMap<TopologyVersion, ClusterNode>,
        failed: ClusterNode,
    ) -> Result<()> {
        current_topology.remove(&failed.order);

        let coordinator_internal = state.local.internal_id;
        let events = state
            .events
            .as_mut()
            .ok_or_else(|| Error::Protocol("coordinator has no event log".to_string()))?;
        events.topology_version = events.topology_version.next();
        let event_id = events.next_event_id();
        let topology_version = events.topology_version;

        let mut event = DiscoveryEvent::new(event_id, topology_version, EventKind::Fail {
            internal_id: failed.internal_id,
        });
        // Post-fail topology minus the coordinator.
        event.reset_remaining_acks(current_topology.values(), coordinator_internal);
        events.add_event(event);

        info!(
            node_id = %failed.id,
            topology_version = topology_version.value(),
            "generated node fail event"
        );
        Ok(())
    }

    /// Drop a failed member from every pending ack-set, processing events
    /// that become fully acknowledged.
    async fn process_event_acks_on_node_fail(
        &self,
        state: &mut DiscoveryState,
        failed: InternalId,
    ) -> Result<()> {
        let mut completed = Vec::new();
        if let Some(events) = state.events.as_mut() {
            let ids: Vec<_> = events.events.keys().copied().collect();
            for id in ids {
                let Some(event) = events.events.get_mut(&id) else {
                    continue;
                };
                if event.on_node_fail(failed)
                    && let Some(event) = events.events.remove(&id)
                {
                    completed.push(event);
                }
            }
        }

        for event in &completed {
            self.process_acked_event(event).await?;
        }
        Ok(())
    }

    /// Turn new custom submissions into Custom events.
    pub(super) async fn generate_custom_events(&self, children: Vec<String>) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.coordinator || state.stopped {
            return Ok(());
        }

        let processed = state
            .events
            .as_ref()
            .ok_or_else(|| Error::Protocol("coordinator has no event log".to_string()))?
            .processed_custom_sequence;

        let mut fresh: BTreeMap<u32, String> = BTreeMap::new();
        for name in children {
            let sequence = paths::custom_event_sequence(&name).ok_or_else(|| {
                Error::Protocol(format!("malformed custom event name: {name}"))
            })?;
            if i64::from(sequence) > processed {
                fresh.insert(sequence, name);
            }
        }
        if fresh.is_empty() {
            return Ok(());
        }

        for (sequence, name) in fresh {
            let sender = paths::custom_event_node_id(&name).ok_or_else(|| {
                Error::Protocol(format!("malformed custom event name: {name}"))
            })?;
            let submission_path = self.paths.custom_event_data(&name);

            if state.view.get_by_id(sender).is_some() {
                let message = self.zk.get_data(&submission_path, false).await?;

                let snapshot = state.view.snapshot();
                let coordinator_internal = state.local.internal_id;
                let events = state
                    .events
                    .as_mut()
                    .ok_or_else(|| Error::Protocol("coordinator has no event log".to_string()))?;
                let event_id = events.next_event_id();
                let topology_version = events.topology_version;

                let mut event =
                    DiscoveryEvent::new(event_id, topology_version, EventKind::Custom {
                        sender,
                        submission: name,
                        message: Some(message),
                    });
                event.reset_remaining_acks(&snapshot, coordinator_internal);
                events.add_event(event);

                info!(
                    sender = %sender,
                    event_id = event_id.value(),
                    topology_version = topology_version.value(),
                    "generated custom event"
                );
            } else {
                warn!(sender = %sender, "ignoring custom event from unknown node");
                self.zk.delete_if_exists(&submission_path, -1).await?;
            }

            if let Some(events) = state.events.as_mut() {
                events.processed_custom_sequence = i64::from(sequence);
            }
        }

        self.persist_and_replay(&mut state).await
    }
}
