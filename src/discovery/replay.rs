//! Event log replay.
//!
//! Every member walks the log suffix past its own
//! `last_processed_event_id`, in ascending event-id order, applying each
//! event to the local view and notifying the listener. The coordinator
//! replays its in-memory log right after persisting it; followers replay
//! whatever they decode from the watched `/evts` znode. Both produce the
//! same notifications in the same order, which is the engine's core
//! guarantee.
//!
//! A member that has not joined yet skips everything except the Join event
//! naming itself; that event carries the topology snapshot and common data
//! through `/evts/<id>/joined`.

use bytes::Bytes;
use tracing::{debug, info};

use crate::discovery::codec::Codec;
use crate::discovery::engine::{DiscoveryState, EngineInner};
use crate::discovery::events::{DiscoveryEvent, DiscoveryEventsData, EventKind, JoinedNodeData, JoiningNodeData};
use crate::discovery::exchange::DiscoveryDataBag;
use crate::discovery::listener::DiscoveryEventType;
use crate::discovery::node::ClusterNode;
use crate::error::{Error, Result};
use crate::zk::ZooKeeperApi;

impl<Z: ZooKeeperApi, C: Codec> EngineInner<Z, C> {
    /// Decode a freshly read `/evts` payload and replay it. Follower path;
    /// also used once during coordinator bootstrap, before the coordinator
    /// flag flips.
    pub(super) async fn on_events_update_bytes(
        &self,
        state: &mut DiscoveryState,
        data: &[u8],
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let decoded: DiscoveryEventsData = self.codec.decode(data)?;
        state.events = Some(decoded);
        self.replay(state).await
    }

    /// Walk and apply all events past the local replay position.
    pub(super) async fn replay(&self, state: &mut DiscoveryState) -> Result<()> {
        let ids = match state.events.as_ref() {
            Some(events) => events.event_ids_after(state.local_record.last_processed_event_id),
            None => return Ok(()),
        };

        let mut ack_due = false;
        for id in ids {
            let Some(event) = state
                .events
                .as_ref()
                .and_then(|events| events.events.get(&id))
                .cloned()
            else {
                continue;
            };

            debug!(
                event_id = id.value(),
                kind = event.kind.name(),
                topology_version = event.topology_version.value(),
                "replaying event"
            );

            if !state.joined {
                let local_join = matches!(
                    &event.kind,
                    EventKind::Join { node_id, .. } if *node_id == state.local.id
                );
                if !local_join {
                    // Emitted before this member existed; not ours to
                    // acknowledge.
                    continue;
                }
                self.process_local_join(state, &event).await?;
            } else {
                self.apply_event(state, &event).await?;

                if state.coordinator {
                    let fully_acked = state
                        .events
                        .as_ref()
                        .and_then(|events| events.events.get(&id))
                        .is_some_and(DiscoveryEvent::all_acks_received);
                    if fully_acked
                        && let Some(event) = state
                            .events
                            .as_mut()
                            .and_then(|events| events.events.remove(&id))
                    {
                        self.process_acked_event(&event).await?;
                    }
                }
            }

            if state.joined {
                state.local_record.last_processed_event_id = id;
                state.processed_count += 1;
                if state.processed_count % self.config.ack_threshold == 0 {
                    ack_due = true;
                }
            }
        }

        if ack_due && !state.coordinator {
            let path = state
                .local_alive_path
                .clone()
                .ok_or_else(|| Error::Protocol("no local alive token".to_string()))?;
            let bytes = self.codec.encode(&state.local_record)?;
            self.zk.set_data(&path, &bytes, -1).await?;
            debug!(
                last_processed = %state.local_record.last_processed_event_id,
                "wrote acknowledgement record"
            );
        }

        Ok(())
    }

    /// Apply one event to an already-joined member.
    async fn apply_event(&self, state: &mut DiscoveryState, event: &DiscoveryEvent) -> Result<()> {
        match &event.kind {
            EventKind::Join {
                node_id,
                internal_id,
                ..
            } => {
                if !state.coordinator {
                    // The coordinator exchanged the payload when it
                    // generated the event; followers fetch it here.
                    let payload_path = self.paths.join_event_payload(event.id);
                    let bytes = self.zk.get_data(&payload_path, false).await?;
                    let joining: JoiningNodeData = self.codec.decode(&bytes)?;
                    self.exchange
                        .on_exchange(DiscoveryDataBag::with_joining_data(
                            *node_id,
                            joining.payload,
                        ));
                }

                let node = ClusterNode::placed(*node_id, event.topology_version, *internal_id);
                state.view.add(node.clone());
                info!(
                    node_id = %node.id,
                    topology_version = event.topology_version.value(),
                    "member joined"
                );
                let snapshot = state.view.snapshot();
                self.notify(
                    DiscoveryEventType::NodeJoined,
                    event.topology_version,
                    node,
                    snapshot,
                    None,
                );
            }

            EventKind::Fail { internal_id } => {
                let node = state.view.remove_by_internal_id(*internal_id).ok_or_else(|| {
                    Error::Protocol(format!("fail event for unknown member {internal_id}"))
                })?;
                info!(
                    node_id = %node.id,
                    topology_version = event.topology_version.value(),
                    "member failed"
                );
                let snapshot = state.view.snapshot();
                self.notify(
                    DiscoveryEventType::NodeFailed,
                    event.topology_version,
                    (*node).clone(),
                    snapshot,
                    None,
                );
            }

            EventKind::Custom {
                sender,
                submission,
                message,
            } => {
                let bytes: Bytes = if state.coordinator {
                    message.clone().ok_or_else(|| {
                        Error::Protocol("coordinator custom event without payload".to_string())
                    })?
                } else {
                    self.zk
                        .get_data(&self.paths.custom_event_data(submission), false)
                        .await?
                };

                let sender_node = state.view.get_by_id(*sender).cloned().ok_or_else(|| {
                    Error::Protocol(format!("custom event from unknown member {sender}"))
                })?;
                let snapshot = state.view.snapshot();
                self.notify(
                    DiscoveryEventType::Custom,
                    event.topology_version,
                    (*sender_node).clone(),
                    snapshot,
                    Some(bytes),
                );
            }
        }
        Ok(())
    }

    /// Replay of the Join event naming the local node: install the
    /// topology snapshot, load common data, complete the join.
    async fn process_local_join(
        &self,
        state: &mut DiscoveryState,
        event: &DiscoveryEvent,
    ) -> Result<()> {
        let EventKind::Join { internal_id, .. } = &event.kind else {
            return Err(Error::Protocol("local join with non-join event".to_string()));
        };

        info!(
            node_id = %self.local_id,
            topology_version = event.topology_version.value(),
            "local join event received"
        );

        let joined_path = self.paths.joined_data(event.id);
        let bytes = self.zk.get_data(&joined_path, false).await?;
        let joined: JoinedNodeData = self.codec.decode(&bytes)?;

        state.grid_start_time = state
            .events
            .as_ref()
            .map(|events| events.grid_start_time)
            .unwrap_or_default();
        state.local.internal_id = *internal_id;
        state.local.order = event.topology_version;

        self.exchange
            .on_exchange(DiscoveryDataBag::with_common_data(
                self.local_id,
                joined.common_data,
            ));

        for node in joined.topology {
            state.view.add(node);
        }
        state.view.add(state.local.clone());
        state.joined = true;

        let snapshot = state.view.snapshot();
        self.notify(
            DiscoveryEventType::NodeJoined,
            event.topology_version,
            state.local.clone(),
            snapshot,
            None,
        );
        self.join_latch.complete(Ok(()));

        // Consumed; the ack-side cleanup would delete these eventually,
        // but there is no reason to keep them readable.
        let _ = self.zk.delete_if_exists(&joined_path, -1).await;
        if let Some(scratch) = state.local_join_data_path.take() {
            let _ = self.zk.delete_if_exists(&scratch, -1).await;
        }

        Ok(())
    }

    /// Ack-side cleanup once every member in an event's ack-set has
    /// acknowledged (or failed).
    pub(super) async fn process_acked_event(&self, event: &DiscoveryEvent) -> Result<()> {
        match &event.kind {
            EventKind::Join { .. } => {
                info!(event_id = event.id.value(), "all members processed node join");
                self.zk
                    .delete_if_exists(&self.paths.join_event_payload(event.id), -1)
                    .await?;
                self.zk
                    .delete_if_exists(&self.paths.joined_data(event.id), -1)
                    .await?;
                self.zk
                    .delete_if_exists(&self.paths.event_dir(event.id), -1)
                    .await?;
            }
            EventKind::Custom { submission, .. } => {
                info!(
                    event_id = event.id.value(),
                    "all members processed custom event"
                );
                self.zk
                    .delete_if_exists(&self.paths.custom_event_data(submission), -1)
                    .await?;
            }
            EventKind::Fail { .. } => {
                // Nothing stored outside the log for failures.
                info!(event_id = event.id.value(), "all members processed node fail");
            }
        }
        Ok(())
    }
}
