//! Event log model and join/ack wire records.
//!
//! The coordinator owns a [`DiscoveryEventsData`]: cluster-wide counters
//! plus an ordered map of pending [`DiscoveryEvent`]s. The whole structure
//! is serialized into the `/evts` znode on every topology or custom event;
//! followers decode it and replay the suffix they have not yet processed.
//!
//! Two things deliberately do not travel through `/evts`:
//!
//! - `remaining_acks`: followers never consult ack-sets, and a new
//!   coordinator rebuilds them against the topology it inherits
//! - the join/custom payload bytes, held only in the emitting
//!   coordinator's memory; followers fetch them from the per-event znodes
//!   or the original submission znode

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Unbounded};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::discovery::node::ClusterNode;
use crate::types::{EventId, InternalId, NodeId, TopologyVersion};

/// Per-member progress record stored in the member's alive znode.
///
/// Updated by each non-coordinator every `ack_threshold` processed events;
/// the coordinator watches these records to garbage-collect event
/// payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliveNodeRecord {
    /// Highest event id this member has fully processed.
    pub last_processed_event_id: EventId,
}

/// Payload a joining member parks under `/joinData` before creating its
/// alive token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoiningNodeData {
    /// The joiner's stable id; must match the uuid encoded in the znode
    /// name.
    pub node_id: NodeId,
    /// Opaque joining payload supplied by the host's data-exchange
    /// collaborator.
    pub payload: Bytes,
}

/// What the coordinator computes for a joiner: the topology it is joining
/// (everything except the joiner itself) plus the cluster's common data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedNodeData {
    /// Members already in the cluster, in topology order.
    pub topology: Vec<ClusterNode>,
    /// Opaque common payload collected from the coordinator's exchange
    /// collaborator.
    pub common_data: Bytes,
}

/// The event-specific half of a discovery event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// A member joined.
    Join {
        /// Stable id of the joiner.
        node_id: NodeId,
        /// Internal id assigned from the joiner's alive token.
        internal_id: InternalId,
        /// Joining payload; present only in the emitting coordinator's
        /// memory.
        #[serde(skip)]
        joining: Option<Bytes>,
    },
    /// A member failed (its alive token vanished).
    Fail {
        /// Internal id of the failed member.
        internal_id: InternalId,
    },
    /// An application-level broadcast.
    Custom {
        /// Member that submitted the message.
        sender: NodeId,
        /// Child name of the submission under `/customEvts`, where
        /// followers fetch the payload.
        submission: String,
        /// Message bytes; present only in the emitting coordinator's
        /// memory.
        #[serde(skip)]
        message: Option<Bytes>,
    },
}

impl EventKind {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Join { .. } => "join",
            EventKind::Fail { .. } => "fail",
            EventKind::Custom { .. } => "custom",
        }
    }
}

/// One entry of the discovery event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryEvent {
    /// Position in the total order.
    pub id: EventId,
    /// Topology version at which the event is delivered.
    pub topology_version: TopologyVersion,
    /// Event-specific data.
    pub kind: EventKind,
    /// Internal ids that still have to acknowledge before the event's
    /// external payloads may be deleted. Coordinator-local.
    #[serde(skip)]
    pub remaining_acks: BTreeSet<InternalId>,
}

impl DiscoveryEvent {
    /// New event with an empty ack-set.
    pub fn new(id: EventId, topology_version: TopologyVersion, kind: EventKind) -> Self {
        Self {
            id,
            topology_version,
            kind,
            remaining_acks: BTreeSet::new(),
        }
    }

    /// Reset the ack-set to a topology snapshot, excluding the
    /// coordinator, which acks implicitly by emitting (or, on handover, by
    /// having replayed the inherited log).
    pub fn reset_remaining_acks<'a>(
        &mut self,
        topology: impl IntoIterator<Item = &'a ClusterNode>,
        coordinator: InternalId,
    ) {
        self.remaining_acks = topology
            .into_iter()
            .map(|n| n.internal_id)
            .filter(|id| *id != coordinator)
            .collect();
    }

    /// Record a member's progress. Removes the member from the ack-set iff
    /// it has processed this event. Returns true iff the ack-set is now
    /// empty.
    pub fn on_ack_received(&mut self, internal_id: InternalId, last_processed: EventId) -> bool {
        if last_processed >= self.id {
            self.remaining_acks.remove(&internal_id);
        }
        self.remaining_acks.is_empty()
    }

    /// Drop a failed member from the ack-set (it will never ack). Returns
    /// true iff the ack-set is now empty.
    pub fn on_node_fail(&mut self, internal_id: InternalId) -> bool {
        self.remaining_acks.remove(&internal_id);
        self.remaining_acks.is_empty()
    }

    /// Whether every member in the ack-set has acknowledged.
    pub fn all_acks_received(&self) -> bool {
        self.remaining_acks.is_empty()
    }
}

/// The discovery event log plus cluster-wide counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryEventsData {
    /// Wall-clock millis fixed when the first coordinator started the
    /// cluster.
    pub grid_start_time: u64,
    /// Bumped on join and fail, never on custom.
    pub topology_version: TopologyVersion,
    /// Bumped on every event.
    pub event_id_generator: EventId,
    /// Highest `/customEvts` sequence consumed; -1 before the first one.
    pub processed_custom_sequence: i64,
    /// Pending events, ordered by id.
    pub events: BTreeMap<EventId, DiscoveryEvent>,
}

impl DiscoveryEventsData {
    /// Fresh log for a newly started cluster.
    pub fn new(grid_start_time: u64, topology_version: TopologyVersion) -> Self {
        Self {
            grid_start_time,
            topology_version,
            event_id_generator: EventId::ZERO,
            processed_custom_sequence: -1,
            events: BTreeMap::new(),
        }
    }

    /// Allocate the next event id.
    pub fn next_event_id(&mut self) -> EventId {
        self.event_id_generator = self.event_id_generator.next();
        self.event_id_generator
    }

    /// Insert an event.
    pub fn add_event(&mut self, event: DiscoveryEvent) {
        self.events.insert(event.id, event);
    }

    /// Ids of events strictly after `after`, ascending. Collected so the
    /// caller may mutate the map while walking.
    pub fn event_ids_after(&self, after: EventId) -> Vec<EventId> {
        self.events
            .range((Excluded(after), Unbounded))
            .map(|(id, _)| *id)
            .collect()
    }
}
