//! Discovery notification contract.
//!
//! The host registers a single [`DiscoveryListener`]; the engine invokes
//! it on the dispatch lane, strictly in event order. Every member of the
//! cluster observes the same notifications at the same topology versions.

use bytes::Bytes;

use crate::discovery::node::ClusterNode;
use crate::types::TopologyVersion;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryEventType {
    /// A member joined the topology.
    NodeJoined,
    /// A member failed (its session ended).
    NodeFailed,
    /// An application-level broadcast was delivered.
    Custom,
    /// The local node lost its ZooKeeper session. Terminal; no further
    /// notifications follow.
    Segmented,
}

impl std::fmt::Display for DiscoveryEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryEventType::NodeJoined => write!(f, "node-joined"),
            DiscoveryEventType::NodeFailed => write!(f, "node-failed"),
            DiscoveryEventType::Custom => write!(f, "custom"),
            DiscoveryEventType::Segmented => write!(f, "segmented"),
        }
    }
}

/// One discovery notification.
#[derive(Debug, Clone)]
pub struct DiscoveryNotification {
    /// What happened.
    pub event_type: DiscoveryEventType,
    /// Topology version at which the event is delivered.
    pub topology_version: TopologyVersion,
    /// Subject member: the joiner, the failed member, the sender of a
    /// custom message, or the local node on segmentation.
    pub node: ClusterNode,
    /// Topology after the event, ordered by member order. Empty on
    /// segmentation.
    pub snapshot: Vec<ClusterNode>,
    /// Message bytes for custom events.
    pub message: Option<Bytes>,
}

/// Host-side sink for discovery notifications.
pub trait DiscoveryListener: Send + Sync + 'static {
    /// Handle one notification. Invoked on the engine's dispatch lane;
    /// implementations should hand heavy work off.
    fn on_discovery(&self, notification: DiscoveryNotification);
}
