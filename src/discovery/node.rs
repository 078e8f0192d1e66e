//! Cluster member representation.

use serde::{Deserialize, Serialize};

use crate::types::{InternalId, NodeId, TopologyVersion};

/// One cluster member as tracked by the discovery engine.
///
/// `order` and `internal_id` are assigned by the coordinator when the
/// member's join event is emitted; until then (on the joining node itself)
/// they hold their zero defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Stable identity supplied by the host process.
    pub id: NodeId,
    /// Topology version at which the member joined; stable while alive and
    /// unique across the cluster's lifetime.
    pub order: TopologyVersion,
    /// Alive-token sequence; determines coordinator election order.
    pub internal_id: InternalId,
}

impl ClusterNode {
    /// A member that has not been assigned a place in the topology yet.
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            order: TopologyVersion::default(),
            internal_id: InternalId::default(),
        }
    }

    /// A fully placed member.
    pub fn placed(id: NodeId, order: TopologyVersion, internal_id: InternalId) -> Self {
        Self {
            id,
            order,
            internal_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_is_unplaced() {
        let node = ClusterNode::new(NodeId::random());
        assert_eq!(node.order, TopologyVersion::new(0));
        assert_eq!(node.internal_id, InternalId::new(0));
    }

    #[test]
    fn test_serde_roundtrip() {
        let node = ClusterNode::placed(NodeId::random(), TopologyVersion::new(3), InternalId::new(7));
        let json = serde_json::to_string(&node).unwrap();
        let back: ClusterNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }
}
