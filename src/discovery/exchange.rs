//! Join-time data exchange contract.
//!
//! The host process supplies a [`DataExchange`] collaborator. On join, the
//! engine asks it to [`collect`](DataExchange::collect) the local node's
//! joining payload; on the coordinator it collects the cluster's common
//! payload for each joiner and consumes every joiner's payload via
//! [`on_exchange`](DataExchange::on_exchange); on the joiner it consumes
//! the common payload the coordinator computed.
//!
//! Payloads are opaque bytes; the engine moves them around but never
//! interprets them.

use bytes::Bytes;

use crate::types::NodeId;

/// Carrier for exchanged payloads, identifying the subject member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryDataBag {
    /// Member the payloads are about.
    pub node_id: Option<NodeId>,
    /// The subject member's joining payload.
    pub joining_data: Option<Bytes>,
    /// Cluster-wide common payload.
    pub common_data: Option<Bytes>,
}

impl DiscoveryDataBag {
    /// Empty bag for a member.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id: Some(node_id),
            joining_data: None,
            common_data: None,
        }
    }

    /// Bag carrying a foreign joining payload.
    pub fn with_joining_data(node_id: NodeId, joining_data: Bytes) -> Self {
        Self {
            node_id: Some(node_id),
            joining_data: Some(joining_data),
            common_data: None,
        }
    }

    /// Bag carrying the cluster's common payload.
    pub fn with_common_data(node_id: NodeId, common_data: Bytes) -> Self {
        Self {
            node_id: Some(node_id),
            joining_data: None,
            common_data: Some(common_data),
        }
    }
}

/// Host-side collaborator for join-time data exchange.
pub trait DataExchange: Send + Sync + 'static {
    /// Fill the bag with this node's payloads. Called with the local
    /// node's id when joining, and with a joiner's id on the coordinator
    /// to collect common data for that joiner.
    fn collect(&self, bag: &mut DiscoveryDataBag);

    /// Consume a foreign bag: a joiner's payload (on every established
    /// member) or the common payload (on the joiner itself).
    fn on_exchange(&self, bag: DiscoveryDataBag);
}

/// Exchange collaborator for hosts that exchange nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExchange;

impl DataExchange for NoopExchange {
    fn collect(&self, _bag: &mut DiscoveryDataBag) {}

    fn on_exchange(&self, _bag: DiscoveryDataBag) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bag_constructors() {
        let id = NodeId::random();
        let bag = DiscoveryDataBag::with_joining_data(id, Bytes::from_static(b"j"));
        assert_eq!(bag.node_id, Some(id));
        assert_eq!(bag.joining_data, Some(Bytes::from_static(b"j")));
        assert_eq!(bag.common_data, None);

        let bag = DiscoveryDataBag::with_common_data(id, Bytes::from_static(b"c"));
        assert_eq!(bag.common_data, Some(Bytes::from_static(b"c")));
        assert_eq!(bag.joining_data, None);
    }

    #[test]
    fn test_noop_exchange_collects_nothing() {
        let exchange = NoopExchange;
        let mut bag = DiscoveryDataBag::new(NodeId::random());
        exchange.collect(&mut bag);
        assert_eq!(bag.joining_data, None);
        assert_eq!(bag.common_data, None);
    }
}
