//! Type-safe wrappers for discovery protocol primitives.
//!
//! These newtypes prevent mixing up the several integer counters that share
//! an underlying representation but have different semantic meanings: the
//! event-id sequence, the topology version, and the per-node internal id
//! assigned by ZooKeeper's sequential znodes.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of a cluster member.
///
/// Assigned once by the host process before joining; survives for the
/// lifetime of the discovery instance and is embedded in every ZooKeeper
/// name the node creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Generate a fresh random identity.
    pub fn random() -> Self {
        NodeId(Uuid::new_v4())
    }

    /// Parse from the canonical hyphenated form used in znode names.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(NodeId)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Internal id of a cluster member: the sequence number ZooKeeper assigned
/// to the member's alive znode.
///
/// Monotonically increasing in alive-node creation order; the alive node
/// with the minimum internal id is the coordinator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct InternalId(pub u32);

impl InternalId {
    /// Create from a raw sequence number.
    #[inline]
    pub const fn new(value: u32) -> Self {
        InternalId(value)
    }

    /// Get the raw value.
    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a single discovery event, bumped on every event the
/// coordinator emits.
///
/// Drives per-node replay progress (`last_processed_event_id`) and ack
/// accounting. Zero means "nothing processed yet".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct EventId(pub u64);

impl EventId {
    /// The "nothing processed" sentinel.
    pub const ZERO: Self = EventId(0);

    /// Create from a raw value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        EventId(value)
    }

    /// Get the raw value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The next event id in sequence.
    #[inline]
    pub const fn next(self) -> Self {
        EventId(self.0 + 1)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Cluster topology version.
///
/// Bumped by exactly one on every join and every fail, unchanged by custom
/// events. A member's `order` equals the topology version at which it
/// joined and is stable while the member is alive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TopologyVersion(pub u64);

impl TopologyVersion {
    /// Create from a raw value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        TopologyVersion(value)
    }

    /// Get the raw value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The next topology version.
    #[inline]
    pub const fn next(self) -> Self {
        TopologyVersion(self.0 + 1)
    }
}

impl fmt::Display for TopologyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_roundtrip() {
        let id = NodeId::random();
        let parsed = NodeId::parse(&id.to_string());
        assert_eq!(parsed, Some(id));
    }

    #[test]
    fn test_node_id_parse_rejects_garbage() {
        assert_eq!(NodeId::parse("not-a-uuid"), None);
        assert_eq!(NodeId::parse(""), None);
    }

    #[test]
    fn test_internal_id_ordering() {
        assert!(InternalId::new(1) < InternalId::new(2));
        assert_eq!(InternalId::new(7).value(), 7);
    }

    #[test]
    fn test_event_id_next() {
        assert_eq!(EventId::ZERO.next(), EventId::new(1));
        assert_eq!(EventId::new(41).next().value(), 42);
    }

    #[test]
    fn test_topology_version_next() {
        let v = TopologyVersion::new(3);
        assert_eq!(v.next(), TopologyVersion::new(4));
        assert!(v < v.next());
    }

    #[test]
    fn test_serde_transparency() {
        let id = EventId::new(9);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "9");
        let back: EventId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
