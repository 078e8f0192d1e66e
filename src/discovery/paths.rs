//! ZooKeeper path schema and znode name codecs.
//!
//! Everything the engine stores lives under `<base>/<cluster>`:
//!
//! ```text
//! /evts                                     serialized event log
//! /evts/<event_id>/joinData                 join payload for the joiner
//! /evts/<event_id>/joined                   snapshot + common data for the joiner
//! /joinData                                 scratch area for pre-join blobs
//! /joinData/<uuid>|<seq>                    ephemeral-sequential joining payload
//! /aliveNodes                               membership tokens
//! /aliveNodes/<uuid>|<joinSeq>|<aliveSeq>   ephemeral-sequential alive token
//! /customEvts                               custom-event submissions
//! /customEvts/<uuid>|<seq>                  persistent-sequential submission
//! ```
//!
//! Name encoders write the prefix up to the trailing sequence (ZooKeeper
//! appends the zero-padded number); decoders recover the uuid and sequence
//! fields losslessly. The alive-token name carries two sequences: the
//! joining-data sequence (so the coordinator can find the scratch blob)
//! and the alive sequence, which is the member's internal id.

use crate::constants::{
    ALIVE_NODES_NODE, CUSTOM_EVENTS_NODE, EVENTS_NODE, JOIN_DATA_NODE, JOINED_DATA_CHILD,
    JOIN_PAYLOAD_CHILD, NAME_SEPARATOR,
};
use crate::types::{EventId, InternalId, NodeId};

/// Absolute paths for one cluster's layout.
#[derive(Debug, Clone)]
pub struct DiscoveryPaths {
    /// Configured base path.
    pub base: String,
    /// `<base>/<cluster>`.
    pub cluster: String,
    /// Event log znode.
    pub events: String,
    /// Scratch directory for joining payloads.
    pub join_data: String,
    /// Alive-token directory.
    pub alive_nodes: String,
    /// Custom-event submission directory.
    pub custom_events: String,
}

impl DiscoveryPaths {
    /// Build the layout for a cluster.
    pub fn new(base_path: &str, cluster_name: &str) -> Self {
        let base = base_path.trim_end_matches('/').to_string();
        let cluster = format!("{base}/{cluster_name}");
        Self {
            events: format!("{cluster}/{EVENTS_NODE}"),
            join_data: format!("{cluster}/{JOIN_DATA_NODE}"),
            alive_nodes: format!("{cluster}/{ALIVE_NODES_NODE}"),
            custom_events: format!("{cluster}/{CUSTOM_EVENTS_NODE}"),
            base,
            cluster,
        }
    }

    /// Directories to create on join, in order. The alive-node directory
    /// comes last: its existence implies the whole skeleton exists.
    pub fn all_dirs(&self) -> Vec<String> {
        // The base is empty when everything nests directly under the root.
        [
            &self.base,
            &self.cluster,
            &self.events,
            &self.join_data,
            &self.custom_events,
            &self.alive_nodes,
        ]
        .into_iter()
        .filter(|dir| !dir.is_empty())
        .cloned()
        .collect()
    }

    /// `/evts/<event_id>`: parent of the per-event payload znodes.
    pub fn event_dir(&self, event_id: EventId) -> String {
        format!("{}/{}", self.events, event_id.value())
    }

    /// `/evts/<event_id>/joinData`: the joiner's raw joining payload.
    pub fn join_event_payload(&self, event_id: EventId) -> String {
        format!("{}/{JOIN_PAYLOAD_CHILD}", self.event_dir(event_id))
    }

    /// `/evts/<event_id>/joined`: topology snapshot and common data for
    /// the joiner.
    pub fn joined_data(&self, event_id: EventId) -> String {
        format!("{}/{JOINED_DATA_CHILD}", self.event_dir(event_id))
    }

    /// Prefix for a member's joining-payload znode; ZooKeeper appends the
    /// sequence.
    pub fn join_data_prefix(&self, node_id: NodeId) -> String {
        format!("{}/{node_id}{NAME_SEPARATOR}", self.join_data)
    }

    /// Reconstructed joining-payload path, with the sequence padded the
    /// way ZooKeeper padded it at creation.
    pub fn join_data_scratch(&self, node_id: NodeId, join_seq: u32) -> String {
        format!(
            "{}/{node_id}{NAME_SEPARATOR}{join_seq:0width$}",
            self.join_data,
            width = crate::constants::SEQUENCE_PAD_WIDTH
        )
    }

    /// Prefix for a member's alive token; ZooKeeper appends the alive
    /// sequence, which becomes the member's internal id.
    pub fn alive_node_prefix(&self, node_id: NodeId, join_seq: u32) -> String {
        format!(
            "{}/{node_id}{NAME_SEPARATOR}{join_seq}{NAME_SEPARATOR}",
            self.alive_nodes
        )
    }

    /// Absolute path of an alive token from its child name.
    pub fn alive_node(&self, name: &str) -> String {
        format!("{}/{name}", self.alive_nodes)
    }

    /// Prefix for a custom-event submission; ZooKeeper appends the
    /// sequence.
    pub fn custom_event_prefix(&self, node_id: NodeId) -> String {
        format!("{}/{node_id}{NAME_SEPARATOR}", self.custom_events)
    }

    /// Absolute path of a custom-event submission from its child name.
    pub fn custom_event_data(&self, name: &str) -> String {
        format!("{}/{name}", self.custom_events)
    }

    /// True if `path` is a child of the alive-node directory.
    pub fn is_alive_node(&self, path: &str) -> bool {
        path.strip_prefix(&self.alive_nodes)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// The sequence ZooKeeper appended to a sequential znode's name.
pub fn trailing_sequence(name: &str) -> Option<u32> {
    name.rsplit(NAME_SEPARATOR).next()?.parse().ok()
}

/// Member UUID from an alive-token name (`<uuid>|<joinSeq>|<aliveSeq>`).
pub fn alive_node_id(name: &str) -> Option<NodeId> {
    NodeId::parse(name.split(NAME_SEPARATOR).next()?)
}

/// Joining-data sequence from an alive-token name.
pub fn alive_join_sequence(name: &str) -> Option<u32> {
    name.split(NAME_SEPARATOR).nth(1)?.parse().ok()
}

/// Internal id (alive sequence) from an alive-token name.
pub fn alive_internal_id(name: &str) -> Option<InternalId> {
    trailing_sequence(name).map(InternalId::new)
}

/// Sender UUID from a custom-event submission name (`<uuid>|<seq>`).
pub fn custom_event_node_id(name: &str) -> Option<NodeId> {
    NodeId::parse(name.split(NAME_SEPARATOR).next()?)
}

/// Sequence from a custom-event submission name.
pub fn custom_event_sequence(name: &str) -> Option<u32> {
    trailing_sequence(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> DiscoveryPaths {
        DiscoveryPaths::new("/menagerie", "prod")
    }

    #[test]
    fn test_layout() {
        let p = paths();
        assert_eq!(p.cluster, "/menagerie/prod");
        assert_eq!(p.events, "/menagerie/prod/evts");
        assert_eq!(p.join_data, "/menagerie/prod/joinData");
        assert_eq!(p.alive_nodes, "/menagerie/prod/aliveNodes");
        assert_eq!(p.custom_events, "/menagerie/prod/customEvts");
    }

    #[test]
    fn test_alive_nodes_dir_is_created_last() {
        let p = paths();
        assert_eq!(p.all_dirs().last(), Some(&p.alive_nodes));
    }

    #[test]
    fn test_event_payload_paths() {
        let p = paths();
        let id = EventId::new(17);
        assert_eq!(p.event_dir(id), "/menagerie/prod/evts/17");
        assert_eq!(
            p.join_event_payload(id),
            "/menagerie/prod/evts/17/joinData"
        );
        assert_eq!(p.joined_data(id), "/menagerie/prod/evts/17/joined");
    }

    #[test]
    fn test_join_data_scratch_is_zero_padded() {
        let p = paths();
        let id = NodeId::random();
        assert_eq!(
            p.join_data_scratch(id, 42),
            format!("/menagerie/prod/joinData/{id}|0000000042")
        );
    }

    #[test]
    fn test_alive_name_roundtrip() {
        let p = paths();
        let id = NodeId::random();

        // What a member writes, plus what ZooKeeper appends.
        let prefix = p.alive_node_prefix(id, 7);
        let name = format!(
            "{}{:010}",
            prefix.rsplit('/').next().unwrap(),
            123
        );

        assert_eq!(alive_node_id(&name), Some(id));
        assert_eq!(alive_join_sequence(&name), Some(7));
        assert_eq!(alive_internal_id(&name), Some(InternalId::new(123)));
    }

    #[test]
    fn test_custom_name_roundtrip() {
        let id = NodeId::random();
        let name = format!("{id}|{:010}", 5);
        assert_eq!(custom_event_node_id(&name), Some(id));
        assert_eq!(custom_event_sequence(&name), Some(5));
    }

    #[test]
    fn test_decoders_reject_malformed_names() {
        assert_eq!(alive_node_id("garbage"), None);
        assert_eq!(alive_join_sequence("uuid-only"), None);
        assert_eq!(alive_internal_id("a|b|notanumber"), None);
        assert_eq!(custom_event_sequence("x|"), None);
    }

    #[test]
    fn test_is_alive_node() {
        let p = paths();
        assert!(p.is_alive_node(&p.alive_node("abc|1|0000000002")));
        assert!(!p.is_alive_node(&p.events));
        assert!(!p.is_alive_node("/menagerie/prod/aliveNodesX/abc"));
    }
}
