//! In-memory indices over the currently joined members.
//!
//! Members are stored once (behind `Arc`) and indexed three ways: by
//! stable id, by internal id (election and failure order) and by topology
//! order (snapshot order). The three indices always contain exactly the
//! same set; every mutation goes through a single `&mut self` method, so
//! removal is atomic across all three.
//!
//! All mutations happen on the engine's dispatch lane; readers get
//! freshly-cloned snapshots.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::discovery::node::ClusterNode;
use crate::types::{InternalId, NodeId, TopologyVersion};

/// Three-index view of the joined members.
#[derive(Debug, Default)]
pub struct ClusterView {
    by_id: HashMap<NodeId, Arc<ClusterNode>>,
    by_internal_id: BTreeMap<InternalId, Arc<ClusterNode>>,
    by_order: BTreeMap<TopologyVersion, Arc<ClusterNode>>,
}

impl ClusterView {
    /// Empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a member into all three indices.
    pub fn add(&mut self, node: ClusterNode) {
        let node = Arc::new(node);
        self.by_id.insert(node.id, Arc::clone(&node));
        self.by_internal_id
            .insert(node.internal_id, Arc::clone(&node));
        self.by_order.insert(node.order, node);
    }

    /// Remove a member from all three indices, returning it.
    pub fn remove_by_internal_id(&mut self, internal_id: InternalId) -> Option<Arc<ClusterNode>> {
        let node = self.by_internal_id.remove(&internal_id)?;
        self.by_id.remove(&node.id);
        self.by_order.remove(&node.order);
        Some(node)
    }

    /// Look up by stable id.
    pub fn get_by_id(&self, id: NodeId) -> Option<&Arc<ClusterNode>> {
        self.by_id.get(&id)
    }

    /// Whether a member with this internal id is in the view.
    pub fn contains_internal_id(&self, internal_id: InternalId) -> bool {
        self.by_internal_id.contains_key(&internal_id)
    }

    /// Members other than `local_id`, in topology order.
    pub fn remote_nodes(&self, local_id: NodeId) -> Vec<ClusterNode> {
        self.by_order
            .values()
            .filter(|n| n.id != local_id)
            .map(|n| (**n).clone())
            .collect()
    }

    /// All members in topology order.
    pub fn snapshot(&self) -> Vec<ClusterNode> {
        self.by_order.values().map(|n| (**n).clone()).collect()
    }

    /// Internal ids of all members, ascending.
    pub fn internal_ids(&self) -> Vec<InternalId> {
        self.by_internal_id.keys().copied().collect()
    }

    /// Pairs of (internal id, member), ascending by internal id.
    pub fn by_internal_id(&self) -> impl Iterator<Item = (InternalId, &Arc<ClusterNode>)> {
        self.by_internal_id.iter().map(|(k, v)| (*k, v))
    }

    /// Number of joined members.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no member has joined.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(order: u64, internal: u32) -> ClusterNode {
        ClusterNode::placed(
            NodeId::random(),
            TopologyVersion::new(order),
            InternalId::new(internal),
        )
    }

    #[test]
    fn test_add_indexes_all_three_ways() {
        let mut view = ClusterView::new();
        let n = node(1, 5);
        view.add(n.clone());

        assert_eq!(view.len(), 1);
        assert_eq!(view.get_by_id(n.id).map(|a| (**a).clone()), Some(n.clone()));
        assert!(view.contains_internal_id(n.internal_id));
        assert_eq!(view.snapshot(), vec![n]);
    }

    #[test]
    fn test_remove_is_atomic_across_indices() {
        let mut view = ClusterView::new();
        let a = node(1, 5);
        let b = node(2, 9);
        view.add(a.clone());
        view.add(b.clone());

        let removed = view.remove_by_internal_id(a.internal_id).unwrap();
        assert_eq!((*removed).clone(), a);
        assert!(view.get_by_id(a.id).is_none());
        assert!(!view.contains_internal_id(a.internal_id));
        assert_eq!(view.snapshot(), vec![b]);
    }

    #[test]
    fn test_remove_unknown_is_none() {
        let mut view = ClusterView::new();
        assert!(view.remove_by_internal_id(InternalId::new(1)).is_none());
    }

    #[test]
    fn test_snapshot_is_ordered_by_topology_version() {
        let mut view = ClusterView::new();
        let a = node(3, 1);
        let b = node(1, 2);
        let c = node(2, 3);
        view.add(a.clone());
        view.add(b.clone());
        view.add(c.clone());

        let orders: Vec<u64> = view.snapshot().iter().map(|n| n.order.value()).collect();
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[test]
    fn test_remote_nodes_excludes_local() {
        let mut view = ClusterView::new();
        let local = node(1, 1);
        let other = node(2, 2);
        view.add(local.clone());
        view.add(other.clone());

        assert_eq!(view.remote_nodes(local.id), vec![other]);
    }

    #[test]
    fn test_internal_ids_ascending() {
        let mut view = ClusterView::new();
        view.add(node(1, 9));
        view.add(node(2, 3));

        assert_eq!(
            view.internal_ids(),
            vec![InternalId::new(3), InternalId::new(9)]
        );
    }
}
