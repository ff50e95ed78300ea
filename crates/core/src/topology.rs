//! The topology model (spec.md §4.1).
//!
//! Two views coexist for the same physical network: a *flow* topology
//! (the SDN controller's view, authoritative for path decisions) and an
//! *ovsdb* topology (the device-configuration view). Only [`TopologyKind::Flow`]
//! feeds the path selector; the ovsdb view is consulted by the bandwidth
//! engine through the per-switch identifiers recorded on [`SwitchState`].
//!
//! Every mutating or read-consistent-snapshot operation acquires the
//! topology's single mutex; composing several operations under one lock
//! acquisition is the caller's responsibility (see [`Topology::with_lock`]).

use ahash::{HashMap, HashMapExt};
use parking_lot::Mutex;

use crate::edge::Edge;
use crate::node::{Node, NodeId, PortId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyKind {
    Flow,
    Ovsdb,
}

/// Key identifying one of the two directed edges between adjacent nodes.
pub type EdgeKey = (NodeId, NodeId, PortId, PortId);

struct Inner {
    nodes: HashMap<NodeId, Node>,
    edges: HashMap<EdgeKey, Edge>,
}

/// A single topology (flow or ovsdb view), guarded by one mutex.
pub struct Topology {
    pub id: String,
    pub kind: TopologyKind,
    inner: Mutex<Inner>,
}

impl Topology {
    pub fn new(id: impl Into<String>, kind: TopologyKind) -> Self {
        Self {
            id: id.into(),
            kind,
            inner: Mutex::new(Inner {
                nodes: HashMap::new(),
                edges: HashMap::new(),
            }),
        }
    }

    /// Run a closure with the topology's mutex held for its entire duration.
    /// Callers that need to compose several of the primitive operations
    /// below atomically should use this rather than calling them one at a
    /// time.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut TopologyGuard) -> R) -> R {
        let mut inner = self.inner.lock();
        let mut guard = TopologyGuard { inner: &mut inner };
        f(&mut guard)
    }

    pub fn add_node(&self, id: NodeId, node: Node) {
        self.with_lock(|g| g.add_node(id, node));
    }

    pub fn del_node(&self, id: &str) -> Option<Node> {
        self.with_lock(|g| g.del_node(id))
    }

    pub fn add_link(&self, src: NodeId, dst: NodeId, src_port: PortId, dst_port: PortId, capacity_bps: u64) {
        self.with_lock(|g| g.add_link(src, dst, src_port, dst_port, capacity_bps));
    }

    pub fn del_link(&self, src: &str, dst: &str, src_port: &str, dst_port: &str) {
        self.with_lock(|g| g.del_link(src, dst, src_port, dst_port));
    }

    pub fn add_link_reservation(&self, node: &str, port: &str, delta_bps: i64) {
        self.with_lock(|g| g.add_link_reservation(node, port, delta_bps));
    }

    pub fn set_link_reservation(&self, node: &str, port: &str, value: u64) {
        self.with_lock(|g| g.set_link_reservation(node, port, value));
    }

    /// Snapshot of every edge, for use by the path selector.
    pub fn edges_snapshot(&self) -> Vec<Edge> {
        self.with_lock(|g| g.inner.edges.values().cloned().collect())
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.with_lock(|g| g.inner.nodes.keys().cloned().collect())
    }
}

/// A live view into the topology's protected state, only reachable from
/// inside [`Topology::with_lock`].
pub struct TopologyGuard<'a> {
    inner: &'a mut Inner,
}

impl<'a> TopologyGuard<'a> {
    pub fn add_node(&mut self, id: NodeId, node: Node) {
        self.inner.nodes.insert(id, node);
    }

    pub fn del_node(&mut self, id: &str) -> Option<Node> {
        self.inner.nodes.remove(id)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.inner.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.inner.nodes.get_mut(id)
    }

    /// Promote a generic host node to [`Node::Fog`] or [`Node::Edge`] in
    /// place, preserving its identifier. A no-op if the node does not exist
    /// or is already promoted to a different role.
    pub fn promote(&mut self, id: &str, promoted: Node) -> bool {
        match self.inner.nodes.get(id) {
            Some(Node::Unpromoted) | None => {
                self.inner.nodes.insert(id.to_string(), promoted);
                true
            }
            Some(_) => false,
        }
    }

    /// Create both directed edges between `src` and `dst`. Idempotent on the
    /// `(src, dst, src_port, dst_port)` key: re-adding the same link updates
    /// its capacity rather than duplicating it.
    pub fn add_link(&mut self, src: NodeId, dst: NodeId, src_port: PortId, dst_port: PortId, capacity_bps: u64) {
        let fwd_key = (src.clone(), dst.clone(), src_port.clone(), dst_port.clone());
        self.inner
            .edges
            .entry(fwd_key)
            .and_modify(|e| e.bps_capacity = capacity_bps)
            .or_insert_with(|| Edge::new(src.clone(), dst.clone(), src_port.clone(), dst_port.clone(), capacity_bps));

        let rev_key = (dst.clone(), src.clone(), dst_port.clone(), src_port.clone());
        self.inner
            .edges
            .entry(rev_key)
            .and_modify(|e| e.bps_capacity = capacity_bps)
            .or_insert_with(|| Edge::new(dst, src, dst_port, src_port, capacity_bps));
    }

    pub fn del_link(&mut self, src: &str, dst: &str, src_port: &str, dst_port: &str) {
        let fwd_key = (src.to_string(), dst.to_string(), src_port.to_string(), dst_port.to_string());
        let rev_key = (dst.to_string(), src.to_string(), dst_port.to_string(), src_port.to_string());
        self.inner.edges.remove(&fwd_key);
        self.inner.edges.remove(&rev_key);
    }

    /// Add `delta` to `bps_reserved` of the outgoing edge leaving `node` on
    /// `port` (negative releases). Reservation accounting is local to this
    /// one directed edge; the caller is responsible for updating the
    /// symmetric edge when the reservation represents bidirectional traffic.
    pub fn add_link_reservation(&mut self, node: &str, port: &str, delta_bps: i64) {
        if let Some(edge) = self
            .inner
            .edges
            .values_mut()
            .find(|e| e.src == node && e.src_port == port)
        {
            edge.add_reservation(delta_bps);
        }
    }

    pub fn set_link_reservation(&mut self, node: &str, port: &str, value: u64) {
        if let Some(edge) = self
            .inner
            .edges
            .values_mut()
            .find(|e| e.src == node && e.src_port == port)
        {
            edge.set_reservation(value);
        }
    }

    pub fn edge_mut(&mut self, key: &EdgeKey) -> Option<&mut Edge> {
        self.inner.edges.get_mut(key)
    }

    pub fn edges_from(&self, node: &str) -> Vec<&Edge> {
        self.inner.edges.values().filter(|e| e.src == node).collect()
    }

    pub fn all_edges_mut(&mut self) -> impl Iterator<Item = &mut Edge> {
        self.inner.edges.values_mut()
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = (&NodeId, &Node)> {
        self.inner.nodes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::EdgeState;

    #[test]
    fn add_link_is_idempotent_and_bidirectional() {
        let top = Topology::new("flow:1", TopologyKind::Flow);
        top.add_link("openflow:1".into(), "openflow:2".into(), "1".into(), "2".into(), 1_000_000_000);
        top.add_link("openflow:1".into(), "openflow:2".into(), "1".into(), "2".into(), 1_000_000_000);

        let edges = top.edges_snapshot();
        assert_eq!(edges.len(), 2, "exactly two directed edges for one link");
    }

    #[test]
    fn promotion_preserves_identifier() {
        let top = Topology::new("flow:1", TopologyKind::Flow);
        top.add_node("host:aa:bb".into(), Node::Unpromoted);

        top.with_lock(|g| {
            let promoted = g.promote(
                "host:aa:bb",
                Node::Edge(EdgeState { ip: "10.0.0.5".parse().unwrap() }),
            );
            assert!(promoted);
            assert!(g.node("host:aa:bb").unwrap().as_edge().is_some());
        });

        assert_eq!(top.node_ids(), vec!["host:aa:bb".to_string()]);
    }

    #[test]
    fn reservation_is_local_to_outgoing_edge() {
        let top = Topology::new("flow:1", TopologyKind::Flow);
        top.add_link("A".into(), "B".into(), "1".into(), "1".into(), 1_000_000_000);

        top.add_link_reservation("A", "1", 100_000_000);

        let edges = top.edges_snapshot();
        let a_to_b = edges.iter().find(|e| e.src == "A" && e.dst == "B").unwrap();
        let b_to_a = edges.iter().find(|e| e.src == "B" && e.dst == "A").unwrap();
        assert_eq!(a_to_b.bps_reserved, 100_000_000);
        assert_eq!(b_to_a.bps_reserved, 0);
    }
}
