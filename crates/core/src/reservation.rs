//! The reservation record (spec.md §3, `allocated_resources`).
//!
//! Keyed by `(edge_node_id, fog_node_id, fog_service_port)` as a single flat
//! map, per the redesign recommended in spec.md §9: a composite key is
//! clearer than the original's triple-nested dict, and makes lookup and
//! deletion single operations.

use ahash::HashMap;

use crate::node::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReservationKey {
    pub edge_node_id: NodeId,
    pub fog_node_id: NodeId,
    pub fog_service_port: u16,
}

/// Everything that must be torn down on one switch hop when a reservation is
/// released. The per-reservation queue is attached into *both* of the
/// switch's pre-existing per-port default QoS entries (one per direction of
/// traffic through the switch), never into a QoS created just for this
/// reservation — a port holds at most one QoS at all times (spec.md §3, §4.4).
#[derive(Debug, Clone)]
pub struct HopRecord {
    pub node_id: NodeId,
    pub in_port: String,
    pub out_port: String,
    pub queue_id: String,
    pub in_qos_id: String,
    pub out_qos_id: String,
    pub flow_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ReservationRecord {
    pub key: ReservationKey,
    pub edge_ip: std::net::IpAddr,
    pub fog_ip: std::net::IpAddr,
    pub cpu_pct: f64,
    pub ram_mb: u64,
    pub bandwidth_bps: u64,
    /// Ordered from edge-adjacent hop to fog-adjacent hop.
    pub hops: Vec<HopRecord>,
    /// Every `(node, port)` whose outgoing edge had `bandwidth_bps` added to
    /// `bps_reserved`, covering every link of the path in both directions
    /// (spec.md §4.6 step 4) — not just the switch-to-switch interior hops.
    pub link_reservations: Vec<(NodeId, String)>,
    pub service_id: String,
}

/// Owned exclusively by the admission controller. Created on a successful
/// allocation, never mutated after creation, destroyed by deallocation.
#[derive(Default)]
pub struct ReservationTable {
    records: HashMap<ReservationKey, ReservationRecord>,
}

impl ReservationTable {
    pub fn insert(&mut self, record: ReservationRecord) {
        self.records.insert(record.key.clone(), record);
    }

    /// Idempotent: removing an already-absent key is a no-op success, so that
    /// repeated shutdown requests for the same reservation are safe.
    pub fn remove(&mut self, key: &ReservationKey) -> Option<ReservationRecord> {
        self.records.remove(key)
    }

    pub fn get(&self, key: &ReservationKey) -> Option<&ReservationRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every key currently held, for shutdown to drain one at a time.
    pub fn keys(&self) -> Vec<ReservationKey> {
        self.records.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ReservationKey {
        ReservationKey {
            edge_node_id: "host:edge1".into(),
            fog_node_id: "host:fog1".into(),
            fog_service_port: 8080,
        }
    }

    #[test]
    fn repeated_removal_is_idempotent() {
        let mut table = ReservationTable::default();
        table.insert(ReservationRecord {
            key: key(),
            edge_ip: "10.0.0.2".parse().unwrap(),
            fog_ip: "10.0.0.3".parse().unwrap(),
            cpu_pct: 10.0,
            ram_mb: 256,
            bandwidth_bps: 1_000_000,
            hops: vec![],
            link_reservations: vec![],
            service_id: "svc-1".into(),
        });

        assert!(table.remove(&key()).is_some());
        assert!(table.remove(&key()).is_none(), "second shutdown is a no-op");
        assert!(table.is_empty());
    }
}
