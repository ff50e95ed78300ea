//! Node records for the topology model (spec.md §3).
//!
//! A host in the network starts out as a generic node and is promoted in
//! place to [`Node::Fog`] or [`Node::Edge`] the first time it greets the
//! controller. Promotion must preserve the node's identifier, so the sum
//! type is rewritten in place rather than replaced.

use std::collections::BTreeMap;

/// Stable node identifier.
///
/// Switches use a synthetic OpenFlow id derived from their datapath MAC
/// (`openflow:<n>`); fog and edge hosts use the MAC of their uplink
/// interface prefixed `host:`.
pub type NodeId = String;

/// Port identifier local to a switch.
pub type PortId = String;

/// Per-port configuration reported by the SDN controller's inventory.
#[derive(Debug, Clone, PartialEq)]
pub struct PortConfig {
    pub name: String,
    pub of_port: u32,
    /// Reported link speed in bits/sec. A speed of zero means the port is
    /// excluded from routing (treated as fully reserved).
    pub speed_bps: u64,
}

/// A rate-limited queue, created on a switch rather than on a port.
#[derive(Debug, Clone, PartialEq)]
pub struct Queue {
    pub id: String,
    pub max_rate_bps: u64,
}

/// A single entry in a QoS's ordered queue list.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRef {
    /// Queue number, unique within the owning QoS.
    pub queue_number: u32,
    pub queue_id: String,
}

/// A QoS entry: a scheduling discipline attached to at most one port,
/// classifying traffic into its queue list by queue number.
#[derive(Debug, Clone, PartialEq)]
pub struct QosEntry {
    pub id: String,
    pub max_rate_bps: u64,
    pub queues: Vec<QueueRef>,
}

impl QosEntry {
    /// Smallest non-negative queue number not already present.
    pub fn next_queue_number(&self) -> u32 {
        let mut used: Vec<u32> = self.queues.iter().map(|q| q.queue_number).collect();
        used.sort_unstable();
        let mut candidate = 0;
        for n in used {
            if n == candidate {
                candidate += 1;
            } else if n > candidate {
                break;
            }
        }
        candidate
    }
}

/// Per-switch state: ports, installed queues, installed QoS entries, and the
/// QoS currently attached to each port (at most one per port).
#[derive(Debug, Clone, Default)]
pub struct SwitchState {
    pub ports: BTreeMap<PortId, PortConfig>,
    pub queues: BTreeMap<String, Queue>,
    pub qos_entries: BTreeMap<String, QosEntry>,
    pub port_qos: BTreeMap<PortId, String>,
    /// OVSDB-view identifiers for this switch, mapping the flow topology's
    /// authoritative node back to the device-configuration view.
    pub ovsdb_node_id: Option<String>,
    pub bridge_id: Option<String>,
}

/// Live resource telemetry and reservation counters for a fog host.
#[derive(Debug, Clone)]
pub struct FogState {
    pub ip: std::net::IpAddr,
    pub docker_port: u16,

    pub cpu_pct_free: f64,
    pub ram_mb_free: u64,
    pub disk_mb_free: u64,

    pub cpu_pct_reserved: f64,
    pub ram_mb_reserved: u64,

    pub cpu_pct_max: f64,
    pub ram_mb_max: u64,
}

impl FogState {
    /// Invariant: `reserved <= max` must hold at every placement decision.
    pub fn has_capacity(&self, cpu_pct: f64, ram_mb: u64) -> bool {
        self.cpu_pct_free >= cpu_pct && self.ram_mb_free >= ram_mb
    }

    pub fn reserve(&mut self, cpu_pct: f64, ram_mb: u64) {
        self.cpu_pct_reserved += cpu_pct;
        self.ram_mb_reserved += ram_mb;
        debug_assert!(self.cpu_pct_reserved <= self.cpu_pct_max + f64::EPSILON);
        debug_assert!(self.ram_mb_reserved <= self.ram_mb_max);
    }

    pub fn release(&mut self, cpu_pct: f64, ram_mb: u64) {
        self.cpu_pct_reserved = (self.cpu_pct_reserved - cpu_pct).max(0.0);
        self.ram_mb_reserved = self.ram_mb_reserved.saturating_sub(ram_mb);
    }
}

/// State for an edge (compute-poor) host. No resource counters: edges issue
/// requests, they don't host containers.
#[derive(Debug, Clone)]
pub struct EdgeState {
    pub ip: std::net::IpAddr,
}

/// A node in the topology: a tagged variant rather than a mutable base
/// struct, so that promotion rewrites the node in place without touching its
/// identifier or its position in the graph.
#[derive(Debug, Clone)]
pub enum Node {
    Switch(SwitchState),
    Fog(FogState),
    Edge(EdgeState),
    /// A host that has connected but not yet sent a greeting; neither fog
    /// nor edge role is known yet.
    Unpromoted,
}

impl Node {
    pub fn is_switch(&self) -> bool {
        matches!(self, Node::Switch(_))
    }

    pub fn as_switch(&self) -> Option<&SwitchState> {
        match self {
            Node::Switch(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_switch_mut(&mut self) -> Option<&mut SwitchState> {
        match self {
            Node::Switch(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_fog(&self) -> Option<&FogState> {
        match self {
            Node::Fog(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_fog_mut(&mut self) -> Option<&mut FogState> {
        match self {
            Node::Fog(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_edge(&self) -> Option<&EdgeState> {
        match self {
            Node::Edge(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_queue_number_fills_gaps() {
        let qos = QosEntry {
            id: "defaultqos1".into(),
            max_rate_bps: 1_000_000_000,
            queues: vec![
                QueueRef { queue_number: 0, queue_id: "default1".into() },
                QueueRef { queue_number: 2, queue_id: "E-TO-F-1".into() },
            ],
        };

        assert_eq!(qos.next_queue_number(), 1);
    }

    #[test]
    fn next_queue_number_appends_when_dense() {
        let qos = QosEntry {
            id: "defaultqos1".into(),
            max_rate_bps: 1_000_000_000,
            queues: vec![
                QueueRef { queue_number: 0, queue_id: "default1".into() },
                QueueRef { queue_number: 1, queue_id: "E-TO-F-1".into() },
            ],
        };

        assert_eq!(qos.next_queue_number(), 2);
    }

    #[test]
    fn fog_capacity_invariant() {
        let mut fog = FogState {
            ip: "10.0.0.1".parse().unwrap(),
            docker_port: 2375,
            cpu_pct_free: 60.0,
            ram_mb_free: 4096,
            disk_mb_free: 10_000,
            cpu_pct_reserved: 40.0,
            ram_mb_reserved: 1024,
            cpu_pct_max: 100.0,
            ram_mb_max: 8192,
        };

        assert!(fog.has_capacity(50.0, 2048));
        assert!(!fog.has_capacity(70.0, 2048));

        fog.reserve(50.0, 2048);
        assert_eq!(fog.cpu_pct_reserved, 90.0);
        assert_eq!(fog.ram_mb_reserved, 3072);
    }
}
