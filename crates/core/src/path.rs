//! Constrained shortest-path fog selection (spec.md §4.5).
//!
//! A plain Bellman-Ford relaxation over the residual-bandwidth graph, with
//! an edge-eligibility predicate that prunes any link that cannot satisfy
//! the requested bandwidth outright (equivalent to giving it infinite
//! weight). Weighting by inverse residual bandwidth biases the selection
//! away from near-saturated links while still preferring short routes.

use ahash::{HashMap, HashMapExt};

use crate::edge::Edge;
use crate::node::{FogState, NodeId};

pub const INFINITE: f64 = f64::INFINITY;

#[derive(Debug, Default)]
pub struct PathResult {
    pub distance: HashMap<NodeId, f64>,
    pub parent: HashMap<NodeId, NodeId>,
}

impl PathResult {
    /// Reconstruct the path from `src` to `dst`, inclusive, using the parent
    /// map. Returns `None` if `dst` is unreachable.
    pub fn path_to(&self, src: &str, dst: &str) -> Option<Vec<NodeId>> {
        if dst != src && !self.parent.contains_key(dst) {
            return None;
        }

        let mut path = vec![dst.to_string()];
        let mut cur = dst.to_string();
        while cur != src {
            let prev = self.parent.get(&cur)?;
            path.push(prev.clone());
            cur = prev.clone();
        }

        path.reverse();
        Some(path)
    }
}

fn edge_eligible(edge: &Edge, required_bps: u64) -> bool {
    edge.is_routable() && edge.residual_bps() >= required_bps
}

fn edge_weight(edge: &Edge) -> f64 {
    let residual = edge.residual_bps();
    if residual == 0 {
        INFINITE
    } else {
        1.0 / residual as f64
    }
}

/// Bellman-Ford over the edge set with relaxation weight
/// `1 / (bps_capacity - bps_reserved)` and eligibility predicate
/// `(bps_capacity - bps_reserved) >= required_bps`. Ineligible edges are
/// skipped outright. Ties are broken first-wins: only a strict improvement
/// triggers relaxation, so the first edge seen in iteration order that
/// achieves the best cost keeps its parent link.
pub fn shortest_paths(edges: &[Edge], src: &str, required_bps: u64) -> PathResult {
    let mut distance: HashMap<NodeId, f64> = HashMap::new();
    let mut parent: HashMap<NodeId, NodeId> = HashMap::new();
    distance.insert(src.to_string(), 0.0);

    let mut nodes: std::collections::HashSet<&str> = std::collections::HashSet::new();
    for e in edges {
        nodes.insert(e.src.as_str());
        nodes.insert(e.dst.as_str());
    }

    let vertex_count = nodes.len().max(1);

    for _ in 0..vertex_count.saturating_sub(1) {
        let mut improved = false;

        for edge in edges {
            if !edge_eligible(edge, required_bps) {
                continue;
            }

            let Some(&du) = distance.get(edge.src.as_str()) else {
                continue;
            };

            let candidate = du + edge_weight(edge);
            let dv = *distance.get(edge.dst.as_str()).unwrap_or(&INFINITE);

            if candidate < dv {
                distance.insert(edge.dst.clone(), candidate);
                parent.insert(edge.dst.clone(), edge.src.clone());
                improved = true;
            }
        }

        if !improved {
            break;
        }
    }

    PathResult { distance, parent }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FogSelectionError {
    /// No fog node has enough free compute for the request.
    NoCompute,
    /// At least one fog node has compute, but none is reachable within the
    /// requested bandwidth.
    NoNetwork,
}

/// Select the fog node with the smallest path distance among those that
/// satisfy the compute request, breaking ties by first-seen order.
pub fn select_fog<'a>(
    fogs: impl Iterator<Item = (&'a NodeId, &'a FogState)>,
    paths: &PathResult,
    cpu_pct: f64,
    ram_mb: u64,
) -> Result<NodeId, FogSelectionError> {
    let mut best: Option<(NodeId, f64)> = None;
    let mut any_qualifies_by_compute = false;

    for (id, fog) in fogs {
        if !fog.has_capacity(cpu_pct, ram_mb) {
            continue;
        }

        any_qualifies_by_compute = true;
        let dist = *paths.distance.get(id.as_str()).unwrap_or(&INFINITE);

        if dist.is_finite() {
            match &best {
                Some((_, best_dist)) if *best_dist <= dist => {}
                _ => best = Some((id.clone(), dist)),
            }
        }
    }

    if !any_qualifies_by_compute {
        return Err(FogSelectionError::NoCompute);
    }

    best.map(|(id, _)| id).ok_or(FogSelectionError::NoNetwork)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::FogState;

    fn edge(src: &str, dst: &str, cap: u64, reserved: u64) -> Edge {
        let mut e = Edge::new(src.into(), dst.into(), "1".into(), "1".into(), cap);
        e.add_reservation(reserved as i64);
        e
    }

    #[test]
    fn unreachable_destination_stays_infinite() {
        let edges = vec![edge("A", "B", 100, 0)];
        let paths = shortest_paths(&edges, "A", 1000);
        assert!(!paths.distance.contains_key("B") || paths.distance["B"].is_infinite());
    }

    #[test]
    fn zero_capacity_edge_is_never_selected() {
        let edges = vec![edge("A", "B", 0, 0)];
        let paths = shortest_paths(&edges, "A", 1);
        assert!(paths.path_to("A", "B").is_none());
    }

    #[test]
    fn prefers_less_saturated_path_over_shorter_saturated_one() {
        // A -> B direct: capacity barely above the request, nearly saturated.
        // A -> C -> B: two hops, but with plenty of headroom.
        let edges = vec![
            edge("A", "B", 10_000_000, 9_000_000),
            edge("A", "C", 1_000_000_000, 0),
            edge("C", "B", 1_000_000_000, 0),
        ];

        let paths = shortest_paths(&edges, "A", 1_000_000);
        let path = paths.path_to("A", "B").unwrap();
        assert_eq!(path, vec!["A".to_string(), "C".to_string(), "B".to_string()]);
    }

    #[test]
    fn reducing_reservation_never_increases_distance() {
        let saturated = vec![edge("A", "B", 10_000_000, 9_500_000)];
        let relaxed = vec![edge("A", "B", 10_000_000, 1_000_000)];

        let d1 = shortest_paths(&saturated, "A", 100_000).distance.get("B").copied().unwrap_or(INFINITE);
        let d2 = shortest_paths(&relaxed, "A", 100_000).distance.get("B").copied().unwrap_or(INFINITE);

        assert!(d2 <= d1);
    }

    #[test]
    fn fog_selection_fails_no_compute() {
        let mut fogs = HashMap::new();
        fogs.insert(
            "host:f1".to_string(),
            FogState {
                ip: "10.0.0.1".parse().unwrap(),
                docker_port: 2375,
                cpu_pct_free: 40.0,
                ram_mb_free: 4096,
                disk_mb_free: 1000,
                cpu_pct_reserved: 60.0,
                ram_mb_reserved: 0,
                cpu_pct_max: 100.0,
                ram_mb_max: 8192,
            },
        );

        let paths = PathResult::default();
        let err = select_fog(fogs.iter(), &paths, 80.0, 1024).unwrap_err();
        assert_eq!(err, FogSelectionError::NoCompute);
    }

    #[test]
    fn fog_selection_fails_no_network_when_unreachable() {
        let mut fogs = HashMap::new();
        fogs.insert(
            "host:f1".to_string(),
            FogState {
                ip: "10.0.0.1".parse().unwrap(),
                docker_port: 2375,
                cpu_pct_free: 90.0,
                ram_mb_free: 4096,
                disk_mb_free: 1000,
                cpu_pct_reserved: 10.0,
                ram_mb_reserved: 0,
                cpu_pct_max: 100.0,
                ram_mb_max: 8192,
            },
        );

        let paths = PathResult::default(); // no distances recorded => unreachable
        let err = select_fog(fogs.iter(), &paths, 10.0, 1024).unwrap_err();
        assert_eq!(err, FogSelectionError::NoNetwork);
    }
}
