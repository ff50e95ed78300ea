//! Link-utilization refresh poller (spec.md §4.9).
//!
//! Reads the byte counters for every port with an outgoing edge, rotates
//! current into previous, and recomputes `bps_current`, `bps_capacity` and
//! `utilization_pct` for that edge. A reported capacity of zero excludes
//! the edge from routing (`Edge::is_routable`).

use std::sync::Arc;
use std::time::Duration;

use fdk_core::topology::Topology;

use crate::dataplane::SdnClient;

pub async fn tick(sdn: &dyn SdnClient, flow_topology: &Topology, interval_secs: f64) -> bool {
    let edges: Vec<(String, String, String, String)> =
        flow_topology.with_lock(|g| g.all_nodes().map(|(id, _)| id.clone()).collect::<Vec<_>>())
            .into_iter()
            .flat_map(|node_id| {
                flow_topology.with_lock(|g| {
                    g.edges_from(&node_id)
                        .into_iter()
                        .map(|e| (e.src.clone(), e.src_port.clone(), e.dst.clone(), e.dst_port.clone()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

    for (node_id, port_id, dst_id, dst_port_id) in edges {
        let counters = match sdn.get_port_counters(&node_id, &port_id).await {
            Ok(c) => c,
            Err(e) => {
                log::warn!("link utilization: failed to read counters for {}/{}: {}", node_id, port_id, e);
                continue;
            }
        };

        // Capacity is bounded by the slower end of the link, not just the
        // reporting port's own speed (spec.md §4.9).
        let dst_speed_bps = match sdn.get_port_counters(&dst_id, &dst_port_id).await {
            Ok(c) => c.speed_bps,
            Err(e) => {
                log::warn!("link utilization: failed to read counters for {}/{}: {}", dst_id, dst_port_id, e);
                counters.speed_bps
            }
        };
        let capacity_bps = counters.speed_bps.min(dst_speed_bps);

        flow_topology.with_lock(|g| {
            if let Some(edge) = g
                .all_edges_mut()
                .find(|e| e.src == node_id && e.src_port == port_id)
            {
                edge.refresh_counters(counters.tx_bytes, counters.rx_bytes, capacity_bps, interval_secs);
            }
        });
    }

    true
}

pub async fn run(sdn: Arc<dyn SdnClient>, flow_topology: Arc<Topology>, interval: Duration) {
    let interval_secs = interval.as_secs_f64();
    crate::poller::run_loop("link-utilization", interval, move || {
        let sdn = sdn.clone();
        let flow_topology = flow_topology.clone();
        async move { tick(sdn.as_ref(), &flow_topology, interval_secs).await }
    })
    .await;
}
