//! Optional fog telemetry server (spec.md §4.8, §6, port 65432).
//!
//! Stateless: each connection carries a whitespace-separated
//! `cpu_pct ram_mb disk_mb` reading, repeated roughly every 5 seconds by
//! the fog host's own reporting client. The reporting fog is identified by
//! the connection's source IP rather than a field in the payload, the way
//! `resource_manager.py`'s fog-util service matched readings against
//! `FogNode.ip_addr`.

use std::net::SocketAddr;
use std::sync::Arc;

use fdk_core::topology::Topology;

pub struct TelemetryHandler {
    flow_topology: Arc<Topology>,
}

impl TelemetryHandler {
    pub fn new(flow_topology: Arc<Topology>) -> Self {
        Self { flow_topology }
    }

    pub async fn handle(&self, body: Vec<u8>, peer: SocketAddr) -> Vec<u8> {
        let text = String::from_utf8_lossy(&body);
        let mut parts = text.split_whitespace();

        let (cpu_pct, ram_mb, disk_mb) = match (
            parts.next().and_then(|s| s.parse::<f64>().ok()),
            parts.next().and_then(|s| s.parse::<u64>().ok()),
            parts.next().and_then(|s| s.parse::<u64>().ok()),
        ) {
            (Some(c), Some(r), Some(d)) => (c, r, d),
            _ => {
                log::warn!("malformed telemetry reading from {}: {:?}", peer, text);
                return Vec::new();
            }
        };

        let updated = self.flow_topology.with_lock(|g| {
            let target = g
                .all_nodes()
                .find(|(_, n)| n.as_fog().map(|f| f.ip == peer.ip()).unwrap_or(false))
                .map(|(id, _)| id.clone());

            if let Some(id) = target {
                if let Some(fog) = g.node_mut(&id).and_then(|n| n.as_fog_mut()) {
                    fog.cpu_pct_free = cpu_pct;
                    fog.ram_mb_free = ram_mb;
                    fog.disk_mb_free = disk_mb;
                }
                true
            } else {
                false
            }
        });

        if !updated {
            log::debug!("telemetry from unknown fog {}", peer.ip());
        }

        Vec::new()
    }
}
