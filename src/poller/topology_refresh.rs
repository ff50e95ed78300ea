//! Topology refresh poller (spec.md §4.9).
//!
//! Re-reads the controller's flow topology and inventory, inserts any new
//! switches/links, and records the port-name/OF-id and OF-id/OVSDB-id
//! mappings new switches need before the bandwidth engine can address them.
//! Idempotent and additive only: a switch or link that disappears from the
//! controller's view is left in the local topology, matching
//! `topology_manager.py`'s behavior of never removing nodes on refresh.

use std::sync::Arc;

use fdk_core::node::{Node, PortConfig, SwitchState};
use fdk_core::topology::Topology;

use crate::bandwidth::BandwidthEngine;
use crate::dataplane::{confirm, SdnClient};
use crate::error::FdkError;
use crate::flow;

/// `openflow:<n>` switches have a 1:1 OVSDB-side counterpart addressed as
/// `ovsdb:<n>` (`topology_manager.py`'s `ofid_to_ovsdbid` table, simplified
/// here to a deterministic rewrite since this deployment's controller keeps
/// the two ids in lockstep).
fn ovsdb_id_for(openflow_id: &str) -> String {
    openflow_id.replacen("openflow:", "ovsdb:", 1)
}

pub async fn tick(
    sdn: &dyn SdnClient,
    flow_topology: &Topology,
    ovsdb_topology: &Topology,
    bandwidth: &BandwidthEngine,
    config: &crate::config::Config,
) -> bool {
    let topo = match sdn.get_topology().await {
        Ok(t) => t,
        Err(e) => {
            log::warn!("topology refresh: failed to read topology: {}", e);
            return true;
        }
    };

    let inventory = match sdn.get_inventory().await {
        Ok(i) => i,
        Err(e) => {
            log::warn!("topology refresh: failed to read inventory: {}", e);
            return true;
        }
    };

    let mut newly_discovered_switches = Vec::new();
    let mut newly_discovered_ports = Vec::new();

    flow_topology.with_lock(|g| {
        for switch_id in &topo.switches {
            if g.node(switch_id).is_none() {
                g.add_node(switch_id.clone(), Node::Switch(SwitchState {
                    ovsdb_node_id: Some(ovsdb_id_for(switch_id)),
                    ..Default::default()
                }));
                newly_discovered_switches.push(switch_id.clone());
            }

            if let Some(sw) = g.node_mut(switch_id).and_then(|n| n.as_switch_mut()) {
                if sw.ovsdb_node_id.is_none() {
                    sw.ovsdb_node_id = Some(ovsdb_id_for(switch_id));
                }
            }
        }

        for port in &inventory {
            if let Some(sw) = g.node_mut(&port.node_id).and_then(|n| n.as_switch_mut()) {
                if !sw.ports.contains_key(&port.port_id) {
                    newly_discovered_ports.push((port.node_id.clone(), port.port_id.clone(), port.speed_bps));
                }
                sw.ports.insert(
                    port.port_id.clone(),
                    PortConfig { name: port.name.clone(), of_port: port.of_port, speed_bps: port.speed_bps },
                );
            }
        }

        for link in &topo.links {
            // Capacity starts at the reported port speed; the link-utilization
            // poller is authoritative for it afterward (spec.md §4.9).
            let capacity = inventory
                .iter()
                .find(|p| p.node_id == link.src_node && p.port_id == link.src_port)
                .map(|p| p.speed_bps)
                .unwrap_or(0);

            g.add_link(link.src_node.clone(), link.dst_node.clone(), link.src_port.clone(), link.dst_port.clone(), capacity);
        }
    });

    for switch_id in &newly_discovered_switches {
        if let Err(e) = install_controller_copy_flow(sdn, switch_id, config).await {
            log::warn!("topology refresh: failed to install controller-copy flow on {}: {}", switch_id, e);
        }
    }

    for (switch_id, port_id, speed_bps) in &newly_discovered_ports {
        let ovsdb_id = flow_topology.with_lock(|g| {
            g.node(switch_id).and_then(|n| n.as_switch()).and_then(|s| s.ovsdb_node_id.clone())
        });
        let ovsdb_id = match ovsdb_id {
            Some(id) => id,
            None => continue,
        };

        let qos_id = format!("defaultqos-{}-{}", switch_id, port_id);
        let queue_id = format!("default-{}-{}", switch_id, port_id);
        if let Err(e) = bandwidth
            .init_link_qos(ovsdb_topology, &ovsdb_id, port_id, &qos_id, &queue_id, *speed_bps)
            .await
        {
            log::warn!("topology refresh: failed to init baseline qos on {}:{}: {}", switch_id, port_id, e);
            continue;
        }
        flow_topology.set_link_reservation(switch_id, port_id, config.open_link_capacity_bps);
    }

    true
}

async fn install_controller_copy_flow(sdn: &dyn SdnClient, switch_id: &str, config: &crate::config::Config) -> Result<(), FdkError> {
    let entry = flow::controller_copy_flow();
    sdn.put_flow(switch_id, entry.table_id, &entry.id, &entry).await?;
    confirm(config, &format!("controller-copy flow on {}", switch_id), || async {
        Ok(sdn.get_flow(switch_id, entry.table_id, &entry.id).await?.is_some())
    })
    .await
}

pub async fn run(
    sdn: Arc<dyn SdnClient>,
    flow_topology: Arc<Topology>,
    ovsdb_topology: Arc<Topology>,
    bandwidth: Arc<BandwidthEngine>,
    config: Arc<crate::config::Config>,
    interval: std::time::Duration,
) {
    crate::poller::run_loop("topology-refresh", interval, || {
        let sdn = sdn.clone();
        let flow_topology = flow_topology.clone();
        let ovsdb_topology = ovsdb_topology.clone();
        let bandwidth = bandwidth.clone();
        let config = config.clone();
        async move { tick(sdn.as_ref(), &flow_topology, &ovsdb_topology, bandwidth.as_ref(), config.as_ref()).await }
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ovsdb_id_rewrites_openflow_prefix() {
        assert_eq!(ovsdb_id_for("openflow:3"), "ovsdb:3");
    }
}
