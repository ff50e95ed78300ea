//! Admission controller (spec.md §4.6): the
//! `Parse -> CheckCompute -> SelectPath -> Reserve -> LaunchContainer -> Respond`
//! state machine, serialized per topology by the topology's own mutex.
//!
//! Grounded on `manager.py`'s allocation handler for the sequencing, and on
//! the turn server's `api/hooks.rs` for the pattern of a single coordinating
//! type that owns the fallible multi-step side effect and rolls back what it
//! already did on failure.

use std::sync::Arc;

use fdk_core::node::{Node, NodeId};
use fdk_core::path::{select_fog, shortest_paths, FogSelectionError};
use fdk_core::reservation::{HopRecord, ReservationKey, ReservationRecord, ReservationTable};
use fdk_core::topology::Topology;
use parking_lot::Mutex;

use crate::bandwidth::BandwidthEngine;
use crate::config::Config;
use crate::dataplane::{confirm, SdnClient};
use crate::error::FdkError;
use crate::flow;
use crate::orchestrator::{ContainerOrchestrator, PlacementRequest};

#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub edge_node_id: NodeId,
    pub service_id: String,
    pub image: String,
    pub container_port: u16,
    pub cpu_pct: f64,
    pub ram_mb: u64,
    pub bandwidth_bps: u64,
}

#[derive(Debug, Clone)]
pub struct AllocationResponse {
    pub fog_node_id: NodeId,
    pub fog_ip: std::net::IpAddr,
    pub fog_port: u16,
}

pub struct AdmissionController {
    config: Arc<Config>,
    flow_topology: Arc<Topology>,
    ovsdb_topology: Arc<Topology>,
    sdn: Arc<dyn SdnClient>,
    bandwidth: Arc<BandwidthEngine>,
    orchestrator: Arc<dyn ContainerOrchestrator>,
    reservations: Mutex<ReservationTable>,
}

impl AdmissionController {
    pub fn new(
        config: Arc<Config>,
        flow_topology: Arc<Topology>,
        ovsdb_topology: Arc<Topology>,
        sdn: Arc<dyn SdnClient>,
        bandwidth: Arc<BandwidthEngine>,
        orchestrator: Arc<dyn ContainerOrchestrator>,
    ) -> Self {
        Self {
            config,
            flow_topology,
            ovsdb_topology,
            sdn,
            bandwidth,
            orchestrator,
            reservations: Mutex::new(ReservationTable::default()),
        }
    }

    /// Run the full allocation state machine for one request. No data-plane
    /// or reservation state is mutated if `CheckCompute` or `SelectPath`
    /// reject the request (spec.md §4.6, §8).
    pub async fn allocate(&self, req: AllocationRequest) -> Result<AllocationResponse, FdkError> {
        let edge_ip = self.flow_topology.with_lock(|g| {
            g.node(&req.edge_node_id)
                .and_then(|n| n.as_edge())
                .map(|e| e.ip)
        });
        let edge_ip = edge_ip.ok_or_else(|| {
            FdkError::AdmissionDenied(format!("{} is not a known edge node", req.edge_node_id))
        })?;

        let paths = self.flow_topology.with_lock(|g| {
            let edges: Vec<_> = g.edges_from(&req.edge_node_id).into_iter().cloned().collect();
            shortest_paths(&edges, &req.edge_node_id, req.bandwidth_bps)
        });

        let fog_id = self.flow_topology.with_lock(|g| {
            let fogs: Vec<(NodeId, fdk_core::node::FogState)> = g
                .all_nodes()
                .filter_map(|(id, n)| n.as_fog().map(|f| (id.clone(), f.clone())))
                .collect();
            select_fog(fogs.iter().map(|(id, f)| (id, f)), &paths, req.cpu_pct, req.ram_mb)
        });

        let fog_id = fog_id.map_err(|e| match e {
            FogSelectionError::NoCompute => {
                FdkError::AdmissionDenied("No fog nodes can satisfy the request.".to_string())
            }
            FogSelectionError::NoNetwork => {
                FdkError::AdmissionDenied("Insufficient network bandwidth.".to_string())
            }
        })?;

        let path = self
            .flow_topology
            .with_lock(|g| {
                let edges: Vec<_> = g.edges_from(&req.edge_node_id).into_iter().cloned().collect();
                shortest_paths(&edges, &req.edge_node_id, req.bandwidth_bps).path_to(&req.edge_node_id, &fog_id)
            })
            .ok_or_else(|| FdkError::AdmissionDenied("path vanished between selection and commit".to_string()))?;

        let fog_ip = self
            .flow_topology
            .with_lock(|g| g.node(&fog_id).and_then(|n| n.as_fog()).map(|f| (f.ip, f.docker_port)));
        let (fog_ip, _docker_port) = fog_ip.ok_or_else(|| FdkError::Fatal(format!("{} vanished", fog_id)))?;

        // Reserve compute before network so a compute rollback never has to
        // unwind network state that outlives it.
        self.flow_topology.with_lock(|g| {
            if let Some(fog) = g.node_mut(&fog_id).and_then(|n| n.as_fog_mut()) {
                fog.reserve(req.cpu_pct, req.ram_mb);
            }
        });

        match self.reserve_path_and_launch(&req, &path, edge_ip, fog_ip, &fog_id).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                self.flow_topology.with_lock(|g| {
                    if let Some(fog) = g.node_mut(&fog_id).and_then(|n| n.as_fog_mut()) {
                        fog.release(req.cpu_pct, req.ram_mb);
                    }
                });
                Err(e)
            }
        }
    }

    async fn reserve_path_and_launch(
        &self,
        req: &AllocationRequest,
        path: &[NodeId],
        edge_ip: std::net::IpAddr,
        fog_ip: std::net::IpAddr,
        fog_id: &NodeId,
    ) -> Result<AllocationResponse, FdkError> {
        // Port each node in the path uses to reach its neighbor on either
        // side, so a switch hop can find both its in-port (facing the
        // previous node) and out-port (facing the next) without a second
        // topology walk.
        let link_ports: Vec<(String, String)> = self.flow_topology.with_lock(|g| {
            path.windows(2)
                .map(|w| {
                    let fwd = g.edges_from(&w[0]).into_iter().find(|e| &e.dst == &w[1]).map(|e| e.src_port.clone());
                    let rev = g.edges_from(&w[1]).into_iter().find(|e| &e.dst == &w[0]).map(|e| e.src_port.clone());
                    (fwd.unwrap_or_default(), rev.unwrap_or_default())
                })
                .collect()
        });

        let mut hops = Vec::new();
        let mut link_reservations: Vec<(NodeId, String)> = Vec::new();

        for (i, window) in path.windows(2).enumerate() {
            let (u, v) = (&window[0], &window[1]);
            let (port_u_to_v, port_v_to_u) = &link_ports[i];

            if self.flow_topology.with_lock(|g| g.node(u).map(Node::is_switch).unwrap_or(false)) {
                let in_port = if i == 0 { None } else { Some(link_ports[i - 1].1.clone()) };
                let in_port = match in_port {
                    Some(p) => p,
                    None => {
                        self.rollback_hops(&hops).await;
                        self.release_link_reservations(&link_reservations, req.bandwidth_bps);
                        return Err(FdkError::Fatal(format!("switch {} has no upstream hop in path", u)));
                    }
                };

                match self.reserve_hop(req, u, &in_port, port_u_to_v, edge_ip, fog_ip).await {
                    Ok(hop) => hops.push(hop),
                    Err(e) => {
                        self.rollback_hops(&hops).await;
                        self.release_link_reservations(&link_reservations, req.bandwidth_bps);
                        return Err(e);
                    }
                }
            }

            self.flow_topology.add_link_reservation(u, port_u_to_v, req.bandwidth_bps as i64);
            self.flow_topology.add_link_reservation(v, port_v_to_u, req.bandwidth_bps as i64);
            link_reservations.push((u.clone(), port_u_to_v.clone()));
            link_reservations.push((v.clone(), port_v_to_u.clone()));
        }

        let placement = match self
            .orchestrator
            .place_service(
                fog_id,
                PlacementRequest {
                    service_name: req.service_id.clone(),
                    image: req.image.clone(),
                    cpu_nanos: (req.cpu_pct * 1_000_000_000.0 / 100.0) as u64,
                    mem_bytes: req.ram_mb * 1_000_000,
                    container_port: req.container_port,
                },
            )
            .await
        {
            Ok(p) => p,
            Err(e) => {
                self.rollback_hops(&hops).await;
                self.release_link_reservations(&link_reservations, req.bandwidth_bps);
                return Err(e);
            }
        };

        let key = ReservationKey {
            edge_node_id: req.edge_node_id.clone(),
            fog_node_id: fog_id.clone(),
            fog_service_port: placement.host_port,
        };

        self.reservations.lock().insert(ReservationRecord {
            key,
            edge_ip,
            fog_ip,
            cpu_pct: req.cpu_pct,
            ram_mb: req.ram_mb,
            bandwidth_bps: req.bandwidth_bps,
            hops,
            link_reservations,
            service_id: placement.service_id,
        });

        Ok(AllocationResponse { fog_node_id: fog_id.clone(), fog_ip, fog_port: placement.host_port })
    }

    fn release_link_reservations(&self, link_reservations: &[(NodeId, String)], bandwidth_bps: u64) {
        for (node, port) in link_reservations {
            self.flow_topology.add_link_reservation(node, port, -(bandwidth_bps as i64));
        }
    }

    /// Reserve bandwidth and install flows on a single switch hop. A queue
    /// sized to the reservation is created once on the switch and attached
    /// into both of the hop's pre-existing per-port default QoS entries
    /// (`in_port`'s and `out_port`'s), never into a QoS created for this
    /// reservation: a port holds exactly one QoS at all times, installed by
    /// the topology poller at discovery time (spec.md §4.4, §4.6 step 2).
    /// Both directions of traffic (edge-to-fog and fog-to-edge, TCP and UDP)
    /// get their own enqueue flow (spec.md §4.3).
    async fn reserve_hop(
        &self,
        req: &AllocationRequest,
        switch_id: &NodeId,
        in_port: &str,
        out_port: &str,
        edge_ip: std::net::IpAddr,
        fog_ip: std::net::IpAddr,
    ) -> Result<HopRecord, FdkError> {
        let ovsdb_id = self.flow_topology.with_lock(|g| {
            g.node(switch_id)
                .and_then(|n| n.as_switch())
                .and_then(|s| s.ovsdb_node_id.clone())
        });
        let ovsdb_id = ovsdb_id.ok_or_else(|| FdkError::Fatal(format!("{} has no ovsdb mapping", switch_id)))?;

        let (in_qos_id, out_qos_id) = self.ovsdb_topology.with_lock(|g| {
            let sw = g.node(&ovsdb_id).and_then(|n| n.as_switch());
            (
                sw.and_then(|s| s.port_qos.get(in_port).cloned()),
                sw.and_then(|s| s.port_qos.get(out_port).cloned()),
            )
        });
        let in_qos_id = in_qos_id
            .ok_or_else(|| FdkError::Fatal(format!("port {} on {} has no default qos", in_port, ovsdb_id)))?;
        let out_qos_id = out_qos_id
            .ok_or_else(|| FdkError::Fatal(format!("port {} on {} has no default qos", out_port, ovsdb_id)))?;

        let queue_id = format!("{}-{}-q", req.service_id, switch_id);
        self.bandwidth
            .create_queue(&self.ovsdb_topology, &ovsdb_id, &queue_id, req.bandwidth_bps)
            .await?;

        let out_queue_number = match self
            .bandwidth
            .add_qos_queue(&self.ovsdb_topology, &ovsdb_id, &out_qos_id, &queue_id)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                self.bandwidth.delete_queue(&self.ovsdb_topology, &ovsdb_id, &queue_id).await.ok();
                return Err(e);
            }
        };
        let in_queue_number = match self
            .bandwidth
            .add_qos_queue(&self.ovsdb_topology, &ovsdb_id, &in_qos_id, &queue_id)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                self.bandwidth.remove_qos_queue(&self.ovsdb_topology, &ovsdb_id, &out_qos_id, &queue_id).await.ok();
                self.bandwidth.delete_queue(&self.ovsdb_topology, &ovsdb_id, &queue_id).await.ok();
                return Err(e);
            }
        };

        let fwd_prefix = format!("{}-{}-fwd", req.service_id, switch_id);
        let rev_prefix = format!("{}-{}-rev", req.service_id, switch_id);
        let mut flows = flow::enqueue_flows(
            &fwd_prefix,
            in_port,
            out_port,
            &edge_ip.to_string(),
            &fog_ip.to_string(),
            req.container_port,
            out_queue_number,
        );
        flows.extend(flow::reverse_enqueue_flows(
            &rev_prefix,
            out_port,
            in_port,
            &fog_ip.to_string(),
            req.container_port,
            &edge_ip.to_string(),
            in_queue_number,
        ));

        let mut installed_flow_ids = Vec::new();
        for entry in &flows {
            if let Err(e) = self.install_flow(switch_id, entry).await {
                let partial = HopRecord {
                    node_id: switch_id.clone(),
                    in_port: in_port.to_string(),
                    out_port: out_port.to_string(),
                    queue_id,
                    in_qos_id,
                    out_qos_id,
                    flow_ids: installed_flow_ids,
                };
                if let Err(teardown_err) = self.teardown_hop(&partial).await {
                    log::warn!("cleanup after failed flow install on {} left data-plane state behind: {}", switch_id, teardown_err);
                }
                return Err(e);
            }
            installed_flow_ids.push(entry.id.clone());
        }

        Ok(HopRecord {
            node_id: switch_id.clone(),
            in_port: in_port.to_string(),
            out_port: out_port.to_string(),
            queue_id,
            in_qos_id,
            out_qos_id,
            flow_ids: installed_flow_ids,
        })
    }

    async fn install_flow(&self, switch_id: &str, entry: &crate::dataplane::model::FlowEntry) -> Result<(), FdkError> {
        self.sdn.put_flow(switch_id, entry.table_id, &entry.id, entry).await?;
        confirm(&self.config, &format!("flow {} on {}", entry.id, switch_id), || async {
            Ok(self.sdn.get_flow(switch_id, entry.table_id, &entry.id).await?.is_some())
        })
        .await
    }

    async fn rollback_hops(&self, hops: &[HopRecord]) {
        for hop in hops {
            if let Err(e) = self.teardown_hop(hop).await {
                log::warn!("rollback of hop on {} left data-plane state behind: {}", hop.node_id, e);
            }
        }
    }

    async fn teardown_hop(&self, hop: &HopRecord) -> Result<(), FdkError> {
        let ovsdb_id = self.flow_topology.with_lock(|g| {
            g.node(&hop.node_id)
                .and_then(|n| n.as_switch())
                .and_then(|s| s.ovsdb_node_id.clone())
        });
        let ovsdb_id = match ovsdb_id {
            Some(id) => id,
            None => return Ok(()),
        };

        for flow_id in &hop.flow_ids {
            self.sdn.delete_flow(&hop.node_id, flow::ENQUEUE_FLOW_TABLE, flow_id).await?;
            confirm(&self.config, &format!("flow {} on {} deleted", flow_id, hop.node_id), || async {
                Ok(self.sdn.get_flow(&hop.node_id, flow::ENQUEUE_FLOW_TABLE, flow_id).await?.is_none())
            })
            .await?;
        }

        // The per-port default QoS entries stay attached and in place; only
        // the per-reservation queue membership within them is undone.
        self.bandwidth.remove_qos_queue(&self.ovsdb_topology, &ovsdb_id, &hop.in_qos_id, &hop.queue_id).await?;
        self.bandwidth.remove_qos_queue(&self.ovsdb_topology, &ovsdb_id, &hop.out_qos_id, &hop.queue_id).await?;
        self.bandwidth.delete_queue(&self.ovsdb_topology, &ovsdb_id, &hop.queue_id).await?;
        Ok(())
    }

    /// Release a previously allocated reservation. Replays the recorded
    /// hops and link reservations rather than re-running path discovery:
    /// the path that was actually reserved is the only one that needs
    /// tearing down, even if the topology has since changed.
    pub async fn deallocate(&self, key: &ReservationKey) -> Result<(), FdkError> {
        let record = match self.reservations.lock().remove(key) {
            Some(r) => r,
            None => return Ok(()),
        };

        for hop in &record.hops {
            self.teardown_hop(hop).await?;
        }
        self.release_link_reservations(&record.link_reservations, record.bandwidth_bps);

        self.orchestrator.remove_service(&record.service_id).await?;

        self.flow_topology.with_lock(|g| {
            if let Some(fog) = g.node_mut(&key.fog_node_id).and_then(|n| n.as_fog_mut()) {
                fog.release(record.cpu_pct, record.ram_mb);
            }
        });

        Ok(())
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.lock().len()
    }

    /// Deallocate every reservation still on the books. Run once at shutdown
    /// (spec.md §5: "every active allocation is drained to deallocation")
    /// before the bandwidth engine tears down the per-port baseline QoS that
    /// each reservation's queue was spliced into.
    pub async fn drain_all(&self) {
        let keys = self.reservations.lock().keys();
        for key in &keys {
            if let Err(e) = self.deallocate(key).await {
                log::warn!("shutdown: failed to drain reservation {:?}: {}", key, e);
            }
        }
    }
}
