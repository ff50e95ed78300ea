use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use fdk_controller::admission::{AdmissionController, AllocationRequest};
use fdk_controller::bandwidth::BandwidthEngine;
use fdk_controller::config::Config;
use fdk_controller::dataplane::model::{FlowEntry, PortCounters, QosEntryConfig, QueueConfig, TerminationPointConfig};
use fdk_controller::dataplane::{InventoryPort, SdnClient, TopologySnapshot};
use fdk_controller::error::FdkError;
use fdk_controller::orchestrator::{ContainerOrchestrator, PlacementRequest, PlacementResult};

use fdk_core::node::{EdgeState, FogState, Node, SwitchState};
use fdk_core::topology::{Topology, TopologyKind};

const OVSDB_SWITCH_ID: &str = "ovsdb:1";

/// In-memory SDN controller: mirrors just enough of the RESTCONF config and
/// operational stores for queues, QoS entries and flows to exercise the
/// bandwidth engine's confirm-by-polling loop without a network round trip.
#[derive(Default)]
struct FakeSdn {
    queues: Mutex<HashMap<(String, String), QueueConfig>>,
    qos: Mutex<HashMap<(String, String), QosEntryConfig>>,
    tps: Mutex<HashMap<(String, String), TerminationPointConfig>>,
    flows: Mutex<HashMap<(String, u8, String), FlowEntry>>,
}

#[async_trait]
impl SdnClient for FakeSdn {
    async fn get_topology(&self) -> Result<TopologySnapshot, FdkError> {
        Ok(TopologySnapshot { switches: vec![], links: vec![] })
    }

    async fn get_inventory(&self) -> Result<Vec<InventoryPort>, FdkError> {
        Ok(vec![])
    }

    async fn get_port_counters(&self, _node_id: &str, _port_id: &str) -> Result<PortCounters, FdkError> {
        Ok(PortCounters { tx_bytes: 0, rx_bytes: 0, speed_bps: 1_000_000_000 })
    }

    async fn put_flow(&self, node_id: &str, table: u8, flow_id: &str, flow: &FlowEntry) -> Result<(), FdkError> {
        self.flows.lock().insert((node_id.to_string(), table, flow_id.to_string()), flow.clone());
        Ok(())
    }

    async fn delete_flow(&self, node_id: &str, table: u8, flow_id: &str) -> Result<(), FdkError> {
        self.flows.lock().remove(&(node_id.to_string(), table, flow_id.to_string()));
        Ok(())
    }

    async fn get_flow(&self, node_id: &str, table: u8, flow_id: &str) -> Result<Option<FlowEntry>, FdkError> {
        Ok(self.flows.lock().get(&(node_id.to_string(), table, flow_id.to_string())).cloned())
    }

    async fn put_queue(&self, ovsdb_node_id: &str, queue: &QueueConfig) -> Result<(), FdkError> {
        self.queues.lock().insert((ovsdb_node_id.to_string(), queue.queue_id.clone()), queue.clone());
        Ok(())
    }

    async fn delete_queue(&self, ovsdb_node_id: &str, queue_id: &str) -> Result<(), FdkError> {
        self.queues.lock().remove(&(ovsdb_node_id.to_string(), queue_id.to_string()));
        Ok(())
    }

    async fn get_queue(&self, ovsdb_node_id: &str, queue_id: &str) -> Result<Option<QueueConfig>, FdkError> {
        Ok(self.queues.lock().get(&(ovsdb_node_id.to_string(), queue_id.to_string())).cloned())
    }

    async fn put_qos(&self, ovsdb_node_id: &str, qos: &QosEntryConfig) -> Result<(), FdkError> {
        self.qos.lock().insert((ovsdb_node_id.to_string(), qos.qos_id.clone()), qos.clone());
        Ok(())
    }

    async fn delete_qos(&self, ovsdb_node_id: &str, qos_id: &str) -> Result<(), FdkError> {
        self.qos.lock().remove(&(ovsdb_node_id.to_string(), qos_id.to_string()));
        Ok(())
    }

    async fn get_qos(&self, ovsdb_node_id: &str, qos_id: &str) -> Result<Option<QosEntryConfig>, FdkError> {
        Ok(self.qos.lock().get(&(ovsdb_node_id.to_string(), qos_id.to_string())).cloned())
    }

    async fn put_termination_point(&self, ovsdb_node_id: &str, tp: &TerminationPointConfig) -> Result<(), FdkError> {
        self.tps.lock().insert((ovsdb_node_id.to_string(), tp.tp_id.clone()), tp.clone());
        Ok(())
    }

    async fn get_termination_point_qos(&self, ovsdb_node_id: &str, tp_id: &str) -> Result<Option<String>, FdkError> {
        Ok(self
            .tps
            .lock()
            .get(&(ovsdb_node_id.to_string(), tp_id.to_string()))
            .and_then(|tp| tp.qos_entry.clone()))
    }
}

/// In-memory orchestrator: places a service instantly, no real containers.
#[derive(Default)]
struct FakeOrchestrator {
    next_port: Mutex<u16>,
    services: Mutex<HashMap<String, ()>>,
}

#[async_trait]
impl ContainerOrchestrator for FakeOrchestrator {
    async fn init_cluster(&self) -> Result<String, FdkError> {
        Ok("cluster-1".to_string())
    }

    async fn join_token(&self) -> Result<String, FdkError> {
        Ok("token".to_string())
    }

    async fn list_workers(&self) -> Result<Vec<String>, FdkError> {
        Ok(vec![])
    }

    async fn place_service(&self, _node_id: &str, req: PlacementRequest) -> Result<PlacementResult, FdkError> {
        let mut next = self.next_port.lock();
        if *next == 0 {
            *next = 9000;
        }
        let host_port = *next;
        *next += 1;

        let service_id = format!("svc-{}", req.service_name);
        self.services.lock().insert(service_id.clone(), ());
        Ok(PlacementResult { service_id, host_port })
    }

    async fn inspect_service(&self, service_id: &str) -> Result<bool, FdkError> {
        Ok(self.services.lock().contains_key(service_id))
    }

    async fn remove_service(&self, service_id: &str) -> Result<(), FdkError> {
        self.services.lock().remove(service_id);
        Ok(())
    }

    async fn force_leave(&self, _node_id: &str) -> Result<(), FdkError> {
        Ok(())
    }
}

/// Builds the `E--S--F` topology from spec scenario S1: one edge, one
/// switch with 1 Gb/s ports, one fog, open baseline already reserved, and
/// every switch port carrying the baseline default QoS/queue `init_link_qos`
/// would have installed at discovery time.
async fn single_hop_topology(config: &Config, bandwidth: &BandwidthEngine) -> (Arc<Topology>, Arc<Topology>) {
    let flow = Arc::new(Topology::new("flow:1", TopologyKind::Flow));
    let ovsdb = Arc::new(Topology::new("ovsdb:1", TopologyKind::Ovsdb));

    flow.add_node("host:edge1".into(), Node::Edge(EdgeState { ip: "10.0.0.2".parse().unwrap() }));
    flow.add_node(
        "openflow:1".into(),
        Node::Switch(SwitchState { ovsdb_node_id: Some("ovsdb:1".into()), ..Default::default() }),
    );
    flow.add_node(
        "host:fog1".into(),
        Node::Fog(FogState {
            ip: "10.0.0.3".parse().unwrap(),
            docker_port: 2375,
            cpu_pct_free: 100.0,
            ram_mb_free: 8192,
            disk_mb_free: 10_000,
            cpu_pct_reserved: 0.0,
            ram_mb_reserved: 0,
            cpu_pct_max: 100.0,
            ram_mb_max: 8192,
        }),
    );

    flow.add_link("host:edge1".into(), "openflow:1".into(), "1".into(), "1".into(), 1_000_000_000);
    flow.add_link("openflow:1".into(), "host:fog1".into(), "2".into(), "1".into(), 1_000_000_000);
    flow.add_link_reservation("host:edge1", "1", config.open_link_capacity_bps as i64);
    flow.add_link_reservation("openflow:1", "2", config.open_link_capacity_bps as i64);

    ovsdb.add_node(OVSDB_SWITCH_ID.into(), Node::Switch(SwitchState::default()));
    bandwidth
        .init_link_qos(&ovsdb, OVSDB_SWITCH_ID, "1", "defaultqos1", "default1", 1_000_000_000)
        .await
        .expect("baseline qos on edge-facing port");
    bandwidth
        .init_link_qos(&ovsdb, OVSDB_SWITCH_ID, "2", "defaultqos2", "default2", 1_000_000_000)
        .await
        .expect("baseline qos on fog-facing port");

    (flow, ovsdb)
}

fn harness() -> (Arc<Config>, Arc<FakeSdn>, Arc<FakeOrchestrator>) {
    (Arc::new(Config::default()), Arc::new(FakeSdn::default()), Arc::new(FakeOrchestrator::default()))
}

#[tokio::test]
async fn single_hop_allocation_reserves_bandwidth_on_both_edges() {
    let (config, sdn, orchestrator) = harness();
    let sdn: Arc<dyn SdnClient> = sdn;
    let bandwidth = Arc::new(BandwidthEngine::new(config.clone(), sdn.clone()));
    let (flow_topology, ovsdb_topology) = single_hop_topology(&config, &bandwidth).await;
    let orchestrator: Arc<dyn ContainerOrchestrator> = orchestrator;
    let admission =
        AdmissionController::new(config.clone(), flow_topology.clone(), ovsdb_topology, sdn, bandwidth, orchestrator);

    let resp = admission
        .allocate(AllocationRequest {
            edge_node_id: "host:edge1".into(),
            service_id: "svc-1".into(),
            image: "demo:latest".into(),
            container_port: 8080,
            cpu_pct: 50.0,
            ram_mb: 20,
            bandwidth_bps: 10_000_000,
        })
        .await
        .expect("allocation should succeed");

    assert_eq!(resp.fog_ip, "10.0.0.3".parse().unwrap());
    assert_eq!(admission.reservation_count(), 1);

    let reserved_of = |src: &str, dst: &str| {
        flow_topology.with_lock(|g| g.edges_from(src).into_iter().find(|e| e.dst == dst).map(|e| e.bps_reserved))
    };

    // Every directed edge of the path is bumped, not just the switch-to-fog
    // hop: the two links that already carried the open-link baseline keep
    // it on top of the new reservation, the two that didn't start at just
    // the new reservation.
    assert_eq!(reserved_of("host:edge1", "openflow:1"), Some(100_000_000 + 10_000_000));
    assert_eq!(reserved_of("openflow:1", "host:edge1"), Some(10_000_000));
    assert_eq!(reserved_of("openflow:1", "host:fog1"), Some(100_000_000 + 10_000_000));
    assert_eq!(reserved_of("host:fog1", "openflow:1"), Some(10_000_000));
}

#[tokio::test]
async fn compute_denial_leaves_no_data_plane_state() {
    let (config, sdn, orchestrator) = harness();
    let sdn: Arc<dyn SdnClient> = sdn;
    let bandwidth = Arc::new(BandwidthEngine::new(config.clone(), sdn.clone()));
    let (flow_topology, ovsdb_topology) = single_hop_topology(&config, &bandwidth).await;
    let orchestrator: Arc<dyn ContainerOrchestrator> = orchestrator;
    let admission = AdmissionController::new(config, flow_topology, ovsdb_topology, sdn, bandwidth, orchestrator);

    let err = admission
        .allocate(AllocationRequest {
            edge_node_id: "host:edge1".into(),
            service_id: "svc-2".into(),
            image: "demo:latest".into(),
            container_port: 8080,
            cpu_pct: 150.0,
            ram_mb: 20,
            bandwidth_bps: 10_000_000,
        })
        .await
        .expect_err("150% cpu should never be satisfiable");

    assert!(matches!(err, FdkError::AdmissionDenied(_)));
    assert_eq!(admission.reservation_count(), 0);
}

#[tokio::test]
async fn bandwidth_denial_leaves_no_data_plane_state() {
    let (config, sdn, orchestrator) = harness();
    let sdn: Arc<dyn SdnClient> = sdn;
    let bandwidth = Arc::new(BandwidthEngine::new(config.clone(), sdn.clone()));
    let (flow_topology, ovsdb_topology) = single_hop_topology(&config, &bandwidth).await;

    // Saturate the only path so only 5 Mb/s of residual bandwidth remains.
    flow_topology.set_link_reservation("openflow:1", "2", 995_000_000);

    let orchestrator: Arc<dyn ContainerOrchestrator> = orchestrator;
    let admission = AdmissionController::new(config, flow_topology, ovsdb_topology, sdn, bandwidth, orchestrator);

    let err = admission
        .allocate(AllocationRequest {
            edge_node_id: "host:edge1".into(),
            service_id: "svc-3".into(),
            image: "demo:latest".into(),
            container_port: 8080,
            cpu_pct: 10.0,
            ram_mb: 20,
            bandwidth_bps: 10_000_000,
        })
        .await
        .expect_err("residual bandwidth is below the request");

    assert!(matches!(err, FdkError::AdmissionDenied(_)));
    assert_eq!(admission.reservation_count(), 0);
}

#[tokio::test]
async fn shutdown_round_trip_restores_reservation_counters_and_is_idempotent() {
    let (config, sdn, orchestrator) = harness();
    let sdn: Arc<dyn SdnClient> = sdn;
    let bandwidth = Arc::new(BandwidthEngine::new(config.clone(), sdn.clone()));
    let (flow_topology, ovsdb_topology) = single_hop_topology(&config, &bandwidth).await;
    let orchestrator: Arc<dyn ContainerOrchestrator> = orchestrator;
    let admission =
        AdmissionController::new(config, flow_topology.clone(), ovsdb_topology, sdn, bandwidth, orchestrator);

    let resp = admission
        .allocate(AllocationRequest {
            edge_node_id: "host:edge1".into(),
            service_id: "svc-4".into(),
            image: "demo:latest".into(),
            container_port: 8080,
            cpu_pct: 50.0,
            ram_mb: 20,
            bandwidth_bps: 10_000_000,
        })
        .await
        .unwrap();

    let key = fdk_core::reservation::ReservationKey {
        edge_node_id: "host:edge1".into(),
        fog_node_id: "host:fog1".into(),
        fog_service_port: resp.fog_port,
    };

    admission.deallocate(&key).await.expect("first shutdown tears everything down");
    assert_eq!(admission.reservation_count(), 0);

    let reserved_of = |src: &str, dst: &str| {
        flow_topology.with_lock(|g| g.edges_from(src).into_iter().find(|e| e.dst == dst).map(|e| e.bps_reserved))
    };

    assert_eq!(reserved_of("host:edge1", "openflow:1"), Some(100_000_000), "releases to open-link baseline");
    assert_eq!(reserved_of("openflow:1", "host:edge1"), Some(0));
    assert_eq!(reserved_of("openflow:1", "host:fog1"), Some(100_000_000), "releases to open-link baseline");
    assert_eq!(reserved_of("host:fog1", "openflow:1"), Some(0));

    admission.deallocate(&key).await.expect("second shutdown for the same key is a no-op");
}

#[tokio::test]
async fn drain_all_tears_down_every_active_reservation() {
    let (config, sdn, orchestrator) = harness();
    let sdn: Arc<dyn SdnClient> = sdn;
    let bandwidth = Arc::new(BandwidthEngine::new(config.clone(), sdn.clone()));
    let (flow_topology, ovsdb_topology) = single_hop_topology(&config, &bandwidth).await;
    let orchestrator: Arc<dyn ContainerOrchestrator> = orchestrator;
    let admission =
        AdmissionController::new(config, flow_topology.clone(), ovsdb_topology, sdn, bandwidth, orchestrator);

    admission
        .allocate(AllocationRequest {
            edge_node_id: "host:edge1".into(),
            service_id: "svc-5".into(),
            image: "demo:latest".into(),
            container_port: 8080,
            cpu_pct: 10.0,
            ram_mb: 20,
            bandwidth_bps: 10_000_000,
        })
        .await
        .unwrap();

    assert_eq!(admission.reservation_count(), 1);
    admission.drain_all().await;
    assert_eq!(admission.reservation_count(), 0, "shutdown drains every active reservation");

    let reserved_of = |src: &str, dst: &str| {
        flow_topology.with_lock(|g| g.edges_from(src).into_iter().find(|e| e.dst == dst).map(|e| e.bps_reserved))
    };
    assert_eq!(reserved_of("host:edge1", "openflow:1"), Some(100_000_000), "releases to open-link baseline");
}
