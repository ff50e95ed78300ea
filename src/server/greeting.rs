//! Greeting server (spec.md §4.8, §6, port 65433).
//!
//! Promotes a generic node to Fog or Edge on its first greeting, joins the
//! orchestrator's cluster if it's a fog host, and records its resource
//! maxima. ACKs with a single space only when all three steps completed;
//! otherwise the greeting is parked for the deferred-greeting poller to
//! retry once the node is known to the topology.

use std::net::IpAddr;
use std::sync::Arc;

use fdk_core::node::{EdgeState, FogState, Node};
use fdk_core::topology::Topology;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::orchestrator::ContainerOrchestrator;

#[derive(Debug, Deserialize)]
enum HostType {
    Fog,
    Edge,
}

#[derive(Debug, Deserialize)]
struct GreetingRequest {
    node_id: String,
    host_type: HostType,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    docker_port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct ParkedGreeting {
    pub node_id: String,
    pub is_fog: bool,
    pub ip: IpAddr,
    pub docker_port: u16,
}

/// Greetings whose node-id the topology doesn't know about yet. Drained by
/// the deferred-greeting poller (spec.md §8, scenario S6).
#[derive(Default)]
pub struct DeferredGreetings {
    parked: Mutex<Vec<ParkedGreeting>>,
}

impl DeferredGreetings {
    pub fn park(&self, greeting: ParkedGreeting) {
        self.parked.lock().push(greeting);
    }

    pub fn drain_ready(&self, known_ids: &[String]) -> Vec<ParkedGreeting> {
        let mut parked = self.parked.lock();
        let (ready, still_parked): (Vec<_>, Vec<_>) =
            parked.drain(..).partition(|g| known_ids.contains(&g.node_id));
        *parked = still_parked;
        ready
    }
}

pub struct GreetingHandler {
    flow_topology: Arc<Topology>,
    orchestrator: Arc<dyn ContainerOrchestrator>,
    deferred: Arc<DeferredGreetings>,
}

impl GreetingHandler {
    pub fn new(
        flow_topology: Arc<Topology>,
        orchestrator: Arc<dyn ContainerOrchestrator>,
        deferred: Arc<DeferredGreetings>,
    ) -> Self {
        Self { flow_topology, orchestrator, deferred }
    }

    pub async fn handle(&self, body: Vec<u8>) -> Vec<u8> {
        let req: GreetingRequest = match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("greeting decode error: {}", e);
                return Vec::new();
            }
        };

        let known = self.flow_topology.node_ids().contains(&req.node_id);
        if !known {
            log::info!("parking greeting from unknown node {}", req.node_id);
            self.deferred.park(ParkedGreeting {
                node_id: req.node_id,
                is_fog: matches!(req.host_type, HostType::Fog),
                ip: req.hostname.as_deref().and_then(|h| h.parse().ok()).unwrap_or(IpAddr::from([0, 0, 0, 0])),
                docker_port: req.docker_port.unwrap_or(2375),
            });
            return Vec::new();
        }

        match self.apply(&req).await {
            Ok(()) => b" ".to_vec(),
            Err(e) => {
                log::warn!("greeting from {} failed: {}", req.node_id, e);
                Vec::new()
            }
        }
    }

    async fn apply(&self, req: &GreetingRequest) -> anyhow::Result<()> {
        let ip: IpAddr = req
            .hostname
            .as_deref()
            .and_then(|h| h.parse().ok())
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));

        let node = match req.host_type {
            HostType::Edge => Node::Edge(EdgeState { ip }),
            HostType::Fog => {
                self.orchestrator.join_token().await?;
                Node::Fog(FogState {
                    ip,
                    docker_port: req.docker_port.unwrap_or(2375),
                    cpu_pct_free: 100.0,
                    ram_mb_free: 0,
                    disk_mb_free: 0,
                    cpu_pct_reserved: 0.0,
                    ram_mb_reserved: 0,
                    cpu_pct_max: 100.0,
                    ram_mb_max: 0,
                })
            }
        };

        self.flow_topology.with_lock(|g| {
            g.promote(&req.node_id, node);
        });

        Ok(())
    }
}
