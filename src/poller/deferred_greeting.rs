//! Deferred-greeting retry poller (spec.md §4.9, §8 scenario S6).
//!
//! Replays parked greetings once their node-id has shown up in the flow
//! topology (i.e. the topology-refresh poller has observed it). A greeting
//! for a node that's still unknown stays parked for the next tick.

use std::sync::Arc;
use std::time::Duration;

use fdk_core::node::{EdgeState, FogState, Node};
use fdk_core::topology::Topology;

use crate::orchestrator::ContainerOrchestrator;
use crate::server::greeting::DeferredGreetings;

pub async fn tick(
    deferred: &DeferredGreetings,
    flow_topology: &Topology,
    orchestrator: &dyn ContainerOrchestrator,
) -> bool {
    let known_ids = flow_topology.node_ids();
    let ready = deferred.drain_ready(&known_ids);

    for greeting in ready {
        let node = if greeting.is_fog {
            match orchestrator.join_token().await {
                Ok(_) => Node::Fog(FogState {
                    ip: greeting.ip,
                    docker_port: greeting.docker_port,
                    cpu_pct_free: 100.0,
                    ram_mb_free: 0,
                    disk_mb_free: 0,
                    cpu_pct_reserved: 0.0,
                    ram_mb_reserved: 0,
                    cpu_pct_max: 100.0,
                    ram_mb_max: 0,
                }),
                Err(e) => {
                    log::warn!("deferred greeting for {} failed to join orchestrator: {}", greeting.node_id, e);
                    deferred.park(greeting);
                    continue;
                }
            }
        } else {
            Node::Edge(EdgeState { ip: greeting.ip })
        };

        flow_topology.with_lock(|g| {
            g.promote(&greeting.node_id, node);
        });

        log::info!("applied deferred greeting for {}", greeting.node_id);
    }

    true
}

pub async fn run(
    deferred: Arc<DeferredGreetings>,
    flow_topology: Arc<Topology>,
    orchestrator: Arc<dyn ContainerOrchestrator>,
    interval: Duration,
) {
    crate::poller::run_loop("deferred-greeting", interval, || {
        let deferred = deferred.clone();
        let flow_topology = flow_topology.clone();
        let orchestrator = orchestrator.clone();
        async move { tick(deferred.as_ref(), &flow_topology, orchestrator.as_ref()).await }
    })
    .await;
}
