pub mod admission;
pub mod bandwidth;
pub mod config;
pub mod dataplane;
pub mod error;
pub mod flow;
pub mod orchestrator;
pub mod poller;
pub mod server;

use std::sync::Arc;

use fdk_core::topology::{Topology, TopologyKind};
use tokio::net::TcpListener;

use admission::AdmissionController;
use bandwidth::BandwidthEngine;
use config::Config;
use dataplane::HttpSdnClient;
use orchestrator::DockerSwarmOrchestrator;
use server::allocation::AllocationHandler;
use server::greeting::{DeferredGreetings, GreetingHandler};
use server::shutdown::ShutdownHandler;
use server::telemetry::TelemetryHandler;

/// Wire up every component and run until `shutdown` resolves. Analogous to
/// the turn server's `server_main`, but with four listeners and three
/// pollers instead of one relay loop.
pub async fn run(config: Arc<Config>, shutdown: impl std::future::Future<Output = ()>) -> anyhow::Result<()> {
    let flow_topology = Arc::new(Topology::new("flow:1", TopologyKind::Flow));
    let ovsdb_topology = Arc::new(Topology::new("ovsdb:1", TopologyKind::Ovsdb));

    let sdn: Arc<dyn dataplane::SdnClient> = Arc::new(HttpSdnClient::new(config.clone()));
    let orchestrator: Arc<dyn orchestrator::ContainerOrchestrator> =
        Arc::new(DockerSwarmOrchestrator::new(config.clone()));
    let bandwidth = Arc::new(BandwidthEngine::new(config.clone(), sdn.clone()));
    let deferred = Arc::new(DeferredGreetings::default());

    let admission = Arc::new(AdmissionController::new(
        config.clone(),
        flow_topology.clone(),
        ovsdb_topology.clone(),
        sdn.clone(),
        bandwidth.clone(),
        orchestrator.clone(),
    ));

    orchestrator.init_cluster().await.ok();

    let greeting_handler = Arc::new(GreetingHandler::new(flow_topology.clone(), orchestrator.clone(), deferred.clone()));
    let allocation_handler = Arc::new(AllocationHandler::new(admission.clone()));
    let shutdown_handler = Arc::new(ShutdownHandler::new(admission.clone()));
    let telemetry_handler = Arc::new(TelemetryHandler::new(flow_topology.clone()));

    let greeting_listener = TcpListener::bind(config.servers.greeting).await?;
    let allocation_listener = TcpListener::bind(config.servers.allocation).await?;
    let shutdown_listener = TcpListener::bind(config.servers.shutdown).await?;

    let mut tasks = vec![
        tokio::spawn(server::serve("greeting", greeting_listener, Arc::new(move |body, _peer| {
            let h = greeting_handler.clone();
            async move { h.handle(body).await }
        }))),
        tokio::spawn(server::serve("allocation", allocation_listener, Arc::new(move |body, _peer| {
            let h = allocation_handler.clone();
            async move { h.handle(body).await }
        }))),
        tokio::spawn(server::serve("shutdown", shutdown_listener, Arc::new(move |body, _peer| {
            let h = shutdown_handler.clone();
            async move { h.handle(body).await }
        }))),
    ];

    if config.servers.telemetry_enabled {
        let telemetry_listener = TcpListener::bind(config.servers.telemetry).await?;
        tasks.push(tokio::spawn(server::serve("telemetry", telemetry_listener, Arc::new(move |body, peer| {
            let h = telemetry_handler.clone();
            async move { h.handle(body, peer).await }
        }))));
    }

    tasks.push(tokio::spawn(poller::topology_refresh::run(
        sdn.clone(),
        flow_topology.clone(),
        ovsdb_topology.clone(),
        bandwidth.clone(),
        config.clone(),
        std::time::Duration::from_millis(config.pollers.topology_refresh_ms),
    )));
    tasks.push(tokio::spawn(poller::link_utilization::run(
        sdn.clone(),
        flow_topology.clone(),
        std::time::Duration::from_millis(config.pollers.link_utilization_ms),
    )));
    tasks.push(tokio::spawn(poller::deferred_greeting::run(
        deferred.clone(),
        flow_topology.clone(),
        orchestrator.clone(),
        std::time::Duration::from_millis(config.pollers.deferred_greeting_ms),
    )));

    shutdown.await;
    log::info!("shutdown signal received, draining active reservations");

    for task in &tasks {
        task.abort();
    }

    log::info!("draining {} active reservations", admission.reservation_count());
    admission.drain_all().await;

    if let Err(e) = orchestrator.force_leave("self").await {
        log::warn!("force-leave on shutdown failed: {}", e);
    }

    bandwidth.shutdown_all(&ovsdb_topology, &flow_topology).await;
    Ok(())
}
