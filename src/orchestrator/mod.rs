//! Container orchestrator adapter (spec.md §4.7).
//!
//! Wraps the local daemon's cluster/service API behind a trait so the
//! admission controller can be tested against an in-memory fake. Per-fog
//! host-mode port allocation reuses the bitmap allocator pattern from
//! `crates/service/src/session/ports.rs`: each fog host gets its own
//! allocator over the configured port range, since host-mode ports are
//! exclusive per physical host, not per controller.

use std::sync::Arc;

use ahash::{HashMap, HashMapExt};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;

use crate::config::Config;
use crate::error::FdkError;

#[derive(Debug, Clone)]
pub struct PlacementRequest {
    pub service_name: String,
    pub image: String,
    pub cpu_nanos: u64,
    pub mem_bytes: u64,
    pub container_port: u16,
}

#[derive(Debug, Clone)]
pub struct PlacementResult {
    pub service_id: String,
    pub host_port: u16,
}

/// Everything the admission controller needs from the orchestrator: join a
/// worker into the swarm, place a service in host mode on a specific node,
/// and tear it back down.
#[async_trait]
pub trait ContainerOrchestrator: Send + Sync {
    async fn init_cluster(&self) -> Result<String, FdkError>;
    async fn join_token(&self) -> Result<String, FdkError>;
    async fn list_workers(&self) -> Result<Vec<String>, FdkError>;

    async fn place_service(&self, node_id: &str, req: PlacementRequest) -> Result<PlacementResult, FdkError>;
    async fn inspect_service(&self, service_id: &str) -> Result<bool, FdkError>;
    async fn remove_service(&self, service_id: &str) -> Result<(), FdkError>;

    async fn force_leave(&self, node_id: &str) -> Result<(), FdkError>;
}

/// Random port allocator over a single node's host-mode port range,
/// collision-checked against the set already in use on that node rather
/// than a bitmap table: the orchestrator, not this process, is the source
/// of truth for what is bound, so this only needs to avoid handing out a
/// port this process itself just allocated.
struct NodePortPool {
    start: u16,
    end: u16,
    in_use: std::collections::HashSet<u16>,
}

impl NodePortPool {
    fn new(start: u16, end: u16) -> Self {
        Self { start, end, in_use: std::collections::HashSet::new() }
    }

    fn alloc(&mut self) -> Option<u16> {
        let span = (self.end - self.start) as usize;
        if self.in_use.len() >= span {
            return None;
        }

        loop {
            let candidate = self.start + rand::rng().random_range(0..span as u16);
            if self.in_use.insert(candidate) {
                return Some(candidate);
            }
        }
    }

    fn release(&mut self, port: u16) {
        self.in_use.remove(&port);
    }
}

/// Adapter over the orchestrator's HTTP API. `reqwest` has no stock support
/// for Unix-domain sockets, so `orchestrator.local_socket` doubles as the
/// base URL of the daemon's TCP-exposed API (e.g. the Docker Engine API
/// bound to a local TCP port) rather than a literal socket path.
pub struct DockerSwarmOrchestrator {
    client: reqwest::Client,
    config: Arc<Config>,
    ports: Mutex<HashMap<String, NodePortPool>>,
}

impl DockerSwarmOrchestrator {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            ports: Mutex::new(HashMap::new()),
        }
    }

    fn socket_url(&self, path: &str) -> String {
        format!("{}{}", self.config.orchestrator.local_socket.trim_end_matches('/'), path)
    }

    fn alloc_port(&self, node_id: &str) -> Option<u16> {
        let mut pools = self.ports.lock();
        pools
            .entry(node_id.to_string())
            .or_insert_with(|| {
                NodePortPool::new(self.config.orchestrator.port_range_start, self.config.orchestrator.port_range_end)
            })
            .alloc()
    }

    fn release_port(&self, node_id: &str, port: u16) {
        if let Some(pool) = self.ports.lock().get_mut(node_id) {
            pool.release(port);
        }
    }
}

#[async_trait]
impl ContainerOrchestrator for DockerSwarmOrchestrator {
    async fn init_cluster(&self) -> Result<String, FdkError> {
        let res = self
            .client
            .post(self.socket_url("/swarm/init"))
            .json(&serde_json::json!({ "ListenAddr": "0.0.0.0:2377" }))
            .send()
            .await
            .map_err(|e| FdkError::Transient(e.to_string()))?;

        res.text().await.map_err(|e| FdkError::Transient(e.to_string()))
    }

    async fn join_token(&self) -> Result<String, FdkError> {
        let res = self
            .client
            .get(self.socket_url("/swarm"))
            .send()
            .await
            .map_err(|e| FdkError::Transient(e.to_string()))?;

        let body: serde_json::Value = res.json().await.map_err(|e| FdkError::Transient(e.to_string()))?;
        body["JoinTokens"]["Worker"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| FdkError::Transient("missing worker join token".to_string()))
    }

    async fn list_workers(&self) -> Result<Vec<String>, FdkError> {
        let res = self
            .client
            .get(self.socket_url("/nodes"))
            .send()
            .await
            .map_err(|e| FdkError::Transient(e.to_string()))?;

        let nodes: Vec<serde_json::Value> = res.json().await.map_err(|e| FdkError::Transient(e.to_string()))?;
        Ok(nodes
            .into_iter()
            .filter_map(|n| n["ID"].as_str().map(str::to_string))
            .collect())
    }

    async fn place_service(&self, node_id: &str, req: PlacementRequest) -> Result<PlacementResult, FdkError> {
        let host_port = self
            .alloc_port(node_id)
            .ok_or_else(|| FdkError::PartialAllocationFault(format!("no free host port on {}", node_id)))?;

        let spec = serde_json::json!({
            "Name": req.service_name,
            "TaskTemplate": {
                "ContainerSpec": {
                    "Image": req.image,
                    "Env": [format!("PORT={}", req.container_port)],
                },
                "Resources": {
                    "Limits": { "NanoCPUs": req.cpu_nanos, "MemoryBytes": req.mem_bytes },
                },
                "Placement": { "Constraints": [format!("node.id=={}", node_id)] },
            },
            "Mode": { "Replicated": { "Replicas": 1 } },
            "EndpointSpec": {
                "Mode": "dnsrr",
                "Ports": [{
                    "Protocol": "tcp",
                    "TargetPort": req.container_port,
                    "PublishedPort": host_port,
                    "PublishMode": "host",
                }],
            },
        });

        let res = self
            .client
            .post(self.socket_url("/services/create"))
            .json(&spec)
            .send()
            .await
            .map_err(|e| {
                self.release_port(node_id, host_port);
                FdkError::Transient(e.to_string())
            })?;

        if !res.status().is_success() {
            self.release_port(node_id, host_port);
            return Err(FdkError::PartialAllocationFault(format!(
                "service create on {} returned {}",
                node_id,
                res.status()
            )));
        }

        let body: serde_json::Value = res.json().await.map_err(|e| FdkError::Transient(e.to_string()))?;
        let service_id = body["ID"]
            .as_str()
            .ok_or_else(|| FdkError::Transient("service create response missing ID".to_string()))?
            .to_string();

        Ok(PlacementResult { service_id, host_port })
    }

    async fn inspect_service(&self, service_id: &str) -> Result<bool, FdkError> {
        let res = self
            .client
            .get(self.socket_url(&format!("/services/{}", service_id)))
            .send()
            .await
            .map_err(|e| FdkError::Transient(e.to_string()))?;

        Ok(res.status().is_success())
    }

    async fn remove_service(&self, service_id: &str) -> Result<(), FdkError> {
        let res = self
            .client
            .delete(self.socket_url(&format!("/services/{}", service_id)))
            .send()
            .await
            .map_err(|e| FdkError::Transient(e.to_string()))?;

        if res.status().is_success() || res.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(FdkError::Transient(format!("service remove returned {}", res.status())))
        }
    }

    async fn force_leave(&self, node_id: &str) -> Result<(), FdkError> {
        let res = self
            .client
            .post(self.socket_url(&format!("/nodes/{}/update?force=true", node_id)))
            .send()
            .await
            .map_err(|e| FdkError::Transient(e.to_string()))?;

        if res.status().is_success() {
            Ok(())
        } else {
            Err(FdkError::Transient(format!("force-leave {} returned {}", node_id, res.status())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_pool_does_not_reuse_until_released() {
        let mut pool = NodePortPool::new(1024, 1026);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert_ne!(a, b);
        assert!(pool.alloc().is_none(), "range of size 2 is exhausted");

        pool.release(a);
        assert_eq!(pool.alloc(), Some(a));
    }
}
