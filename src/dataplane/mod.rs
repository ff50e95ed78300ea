//! Typed client for the SDN controller's REST surface (spec.md §4.2, §6).
//!
//! Reads go against the operational store, writes (config store) are
//! idempotent PUTs/DELETEs. The operational store is eventually consistent:
//! every write is followed by polling the operational store until the
//! change is observable (`confirm`); the local cache in the topology model
//! is only mutated once that observation succeeds. Transient HTTP failures
//! are retried with a bounded exponential backoff (spec.md §9's suggested
//! tightening of "retry forever") and surface as
//! [`crate::error::FdkError::PartialAllocationFault`] once the bound is hit.

pub mod model;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::config::Config;
use crate::error::FdkError;
use model::{FlowEntry, PortCounters, QosEntryConfig, QueueConfig, TerminationPointConfig};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TopologyLink {
    pub src_node: String,
    pub src_port: String,
    pub dst_node: String,
    pub dst_port: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TopologySnapshot {
    pub switches: Vec<String>,
    pub links: Vec<TopologyLink>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct InventoryPort {
    pub node_id: String,
    pub port_id: String,
    pub name: String,
    pub of_port: u32,
    pub speed_bps: u64,
}

/// Everything the bandwidth engine, flow builder and pollers need from the
/// SDN controller. Kept as a trait so the admission controller and the
/// pollers can be tested against an in-memory fake instead of a live
/// controller.
#[async_trait]
pub trait SdnClient: Send + Sync {
    async fn get_topology(&self) -> Result<TopologySnapshot, FdkError>;
    async fn get_inventory(&self) -> Result<Vec<InventoryPort>, FdkError>;
    async fn get_port_counters(&self, node_id: &str, port_id: &str) -> Result<PortCounters, FdkError>;

    async fn put_flow(&self, node_id: &str, table: u8, flow_id: &str, flow: &FlowEntry) -> Result<(), FdkError>;
    async fn delete_flow(&self, node_id: &str, table: u8, flow_id: &str) -> Result<(), FdkError>;
    async fn get_flow(&self, node_id: &str, table: u8, flow_id: &str) -> Result<Option<FlowEntry>, FdkError>;

    async fn put_queue(&self, ovsdb_node_id: &str, queue: &QueueConfig) -> Result<(), FdkError>;
    async fn delete_queue(&self, ovsdb_node_id: &str, queue_id: &str) -> Result<(), FdkError>;
    async fn get_queue(&self, ovsdb_node_id: &str, queue_id: &str) -> Result<Option<QueueConfig>, FdkError>;

    async fn put_qos(&self, ovsdb_node_id: &str, qos: &QosEntryConfig) -> Result<(), FdkError>;
    async fn delete_qos(&self, ovsdb_node_id: &str, qos_id: &str) -> Result<(), FdkError>;
    async fn get_qos(&self, ovsdb_node_id: &str, qos_id: &str) -> Result<Option<QosEntryConfig>, FdkError>;

    async fn put_termination_point(&self, ovsdb_node_id: &str, tp: &TerminationPointConfig) -> Result<(), FdkError>;
    async fn get_termination_point_qos(&self, ovsdb_node_id: &str, tp_id: &str) -> Result<Option<String>, FdkError>;
}

/// Poll `observe` until it reports the expected state, with a bounded
/// exponential backoff. Used by every primitive bandwidth-engine operation
/// to confirm a write landed in the operational store before the local
/// cache is updated (spec.md §4.4, §9).
pub async fn confirm<F, Fut>(
    config: &Config,
    description: &str,
    mut observe: F,
) -> Result<(), FdkError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool, FdkError>>,
{
    let mut delay = Duration::from_millis(config.controller.confirm_backoff_ms);

    for attempt in 0..config.controller.max_confirm_attempts {
        match observe().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(FdkError::Transient(msg)) => {
                log::warn!("transient error confirming {}: {} (attempt {})", description, msg, attempt);
            }
            Err(e) => return Err(e),
        }

        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(Duration::from_secs(5));
    }

    Err(FdkError::PartialAllocationFault(format!(
        "confirmation never observed for {} after {} attempts",
        description, config.controller.max_confirm_attempts
    )))
}

/// Live client backed by `reqwest`, authenticated with HTTP basic auth
/// against a single static credential (spec.md §6).
pub struct HttpSdnClient {
    client: reqwest::Client,
    config: Arc<Config>,
}

impl HttpSdnClient {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn base(&self) -> &str {
        self.config.controller.ctrlr_ip_addr.trim_end_matches('/')
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Option<T>, FdkError> {
        let res = self
            .client
            .get(format!("{}{}", self.base(), path))
            .basic_auth(&self.config.controller.username, Some(&self.config.controller.password))
            .header("Content-Type", &self.config.controller.yang_json_header)
            .send()
            .await
            .map_err(|e| FdkError::Transient(e.to_string()))?;

        match res.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => res
                .json()
                .await
                .map(Some)
                .map_err(|e| FdkError::Transient(e.to_string())),
            s => Err(FdkError::Transient(format!("GET {} returned {}", path, s))),
        }
    }

    async fn put_json<T: serde::Serialize + Sync>(&self, path: &str, body: &T) -> Result<(), FdkError> {
        let res = self
            .client
            .put(format!("{}{}", self.base(), path))
            .basic_auth(&self.config.controller.username, Some(&self.config.controller.password))
            .header("Content-Type", &self.config.controller.yang_json_header)
            .json(body)
            .send()
            .await
            .map_err(|e| FdkError::Transient(e.to_string()))?;

        if res.status().is_success() {
            Ok(())
        } else {
            Err(FdkError::Transient(format!("PUT {} returned {}", path, res.status())))
        }
    }

    async fn delete(&self, path: &str) -> Result<(), FdkError> {
        let res = self
            .client
            .delete(format!("{}{}", self.base(), path))
            .basic_auth(&self.config.controller.username, Some(&self.config.controller.password))
            .send()
            .await
            .map_err(|e| FdkError::Transient(e.to_string()))?;

        if res.status().is_success() || res.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(FdkError::Transient(format!("DELETE {} returned {}", path, res.status())))
        }
    }
}

#[async_trait]
impl SdnClient for HttpSdnClient {
    async fn get_topology(&self) -> Result<TopologySnapshot, FdkError> {
        Ok(self
            .get_json("/restconf/operational/network-topology:network-topology")
            .await?
            .unwrap_or(TopologySnapshot { switches: vec![], links: vec![] }))
    }

    async fn get_inventory(&self) -> Result<Vec<InventoryPort>, FdkError> {
        Ok(self
            .get_json("/restconf/operational/opendaylight-inventory:nodes")
            .await?
            .unwrap_or_default())
    }

    async fn get_port_counters(&self, node_id: &str, port_id: &str) -> Result<PortCounters, FdkError> {
        let path = format!(
            "/restconf/operational/opendaylight-inventory:nodes/node/{}/node-connector/{}",
            node_id, port_id
        );
        self.get_json(&path)
            .await?
            .ok_or_else(|| FdkError::Transient(format!("no counters for {}/{}", node_id, port_id)))
    }

    async fn put_flow(&self, node_id: &str, table: u8, flow_id: &str, flow: &FlowEntry) -> Result<(), FdkError> {
        let path = format!(
            "/restconf/config/opendaylight-inventory:nodes/node/{}/flow-node-inventory:table/{}/flow/{}",
            node_id, table, flow_id
        );
        self.put_json(&path, flow).await
    }

    async fn delete_flow(&self, node_id: &str, table: u8, flow_id: &str) -> Result<(), FdkError> {
        let path = format!(
            "/restconf/config/opendaylight-inventory:nodes/node/{}/flow-node-inventory:table/{}/flow/{}",
            node_id, table, flow_id
        );
        self.delete(&path).await
    }

    async fn get_flow(&self, node_id: &str, table: u8, flow_id: &str) -> Result<Option<FlowEntry>, FdkError> {
        let path = format!(
            "/restconf/operational/opendaylight-inventory:nodes/node/{}/flow-node-inventory:table/{}/flow/{}",
            node_id, table, flow_id
        );
        self.get_json(&path).await
    }

    async fn put_queue(&self, ovsdb_node_id: &str, queue: &QueueConfig) -> Result<(), FdkError> {
        let path = format!(
            "/restconf/config/network-topology:network-topology/topology/ovsdb:1/node/{}/ovsdb:queues/{}",
            ovsdb_node_id, queue.queue_id
        );
        self.put_json(&path, queue).await
    }

    async fn delete_queue(&self, ovsdb_node_id: &str, queue_id: &str) -> Result<(), FdkError> {
        let path = format!(
            "/restconf/config/network-topology:network-topology/topology/ovsdb:1/node/{}/ovsdb:queues/{}",
            ovsdb_node_id, queue_id
        );
        self.delete(&path).await
    }

    async fn get_queue(&self, ovsdb_node_id: &str, queue_id: &str) -> Result<Option<QueueConfig>, FdkError> {
        let path = format!(
            "/restconf/operational/network-topology:network-topology/topology/ovsdb:1/node/{}/ovsdb:queues/{}",
            ovsdb_node_id, queue_id
        );
        self.get_json(&path).await
    }

    async fn put_qos(&self, ovsdb_node_id: &str, qos: &QosEntryConfig) -> Result<(), FdkError> {
        let path = format!(
            "/restconf/config/network-topology:network-topology/topology/ovsdb:1/node/{}/ovsdb:qos-entries/{}",
            ovsdb_node_id, qos.qos_id
        );
        self.put_json(&path, qos).await
    }

    async fn delete_qos(&self, ovsdb_node_id: &str, qos_id: &str) -> Result<(), FdkError> {
        let path = format!(
            "/restconf/config/network-topology:network-topology/topology/ovsdb:1/node/{}/ovsdb:qos-entries/{}",
            ovsdb_node_id, qos_id
        );
        self.delete(&path).await
    }

    async fn get_qos(&self, ovsdb_node_id: &str, qos_id: &str) -> Result<Option<QosEntryConfig>, FdkError> {
        let path = format!(
            "/restconf/operational/network-topology:network-topology/topology/ovsdb:1/node/{}/ovsdb:qos-entries/{}",
            ovsdb_node_id, qos_id
        );
        self.get_json(&path).await
    }

    async fn put_termination_point(&self, ovsdb_node_id: &str, tp: &TerminationPointConfig) -> Result<(), FdkError> {
        let path = format!(
            "/restconf/config/network-topology:network-topology/topology/ovsdb:1/node/{}/termination-point/{}",
            ovsdb_node_id, tp.tp_id
        );
        self.put_json(&path, tp).await
    }

    async fn get_termination_point_qos(&self, ovsdb_node_id: &str, tp_id: &str) -> Result<Option<String>, FdkError> {
        let path = format!(
            "/restconf/operational/network-topology:network-topology/topology/ovsdb:1/node/{}/termination-point/{}",
            ovsdb_node_id, tp_id
        );
        let tp: Option<TerminationPointConfig> = self.get_json(&path).await?;
        Ok(tp.and_then(|t| t.qos_entry))
    }
}
