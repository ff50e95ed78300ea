//! Allocation server (spec.md §4.8, §6, port 65434).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::admission::{AdmissionController, AllocationRequest};

#[derive(Debug, Deserialize)]
struct WireRequest {
    node_id: String,
    image: String,
    cpu: f64,
    ram: u64,
    #[serde(default)]
    disk: u64,
    bandwidth: u64,
    #[serde(default = "default_service_port")]
    service_port: u16,
}

fn default_service_port() -> u16 {
    8080
}

#[derive(Debug, Serialize)]
struct WireResponse {
    #[serde(rename = "resp-code")]
    resp_code: i32,
    node_id: String,
    ip: Option<std::net::IpAddr>,
    port: Option<u16>,
    service_id: Option<String>,
    #[serde(rename = "failure-msg")]
    failure_msg: Option<String>,
    edge_node_id: String,
}

pub struct AllocationHandler {
    admission: Arc<AdmissionController>,
}

impl AllocationHandler {
    pub fn new(admission: Arc<AdmissionController>) -> Self {
        Self { admission }
    }

    pub async fn handle(&self, body: Vec<u8>) -> Vec<u8> {
        let req: WireRequest = match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("allocation request decode error: {}", e);
                return Vec::new();
            }
        };

        let _ = req.disk; // no disk reservation in the compute model (spec.md §3)

        let service_id = format!("{}-{}", req.node_id, req.service_port);
        let result = self
            .admission
            .allocate(AllocationRequest {
                edge_node_id: req.node_id.clone(),
                service_id: service_id.clone(),
                image: req.image.clone(),
                container_port: req.service_port,
                cpu_pct: req.cpu,
                ram_mb: req.ram,
                bandwidth_bps: req.bandwidth,
            })
            .await;

        let reply = match result {
            Ok(resp) => WireResponse {
                resp_code: 0,
                node_id: resp.fog_node_id,
                ip: Some(resp.fog_ip),
                port: Some(resp.fog_port),
                service_id: Some(service_id),
                failure_msg: None,
                edge_node_id: req.node_id,
            },
            Err(e) => WireResponse {
                resp_code: -1,
                node_id: req.node_id.clone(),
                ip: None,
                port: None,
                service_id: None,
                failure_msg: Some(e.to_string()),
                edge_node_id: req.node_id,
            },
        };

        serde_json::to_vec(&reply).unwrap_or_default()
    }
}
