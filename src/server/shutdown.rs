//! Shutdown server (spec.md §4.8, §6, port 65435).
//!
//! Idempotent: repeated requests for an already-released reservation key
//! reply `0` without doing any work (spec.md §8, scenario S5).

use std::sync::Arc;

use fdk_core::reservation::ReservationKey;
use serde::{Deserialize, Serialize};

use crate::admission::AdmissionController;

#[derive(Debug, Deserialize)]
struct WireRequest {
    node_id: String,
    edge_node_id: String,
    #[serde(default)]
    service_id: Option<String>,
    port: u16,
}

#[derive(Debug, Serialize)]
struct WireResponse {
    #[serde(rename = "resp-code")]
    resp_code: i32,
}

pub struct ShutdownHandler {
    admission: Arc<AdmissionController>,
}

impl ShutdownHandler {
    pub fn new(admission: Arc<AdmissionController>) -> Self {
        Self { admission }
    }

    pub async fn handle(&self, body: Vec<u8>) -> Vec<u8> {
        let req: WireRequest = match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("shutdown request decode error: {}", e);
                return Vec::new();
            }
        };

        let key = ReservationKey {
            edge_node_id: req.edge_node_id,
            fog_node_id: req.node_id,
            fog_service_port: req.port,
        };

        let resp_code = match self.admission.deallocate(&key).await {
            Ok(()) => 0,
            Err(e) => {
                log::warn!("deallocate for service {:?} failed: {}", req.service_id, e);
                -1
            }
        };

        serde_json::to_vec(&WireResponse { resp_code }).unwrap_or_default()
    }
}
