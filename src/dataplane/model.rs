//! Wire types for the SDN controller's RESTCONF surface (spec.md §4.2, §6).
//!
//! These mirror the shapes the original Python implementation built by hand
//! (`flow_manager.py`'s flow skeleton, `topology.py`'s queue/QoS payloads):
//! a flow is a match + an ordered instruction list, a queue/QoS carries its
//! rate in an `other-config` bag, and a termination point optionally
//! references a QoS entry.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Match {
    #[serde(rename = "ethernet-match", skip_serializing_if = "Option::is_none")]
    pub ethernet_match: Option<serde_json::Value>,

    #[serde(rename = "ipv4-source", skip_serializing_if = "Option::is_none")]
    pub ipv4_source: Option<String>,

    #[serde(rename = "ipv4-destination", skip_serializing_if = "Option::is_none")]
    pub ipv4_destination: Option<String>,

    #[serde(rename = "ip-match", skip_serializing_if = "Option::is_none")]
    pub ip_match: Option<serde_json::Value>,

    #[serde(rename = "tcp-source-port", skip_serializing_if = "Option::is_none")]
    pub tcp_source_port: Option<u16>,

    #[serde(rename = "tcp-destination-port", skip_serializing_if = "Option::is_none")]
    pub tcp_destination_port: Option<u16>,

    #[serde(rename = "udp-source-port", skip_serializing_if = "Option::is_none")]
    pub udp_source_port: Option<u16>,

    #[serde(rename = "udp-destination-port", skip_serializing_if = "Option::is_none")]
    pub udp_destination_port: Option<u16>,

    #[serde(rename = "in-port", skip_serializing_if = "Option::is_none")]
    pub in_port: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub order: u32,
    #[serde(flatten)]
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub order: u32,
    #[serde(rename = "apply-actions")]
    pub apply_actions: ApplyActions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyActions {
    pub action: Vec<Action>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEntry {
    pub id: String,
    #[serde(rename = "table_id")]
    pub table_id: u8,
    pub priority: u16,
    #[serde(rename = "hard-timeout")]
    pub hard_timeout: u32,
    #[serde(rename = "idle-timeout")]
    pub idle_timeout: u32,
    #[serde(rename = "match")]
    pub matches: Match,
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(rename = "queue-id")]
    pub queue_id: String,
    #[serde(rename = "queues-other-config")]
    pub other_config: Vec<OtherConfigEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtherConfigEntry {
    #[serde(rename = "queue-other-config-key")]
    pub key: String,
    #[serde(rename = "queue-other-config-value")]
    pub value: String,
}

impl QueueConfig {
    pub fn with_max_rate(id: &str, max_rate_bps: u64) -> Self {
        Self {
            queue_id: id.to_string(),
            other_config: vec![OtherConfigEntry {
                key: "max-rate".to_string(),
                value: max_rate_bps.to_string(),
            }],
        }
    }

    pub fn max_rate(&self) -> Option<u64> {
        self.other_config
            .iter()
            .find(|c| c.key == "max-rate")
            .and_then(|c| c.value.parse().ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QosQueueListEntry {
    #[serde(rename = "queue-number")]
    pub queue_number: u32,
    pub queue: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QosEntryConfig {
    #[serde(rename = "qos-id")]
    pub qos_id: String,
    #[serde(rename = "qos-other-config")]
    pub other_config: Vec<OtherConfigEntry>,
    #[serde(rename = "queue-list", default)]
    pub queue_list: Vec<QosQueueListEntry>,
}

impl QosEntryConfig {
    pub fn new(id: &str, max_rate_bps: u64) -> Self {
        Self {
            qos_id: id.to_string(),
            other_config: vec![OtherConfigEntry {
                key: "max-rate".to_string(),
                value: max_rate_bps.to_string(),
            }],
            queue_list: vec![],
        }
    }

    pub fn max_rate(&self) -> Option<u64> {
        self.other_config
            .iter()
            .find(|c| c.key == "max-rate")
            .and_then(|c| c.value.parse().ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationPointConfig {
    #[serde(rename = "tp-id")]
    pub tp_id: String,
    #[serde(rename = "ovsdb:qos-entry", skip_serializing_if = "Option::is_none")]
    pub qos_entry: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortCounters {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    /// Reported link speed in bits/sec; zero means the port is excluded
    /// from routing.
    pub speed_bps: u64,
}
