//! Flow table entries for a single reservation hop (spec.md §4.3).
//!
//! Each hop of a reserved path gets a pair of flows per direction (TCP and
//! UDP, matched on the endpoint's service port) so a reservation's traffic
//! is steered onto the queue created for it; each switch also gets a single
//! low-priority flow at init time that sends ARP and otherwise-unmatched
//! traffic up to the controller, grounded on `topology_manager.py`'s
//! `add_controller_flow`.

use serde_json::json;

use crate::dataplane::model::{Action, ApplyActions, FlowEntry, Instruction, Match};

pub const ENQUEUE_FLOW_TABLE: u8 = 0;
const ENQUEUE_FLOW_PRIORITY: u16 = 2000;
const INIT_FLOW_PRIORITY: u16 = 1000;

fn set_queue_then_output(queue_id: u32, out_port: &str) -> Instruction {
    Instruction {
        order: 0,
        apply_actions: ApplyActions {
            action: vec![
                Action {
                    order: 0,
                    body: json!({ "set-queue-action": { "queue-id": queue_id } }),
                },
                Action {
                    order: 1,
                    body: json!({ "output-action": { "output-node-connector": out_port } }),
                },
            ],
        },
    }
}

/// Build the pair of flows (TCP + UDP) that steer the edge-to-fog direction
/// of a reservation's traffic through `out_port` onto `queue_id`: match is
/// ingress on `in_port`, source `src_ip` (the edge), destination `dst_ip`/
/// `dst_port` (the fog) (spec.md §4.3).
pub fn enqueue_flows(
    flow_id_prefix: &str,
    in_port: &str,
    out_port: &str,
    src_ip: &str,
    dst_ip: &str,
    dst_port: u16,
    queue_id: u32,
) -> Vec<FlowEntry> {
    let base_match = Match {
        in_port: Some(in_port.to_string()),
        ipv4_source: Some(format!("{}/32", src_ip)),
        ipv4_destination: Some(format!("{}/32", dst_ip)),
        ip_match: Some(json!({ "ip-protocol": 6 })),
        ..Default::default()
    };

    let tcp = FlowEntry {
        id: format!("{}-tcp", flow_id_prefix),
        table_id: ENQUEUE_FLOW_TABLE,
        priority: ENQUEUE_FLOW_PRIORITY,
        hard_timeout: 0,
        idle_timeout: 0,
        matches: Match {
            tcp_destination_port: Some(dst_port),
            ..base_match.clone()
        },
        instructions: vec![set_queue_then_output(queue_id, out_port)],
    };

    let udp = FlowEntry {
        id: format!("{}-udp", flow_id_prefix),
        table_id: ENQUEUE_FLOW_TABLE,
        priority: ENQUEUE_FLOW_PRIORITY,
        hard_timeout: 0,
        idle_timeout: 0,
        matches: Match {
            ip_match: Some(json!({ "ip-protocol": 17 })),
            udp_destination_port: Some(dst_port),
            ..base_match
        },
        instructions: vec![set_queue_then_output(queue_id, out_port)],
    };

    vec![tcp, udp]
}

/// Build the pair of flows (TCP + UDP) for the reverse, fog-to-edge
/// direction: match swaps source/destination (source IP/port are the fog's,
/// destination IP is the edge's), ingress is the switch's fog-facing port,
/// egress is the edge-facing port (spec.md §4.3: "the reverse direction
/// swaps source/destination and matches L4 source-port").
pub fn reverse_enqueue_flows(
    flow_id_prefix: &str,
    in_port: &str,
    out_port: &str,
    src_ip: &str,
    src_port: u16,
    dst_ip: &str,
    queue_id: u32,
) -> Vec<FlowEntry> {
    let base_match = Match {
        in_port: Some(in_port.to_string()),
        ipv4_source: Some(format!("{}/32", src_ip)),
        ipv4_destination: Some(format!("{}/32", dst_ip)),
        ip_match: Some(json!({ "ip-protocol": 6 })),
        ..Default::default()
    };

    let tcp = FlowEntry {
        id: format!("{}-tcp", flow_id_prefix),
        table_id: ENQUEUE_FLOW_TABLE,
        priority: ENQUEUE_FLOW_PRIORITY,
        hard_timeout: 0,
        idle_timeout: 0,
        matches: Match {
            tcp_source_port: Some(src_port),
            ..base_match.clone()
        },
        instructions: vec![set_queue_then_output(queue_id, out_port)],
    };

    let udp = FlowEntry {
        id: format!("{}-udp", flow_id_prefix),
        table_id: ENQUEUE_FLOW_TABLE,
        priority: ENQUEUE_FLOW_PRIORITY,
        hard_timeout: 0,
        idle_timeout: 0,
        matches: Match {
            ip_match: Some(json!({ "ip-protocol": 17 })),
            udp_source_port: Some(src_port),
            ..base_match
        },
        instructions: vec![set_queue_then_output(queue_id, out_port)],
    };

    vec![tcp, udp]
}

/// Init-time flow installed on every switch: send ARP and table-miss
/// traffic to the controller so the topology/inventory pollers can observe
/// new hosts (spec.md §4.9).
pub fn controller_copy_flow() -> FlowEntry {
    FlowEntry {
        id: "fdk-arp-to-controller".to_string(),
        table_id: ENQUEUE_FLOW_TABLE,
        priority: INIT_FLOW_PRIORITY,
        hard_timeout: 0,
        idle_timeout: 0,
        matches: Match {
            ethernet_match: Some(json!({ "ethernet-type": { "type": 2054 } })),
            ..Default::default()
        },
        instructions: vec![Instruction {
            order: 0,
            apply_actions: ApplyActions {
                action: vec![Action {
                    order: 0,
                    body: json!({
                        "output-action": { "output-node-connector": "CONTROLLER" }
                    }),
                }],
            },
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_flows_produce_distinct_tcp_udp_ids() {
        let flows = enqueue_flows("resv-1-hop-0", "1", "2", "10.0.0.2", "10.0.0.5", 9000, 7);
        assert_eq!(flows.len(), 2);
        assert_ne!(flows[0].id, flows[1].id);
        assert!(flows[0].id.ends_with("-tcp"));
        assert!(flows[1].id.ends_with("-udp"));
    }

    #[test]
    fn enqueue_flow_references_requested_queue() {
        let flows = enqueue_flows("resv-1-hop-0", "1", "2", "10.0.0.2", "10.0.0.5", 9000, 42);
        for flow in &flows {
            let action = &flow.instructions[0].apply_actions.action[0];
            assert_eq!(action.body["set-queue-action"]["queue-id"], 42);
        }
    }

    #[test]
    fn enqueue_flow_matches_both_edge_and_fog_ip() {
        let flows = enqueue_flows("resv-1-hop-0", "1", "2", "10.0.0.2", "10.0.0.5", 9000, 7);
        assert_eq!(flows[0].matches.ipv4_source.as_deref(), Some("10.0.0.2/32"));
        assert_eq!(flows[0].matches.ipv4_destination.as_deref(), Some("10.0.0.5/32"));
    }

    #[test]
    fn controller_copy_flow_outputs_to_controller_port() {
        let flow = controller_copy_flow();
        let action = &flow.instructions[0].apply_actions.action[0];
        assert_eq!(action.body["output-action"]["output-node-connector"], "CONTROLLER");
    }

    #[test]
    fn reverse_enqueue_flows_match_on_source_port_not_destination() {
        let flows = reverse_enqueue_flows("resv-1-hop-0-rev", "2", "1", "10.0.0.5", 9000, "10.0.0.2", 3);
        assert_eq!(flows.len(), 2);
        assert_eq!(flows[0].matches.in_port.as_deref(), Some("2"));
        assert_eq!(flows[0].matches.ipv4_source.as_deref(), Some("10.0.0.5/32"));
        assert_eq!(flows[0].matches.ipv4_destination.as_deref(), Some("10.0.0.2/32"));
        assert_eq!(flows[0].matches.tcp_source_port, Some(9000));

        let action = &flows[0].instructions[0].apply_actions.action[1];
        assert_eq!(action.body["output-action"]["output-node-connector"], "1");
    }
}
