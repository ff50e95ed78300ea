//! Bandwidth engine: the eight primitive OVSDB writes QoS reservation is
//! built from (spec.md §4.4), each confirmed against the operational store
//! before the local cache is updated.
//!
//! Grounded on `resource_manager.py`'s queue/QoS primitives, which this
//! keeps as small single-purpose operations rather than folding them into
//! the admission state machine directly: the admission controller composes
//! these, it doesn't reimplement them.

use std::sync::Arc;

use fdk_core::node::{Queue, QueueRef, QosEntry};
use fdk_core::topology::Topology;

use crate::config::Config;
use crate::dataplane::model::{QosEntryConfig, QueueConfig, TerminationPointConfig};
use crate::dataplane::{confirm, SdnClient};
use crate::error::FdkError;

pub struct BandwidthEngine {
    config: Arc<Config>,
    sdn: Arc<dyn SdnClient>,
}

impl BandwidthEngine {
    pub fn new(config: Arc<Config>, sdn: Arc<dyn SdnClient>) -> Self {
        Self { config, sdn }
    }

    /// Create a queue on the switch identified by its ovsdb node id and wait
    /// for it to be observable before recording it in the ovsdb topology.
    pub async fn create_queue(
        &self,
        ovsdb_topology: &Topology,
        ovsdb_node_id: &str,
        queue_id: &str,
        max_rate_bps: u64,
    ) -> Result<(), FdkError> {
        let queue_cfg = QueueConfig::with_max_rate(queue_id, max_rate_bps);
        self.sdn.put_queue(ovsdb_node_id, &queue_cfg).await?;

        confirm(&self.config, &format!("queue {}", queue_id), || async {
            Ok(self.sdn.get_queue(ovsdb_node_id, queue_id).await?.is_some())
        })
        .await?;

        ovsdb_topology.with_lock(|g| {
            if let Some(sw) = g.node_mut(ovsdb_node_id).and_then(|n| n.as_switch_mut()) {
                sw.queues.insert(
                    queue_id.to_string(),
                    Queue { id: queue_id.to_string(), max_rate_bps },
                );
            }
        });

        Ok(())
    }

    /// Delete a queue. Rejected locally (no data-plane round trip) if the
    /// cached queue is still referenced by any QoS entry's queue list —
    /// mirrors the original's "can't delete a queue in use" boundary check.
    pub async fn delete_queue(
        &self,
        ovsdb_topology: &Topology,
        ovsdb_node_id: &str,
        queue_id: &str,
    ) -> Result<(), FdkError> {
        let in_use = ovsdb_topology.with_lock(|g| {
            g.node(ovsdb_node_id)
                .and_then(|n| n.as_switch())
                .map(|sw| {
                    sw.qos_entries
                        .values()
                        .any(|qos| qos.queues.iter().any(|q| q.queue_id == queue_id))
                })
                .unwrap_or(false)
        });

        if in_use {
            return Err(FdkError::AdmissionDenied(format!(
                "queue {} is still referenced by a qos entry",
                queue_id
            )));
        }

        self.sdn.delete_queue(ovsdb_node_id, queue_id).await?;

        confirm(&self.config, &format!("queue {} deleted", queue_id), || async {
            Ok(self.sdn.get_queue(ovsdb_node_id, queue_id).await?.is_none())
        })
        .await?;

        ovsdb_topology.with_lock(|g| {
            if let Some(sw) = g.node_mut(ovsdb_node_id).and_then(|n| n.as_switch_mut()) {
                sw.queues.remove(queue_id);
            }
        });

        Ok(())
    }

    pub async fn create_qos(
        &self,
        ovsdb_topology: &Topology,
        ovsdb_node_id: &str,
        qos_id: &str,
        max_rate_bps: u64,
    ) -> Result<(), FdkError> {
        let qos_cfg = QosEntryConfig::new(qos_id, max_rate_bps);
        self.sdn.put_qos(ovsdb_node_id, &qos_cfg).await?;

        confirm(&self.config, &format!("qos {}", qos_id), || async {
            Ok(self.sdn.get_qos(ovsdb_node_id, qos_id).await?.is_some())
        })
        .await?;

        ovsdb_topology.with_lock(|g| {
            if let Some(sw) = g.node_mut(ovsdb_node_id).and_then(|n| n.as_switch_mut()) {
                sw.qos_entries.insert(
                    qos_id.to_string(),
                    QosEntry { id: qos_id.to_string(), max_rate_bps, queues: vec![] },
                );
            }
        });

        Ok(())
    }

    /// Delete a QoS entry. Rejected locally if it still attaches to a port
    /// or still owns queues, mirroring `delete_queue`'s boundary check.
    pub async fn delete_qos(
        &self,
        ovsdb_topology: &Topology,
        ovsdb_node_id: &str,
        qos_id: &str,
    ) -> Result<(), FdkError> {
        let blocked = ovsdb_topology.with_lock(|g| {
            g.node(ovsdb_node_id)
                .and_then(|n| n.as_switch())
                .map(|sw| {
                    let owns_queues = sw
                        .qos_entries
                        .get(qos_id)
                        .map(|q| !q.queues.is_empty())
                        .unwrap_or(false);
                    let attached = sw.port_qos.values().any(|id| id == qos_id);
                    owns_queues || attached
                })
                .unwrap_or(false)
        });

        if blocked {
            return Err(FdkError::AdmissionDenied(format!(
                "qos {} still has queues or is attached to a port",
                qos_id
            )));
        }

        self.sdn.delete_qos(ovsdb_node_id, qos_id).await?;

        confirm(&self.config, &format!("qos {} deleted", qos_id), || async {
            Ok(self.sdn.get_qos(ovsdb_node_id, qos_id).await?.is_none())
        })
        .await?;

        ovsdb_topology.with_lock(|g| {
            if let Some(sw) = g.node_mut(ovsdb_node_id).and_then(|n| n.as_switch_mut()) {
                sw.qos_entries.remove(qos_id);
            }
        });

        Ok(())
    }

    /// Append `queue_id` to a QoS entry's queue list at the smallest unused
    /// queue number.
    pub async fn add_qos_queue(
        &self,
        ovsdb_topology: &Topology,
        ovsdb_node_id: &str,
        qos_id: &str,
        queue_id: &str,
    ) -> Result<u32, FdkError> {
        let (mut qos_cfg, queue_number) = ovsdb_topology.with_lock(|g| {
            let sw = g.node(ovsdb_node_id).and_then(|n| n.as_switch()).expect("switch present");
            let qos = sw.qos_entries.get(qos_id).expect("qos entry present");
            let number = qos.next_queue_number();
            let cfg = QosEntryConfig {
                qos_id: qos_id.to_string(),
                other_config: vec![crate::dataplane::model::OtherConfigEntry {
                    key: "max-rate".to_string(),
                    value: qos.max_rate_bps.to_string(),
                }],
                queue_list: qos
                    .queues
                    .iter()
                    .map(|q| crate::dataplane::model::QosQueueListEntry {
                        queue_number: q.queue_number,
                        queue: q.queue_id.clone(),
                    })
                    .collect(),
            };
            (cfg, number)
        });

        qos_cfg.queue_list.push(crate::dataplane::model::QosQueueListEntry {
            queue_number,
            queue: queue_id.to_string(),
        });

        self.sdn.put_qos(ovsdb_node_id, &qos_cfg).await?;

        confirm(&self.config, &format!("qos {} queue {} attached", qos_id, queue_id), || async {
            let current = self.sdn.get_qos(ovsdb_node_id, qos_id).await?;
            Ok(current
                .map(|c| c.queue_list.iter().any(|q| q.queue == queue_id))
                .unwrap_or(false))
        })
        .await?;

        ovsdb_topology.with_lock(|g| {
            if let Some(sw) = g.node_mut(ovsdb_node_id).and_then(|n| n.as_switch_mut()) {
                if let Some(qos) = sw.qos_entries.get_mut(qos_id) {
                    qos.queues.push(QueueRef { queue_number, queue_id: queue_id.to_string() });
                }
            }
        });

        Ok(queue_number)
    }

    pub async fn remove_qos_queue(
        &self,
        ovsdb_topology: &Topology,
        ovsdb_node_id: &str,
        qos_id: &str,
        queue_id: &str,
    ) -> Result<(), FdkError> {
        let qos_cfg = ovsdb_topology.with_lock(|g| {
            let sw = g.node(ovsdb_node_id).and_then(|n| n.as_switch()).expect("switch present");
            let qos = sw.qos_entries.get(qos_id).expect("qos entry present");
            QosEntryConfig {
                qos_id: qos_id.to_string(),
                other_config: vec![crate::dataplane::model::OtherConfigEntry {
                    key: "max-rate".to_string(),
                    value: qos.max_rate_bps.to_string(),
                }],
                queue_list: qos
                    .queues
                    .iter()
                    .filter(|q| q.queue_id != queue_id)
                    .map(|q| crate::dataplane::model::QosQueueListEntry {
                        queue_number: q.queue_number,
                        queue: q.queue_id.clone(),
                    })
                    .collect(),
            }
        });

        self.sdn.put_qos(ovsdb_node_id, &qos_cfg).await?;

        confirm(&self.config, &format!("qos {} queue {} detached", qos_id, queue_id), || async {
            let current = self.sdn.get_qos(ovsdb_node_id, qos_id).await?;
            Ok(current
                .map(|c| !c.queue_list.iter().any(|q| q.queue == queue_id))
                .unwrap_or(true))
        })
        .await?;

        ovsdb_topology.with_lock(|g| {
            if let Some(sw) = g.node_mut(ovsdb_node_id).and_then(|n| n.as_switch_mut()) {
                if let Some(qos) = sw.qos_entries.get_mut(qos_id) {
                    qos.queues.retain(|q| q.queue_id != queue_id);
                }
            }
        });

        Ok(())
    }

    pub async fn add_qos_to_tp(
        &self,
        ovsdb_topology: &Topology,
        ovsdb_node_id: &str,
        tp_id: &str,
        qos_id: &str,
    ) -> Result<(), FdkError> {
        let tp = TerminationPointConfig { tp_id: tp_id.to_string(), qos_entry: Some(qos_id.to_string()) };
        self.sdn.put_termination_point(ovsdb_node_id, &tp).await?;

        confirm(&self.config, &format!("tp {} qos attached", tp_id), || async {
            Ok(self.sdn.get_termination_point_qos(ovsdb_node_id, tp_id).await? == Some(qos_id.to_string()))
        })
        .await?;

        ovsdb_topology.with_lock(|g| {
            if let Some(sw) = g.node_mut(ovsdb_node_id).and_then(|n| n.as_switch_mut()) {
                sw.port_qos.insert(tp_id.to_string(), qos_id.to_string());
            }
        });

        Ok(())
    }

    pub async fn remove_qos_from_tp(
        &self,
        ovsdb_topology: &Topology,
        ovsdb_node_id: &str,
        tp_id: &str,
    ) -> Result<(), FdkError> {
        let tp = TerminationPointConfig { tp_id: tp_id.to_string(), qos_entry: None };
        self.sdn.put_termination_point(ovsdb_node_id, &tp).await?;

        confirm(&self.config, &format!("tp {} qos detached", tp_id), || async {
            Ok(self.sdn.get_termination_point_qos(ovsdb_node_id, tp_id).await?.is_none())
        })
        .await?;

        ovsdb_topology.with_lock(|g| {
            if let Some(sw) = g.node_mut(ovsdb_node_id).and_then(|n| n.as_switch_mut()) {
                sw.port_qos.remove(tp_id);
            }
        });

        Ok(())
    }

    /// Install the baseline QoS+queue pair on a port at link-discovery time
    /// (spec.md §3's "open link capacity"): one QoS entry rated at the link
    /// speed, one default queue rated at `open_link_capacity_bps`, attached
    /// to the port.
    pub async fn init_link_qos(
        &self,
        ovsdb_topology: &Topology,
        ovsdb_node_id: &str,
        tp_id: &str,
        qos_id: &str,
        default_queue_id: &str,
        link_speed_bps: u64,
    ) -> Result<(), FdkError> {
        self.create_qos(ovsdb_topology, ovsdb_node_id, qos_id, link_speed_bps).await?;
        self.create_queue(
            ovsdb_topology,
            ovsdb_node_id,
            default_queue_id,
            self.config.open_link_capacity_bps,
        )
        .await?;
        self.add_qos_queue(ovsdb_topology, ovsdb_node_id, qos_id, default_queue_id).await?;
        self.add_qos_to_tp(ovsdb_topology, ovsdb_node_id, tp_id, qos_id).await?;
        Ok(())
    }

    /// Reverse of [`Self::init_link_qos`] for one port: detach its QoS,
    /// empty the QoS's queue list, delete those queues, then delete the QoS
    /// entry itself (spec.md §4.4 "Shutdown").
    async fn teardown_port_qos(
        &self,
        ovsdb_topology: &Topology,
        ovsdb_node_id: &str,
        tp_id: &str,
        qos_id: &str,
    ) -> Result<(), FdkError> {
        self.remove_qos_from_tp(ovsdb_topology, ovsdb_node_id, tp_id).await?;

        let queue_ids: Vec<String> = ovsdb_topology.with_lock(|g| {
            g.node(ovsdb_node_id)
                .and_then(|n| n.as_switch())
                .and_then(|sw| sw.qos_entries.get(qos_id))
                .map(|qos| qos.queues.iter().map(|q| q.queue_id.clone()).collect())
                .unwrap_or_default()
        });

        for queue_id in &queue_ids {
            self.remove_qos_queue(ovsdb_topology, ovsdb_node_id, qos_id, queue_id).await?;
            self.delete_queue(ovsdb_topology, ovsdb_node_id, queue_id).await?;
        }

        self.delete_qos(ovsdb_topology, ovsdb_node_id, qos_id).await?;
        Ok(())
    }

    /// Tear down every switch's baseline per-port QoS and queue, and zero
    /// every link's reservation counter, reversing `init_link_qos` across
    /// the whole topology (spec.md §4.4 "Shutdown"). Best-effort: a failure
    /// on one port is logged and does not stop teardown of the rest, since
    /// this only runs once the controller is already on its way down.
    pub async fn shutdown_all(&self, ovsdb_topology: &Topology, flow_topology: &Topology) {
        let ports: Vec<(String, String, String)> = ovsdb_topology.with_lock(|g| {
            g.all_nodes()
                .filter_map(|(id, n)| n.as_switch().map(|sw| (id.clone(), sw)))
                .flat_map(|(id, sw)| sw.port_qos.iter().map(move |(port, qos)| (id.clone(), port.clone(), qos.clone())))
                .collect()
        });

        for (ovsdb_node_id, tp_id, qos_id) in &ports {
            if let Err(e) = self.teardown_port_qos(ovsdb_topology, ovsdb_node_id, tp_id, qos_id).await {
                log::warn!("shutdown: failed to tear down qos {} on {}:{}: {}", qos_id, ovsdb_node_id, tp_id, e);
            }
        }

        flow_topology.with_lock(|g| {
            for edge in g.all_edges_mut() {
                edge.set_reservation(0);
            }
        });
    }
}
