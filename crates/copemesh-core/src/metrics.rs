//! Per-node simulation metrics

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::Protocol;
use crate::node::Node;

/// Round-trip statistics of one node over a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    /// Requests answered by a response that made it back
    pub successes: u64,
    /// Requests sent but never answered
    pub drops: u64,
    /// Mean round-trip time over answered requests
    pub average_latency: Option<f64>,
    /// Successes per timestep
    pub throughput: f64,
    /// Transmissions that carried more than one packet
    pub coded_transmissions: u64,
}

impl NodeMetrics {
    pub fn collect(node: &Node, timesteps: u64) -> Self {
        let mut successes = 0u64;
        let mut drops = 0u64;
        let mut total_latency = 0u64;

        for (id, sent_at) in node.sent_log() {
            match node.received_log().get(id) {
                Some(received_at) => {
                    successes += 1;
                    total_latency += received_at.saturating_sub(*sent_at);
                }
                None => drops += 1,
            }
        }

        let average_latency = (successes > 0).then(|| total_latency as f64 / successes as f64);
        let throughput = if timesteps == 0 {
            0.0
        } else {
            successes as f64 / timesteps as f64
        };
        let coded_transmissions = node
            .coding_history()
            .iter()
            .filter(|record| record.ids.len() > 1)
            .count() as u64;

        Self {
            successes,
            drops,
            average_latency,
            throughput,
            coded_transmissions,
        }
    }

    pub fn sent(&self) -> u64 {
        self.successes + self.drops
    }
}

/// Metrics of a whole run, keyed by node address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetrics {
    pub protocol: Protocol,
    pub timesteps: u64,
    pub nodes: BTreeMap<String, NodeMetrics>,
}

impl SimulationMetrics {
    pub fn get(&self, address: &str) -> Option<&NodeMetrics> {
        self.nodes.get(address)
    }

    pub fn total_successes(&self) -> u64 {
        self.nodes.values().map(|m| m.successes).sum()
    }

    pub fn total_drops(&self) -> u64 {
        self.nodes.values().map(|m| m.drops).sum()
    }

    pub fn total_coded_transmissions(&self) -> u64 {
        self.nodes.values().map(|m| m.coded_transmissions).sum()
    }

    /// Successes of every node per timestep
    pub fn overall_throughput(&self) -> f64 {
        if self.timesteps == 0 {
            return 0.0;
        }
        self.total_successes() as f64 / self.timesteps as f64
    }
}
