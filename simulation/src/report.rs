//! Aggregated per-protocol reports
//!
//! Collapses the per-node metrics of one run into the summary written by
//! `copemesh compare`: overall throughput, the success counts and throughputs of
//! the nodes that got anything through, and their mean latencies.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use copemesh_core::{Protocol, SimulationMetrics};
use serde::{Deserialize, Serialize};

/// Summary of one protocol over one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolReport {
    pub protocol: Protocol,
    /// Successes of every node per timestep
    pub overall_throughput: f64,
    pub timesteps: u64,
    /// Success count of every node with at least one success
    pub messages_sent: Vec<u64>,
    /// Mean round-trip latency of every node that has one
    pub latencies: Vec<f64>,
    /// `messages_sent` divided by the timesteps
    pub throughputs: Vec<f64>,
    /// Multi-packet transmissions across all nodes
    pub coded_transmissions: u64,
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

impl ProtocolReport {
    pub fn from_metrics(metrics: &SimulationMetrics) -> Self {
        let timesteps = metrics.timesteps;
        let messages_sent: Vec<u64> = metrics
            .nodes
            .values()
            .map(|node| node.successes)
            .filter(|successes| *successes != 0)
            .collect();
        let throughputs = messages_sent
            .iter()
            .map(|sent| {
                if timesteps == 0 {
                    0.0
                } else {
                    round3(*sent as f64 / timesteps as f64)
                }
            })
            .collect();
        let latencies = metrics
            .nodes
            .values()
            .filter_map(|node| node.average_latency)
            .map(round3)
            .collect();

        Self {
            protocol: metrics.protocol,
            overall_throughput: metrics.overall_throughput(),
            timesteps,
            messages_sent,
            latencies,
            throughputs,
            coded_transmissions: metrics.total_coded_transmissions(),
        }
    }

    /// File name under the topology's result directory
    pub fn file_name(&self) -> String {
        format!("{}_metrics.json", self.protocol.label())
    }

    /// Write to `{out}/{topology}/{protocol}_metrics.json`, creating directories
    pub fn write_json(&self, out: &Path, topology: &str) -> anyhow::Result<PathBuf> {
        let dir = out.join(topology);
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating result directory {}", dir.display()))?;
        let path = dir.join(self.file_name());
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

impl std::fmt::Display for ProtocolReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} over {} timesteps", self.protocol, self.timesteps)?;
        writeln!(f, "  overall throughput:  {:.3}", self.overall_throughput)?;
        writeln!(f, "  successful senders:  {}", self.messages_sent.len())?;
        writeln!(f, "  successes:           {:?}", self.messages_sent)?;
        writeln!(f, "  latencies:           {:?}", self.latencies)?;
        write!(f, "  coded transmissions: {}", self.coded_transmissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copemesh_core::NodeMetrics;

    fn node(successes: u64, average_latency: Option<f64>) -> NodeMetrics {
        NodeMetrics {
            successes,
            average_latency,
            ..Default::default()
        }
    }

    fn sample() -> SimulationMetrics {
        SimulationMetrics {
            protocol: Protocol::NetworkCoding,
            timesteps: 3,
            nodes: [
                ("a".to_string(), node(2, Some(7.0 / 3.0))),
                ("b".to_string(), node(0, None)),
                ("c".to_string(), node(1, Some(4.0))),
            ]
            .into_iter()
            .collect(),
        }
    }

    #[test]
    fn test_aggregation_skips_idle_nodes() {
        let report = ProtocolReport::from_metrics(&sample());

        assert!((report.overall_throughput - 1.0).abs() < 1e-12);
        assert_eq!(report.messages_sent, vec![2, 1]);
        assert_eq!(report.throughputs, vec![0.667, 0.333]);
        assert_eq!(report.latencies, vec![2.333, 4.0]);
        assert_eq!(report.file_name(), "coding_metrics.json");
    }

    #[test]
    fn test_write_json_creates_topology_dir() {
        let out = tempfile::tempdir().unwrap();
        let report = ProtocolReport::from_metrics(&sample());

        let path = report.write_json(out.path(), "alice_and_bob").unwrap();
        assert_eq!(path, out.path().join("alice_and_bob").join("coding_metrics.json"));

        let parsed: ProtocolReport =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.messages_sent, report.messages_sent);
        assert_eq!(parsed.protocol, Protocol::NetworkCoding);
    }
}
