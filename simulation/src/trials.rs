//! Independent seeded trials
//!
//! Each trial owns its own arena and packet id source, so trials share nothing
//! and run on the rayon pool. Trial `i` is seeded with `base_seed + i`, which
//! makes a batch reproducible regardless of thread scheduling.

use anyhow::Context;
use copemesh_core::{
    Arena, EngineConfig, PacketIdSource, Protocol, SimulationMetrics, TopologyDescription,
    TrafficPlan,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One protocol run on one topology
#[derive(Debug, Clone)]
pub struct Experiment {
    pub topology: TopologyDescription,
    pub plan: TrafficPlan,
    pub protocol: Protocol,
    pub pool_expiration: u64,
}

impl Experiment {
    pub fn new(topology: TopologyDescription, plan: TrafficPlan, protocol: Protocol) -> Self {
        Self {
            topology,
            plan,
            protocol,
            pool_expiration: EngineConfig::default().pool_expiration,
        }
    }

    pub fn with_pool_expiration(mut self, timesteps: u64) -> Self {
        self.pool_expiration = timesteps;
        self
    }

    fn config(&self, seed: Option<u64>) -> EngineConfig {
        EngineConfig {
            protocol: self.protocol,
            pool_expiration: self.pool_expiration,
            seed,
        }
    }

    /// Run once; `None` seeds from the OS
    pub fn run(&self, seed: Option<u64>) -> anyhow::Result<SimulationMetrics> {
        let mut arena = Arena::from_topology(&self.topology, self.config(seed))
            .context("building arena")?;
        let mut ids = PacketIdSource::new();
        let metrics = arena
            .simulate(&mut ids, &self.plan)
            .with_context(|| format!("simulating {}", self.protocol))?;
        Ok(metrics)
    }

    /// Run `trials` seeded trials in parallel, in trial order
    pub fn run_trials(&self, trials: usize, base_seed: u64) -> anyhow::Result<Vec<SimulationMetrics>> {
        info!(protocol = %self.protocol, trials, base_seed, "running trials");
        (0..trials)
            .into_par_iter()
            .map(|trial| {
                let seed = base_seed.wrapping_add(trial as u64);
                debug!(protocol = %self.protocol, trial, seed, "trial started");
                self.run(Some(seed))
                    .with_context(|| format!("trial {} (seed {})", trial, seed))
            })
            .collect()
    }
}

/// Spread of a batch of trials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSummary {
    pub protocol: Protocol,
    pub trials: usize,
    pub mean_throughput: f64,
    pub min_throughput: f64,
    pub max_throughput: f64,
    pub mean_successes: f64,
    pub mean_coded_transmissions: f64,
}

impl TrialSummary {
    /// `None` for an empty batch
    pub fn from_trials(protocol: Protocol, runs: &[SimulationMetrics]) -> Option<Self> {
        if runs.is_empty() {
            return None;
        }
        let count = runs.len() as f64;
        let throughputs: Vec<f64> = runs.iter().map(SimulationMetrics::overall_throughput).collect();

        Some(Self {
            protocol,
            trials: runs.len(),
            mean_throughput: throughputs.iter().sum::<f64>() / count,
            min_throughput: throughputs.iter().copied().fold(f64::INFINITY, f64::min),
            max_throughput: throughputs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean_successes: runs.iter().map(|r| r.total_successes() as f64).sum::<f64>() / count,
            mean_coded_transmissions: runs
                .iter()
                .map(|r| r.total_coded_transmissions() as f64)
                .sum::<f64>()
                / count,
        })
    }
}

impl std::fmt::Display for TrialSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:<18} trials={:<4} throughput mean={:.4} min={:.4} max={:.4}  successes={:.1}  coded={:.1}",
            self.protocol.to_string(),
            self.trials,
            self.mean_throughput,
            self.min_throughput,
            self.max_throughput,
            self.mean_successes,
            self.mean_coded_transmissions,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn experiment(protocol: Protocol) -> Experiment {
        let topology = TopologyDescription::grid(3, 3, 1.0, 1.5, 2);
        let plan = TrafficPlan::new(40, "user", "user").with_send_probability(0.2);
        Experiment::new(topology, plan, protocol)
    }

    #[test]
    fn test_trials_are_reproducible() {
        let experiment = experiment(Protocol::NetworkCoding);
        let first = experiment.run_trials(4, 100).unwrap();
        let second = experiment.run_trials(4, 100).unwrap();

        assert_eq!(first.len(), 4);
        assert_eq!(first, second);
        // Trial 2 of the batch is the same run as a lone trial with its seed
        assert_eq!(first[2], experiment.run(Some(102)).unwrap());
    }

    #[test]
    fn test_unknown_class_fails_the_batch() {
        let mut experiment = experiment(Protocol::StoreAndForward);
        experiment.plan.sender_class = "router".to_string();
        let error = experiment.run_trials(2, 0).unwrap_err();
        assert!(format!("{:#}", error).contains("unknown hierarchy class"));
    }

    #[test]
    fn test_sample_topologies_run() {
        let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("topologies");
        for name in ["alice_and_bob", "hidden_terminal", "grid", "wheel"] {
            let topology = TopologyDescription::from_path(dir.join(format!("{}.json", name)))
                .unwrap_or_else(|e| panic!("{}: {}", name, e));
            let plan = TrafficPlan::new(20, "user", "user").with_send_probability(0.5);
            for protocol in [Protocol::NetworkCoding, Protocol::StoreAndForward] {
                let metrics = Experiment::new(topology.clone(), plan.clone(), protocol)
                    .run(Some(3))
                    .unwrap();
                assert_eq!(metrics.timesteps, 20);
            }
        }
    }

    #[test]
    fn test_summary_spread() {
        let runs = experiment(Protocol::StoreAndForward).run_trials(3, 7).unwrap();
        let summary = TrialSummary::from_trials(Protocol::StoreAndForward, &runs).unwrap();

        assert_eq!(summary.trials, 3);
        assert!(summary.min_throughput <= summary.mean_throughput);
        assert!(summary.mean_throughput <= summary.max_throughput);
        assert!(TrialSummary::from_trials(Protocol::StoreAndForward, &[]).is_none());
    }
}
