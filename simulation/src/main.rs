//! copemesh - wireless mesh relaying experiments
//!
//! Runs store-and-forward and network-coded relaying over a JSON topology and
//! reports throughput and latency.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use copemesh_core::{Delivery, Protocol, TopologyDescription, TrafficPlan};
use copemesh_simulation::{Experiment, ProtocolReport, TrialSummary};

#[derive(Parser)]
#[command(
    name = "copemesh",
    about = "Wireless mesh simulation comparing store-and-forward and network coding",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one protocol once and print its report
    Run {
        /// Topology JSON file
        topology: PathBuf,

        /// Relaying protocol
        #[arg(short, long, value_enum, default_value = "coding")]
        protocol: ProtocolArg,

        #[command(flatten)]
        traffic: TrafficArgs,

        /// RNG seed (random when omitted)
        #[arg(short, long)]
        seed: Option<u64>,
    },

    /// Run both protocols with the same seed and write their reports
    Compare {
        /// Topology JSON file
        topology: PathBuf,

        /// Directory receiving `{topology}/{protocol}_metrics.json`
        #[arg(short, long, default_value = "simulation_results")]
        out: PathBuf,

        #[command(flatten)]
        traffic: TrafficArgs,

        /// RNG seed shared by both runs
        #[arg(short, long, default_value = "0")]
        seed: u64,
    },

    /// Run independent seeded trials of both protocols in parallel
    Trials {
        /// Topology JSON file
        topology: PathBuf,

        /// Trials per protocol
        #[arg(short = 'n', long, default_value = "16")]
        trials: usize,

        #[command(flatten)]
        traffic: TrafficArgs,

        /// Seed of the first trial; trial i uses seed + i
        #[arg(short, long, default_value = "0")]
        seed: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProtocolArg {
    Coding,
    StoreAndForward,
}

impl From<ProtocolArg> for Protocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Coding => Protocol::NetworkCoding,
            ProtocolArg::StoreAndForward => Protocol::StoreAndForward,
        }
    }
}

#[derive(Args)]
struct TrafficArgs {
    /// Number of timesteps to simulate
    #[arg(short, long, default_value = "20")]
    timesteps: u64,

    /// Hierarchy class whose nodes send requests
    #[arg(long, default_value = "user")]
    sender_class: String,

    /// Hierarchy class whose nodes are addressed
    #[arg(long, default_value = "user")]
    destination_class: String,

    /// Per-timestep probability that a sender emits a burst
    #[arg(long, default_value = "0.1")]
    send_probability: f64,

    /// Largest burst of requests per send decision
    #[arg(long, default_value = "1")]
    max_burst: u32,

    /// Skip link probability draws
    #[arg(long)]
    guaranteed: bool,

    /// Timesteps a packet pool entry survives
    #[arg(long, default_value = "10")]
    pool_expiration: u64,
}

impl TrafficArgs {
    fn plan(&self) -> TrafficPlan {
        let delivery = if self.guaranteed {
            Delivery::Guaranteed
        } else {
            Delivery::Probabilistic
        };
        TrafficPlan::new(self.timesteps, &self.sender_class, &self.destination_class)
            .with_send_probability(self.send_probability)
            .with_max_burst(self.max_burst)
            .with_delivery(delivery)
    }

    fn experiment(&self, topology: &TopologyDescription, protocol: Protocol) -> Experiment {
        Experiment::new(topology.clone(), self.plan(), protocol)
            .with_pool_expiration(self.pool_expiration)
    }
}

const PROTOCOLS: [Protocol; 2] = [Protocol::NetworkCoding, Protocol::StoreAndForward];

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            topology,
            protocol,
            traffic,
            seed,
        } => {
            let description = load_topology(&topology)?;
            let metrics = traffic.experiment(&description, protocol.into()).run(seed)?;
            println!("{}", ProtocolReport::from_metrics(&metrics));
        }
        Commands::Compare {
            topology,
            out,
            traffic,
            seed,
        } => {
            let description = load_topology(&topology)?;
            let name = topology_name(&topology);
            for protocol in PROTOCOLS {
                let metrics = traffic.experiment(&description, protocol).run(Some(seed))?;
                let report = ProtocolReport::from_metrics(&metrics);
                let path = report.write_json(&out, &name)?;
                println!("{}", report);
                info!(path = %path.display(), "report written");
            }
        }
        Commands::Trials {
            topology,
            trials,
            traffic,
            seed,
        } => {
            let description = load_topology(&topology)?;
            for protocol in PROTOCOLS {
                let runs = traffic.experiment(&description, protocol).run_trials(trials, seed)?;
                match TrialSummary::from_trials(protocol, &runs) {
                    Some(summary) => println!("{}", summary),
                    None => println!("{}: no trials run", protocol),
                }
            }
        }
    }

    Ok(())
}

fn load_topology(path: &Path) -> anyhow::Result<TopologyDescription> {
    TopologyDescription::from_path(path)
        .with_context(|| format!("loading topology {}", path.display()))
}

/// File stem of the topology, used as the result directory name
fn topology_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "topology".to_string())
}
