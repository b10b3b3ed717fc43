//! # copemesh simulation
//!
//! Experiment driver for the copemesh engine.
//!
//! ## Overview
//!
//! Loads a JSON topology, runs traffic over it with one or both relaying
//! protocols, and aggregates the per-node metrics into reports:
//!
//! - **Experiments** (`trials.rs`): one protocol on one topology, run once or as a
//!   batch of independently seeded trials on the rayon pool
//! - **Reports** (`report.rs`): per-protocol summaries written as JSON
//!
//! Sample topologies live in `simulation/topologies/`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use copemesh_core::{Protocol, TopologyDescription, TrafficPlan};
//! use copemesh_simulation::{Experiment, ProtocolReport};
//!
//! let topology = TopologyDescription::from_path("topologies/alice_and_bob.json")?;
//! let plan = TrafficPlan::new(20, "user", "user").with_send_probability(1.0);
//!
//! for protocol in [Protocol::NetworkCoding, Protocol::StoreAndForward] {
//!     let metrics = Experiment::new(topology.clone(), plan.clone(), protocol).run(Some(1))?;
//!     println!("{}", ProtocolReport::from_metrics(&metrics));
//! }
//! ```

pub mod report;
pub mod trials;

pub use report::ProtocolReport;
pub use trials::{Experiment, TrialSummary};
