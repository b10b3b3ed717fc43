//! # copemesh core
//!
//! Discrete-event engine for comparing store-and-forward relaying with
//! opportunistic network coding on a probabilistic wireless mesh.
//!
//! ## Model
//!
//! - **Time** advances in discrete steps. In each step the arena picks the nodes
//!   that may transmit (round-robin with carrier sense), detects hidden-terminal
//!   collisions, and broadcasts each sender's batch over all of its links.
//!
//! - **Links** deliver with probability `1 - 0.8 * distance / range`, one draw
//!   per link per transmission.
//!
//! - **Nodes** keep one queue per neighbor and a packet pool of everything
//!   recently seen. Reception reports attached to every transmission tell each
//!   neighbor what the sender holds.
//!
//! - **Coding**: a sender may XOR the heads of several neighbor queues into one
//!   transmission when every recipient already holds all but its own packet.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use copemesh_core::{Arena, Delivery, EngineConfig, PacketIdSource, TopologyDescription};
//!
//! let topology = TopologyDescription::from_path("topologies/alice_and_bob.json")?;
//! let mut arena = Arena::from_topology(&topology, EngineConfig::coding().with_seed(1))?;
//! let mut ids = PacketIdSource::new();
//!
//! arena.send_between(&mut ids, "alice", "bob")?;
//! arena.run(10, Delivery::Probabilistic)?;
//! ```
//!
//! ## Modules
//!
//! - [`packet`]: packets, reception reports and coded transmissions
//! - [`link`]: positions and the probabilistic link model
//! - [`node`]: admission, decoding and end-of-step cleanup
//! - [`coding`]: the coding-opportunity search
//! - [`arena`]: construction, scheduling and traffic generation
//! - [`routing`]: most reliable path search
//! - [`topology`]: JSON topology descriptions
//! - [`metrics`]: per-node round-trip metrics

pub mod arena;
pub mod coding;
pub mod config;
pub mod error;
pub mod link;
pub mod metrics;
pub mod node;
pub mod packet;
pub mod pool;
pub mod routing;
pub mod topology;
pub mod touch_order;

pub use arena::{Arena, StepReport};
pub use coding::Outgoing;
pub use config::{EngineConfig, Protocol, TrafficPlan};
pub use error::{EngineError, EngineResult, TopologyError};
pub use link::{Delivery, Link, LinkEnd, LinkId, Position, success_probability};
pub use metrics::{NodeMetrics, SimulationMetrics};
pub use node::{Admission, Cleanup, CodingRecord, Decode, Node, NodeSettings, QueuedPacket};
pub use packet::{
    CodedTransmission, NodeId, Packet, PacketId, PacketIdSource, PacketKey, ReceptionReport,
};
pub use pool::PacketPool;
pub use topology::{HierarchySpec, NodeSpec, TopologyDescription};
pub use touch_order::TouchOrder;
