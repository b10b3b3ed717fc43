//! Error types for the copemesh engine
//!
//! Two families of failures exist. Precondition violations are contract breaches
//! by the caller (reversing a response, transmitting from a node that is not a
//! link endpoint, asking for the queue of a non-neighbor). The internal-consistency
//! violation [`EngineError::ResurrectedPacket`] means the admission or coding
//! invariants were broken and the run must stop.
//!
//! Normal simulation outcomes (no route, empty queue, a failed probability draw,
//! a collision drop) are never errors.

use thiserror::Error;

use crate::packet::{NodeId, PacketId};

/// Errors raised by the simulation engine
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// `reverse()` is only defined on requests
    #[error("cannot reverse response packet {0}")]
    ReverseOfResponse(PacketId),

    /// A packet path needs an originator and a destination
    #[error("packet path must contain at least two hops, got {0}")]
    PathTooShort(usize),

    /// A link was asked to transmit on behalf of a node it does not connect
    #[error("node {sender} is not an endpoint of link {a} <-> {b}")]
    NotAnEndpoint { sender: NodeId, a: NodeId, b: NodeId },

    /// Queue state was requested for a node that is not a neighbor
    #[error("node {node} has no queue towards non-neighbor {neighbor}")]
    NotANeighbor { node: String, neighbor: NodeId },

    /// A node address or id that the arena does not know
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// A hierarchy class with no nodes in the arena
    #[error("unknown hierarchy class: {0}")]
    UnknownClass(String),

    /// A coded transmission must carry at least one packet
    #[error("coded transmission must carry at least one packet")]
    EmptyBatch,

    /// Invalid simulation option
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// A packet still awaiting transmission at a node reappeared as a new decode
    /// target, or a response was emitted twice for the same request
    #[error("resurrected packet {id} at node {node}")]
    ResurrectedPacket { node: String, id: PacketId },
}

/// Errors raised while validating or loading a topology description
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("rule references unknown hierarchy class: {0}")]
    UnknownClass(String),

    #[error("duplicate hierarchy class: {0}")]
    DuplicateClass(String),

    #[error("duplicate node address: {0}")]
    DuplicateNode(String),

    #[error("hierarchy {class} has invalid range {range}")]
    InvalidRange { class: String, range: f64 },

    #[error("response wait time must be at least one timestep")]
    InvalidResponseWait,

    #[error("invalid engine configuration: {0}")]
    Config(#[from] EngineError),

    #[error("topology I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("topology parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
