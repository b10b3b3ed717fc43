//! Packet model
//!
//! Requests travel from `path[0]` to the last hop; the destination answers with a
//! response that shares the request's id and walks the reversed path. Coded
//! transmissions batch packets for different next hops together with the sender's
//! reception report.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Index of a node in the arena registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier shared by a request and its response
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PacketId(pub u64);

impl std::fmt::Display for PacketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Monotonic packet id counter owned by whoever drives the arena
#[derive(Debug, Clone, Default)]
pub struct PacketIdSource {
    next: u64,
}

impl PacketIdSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting at `first`
    pub fn starting_at(first: u64) -> Self {
        Self { next: first }
    }

    pub fn next_id(&mut self) -> PacketId {
        let id = PacketId(self.next);
        self.next += 1;
        id
    }

    /// Number of ids handed out so far (relative to zero)
    pub fn issued(&self) -> u64 {
        self.next
    }
}

/// Pool identity of a packet: a request and its response are distinct entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PacketKey {
    pub id: PacketId,
    pub is_request: bool,
}

impl std::fmt::Display for PacketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_request { "req" } else { "resp" };
        write!(f, "{}/{}", self.id, kind)
    }
}

/// A request or response addressed along a fixed path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Packet {
    id: PacketId,
    is_request: bool,
    path: Vec<NodeId>,
}

impl Packet {
    /// Create a request travelling along `path` (originator first)
    pub fn request(id: PacketId, path: Vec<NodeId>) -> EngineResult<Self> {
        if path.len() < 2 {
            return Err(EngineError::PathTooShort(path.len()));
        }
        Ok(Self {
            id,
            is_request: true,
            path,
        })
    }

    pub fn id(&self) -> PacketId {
        self.id
    }

    pub fn is_request(&self) -> bool {
        self.is_request
    }

    pub fn path(&self) -> &[NodeId] {
        &self.path
    }

    pub fn key(&self) -> PacketKey {
        PacketKey {
            id: self.id,
            is_request: self.is_request,
        }
    }

    /// First hop of the path
    pub fn origin(&self) -> NodeId {
        self.path[0]
    }

    /// Last hop of the path
    pub fn final_hop(&self) -> NodeId {
        self.path[self.path.len() - 1]
    }

    /// Hop following `node` in the path, if `node` is on it and not last
    pub fn next_hop_after(&self, node: NodeId) -> Option<NodeId> {
        let position = self.path.iter().position(|hop| *hop == node)?;
        self.path.get(position + 1).copied()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.path.contains(&node)
    }

    /// Build the response to this request: same id, reversed path
    pub fn reverse(&self) -> EngineResult<Packet> {
        if !self.is_request {
            return Err(EngineError::ReverseOfResponse(self.id));
        }
        let mut path = self.path.clone();
        path.reverse();
        Ok(Packet {
            id: self.id,
            is_request: false,
            path,
        })
    }
}

/// Snapshot of the packet identities held in a sender's pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceptionReport {
    sender: NodeId,
    held: BTreeSet<PacketKey>,
}

impl ReceptionReport {
    pub fn new(sender: NodeId, held: BTreeSet<PacketKey>) -> Self {
        Self { sender, held }
    }

    pub fn sender(&self) -> NodeId {
        self.sender
    }

    pub fn held(&self) -> &BTreeSet<PacketKey> {
        &self.held
    }

    pub fn into_held(self) -> BTreeSet<PacketKey> {
        self.held
    }
}

/// One radio transmission: a batch of packets plus the sender's reception report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodedTransmission {
    packets: Vec<Packet>,
    report: ReceptionReport,
}

impl CodedTransmission {
    pub fn new(packets: Vec<Packet>, report: ReceptionReport) -> EngineResult<Self> {
        if packets.is_empty() {
            return Err(EngineError::EmptyBatch);
        }
        Ok(Self { packets, report })
    }

    pub fn sender(&self) -> NodeId {
        self.report.sender()
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    pub fn report(&self) -> &ReceptionReport {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn ids(&self) -> Vec<PacketId> {
        self.packets.iter().map(Packet::id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(ids: &[usize]) -> Vec<NodeId> {
        ids.iter().copied().map(NodeId).collect()
    }

    #[test]
    fn test_request_accessors() {
        let hops = path(&(0..100).collect::<Vec<_>>());
        let packet = Packet::request(PacketId(300), hops.clone()).unwrap();

        assert_eq!(packet.path(), hops.as_slice());
        assert!(packet.is_request());
        assert_eq!(packet.id(), PacketId(300));
        assert_eq!(packet.origin(), NodeId(0));
        assert_eq!(packet.final_hop(), NodeId(99));
    }

    #[test]
    fn test_reverse_shares_id_and_reverses_path() {
        let request = Packet::request(PacketId(7), path(&[1, 4, 2])).unwrap();
        let response = request.reverse().unwrap();

        assert_eq!(response.id(), request.id());
        assert!(!response.is_request());
        assert_eq!(response.path(), path(&[2, 4, 1]).as_slice());
        assert_ne!(response.key(), request.key());
    }

    #[test]
    fn test_reverse_of_response_is_rejected() {
        let response = Packet::request(PacketId(7), path(&[1, 2]))
            .unwrap()
            .reverse()
            .unwrap();

        assert_eq!(
            response.reverse(),
            Err(EngineError::ReverseOfResponse(PacketId(7)))
        );
    }

    #[test]
    fn test_short_path_is_rejected() {
        assert_eq!(
            Packet::request(PacketId(1), path(&[3])),
            Err(EngineError::PathTooShort(1))
        );
    }

    #[test]
    fn test_next_hop_after() {
        let packet = Packet::request(PacketId(1), path(&[5, 6, 7])).unwrap();
        assert_eq!(packet.next_hop_after(NodeId(5)), Some(NodeId(6)));
        assert_eq!(packet.next_hop_after(NodeId(6)), Some(NodeId(7)));
        assert_eq!(packet.next_hop_after(NodeId(7)), None);
        assert_eq!(packet.next_hop_after(NodeId(9)), None);
    }

    #[test]
    fn test_id_source_is_monotonic() {
        let mut ids = PacketIdSource::starting_at(10);
        assert_eq!(ids.next_id(), PacketId(10));
        assert_eq!(ids.next_id(), PacketId(11));
        assert_eq!(ids.issued(), 12);
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        let report = ReceptionReport::new(NodeId(0), BTreeSet::new());
        assert_eq!(
            CodedTransmission::new(Vec::new(), report),
            Err(EngineError::EmptyBatch)
        );
    }
}
