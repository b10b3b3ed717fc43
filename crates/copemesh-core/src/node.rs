//! Mesh node: per-neighbor queues, packet pool, neighbor knowledge and the
//! packet admission state machine
//!
//! A node learns about packets in three ways: it originates them, it releases a
//! response after the processing delay, or it decodes them from a coded
//! transmission heard on one of its links. Every decoded packet goes through
//! [`Node::admit`], which decides whether the node is the end of the packet's
//! journey, its destination, a relay on its path, or just an overhearing
//! bystander.
//!
//! Pool entries carry the timestep they were admitted at. The end-of-step
//! cleanup treats several entries sharing the current timestep as an undetected
//! collision and discards them together with the responses staged this step.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::Protocol;
use crate::error::{EngineError, EngineResult};
use crate::link::{LinkId, Position};
use crate::packet::{CodedTransmission, NodeId, Packet, PacketId, PacketKey, ReceptionReport};
use crate::pool::PacketPool;
use crate::touch_order::TouchOrder;

/// A packet waiting in a neighbor queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedPacket {
    pub packet: Packet,
    pub enqueued_at: u64,
}

/// How [`Node::admit`] classified a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Admission {
    /// Response reached its requester, or an id this node sent came back
    Terminal,
    /// New request queued towards its first hop
    Originated { next_hop: NodeId },
    /// Request reached its destination; a response is staged
    Destination { response_due: u64 },
    /// Request reached a destination that already answered it
    Duplicate,
    /// Node is not on the path; pool only
    Overheard,
    /// Node relays the packet to `next_hop`
    Forwarded { next_hop: NodeId },
}

/// Outcome of [`Node::receive`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decode {
    /// Every packet in the batch was already held (reception report only)
    AlreadyKnown,
    /// More than one packet was missing; the batch is discarded
    Undecodable { unknown: usize },
    /// Exactly one packet was missing and has been recovered
    Decoded { key: PacketKey, admission: Admission },
}

/// Summary of an end-of-step cleanup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cleanup {
    /// Pool entries of this timestep discarded as a collision
    pub rolled_back: usize,
    /// Staged responses dropped with them
    pub dropped: usize,
    /// Responses moved from staging into the pending schedule
    pub committed: usize,
    /// Pool entries dropped by age
    pub expired: usize,
}

/// One entry of the coding history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodingRecord {
    pub ids: Vec<PacketId>,
    pub timestep: u64,
}

/// Per-node protocol parameters shared by every node of an arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSettings {
    pub protocol: Protocol,
    pub response_wait: u64,
    pub pool_expiration: u64,
}

/// A radio node of the mesh
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    address: String,
    class: String,
    position: Position,
    range: f64,
    pub(crate) settings: NodeSettings,

    pub(crate) links: BTreeMap<NodeId, LinkId>,
    pub(crate) queues: BTreeMap<NodeId, VecDeque<QueuedPacket>>,
    pub(crate) pool: PacketPool,
    pub(crate) knowledge: BTreeMap<NodeId, BTreeSet<PacketKey>>,
    pub(crate) knowledge_order: TouchOrder<NodeId>,

    staged: Vec<(u64, Packet)>,
    pending_responses: BTreeMap<u64, Vec<Packet>>,
    answered: HashSet<PacketId>,
    emitted: HashSet<PacketId>,

    sent_log: BTreeMap<PacketId, u64>,
    received_log: BTreeMap<PacketId, u64>,
    received_count: u64,
    pub(crate) coding_history: Vec<CodingRecord>,
}

impl Node {
    pub fn new(
        id: NodeId,
        address: impl Into<String>,
        class: impl Into<String>,
        position: Position,
        range: f64,
        settings: NodeSettings,
    ) -> Self {
        Self {
            id,
            address: address.into(),
            class: class.into(),
            position,
            range,
            settings,
            links: BTreeMap::new(),
            queues: BTreeMap::new(),
            pool: PacketPool::new(),
            knowledge: BTreeMap::new(),
            knowledge_order: TouchOrder::new(),
            staged: Vec::new(),
            pending_responses: BTreeMap::new(),
            answered: HashSet::new(),
            emitted: HashSet::new(),
            sent_log: BTreeMap::new(),
            received_log: BTreeMap::new(),
            received_count: 0,
            coding_history: Vec::new(),
        }
    }

    /// Register the link towards `neighbor` and create its queue
    pub fn add_link(&mut self, neighbor: NodeId, link: LinkId) {
        self.links.insert(neighbor, link);
        self.queues.entry(neighbor).or_default();
        self.knowledge.entry(neighbor).or_default();
        self.knowledge_order.push_back(neighbor);
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    /// Classify `packet` and apply its effect on this node
    pub fn admit(&mut self, packet: Packet, timestep: u64) -> EngineResult<Admission> {
        let id = packet.id();

        if self.sent_log.contains_key(&id) || (!packet.is_request() && packet.final_hop() == self.id)
        {
            self.received_log.insert(id, timestep);
            self.received_count += 1;
            trace!(node = %self.address, packet = %packet.key(), timestep, "terminal reception");
            return Ok(Admission::Terminal);
        }

        let key = packet.key();
        let admission = if packet.is_request() && packet.origin() == self.id {
            let next_hop = packet.path()[1];
            self.sent_log.insert(id, timestep);
            self.enqueue(next_hop, packet, timestep)?;
            Admission::Originated { next_hop }
        } else if packet.is_request() && packet.final_hop() == self.id {
            if self.answered.contains(&id) {
                trace!(node = %self.address, packet = %key, "request already answered");
                Admission::Duplicate
            } else {
                let response_due = timestep + self.settings.response_wait;
                self.staged.push((response_due, packet.reverse()?));
                self.received_count += 1;
                Admission::Destination { response_due }
            }
        } else if !packet.contains(self.id) {
            Admission::Overheard
        } else {
            match packet.next_hop_after(self.id) {
                Some(next_hop) => {
                    self.enqueue(next_hop, packet, timestep)?;
                    Admission::Forwarded { next_hop }
                }
                None => Admission::Overheard,
            }
        };

        self.pool.insert(key, timestep);
        trace!(node = %self.address, packet = %key, timestep, ?admission, "admitted");
        Ok(admission)
    }

    fn enqueue(&mut self, next_hop: NodeId, packet: Packet, timestep: u64) -> EngineResult<()> {
        let queue = self
            .queues
            .get_mut(&next_hop)
            .ok_or_else(|| EngineError::NotANeighbor {
                node: self.address.clone(),
                neighbor: next_hop,
            })?;
        queue.push_back(QueuedPacket {
            packet,
            enqueued_at: timestep,
        });
        Ok(())
    }

    /// Release every committed response due at or before `timestep`
    pub fn learn_timestep(&mut self, timestep: u64) -> EngineResult<Vec<PacketId>> {
        let due: Vec<u64> = self
            .pending_responses
            .range(..=timestep)
            .map(|(due, _)| *due)
            .collect();

        let mut released = Vec::new();
        for slot in due {
            for response in self.pending_responses.remove(&slot).unwrap_or_default() {
                released.push(response.id());
                self.emit_response(response, timestep)?;
            }
        }
        Ok(released)
    }

    fn emit_response(&mut self, response: Packet, timestep: u64) -> EngineResult<()> {
        let id = response.id();
        if !self.emitted.insert(id) {
            return Err(EngineError::ResurrectedPacket {
                node: self.address.clone(),
                id,
            });
        }
        let key = response.key();
        let next_hop = response.path()[1];
        self.enqueue(next_hop, response, timestep)?;
        self.pool.insert(key, timestep);
        debug!(node = %self.address, packet = %key, timestep, "response released");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Decoding
    // ------------------------------------------------------------------

    /// Take in a coded transmission heard on one of this node's links
    pub fn receive(&mut self, transmission: &CodedTransmission, timestep: u64) -> EngineResult<Decode> {
        self.learn_report(transmission.report());

        let mut unknown: Option<&Packet> = None;
        let mut unknown_count = 0;
        for packet in transmission.packets() {
            let key = packet.key();
            if self.pool.contains(&key) {
                continue;
            }
            if packet.is_request() {
                // Own requests stay known for as long as they are logged as sent
                if let Some(sent_at) = self.sent_log.get(&packet.id()).copied() {
                    self.pool.insert(key, sent_at);
                    continue;
                }
            }
            // Still waiting here after its pool entry aged out or was discarded
            if self.is_queued(&key) {
                continue;
            }
            unknown_count += 1;
            if unknown.is_none() {
                unknown = Some(packet);
            }
        }

        let packet = match (unknown_count, unknown) {
            (1, Some(packet)) => packet.clone(),
            (0, _) => return Ok(Decode::AlreadyKnown),
            (count, _) => {
                trace!(
                    node = %self.address,
                    sender = %transmission.sender(),
                    unknown = count,
                    "batch not decodable"
                );
                return Ok(Decode::Undecodable { unknown: count });
            }
        };

        let key = packet.key();
        self.pool.insert(key, timestep);
        let admission = self.admit(packet, timestep)?;
        Ok(Decode::Decoded { key, admission })
    }

    /// Replace what this node believes the report's sender holds
    pub fn learn_report(&mut self, report: &ReceptionReport) {
        let sender = report.sender();
        self.knowledge.insert(sender, report.held().clone());
        self.knowledge_order.push_back(sender);
    }

    /// Whether `key` is waiting in one of this node's queues
    pub fn is_queued(&self, key: &PacketKey) -> bool {
        self.queues
            .values()
            .any(|queue| queue.iter().any(|entry| entry.packet.key() == *key))
    }

    // ------------------------------------------------------------------
    // End-of-step cleanup
    // ------------------------------------------------------------------

    /// Resolve this timestep's admissions and age the pool.
    ///
    /// With coding enabled, more than one pool entry stamped with `timestep`
    /// means overheard transmissions overlapped here: those entries are
    /// discarded and the responses staged this step are dropped. Otherwise
    /// staged responses are committed. Pool entries older than the expiration
    /// are dropped in both protocols.
    pub fn cleanup(&mut self, timestep: u64) -> Cleanup {
        let mut outcome = Cleanup::default();

        if self.settings.protocol.coding_enabled() && self.pool.count_at(timestep) > 1 {
            outcome.rolled_back = self.pool.discard_at(timestep);
            outcome.dropped = self.staged.len();
            self.staged.clear();
            debug!(
                node = %self.address,
                timestep,
                discarded = outcome.rolled_back,
                dropped = outcome.dropped,
                "pool collision, discarding timestep"
            );
        } else {
            for (due, response) in self.staged.drain(..) {
                self.answered.insert(response.id());
                self.pending_responses.entry(due).or_default().push(response);
                outcome.committed += 1;
            }
        }

        outcome.expired = self.pool.expire(timestep, self.settings.pool_expiration);
        outcome
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn range(&self) -> f64 {
        self.range
    }

    pub fn protocol(&self) -> Protocol {
        self.settings.protocol
    }

    /// Whether `position` lies within this node's own transmission range
    pub fn in_range(&self, position: &Position) -> bool {
        self.position.distance(position) <= self.range
    }

    pub fn is_linked(&self, neighbor: NodeId) -> bool {
        self.links.contains_key(&neighbor)
    }

    pub fn neighbors(&self) -> Vec<NodeId> {
        self.links.keys().copied().collect()
    }

    pub fn links(&self) -> impl Iterator<Item = (NodeId, LinkId)> + '_ {
        self.links.iter().map(|(neighbor, link)| (*neighbor, *link))
    }

    /// Packets queued towards `neighbor`, head first
    pub fn queue_state(&self, neighbor: NodeId) -> EngineResult<Vec<&Packet>> {
        self.queues
            .get(&neighbor)
            .map(|queue| queue.iter().map(|entry| &entry.packet).collect())
            .ok_or_else(|| EngineError::NotANeighbor {
                node: self.address.clone(),
                neighbor,
            })
    }

    pub fn all_queues(&self) -> &BTreeMap<NodeId, VecDeque<QueuedPacket>> {
        &self.queues
    }

    /// Total number of queued packets across all neighbors
    pub fn queued_len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn has_queued(&self) -> bool {
        self.queues.values().any(|queue| !queue.is_empty())
    }

    pub fn packet_pool(&self) -> &PacketPool {
        &self.pool
    }

    /// Identities `neighbor` reported holding in its latest reception report
    pub fn knowledge_of(&self, neighbor: NodeId) -> Option<&BTreeSet<PacketKey>> {
        self.knowledge.get(&neighbor)
    }

    /// Order in which the coding search visits neighbors
    pub fn knowledge_order(&self) -> Vec<NodeId> {
        self.knowledge_order.to_vec()
    }

    pub fn pending_responses(&self) -> &BTreeMap<u64, Vec<Packet>> {
        &self.pending_responses
    }

    pub fn sent_log(&self) -> &BTreeMap<PacketId, u64> {
        &self.sent_log
    }

    pub fn received_log(&self) -> &BTreeMap<PacketId, u64> {
        &self.received_log
    }

    /// Packets for which this node was the final hop
    pub fn received_count(&self) -> u64 {
        self.received_count
    }

    pub fn coding_history(&self) -> &[CodingRecord] {
        &self.coding_history
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Node {} at ({}, {}) of class {}",
            self.address, self.position.x, self.position.y, self.class
        )
    }
}
