//! Coding-opportunity search
//!
//! A sender picks its primary next hop (oldest queue head) and, with coding
//! enabled, greedily adds the head of every other neighbor queue whose recipient
//! can decode the batch. A recipient decodes when it already holds every batch
//! member except the one addressed to it, so a candidate joins only if its
//! neighbor knows everything already batched and every committed neighbor knows
//! the candidate.

use tracing::{debug, trace};

use crate::error::EngineResult;
use crate::node::{CodingRecord, Node};
use crate::packet::{CodedTransmission, NodeId, Packet, ReceptionReport};

/// What a chosen sender puts on the medium this timestep
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Nothing queued
    Idle,
    /// The primary packet was dequeued but its reception is corrupted
    Garbled { packet: Packet, next_hop: NodeId },
    /// A batch to broadcast on every link of the sender
    Transmit {
        transmission: CodedTransmission,
        next_hops: Vec<NodeId>,
    },
}

impl Node {
    /// Neighbor whose queue head was enqueued first; ties go to the lowest id
    pub fn primary_next_hop(&self) -> Option<NodeId> {
        self.queues
            .iter()
            .filter_map(|(neighbor, queue)| queue.front().map(|head| (head.enqueued_at, *neighbor)))
            .min()
            .map(|(_, neighbor)| neighbor)
    }

    /// Dequeue the next batch and wrap it with this node's reception report.
    ///
    /// `collided` marks the primary next hop as a hidden-terminal target for this
    /// timestep: the primary packet is consumed and nothing is transmitted.
    pub fn build_transmission(&mut self, collided: bool, timestep: u64) -> EngineResult<Outgoing> {
        let Some(primary) = self.primary_next_hop() else {
            return Ok(Outgoing::Idle);
        };
        let Some(head) = self.queues.get_mut(&primary).and_then(|queue| queue.pop_front()) else {
            return Ok(Outgoing::Idle);
        };

        if collided {
            debug!(
                node = %self.address(),
                packet = %head.packet.key(),
                next_hop = %primary,
                timestep,
                "transmission garbled at next hop"
            );
            return Ok(Outgoing::Garbled {
                packet: head.packet,
                next_hop: primary,
            });
        }

        let mut batch = vec![head.packet];
        let mut next_hops = vec![primary];

        if self.settings.protocol.coding_enabled() {
            for neighbor in self.knowledge_order.to_vec() {
                if next_hops.contains(&neighbor) {
                    continue;
                }
                let Some(candidate) = self
                    .queues
                    .get(&neighbor)
                    .and_then(|queue| queue.front())
                    .map(|entry| entry.packet.key())
                else {
                    continue;
                };

                let decodable_there = self
                    .knowledge
                    .get(&neighbor)
                    .is_some_and(|known| batch.iter().all(|packet| known.contains(&packet.key())));
                if !decodable_there {
                    continue;
                }
                let decodable_by_committed = next_hops.iter().all(|hop| {
                    self.knowledge
                        .get(hop)
                        .is_some_and(|known| known.contains(&candidate))
                });
                if !decodable_by_committed {
                    continue;
                }

                if let Some(entry) = self.queues.get_mut(&neighbor).and_then(|queue| queue.pop_front()) {
                    trace!(node = %self.address(), packet = %candidate, next_hop = %neighbor, "coded into batch");
                    batch.push(entry.packet);
                    next_hops.push(neighbor);
                }
            }

            for hop in &next_hops {
                self.knowledge_order.touch(*hop);
            }
        }

        let report = ReceptionReport::new(self.id, self.pool.keys());
        let transmission = CodedTransmission::new(batch, report)?;
        self.coding_history.push(CodingRecord {
            ids: transmission.ids(),
            timestep,
        });
        if transmission.len() > 1 {
            debug!(
                node = %self.address(),
                packets = transmission.len(),
                timestep,
                "coded transmission"
            );
        }

        Ok(Outgoing::Transmit {
            transmission,
            next_hops,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;
    use crate::link::{LinkId, Position};
    use crate::node::NodeSettings;
    use crate::packet::{PacketId, PacketKey};

    /// Relay #1 between #0 and #2
    fn relay(protocol: Protocol) -> Node {
        let settings = NodeSettings {
            protocol,
            response_wait: 2,
            pool_expiration: 10,
        };
        let mut node = Node::new(NodeId(1), "relay", "user", Position::new(1.0, 0.0), 1.5, settings);
        node.add_link(NodeId(0), LinkId(0));
        node.add_link(NodeId(2), LinkId(1));
        node
    }

    fn request(id: u64, hops: &[usize]) -> Packet {
        Packet::request(PacketId(id), hops.iter().copied().map(NodeId).collect()).unwrap()
    }

    fn report(sender: usize, held: &[PacketKey]) -> ReceptionReport {
        ReceptionReport::new(NodeId(sender), held.iter().copied().collect())
    }

    fn batch_of(outgoing: Outgoing) -> Vec<PacketId> {
        match outgoing {
            Outgoing::Transmit { transmission, .. } => transmission.ids(),
            other => panic!("expected a transmission, got {:?}", other),
        }
    }

    #[test]
    fn test_primary_is_oldest_head_then_lowest_id() {
        let mut node = relay(Protocol::StoreAndForward);
        assert_eq!(node.primary_next_hop(), None);

        node.admit(request(1, &[0, 1, 2]), 3).unwrap();
        node.admit(request(2, &[2, 1, 0]), 3).unwrap();
        assert_eq!(node.primary_next_hop(), Some(NodeId(0)));

        node.admit(request(3, &[0, 1, 2]), 1).unwrap();
        // Queue to #2 now holds p1 (t=3) then p3 (t=1); only the head counts
        assert_eq!(node.primary_next_hop(), Some(NodeId(0)));
    }

    #[test]
    fn test_idle_without_packets() {
        let mut node = relay(Protocol::NetworkCoding);
        assert_eq!(node.build_transmission(false, 0).unwrap(), Outgoing::Idle);
        assert!(node.coding_history().is_empty());
    }

    #[test]
    fn test_mutually_known_packets_share_a_transmission() {
        let mut node = relay(Protocol::NetworkCoding);
        let a = request(1, &[0, 1, 2]);
        let b = request(2, &[2, 1, 0]);
        node.admit(a.clone(), 0).unwrap();
        node.admit(b.clone(), 1).unwrap();
        node.learn_report(&report(0, &[a.key()]));
        node.learn_report(&report(2, &[b.key()]));

        let outgoing = node.build_transmission(false, 2).unwrap();
        assert_eq!(batch_of(outgoing), vec![PacketId(1), PacketId(2)]);
        assert_eq!(node.queued_len(), 0);
        assert_eq!(
            node.coding_history(),
            &[CodingRecord {
                ids: vec![PacketId(1), PacketId(2)],
                timestep: 2
            }]
        );
    }

    #[test]
    fn test_candidate_unknown_to_committed_neighbor_waits() {
        let mut node = relay(Protocol::NetworkCoding);
        let a = request(1, &[0, 1, 2]);
        let b = request(2, &[2, 1, 0]);
        node.admit(a.clone(), 0).unwrap();
        node.admit(b.clone(), 1).unwrap();
        // #0 holds A, but #2 never reported B
        node.learn_report(&report(0, &[a.key()]));
        node.learn_report(&report(2, &[]));

        assert_eq!(batch_of(node.build_transmission(false, 2).unwrap()), vec![PacketId(1)]);
        assert_eq!(batch_of(node.build_transmission(false, 3).unwrap()), vec![PacketId(2)]);
    }

    #[test]
    fn test_store_and_forward_never_batches() {
        let mut node = relay(Protocol::StoreAndForward);
        let a = request(1, &[0, 1, 2]);
        let b = request(2, &[2, 1, 0]);
        node.admit(a.clone(), 0).unwrap();
        node.admit(b.clone(), 1).unwrap();
        node.learn_report(&report(0, &[a.key()]));
        node.learn_report(&report(2, &[b.key()]));

        assert_eq!(batch_of(node.build_transmission(false, 2).unwrap()).len(), 1);
        assert_eq!(node.queued_len(), 1);
    }

    #[test]
    fn test_collided_primary_is_consumed_silently() {
        let mut node = relay(Protocol::NetworkCoding);
        node.admit(request(1, &[0, 1, 2]), 0).unwrap();

        let outgoing = node.build_transmission(true, 1).unwrap();
        assert!(matches!(
            outgoing,
            Outgoing::Garbled { next_hop: NodeId(2), .. }
        ));
        assert_eq!(node.queued_len(), 0);
        assert!(node.coding_history().is_empty());
    }

    #[test]
    fn test_included_neighbors_move_to_back() {
        let mut node = relay(Protocol::NetworkCoding);
        let a = request(1, &[0, 1, 2]);
        let b = request(2, &[2, 1, 0]);
        node.admit(a.clone(), 0).unwrap();
        node.admit(b.clone(), 1).unwrap();
        node.learn_report(&report(0, &[a.key()]));
        node.learn_report(&report(2, &[b.key()]));
        assert_eq!(node.knowledge_order(), vec![NodeId(0), NodeId(2)]);

        node.build_transmission(false, 2).unwrap();
        // Primary (#2) touched first, then #0
        assert_eq!(node.knowledge_order(), vec![NodeId(2), NodeId(0)]);
    }

    #[test]
    fn test_report_carries_full_pool() {
        let mut node = relay(Protocol::StoreAndForward);
        node.admit(request(1, &[0, 1, 2]), 0).unwrap();
        node.admit(request(7, &[0, 2]), 0).unwrap();

        match node.build_transmission(false, 1).unwrap() {
            Outgoing::Transmit { transmission, next_hops } => {
                assert_eq!(next_hops, vec![NodeId(2)]);
                assert_eq!(transmission.sender(), NodeId(1));
                assert_eq!(transmission.report().held().len(), 2);
            }
            other => panic!("expected a transmission, got {:?}", other),
        }
    }
}
