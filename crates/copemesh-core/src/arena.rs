//! Arena: the node and link registry plus the per-timestep scheduler
//!
//! Each [`Arena::step`]:
//! 1. Walks the round-robin rotation and picks senders under carrier sense
//! 2. Flags next hops targeted by more than one sender as hidden-terminal collisions
//! 3. Lets every sender build its batch and broadcasts it over all of its links
//! 4. Moves the senders to the back of the rotation
//! 5. Releases due responses on every node
//! 6. Runs the end-of-step cleanup on every node
//!
//! All sender decisions are taken from the state before any queue is touched.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, trace, warn};

use crate::coding::Outgoing;
use crate::config::{EngineConfig, TrafficPlan};
use crate::error::{EngineError, EngineResult, TopologyError};
use crate::link::{Delivery, Link, LinkEnd, LinkId};
use crate::metrics::{NodeMetrics, SimulationMetrics};
use crate::node::{Decode, Node, NodeSettings};
use crate::packet::{NodeId, Packet, PacketId, PacketIdSource};
use crate::routing::most_reliable_path;
use crate::topology::TopologyDescription;
use crate::touch_order::TouchOrder;

/// What happened during one timestep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    pub timestep: u64,
    /// Nodes that won the medium, in rotation order
    pub senders: Vec<NodeId>,
    /// Next hops targeted by two or more senders
    pub collision_targets: Vec<NodeId>,
    /// `(sender, packets in batch)` for every transmission put on the air
    pub batches: Vec<(NodeId, usize)>,
    /// Senders whose primary packet was lost to a collision
    pub garbled: usize,
    /// Successful link draws
    pub deliveries: usize,
    /// Receptions that recovered a packet
    pub decoded: usize,
    /// Responses released onto queues
    pub released: usize,
    /// Pool entries discarded by collision cleanup
    pub rolled_back: usize,
}

impl StepReport {
    pub fn coded_batches(&self) -> usize {
        self.batches.iter().filter(|(_, size)| *size > 1).count()
    }
}

/// The simulated mesh
#[derive(Debug)]
pub struct Arena {
    nodes: Vec<Node>,
    links: Vec<Link>,
    addresses: HashMap<String, NodeId>,
    rotation: TouchOrder<NodeId>,
    timestep: u64,
    config: EngineConfig,
    rng: StdRng,
}

impl Arena {
    /// Build the node and link graph of a topology.
    ///
    /// Node ids follow declaration order. Every pair of distinct nodes whose
    /// classes are compatible is linked when within the smaller of their ranges.
    pub fn from_topology(
        description: &TopologyDescription,
        config: EngineConfig,
    ) -> Result<Self, TopologyError> {
        description.validate()?;
        config.validate()?;

        let settings = NodeSettings {
            protocol: config.protocol,
            response_wait: description.response_wait_time,
            pool_expiration: config.pool_expiration,
        };

        let mut nodes = Vec::with_capacity(description.node_count());
        let mut addresses = HashMap::new();
        for (index, (hierarchy, spec)) in description.nodes().enumerate() {
            let id = NodeId(index);
            addresses.insert(spec.address.clone(), id);
            nodes.push(Node::new(
                id,
                spec.address.clone(),
                hierarchy.name.clone(),
                spec.position(),
                hierarchy.range,
                settings,
            ));
        }

        let compatibility = description.compatibility();
        let mut links = Vec::new();
        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                let compatible = compatibility
                    .get(nodes[i].class())
                    .is_some_and(|classes| classes.contains(nodes[j].class()));
                if !compatible {
                    continue;
                }
                let Some(link) = Link::connect(link_end(&nodes[i]), link_end(&nodes[j])) else {
                    continue;
                };
                let link_id = LinkId(links.len());
                links.push(link);
                nodes[i].add_link(NodeId(j), link_id);
                nodes[j].add_link(NodeId(i), link_id);
            }
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        info!(
            nodes = nodes.len(),
            links = links.len(),
            protocol = %config.protocol,
            "arena constructed"
        );

        Ok(Self {
            rotation: (0..nodes.len()).map(NodeId).collect(),
            nodes,
            links,
            addresses,
            timestep: 0,
            config,
            rng,
        })
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn node_id(&self, address: &str) -> EngineResult<NodeId> {
        self.addresses
            .get(address)
            .copied()
            .ok_or_else(|| EngineError::UnknownNode(address.to_string()))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn node_by_address(&self, address: &str) -> Option<&Node> {
        self.addresses.get(address).and_then(|id| self.node(*id))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Ids of every node of a hierarchy class, in declaration order
    pub fn nodes_of_class(&self, class: &str) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.class() == class)
            .map(Node::id)
            .collect()
    }

    /// Whether the two addressed nodes share a link
    pub fn can_link(&self, a: &str, b: &str) -> bool {
        match (self.node_by_address(a), self.node_by_address(b)) {
            (Some(a), Some(b)) => a.is_linked(b.id()) && b.is_linked(a.id()),
            _ => false,
        }
    }

    pub fn timestep(&self) -> u64 {
        self.timestep
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current round-robin order
    pub fn rotation(&self) -> Vec<NodeId> {
        self.rotation.to_vec()
    }

    fn check_node(&self, id: NodeId) -> EngineResult<()> {
        if id.index() < self.nodes.len() {
            Ok(())
        } else {
            Err(EngineError::UnknownNode(id.to_string()))
        }
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    /// Most reliable path between two nodes, endpoints included
    pub fn route(&self, source: NodeId, destination: NodeId) -> Option<Vec<NodeId>> {
        most_reliable_path(&self.nodes, &self.links, source, destination)
    }

    /// Route a new request and admit it at its source.
    ///
    /// Returns `None` without consuming an id when no route exists.
    pub fn send_packet(
        &mut self,
        ids: &mut PacketIdSource,
        source: NodeId,
        destination: NodeId,
    ) -> EngineResult<Option<PacketId>> {
        self.check_node(source)?;
        self.check_node(destination)?;

        let Some(path) = self.route(source, destination) else {
            warn!(
                source = %self.nodes[source.index()].address(),
                destination = %self.nodes[destination.index()].address(),
                "no route, request not created"
            );
            return Ok(None);
        };

        let id = ids.next_id();
        let packet = Packet::request(id, path)?;
        self.nodes[source.index()].admit(packet, self.timestep)?;
        trace!(packet = %id, source = %source, destination = %destination, "request created");
        Ok(Some(id))
    }

    /// [`send_packet`](Self::send_packet) by node address
    pub fn send_between(
        &mut self,
        ids: &mut PacketIdSource,
        source: &str,
        destination: &str,
    ) -> EngineResult<Option<PacketId>> {
        let source = self.node_id(source)?;
        let destination = self.node_id(destination)?;
        self.send_packet(ids, source, destination)
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Advance the arena by one timestep
    pub fn step(&mut self, delivery: Delivery) -> EngineResult<StepReport> {
        let timestep = self.timestep;
        let mut report = StepReport {
            timestep,
            ..Default::default()
        };

        report.senders = self.choose_senders();

        let primaries: Vec<(NodeId, NodeId)> = report
            .senders
            .iter()
            .filter_map(|sender| {
                self.nodes[sender.index()]
                    .primary_next_hop()
                    .map(|next_hop| (*sender, next_hop))
            })
            .collect();

        let mut targeted: BTreeMap<NodeId, usize> = BTreeMap::new();
        for (_, next_hop) in &primaries {
            *targeted.entry(*next_hop).or_default() += 1;
        }
        let collision_targets: BTreeSet<NodeId> = targeted
            .into_iter()
            .filter(|(_, senders)| *senders > 1)
            .map(|(next_hop, _)| next_hop)
            .collect();
        if !collision_targets.is_empty() {
            debug!(timestep, targets = ?collision_targets, "hidden terminal collision");
        }

        for (sender, next_hop) in &primaries {
            let collided = collision_targets.contains(next_hop);
            match self.nodes[sender.index()].build_transmission(collided, timestep)? {
                Outgoing::Idle => {}
                Outgoing::Garbled { .. } => report.garbled += 1,
                Outgoing::Transmit { transmission, .. } => {
                    report.batches.push((*sender, transmission.len()));
                    let links: Vec<LinkId> = self.nodes[sender.index()].links().map(|(_, link)| link).collect();
                    for link in links {
                        let Some(link) = self.links.get(link.index()) else {
                            continue;
                        };
                        let Some(receiver) = link.transmit(*sender, &mut self.rng, delivery)? else {
                            continue;
                        };
                        report.deliveries += 1;
                        let decode = self.nodes[receiver.index()].receive(&transmission, timestep)?;
                        if matches!(decode, Decode::Decoded { .. }) {
                            report.decoded += 1;
                        }
                    }
                }
            }
        }
        report.collision_targets = collision_targets.into_iter().collect();

        for sender in &report.senders {
            self.rotation.touch(*sender);
        }

        for node in &mut self.nodes {
            report.released += node.learn_timestep(timestep)?.len();
        }

        for node in &mut self.nodes {
            report.rolled_back += node.cleanup(timestep).rolled_back;
        }

        self.timestep += 1;
        trace!(
            timestep,
            senders = report.senders.len(),
            deliveries = report.deliveries,
            decoded = report.decoded,
            "step complete"
        );
        Ok(report)
    }

    /// Carrier sense: a node with queued packets may send unless an already chosen
    /// sender is within range of it, or it is within range of that sender
    fn choose_senders(&self) -> Vec<NodeId> {
        let mut senders: Vec<NodeId> = Vec::new();
        for candidate in self.rotation.iter() {
            let node = &self.nodes[candidate.index()];
            if !node.has_queued() {
                continue;
            }
            let blocked = senders.iter().any(|sender| {
                let sender = &self.nodes[sender.index()];
                sender.in_range(&node.position()) || node.in_range(&sender.position())
            });
            if !blocked {
                senders.push(*candidate);
            }
        }
        senders
    }

    /// Run `timesteps` steps
    pub fn run(&mut self, timesteps: u64, delivery: Delivery) -> EngineResult<Vec<StepReport>> {
        (0..timesteps).map(|_| self.step(delivery)).collect()
    }

    /// Generate traffic according to `plan` and run it to completion.
    ///
    /// Each tick every node of the sender class, with the plan's probability,
    /// sends a burst of requests to one uniformly chosen other node of the
    /// destination class. One step follows the generation of every tick.
    pub fn simulate(
        &mut self,
        ids: &mut PacketIdSource,
        plan: &TrafficPlan,
    ) -> EngineResult<SimulationMetrics> {
        plan.validate()?;
        let senders = self.nodes_of_class(&plan.sender_class);
        if senders.is_empty() {
            return Err(EngineError::UnknownClass(plan.sender_class.clone()));
        }
        let destinations = self.nodes_of_class(&plan.destination_class);
        if destinations.is_empty() {
            return Err(EngineError::UnknownClass(plan.destination_class.clone()));
        }

        info!(
            protocol = %self.config.protocol,
            timesteps = plan.timesteps,
            senders = senders.len(),
            destinations = destinations.len(),
            "simulation started"
        );

        let mut created = 0u64;
        for _ in 0..plan.timesteps {
            for sender in &senders {
                if !self.rng.random_bool(plan.send_probability) {
                    continue;
                }
                let choices: Vec<NodeId> = destinations
                    .iter()
                    .copied()
                    .filter(|destination| destination != sender)
                    .collect();
                if choices.is_empty() {
                    continue;
                }
                let destination = choices[self.rng.random_range(0..choices.len())];
                let burst = self.rng.random_range(1..=plan.max_burst);
                for _ in 0..burst {
                    if self.send_packet(ids, *sender, destination)?.is_some() {
                        created += 1;
                    }
                }
            }
            self.step(plan.delivery)?;
        }

        let metrics = self.metrics(plan.timesteps);
        info!(
            protocol = %self.config.protocol,
            requests = created,
            successes = metrics.total_successes(),
            coded = metrics.total_coded_transmissions(),
            "simulation finished"
        );
        Ok(metrics)
    }

    /// Per-node metrics over a run of `timesteps`
    pub fn metrics(&self, timesteps: u64) -> SimulationMetrics {
        SimulationMetrics {
            protocol: self.config.protocol,
            timesteps,
            nodes: self
                .nodes
                .iter()
                .map(|node| (node.address().to_string(), NodeMetrics::collect(node, timesteps)))
                .collect(),
        }
    }
}

fn link_end(node: &Node) -> LinkEnd {
    LinkEnd {
        node: node.id(),
        position: node.position(),
        range: node.range(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;

    fn pair(protocol: Protocol) -> Arena {
        let description = TopologyDescription::new(2)
            .with_hierarchy("user", 2.0, &[("n1", 0.0, 0.0), ("n2", 1.0, 0.0)])
            .with_rule("user", "user");
        let config = EngineConfig {
            protocol,
            ..Default::default()
        }
        .with_seed(7);
        Arena::from_topology(&description, config).unwrap()
    }

    #[test]
    fn test_construction_links_compatible_pairs() {
        let arena = pair(Protocol::StoreAndForward);
        assert_eq!(arena.nodes().len(), 2);
        assert_eq!(arena.links().len(), 1);
        assert!(arena.can_link("n1", "n2"));
        assert!(!arena.can_link("n1", "missing"));
        assert_eq!(arena.rotation(), vec![NodeId(0), NodeId(1)]);
    }

    #[test]
    fn test_unknown_address_is_rejected() {
        let mut arena = pair(Protocol::StoreAndForward);
        let mut ids = PacketIdSource::new();
        assert_eq!(
            arena.send_between(&mut ids, "n1", "n9"),
            Err(EngineError::UnknownNode("n9".to_string()))
        );
        assert_eq!(ids.issued(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let description = TopologyDescription::line(2, 1.0, 2.0, 1);
        let config = EngineConfig::default().with_pool_expiration(0);
        assert!(matches!(
            Arena::from_topology(&description, config),
            Err(TopologyError::Config(EngineError::InvalidOption(_)))
        ));
    }

    #[test]
    fn test_round_trip_completes() {
        let mut arena = pair(Protocol::NetworkCoding);
        let mut ids = PacketIdSource::new();
        let id = arena.send_between(&mut ids, "n1", "n2").unwrap().unwrap();

        let first = arena.step(Delivery::Guaranteed).unwrap();
        assert_eq!(first.senders, vec![NodeId(0)]);
        assert_eq!(first.batches, vec![(NodeId(0), 1)]);
        assert_eq!(first.decoded, 1);

        // Response released at the end of t=2, delivered during t=3
        arena.run(3, Delivery::Guaranteed).unwrap();
        let n1 = arena.node_by_address("n1").unwrap();
        assert_eq!(n1.sent_log().get(&id), Some(&0));
        assert_eq!(n1.received_log().get(&id), Some(&3));

        let metrics = arena.metrics(arena.timestep());
        assert_eq!(metrics.get("n1").unwrap().successes, 1);
        assert_eq!(metrics.get("n1").unwrap().average_latency, Some(3.0));
    }

    #[test]
    fn test_simulate_rejects_unknown_class() {
        let mut arena = pair(Protocol::StoreAndForward);
        let mut ids = PacketIdSource::new();
        let plan = TrafficPlan::new(5, "router", "user");
        assert_eq!(
            arena.simulate(&mut ids, &plan),
            Err(EngineError::UnknownClass("router".to_string()))
        );
    }
}
