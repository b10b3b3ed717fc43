//! Probabilistic radio link between two nodes
//!
//! A link exists iff the endpoints are within the smaller of their two ranges.
//! Delivery succeeds with a closed-form, distance-based probability that is
//! recomputed on every query.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::packet::NodeId;

/// Fraction of the success probability lost at the edge of range
const EDGE_LOSS: f64 = 0.8;

/// Index of a link in the arena registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkId(pub usize);

impl LinkId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// 2-D position of a node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Whether a transmission draws against the link probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// One Bernoulli trial per link per transmission
    #[default]
    Probabilistic,
    /// Skip the draw; every attempt succeeds (reproducible tests)
    Guaranteed,
}

/// One side of a link
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkEnd {
    pub node: NodeId,
    pub position: Position,
    pub range: f64,
}

/// Undirected link between two in-range nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    a: LinkEnd,
    b: LinkEnd,
}

impl Link {
    /// Connect two endpoints, or `None` when they are out of each other's range
    pub fn connect(a: LinkEnd, b: LinkEnd) -> Option<Self> {
        if a.node == b.node {
            return None;
        }
        let reach = a.range.min(b.range);
        if a.position.distance(&b.position) <= reach {
            Some(Self { a, b })
        } else {
            None
        }
    }

    pub fn endpoints(&self) -> (NodeId, NodeId) {
        (self.a.node, self.b.node)
    }

    pub fn connects(&self, node: NodeId) -> bool {
        self.a.node == node || self.b.node == node
    }

    /// The endpoint opposite `node`
    pub fn other(&self, node: NodeId) -> EngineResult<NodeId> {
        if node == self.a.node {
            Ok(self.b.node)
        } else if node == self.b.node {
            Ok(self.a.node)
        } else {
            Err(EngineError::NotAnEndpoint {
                sender: node,
                a: self.a.node,
                b: self.b.node,
            })
        }
    }

    pub fn distance(&self) -> f64 {
        self.a.position.distance(&self.b.position)
    }

    /// `max(1 - 0.8 * distance / min(range_a, range_b), 0)`
    pub fn success_probability(&self) -> f64 {
        success_probability(self.distance(), self.a.range.min(self.b.range))
    }

    /// Attempt to carry one transmission from `sender` across the link.
    ///
    /// Returns the receiving endpoint when the draw succeeds, `None` when the
    /// transmission is lost.
    pub fn transmit<R: Rng + ?Sized>(
        &self,
        sender: NodeId,
        rng: &mut R,
        delivery: Delivery,
    ) -> EngineResult<Option<NodeId>> {
        let receiver = self.other(sender)?;
        let delivered = match delivery {
            Delivery::Guaranteed => true,
            Delivery::Probabilistic => rng.random_bool(self.success_probability()),
        };
        Ok(delivered.then_some(receiver))
    }
}

/// Success probability at `distance` for a link whose weaker range is `range`
pub fn success_probability(distance: f64, range: f64) -> f64 {
    if range <= 0.0 {
        return 0.0;
    }
    (1.0 - EDGE_LOSS * distance / range).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn end(node: usize, x: f64, y: f64, range: f64) -> LinkEnd {
        LinkEnd {
            node: NodeId(node),
            position: Position::new(x, y),
            range,
        }
    }

    #[test]
    fn test_link_requires_both_ranges() {
        assert!(Link::connect(end(0, 0.0, 0.0, 5.0), end(1, 3.0, 4.0, 5.0)).is_some());
        // Within the larger range but not the smaller one
        assert!(Link::connect(end(0, 0.0, 0.0, 10.0), end(1, 3.0, 4.0, 4.0)).is_none());
        assert!(Link::connect(end(0, 0.0, 0.0, 1.0), end(0, 0.0, 0.0, 1.0)).is_none());
    }

    #[test]
    fn test_probability_bounds_and_monotonicity() {
        let mut previous = f64::INFINITY;
        for step in 0..=40 {
            let distance = step as f64 * 0.1;
            let p = success_probability(distance, 2.0);
            assert!((0.0..=1.0).contains(&p));
            if p > 0.0 {
                assert!(p < previous, "probability must strictly decrease");
            }
            previous = p;
        }
        assert_eq!(success_probability(0.0, 2.0), 1.0);
        assert_eq!(success_probability(0.0, 0.0), 0.0);
        assert!((success_probability(2.0, 2.0) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_transmit_rejects_foreign_sender() {
        let link = Link::connect(end(0, 0.0, 0.0, 2.0), end(1, 1.0, 0.0, 2.0)).unwrap();
        let mut rng = StdRng::seed_from_u64(1);

        assert_eq!(
            link.transmit(NodeId(0), &mut rng, Delivery::Guaranteed),
            Ok(Some(NodeId(1)))
        );
        assert_eq!(
            link.transmit(NodeId(1), &mut rng, Delivery::Guaranteed),
            Ok(Some(NodeId(0)))
        );
        assert!(matches!(
            link.transmit(NodeId(7), &mut rng, Delivery::Guaranteed),
            Err(EngineError::NotAnEndpoint { .. })
        ));
    }

    #[test]
    fn test_probabilistic_transmit_tracks_probability() {
        // p = 1 - 0.8 * 1 / 2 = 0.6
        let link = Link::connect(end(0, 0.0, 0.0, 2.0), end(1, 1.0, 0.0, 2.0)).unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        let trials = 10_000;
        let delivered = (0..trials)
            .filter(|_| {
                link.transmit(NodeId(0), &mut rng, Delivery::Probabilistic)
                    .unwrap()
                    .is_some()
            })
            .count();
        let rate = delivered as f64 / trials as f64;
        assert!((rate - 0.6).abs() < 0.05, "observed rate {}", rate);
    }
}
