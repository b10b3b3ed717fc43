//! Reliability routing
//!
//! Finds the path whose product of per-hop link success probabilities is largest.
//! This is Dijkstra's search with multiplication in place of addition: extending a
//! path can only lower its probability, so the first time a node is settled its
//! probability is final.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::link::Link;
use crate::node::Node;
use crate::packet::NodeId;

/// A frontier entry: cumulative delivery probability to reach `node`
#[derive(Debug, Clone, Copy)]
struct Frontier {
    probability: f64,
    node: NodeId,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap on probability; equal probabilities pop the lower node id first
        self.probability
            .total_cmp(&other.probability)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Most reliable path from `source` to `target`, both endpoints included.
///
/// Returns `None` when the target is unreachable or equal to the source.
pub fn most_reliable_path(
    nodes: &[Node],
    links: &[Link],
    source: NodeId,
    target: NodeId,
) -> Option<Vec<NodeId>> {
    if source == target || source.index() >= nodes.len() || target.index() >= nodes.len() {
        return None;
    }

    let mut best = vec![0.0_f64; nodes.len()];
    let mut previous: Vec<Option<NodeId>> = vec![None; nodes.len()];
    let mut settled = vec![false; nodes.len()];
    let mut frontier = BinaryHeap::new();

    best[source.index()] = 1.0;
    frontier.push(Frontier {
        probability: 1.0,
        node: source,
    });

    while let Some(Frontier { probability, node }) = frontier.pop() {
        if settled[node.index()] {
            continue;
        }
        settled[node.index()] = true;
        if node == target {
            break;
        }

        for (neighbor, link) in nodes[node.index()].links() {
            let Some(link) = links.get(link.index()) else {
                continue;
            };
            let candidate = probability * link.success_probability();
            if candidate <= 0.0 || settled[neighbor.index()] {
                continue;
            }
            if candidate > best[neighbor.index()] {
                best[neighbor.index()] = candidate;
                previous[neighbor.index()] = Some(node);
                frontier.push(Frontier {
                    probability: candidate,
                    node: neighbor,
                });
            }
        }
    }

    if !settled[target.index()] {
        return None;
    }

    let mut path = vec![target];
    let mut cursor = target;
    while let Some(hop) = previous[cursor.index()] {
        path.push(hop);
        cursor = hop;
    }
    path.reverse();
    Some(path)
}
