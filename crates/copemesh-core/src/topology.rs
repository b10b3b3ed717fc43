//! Declarative topology descriptions
//!
//! A topology names hierarchy classes (each with a transmission range and a set
//! of positioned nodes), a symmetric compatibility relation between classes, and
//! the global response wait time. [`Arena::from_topology`](crate::Arena::from_topology)
//! turns a validated description into nodes and links.
//!
//! Also provides generators for the regular shapes used in tests and benchmarks:
//! - Line: nodes spaced evenly on the x axis
//! - Grid: `rows x cols` lattice, node `nRC` at `(R, C)`
//! - Wheel: a hub with spokes on a circle

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TopologyError;
use crate::link::Position;

/// Default class name used by the generators
pub const DEFAULT_CLASS: &str = "user";

/// A positioned node of a hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub address: String,
    pub x: f64,
    pub y: f64,
}

impl NodeSpec {
    pub fn new(address: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            address: address.into(),
            x,
            y,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

/// A hierarchy class: shared transmission range plus its nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchySpec {
    pub name: String,
    pub range: f64,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

fn default_response_wait() -> u64 {
    5
}

/// Parsed topology file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyDescription {
    /// Timesteps a destination waits before emitting its response
    #[serde(default = "default_response_wait")]
    pub response_wait_time: u64,
    #[serde(default)]
    pub hierarchies: Vec<HierarchySpec>,
    /// Pairs of classes allowed to link (symmetric)
    #[serde(default)]
    pub rules: Vec<(String, String)>,
}

impl Default for TopologyDescription {
    fn default() -> Self {
        Self::new(default_response_wait())
    }
}

impl TopologyDescription {
    pub fn new(response_wait_time: u64) -> Self {
        Self {
            response_wait_time,
            hierarchies: Vec::new(),
            rules: Vec::new(),
        }
    }

    /// Parse and validate a JSON description
    pub fn from_json_str(json: &str) -> Result<Self, TopologyError> {
        let description: Self = serde_json::from_str(json)?;
        description.validate()?;
        Ok(description)
    }

    /// Load and validate a JSON description from disk
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String, TopologyError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Add a hierarchy class with its nodes given as `(address, x, y)`
    pub fn with_hierarchy(mut self, name: &str, range: f64, nodes: &[(&str, f64, f64)]) -> Self {
        self.hierarchies.push(HierarchySpec {
            name: name.to_string(),
            range,
            nodes: nodes
                .iter()
                .map(|(address, x, y)| NodeSpec::new(*address, *x, *y))
                .collect(),
        });
        self
    }

    /// Allow classes `a` and `b` to link
    pub fn with_rule(mut self, a: &str, b: &str) -> Self {
        self.rules.push((a.to_string(), b.to_string()));
        self
    }

    pub fn validate(&self) -> Result<(), TopologyError> {
        if self.response_wait_time == 0 {
            return Err(TopologyError::InvalidResponseWait);
        }

        let mut classes = BTreeSet::new();
        let mut addresses = BTreeSet::new();
        for hierarchy in &self.hierarchies {
            if !classes.insert(hierarchy.name.as_str()) {
                return Err(TopologyError::DuplicateClass(hierarchy.name.clone()));
            }
            if !hierarchy.range.is_finite() || hierarchy.range < 0.0 {
                return Err(TopologyError::InvalidRange {
                    class: hierarchy.name.clone(),
                    range: hierarchy.range,
                });
            }
            for node in &hierarchy.nodes {
                if !addresses.insert(node.address.as_str()) {
                    return Err(TopologyError::DuplicateNode(node.address.clone()));
                }
            }
        }

        for (a, b) in &self.rules {
            for class in [a, b] {
                if !classes.contains(class.as_str()) {
                    return Err(TopologyError::UnknownClass(class.clone()));
                }
            }
        }
        Ok(())
    }

    /// Symmetric closure of the rule list
    pub fn compatibility(&self) -> BTreeMap<&str, BTreeSet<&str>> {
        let mut relation: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (a, b) in &self.rules {
            relation.entry(a.as_str()).or_default().insert(b.as_str());
            relation.entry(b.as_str()).or_default().insert(a.as_str());
        }
        relation
    }

    /// Every node with its class and range, in declaration order
    pub fn nodes(&self) -> impl Iterator<Item = (&HierarchySpec, &NodeSpec)> + '_ {
        self.hierarchies
            .iter()
            .flat_map(|hierarchy| hierarchy.nodes.iter().map(move |node| (hierarchy, node)))
    }

    pub fn node_count(&self) -> usize {
        self.hierarchies.iter().map(|h| h.nodes.len()).sum()
    }

    // ------------------------------------------------------------------
    // Generators
    // ------------------------------------------------------------------

    /// `count` nodes `n1..` spaced `spacing` apart on the x axis
    pub fn line(count: usize, spacing: f64, range: f64, response_wait_time: u64) -> Self {
        let nodes = (0..count)
            .map(|i| NodeSpec::new(format!("n{}", i + 1), i as f64 * spacing, 0.0))
            .collect();
        Self::single_class(nodes, range, response_wait_time)
    }

    /// Lattice with node `n{row}{col}` at `(row * spacing, col * spacing)`
    pub fn grid(rows: usize, cols: usize, spacing: f64, range: f64, response_wait_time: u64) -> Self {
        let mut nodes = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                nodes.push(NodeSpec::new(
                    format!("n{}{}", row, col),
                    row as f64 * spacing,
                    col as f64 * spacing,
                ));
            }
        }
        Self::single_class(nodes, range, response_wait_time)
    }

    /// Hub `n1` at the origin with `spokes` nodes `n2..` on a circle of `radius`
    pub fn wheel(spokes: usize, radius: f64, range: f64, response_wait_time: u64) -> Self {
        let mut nodes = vec![NodeSpec::new("n1", 0.0, 0.0)];
        for i in 0..spokes {
            let angle = std::f64::consts::TAU * i as f64 / spokes.max(1) as f64;
            nodes.push(NodeSpec::new(
                format!("n{}", i + 2),
                radius * angle.cos(),
                radius * angle.sin(),
            ));
        }
        Self::single_class(nodes, range, response_wait_time)
    }

    fn single_class(nodes: Vec<NodeSpec>, range: f64, response_wait_time: u64) -> Self {
        Self {
            response_wait_time,
            hierarchies: vec![HierarchySpec {
                name: DEFAULT_CLASS.to_string(),
                range,
                nodes,
            }],
            rules: vec![(DEFAULT_CLASS.to_string(), DEFAULT_CLASS.to_string())],
        }
    }
}
