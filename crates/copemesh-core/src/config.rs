//! Engine and traffic configuration

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::link::Delivery;

/// Relaying protocol run by every node of an arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// One packet to one next hop per transmission
    #[default]
    StoreAndForward,
    /// Opportunistic batching of packets the recipients can decode
    NetworkCoding,
}

impl Protocol {
    pub fn coding_enabled(self) -> bool {
        matches!(self, Protocol::NetworkCoding)
    }

    /// Short label used in logs and report file names
    pub fn label(self) -> &'static str {
        match self {
            Protocol::StoreAndForward => "store_and_forward",
            Protocol::NetworkCoding => "coding",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Configuration for an arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Which relaying protocol the nodes run
    pub protocol: Protocol,
    /// Timesteps a pool entry survives
    pub pool_expiration: u64,
    /// RNG seed for link draws and traffic generation (None = OS entropy)
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::StoreAndForward,
            pool_expiration: 10,
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn coding() -> Self {
        Self {
            protocol: Protocol::NetworkCoding,
            ..Default::default()
        }
    }

    pub fn store_and_forward() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_pool_expiration(mut self, timesteps: u64) -> Self {
        self.pool_expiration = timesteps;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.pool_expiration == 0 {
            return Err(EngineError::InvalidOption(
                "pool_expiration must be at least one timestep".to_string(),
            ));
        }
        Ok(())
    }
}

/// Traffic generated by [`Arena::simulate`](crate::Arena::simulate)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficPlan {
    /// Number of ticks to run
    pub timesteps: u64,
    /// Hierarchy class whose nodes originate requests
    pub sender_class: String,
    /// Hierarchy class whose nodes are addressed
    pub destination_class: String,
    /// Per-tick probability that a sender emits a burst
    pub send_probability: f64,
    /// Largest burst size (bursts are uniform in 1..=max_burst)
    pub max_burst: u32,
    /// Link draw mode for every transmission of the run
    pub delivery: Delivery,
}

impl Default for TrafficPlan {
    fn default() -> Self {
        Self {
            timesteps: 100,
            sender_class: "user".to_string(),
            destination_class: "user".to_string(),
            send_probability: 0.1,
            max_burst: 1,
            delivery: Delivery::Probabilistic,
        }
    }
}

impl TrafficPlan {
    pub fn new(timesteps: u64, sender_class: &str, destination_class: &str) -> Self {
        Self {
            timesteps,
            sender_class: sender_class.to_string(),
            destination_class: destination_class.to_string(),
            ..Default::default()
        }
    }

    pub fn with_send_probability(mut self, probability: f64) -> Self {
        self.send_probability = probability;
        self
    }

    pub fn with_max_burst(mut self, max_burst: u32) -> Self {
        self.max_burst = max_burst;
        self
    }

    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !(0.0..=1.0).contains(&self.send_probability) {
            return Err(EngineError::InvalidOption(format!(
                "send_probability {} is outside 0..=1",
                self.send_probability
            )));
        }
        if self.max_burst == 0 {
            return Err(EngineError::InvalidOption(
                "max_burst must be at least 1".to_string(),
            ));
        }
        if self.timesteps == 0 {
            return Err(EngineError::InvalidOption(
                "timesteps must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
