//! Per-node packet pool
//!
//! Records every packet identity a node has admitted together with the timestep
//! it was seen. The pool drives duplicate suppression, decoding and the reception
//! reports a node attaches to its transmissions.

use std::collections::{BTreeMap, BTreeSet};

use crate::packet::PacketKey;

#[derive(Debug, Clone, Default)]
pub struct PacketPool {
    entries: BTreeMap<PacketKey, u64>,
}

impl PacketPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: PacketKey, timestep: u64) {
        self.entries.insert(key, timestep);
    }

    pub fn contains(&self, key: &PacketKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn seen_at(&self, key: &PacketKey) -> Option<u64> {
        self.entries.get(key).copied()
    }

    /// Number of entries recorded at exactly `timestep`
    pub fn count_at(&self, timestep: u64) -> usize {
        self.entries.values().filter(|t| **t == timestep).count()
    }

    /// Drop every entry recorded at exactly `timestep`
    pub fn discard_at(&mut self, timestep: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, seen| *seen != timestep);
        before - self.entries.len()
    }

    /// Drop entries with `now - seen >= expiration`
    pub fn expire(&mut self, now: u64, expiration: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, seen| now.saturating_sub(*seen) < expiration);
        before - self.entries.len()
    }

    /// Snapshot of all identities, for a reception report
    pub fn keys(&self) -> BTreeSet<PacketKey> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketId;

    fn key(id: u64) -> PacketKey {
        PacketKey {
            id: PacketId(id),
            is_request: true,
        }
    }

    #[test]
    fn test_expire_by_age_only() {
        let mut pool = PacketPool::new();
        pool.insert(key(1), 0);
        pool.insert(key(2), 2);
        pool.insert(key(3), 4);

        assert_eq!(pool.expire(5, 3), 2);
        assert!(!pool.contains(&key(1)));
        assert!(!pool.contains(&key(2)));
        assert!(pool.contains(&key(3)));

        // An entry survives exactly `expiration - 1` timesteps
        assert_eq!(pool.expire(6, 3), 0);
        assert_eq!(pool.expire(7, 3), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_discard_only_matching_timestep() {
        let mut pool = PacketPool::new();
        pool.insert(key(1), 2);
        pool.insert(key(2), 3);
        pool.insert(key(3), 3);

        assert_eq!(pool.discard_at(4), 0);
        assert_eq!(pool.count_at(3), 2);
        assert_eq!(pool.discard_at(3), 2);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.seen_at(&key(1)), Some(2));
    }
}
