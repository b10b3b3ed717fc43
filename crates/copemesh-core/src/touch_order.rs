//! Ordered key set with move-to-back
//!
//! Used for the arena's round-robin rotation and for the order in which a node
//! visits neighbors during the coding search. `touch` makes recently served keys
//! yield priority to the others.

use std::collections::VecDeque;

#[derive(Debug, Clone, Default)]
pub struct TouchOrder<K> {
    keys: VecDeque<K>,
}

impl<K: PartialEq + Copy> TouchOrder<K> {
    pub fn new() -> Self {
        Self {
            keys: VecDeque::new(),
        }
    }

    /// Append `key` at the back unless already present
    pub fn push_back(&mut self, key: K) {
        if !self.contains(&key) {
            self.keys.push_back(key);
        }
    }

    /// Move `key` to the back. Returns false if the key is unknown.
    pub fn touch(&mut self, key: K) -> bool {
        match self.keys.iter().position(|k| *k == key) {
            Some(index) => {
                self.keys.remove(index);
                self.keys.push_back(key);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.keys.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.keys.iter()
    }

    /// Copy of the current order
    pub fn to_vec(&self) -> Vec<K> {
        self.keys.iter().copied().collect()
    }
}

impl<K: PartialEq + Copy> FromIterator<K> for TouchOrder<K> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut order = Self::new();
        for key in iter {
            order.push_back(key);
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_moves_to_back() {
        let mut order: TouchOrder<u32> = [1, 2, 3].into_iter().collect();
        assert!(order.touch(1));
        assert_eq!(order.to_vec(), vec![2, 3, 1]);
        assert!(order.touch(3));
        assert_eq!(order.to_vec(), vec![2, 1, 3]);
        assert!(!order.touch(9));
    }

    #[test]
    fn test_push_back_ignores_duplicates() {
        let mut order = TouchOrder::new();
        order.push_back('a');
        order.push_back('b');
        order.push_back('a');
        assert_eq!(order.to_vec(), vec!['a', 'b']);
        assert!(order.contains(&'b'));
    }
}
