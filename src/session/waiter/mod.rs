use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// Pending-reply counter keyed by correlation key (normally a chat id).
///
/// A key is pending while its count is above zero; `sub` removes it once the
/// count drops to zero, so emptiness reflects the union of pending keys.
pub struct Waiter<K> {
    counts: HashMap<K, usize>,
}

impl<K: Eq + Hash> Waiter<K> {
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
        }
    }

    pub fn add(&mut self, key: K) {
        *self.counts.entry(key).or_insert(0) += 1;
    }

    /// Resolve one pending occurrence of `key`. Unknown keys are ignored.
    pub fn sub(&mut self, key: &K) {
        if let Some(count) = self.counts.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.counts.remove(key);
            }
        }
    }

    /// Drop `key` regardless of its count.
    pub fn discard(&mut self, key: &K) {
        self.counts.remove(key);
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.counts.contains_key(key)
    }

    pub fn pending(&self, key: &K) -> usize {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Number of distinct pending keys.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.counts.keys()
    }
}

impl<K: Eq + Hash> Default for Waiter<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug> fmt::Debug for Waiter<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Waiter").field(&self.counts).finish()
    }
}
