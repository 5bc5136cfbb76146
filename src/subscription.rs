use std::{collections::HashSet, hash::Hash};

use serde::{Deserialize, Serialize};

/// A de-duplicated, insertion-ordered subscription list for one topic.
///
/// Agents subscribe by id or by symbol; delivery must be deterministic, so
/// iteration follows the order in which subscriptions were first accepted.
/// Serialization is the plain ordered list — the `Serialize`/`Deserialize`
/// bounds are what gates which `T` can be checkpointed.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry<T> {
    subs: Vec<T>,
    registry: HashSet<T>,
}

impl<T: Eq + Hash + Clone> SubscriptionRegistry<T> {
    pub fn new() -> Self {
        Self {
            subs: Vec::new(),
            registry: HashSet::new(),
        }
    }

    /// Accepts `sub` if it has not been seen before. Returns `true` exactly
    /// on the first call per value.
    pub fn add(&mut self, sub: T) -> bool {
        if self.registry.contains(&sub) {
            return false;
        }
        self.subs.push(sub.clone());
        self.registry.insert(sub);
        true
    }

    pub fn contains(&self, sub: &T) -> bool {
        self.registry.contains(sub)
    }

    /// The accepted subscriptions, in insertion order.
    pub fn subs(&self) -> &[T] {
        &self.subs
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.subs.iter()
    }
}

impl<'a, T> IntoIterator for &'a SubscriptionRegistry<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.subs.iter()
    }
}

impl<T: Serialize> Serialize for SubscriptionRegistry<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.subs.serialize(serializer)
    }
}

impl<'de, T: Eq + Hash + Clone + Deserialize<'de>> Deserialize<'de> for SubscriptionRegistry<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let subs = Vec::<T>::deserialize(deserializer)?;
        let mut reg = Self::new();
        for sub in subs {
            reg.add(sub);
        }
        Ok(reg)
    }
}
