//! Indicator state cache
//!
//! Stateful set-features (EWMA, RSI) keep their running values in a
//! [`ResultStore`] owned by exactly one [`Key`]. The registry bounds the
//! number of live stores with an LRU policy; an evicted indicator simply
//! restarts its warm-up on next use.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::lru::BoundedLru;
use crate::parameters::Parameters;
use crate::set_features::SetFeature;
use crate::source::Observation;

/// Identity of one stateful indicator instance.
///
/// Two calls that agree on every field share state; calls that differ
/// in any field never interfere.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    pub indicator: SetFeature,
    pub feature: String,
    /// Intended period count, or actual size when none was configured.
    pub periods: usize,
    pub parameters: Parameters,
}

impl Key {
    pub fn new(
        indicator: SetFeature,
        feature: impl Into<String>,
        periods: usize,
        parameters: &Parameters,
    ) -> Self {
        Self {
            indicator,
            feature: feature.into(),
            periods,
            parameters: parameters.clone(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}, {}){}",
            self.indicator.name(),
            self.feature,
            self.periods,
            self.parameters
        )
    }
}

/// Named running values of one indicator instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultStore {
    values: BTreeMap<&'static str, f64>,
    previous_result: Option<f64>,
    observed: Option<Observation>,
}

impl ResultStore {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn get_or(&self, name: &str, default: f64) -> f64 {
        self.get(name).unwrap_or(default)
    }

    pub fn set(&mut self, name: &'static str, value: f64) {
        self.values.insert(name, value);
    }

    /// Last output handed to a caller.
    pub fn previous_result(&self) -> Option<f64> {
        self.previous_result
    }

    /// Source state that produced `previous_result`.
    pub fn observed(&self) -> Option<Observation> {
        self.observed
    }

    /// Record an output together with the source state it was computed from.
    pub fn set_result(&mut self, result: f64, observed: Observation) {
        self.previous_result = Some(result);
        self.observed = Some(observed);
    }

    /// Cached output when asked again about an already observed source state.
    pub fn result_for(&self, observation: &Observation) -> Option<f64> {
        match self.observed {
            Some(seen) if seen == *observation => self.previous_result,
            _ => None,
        }
    }
}

/// Bounded LRU map from [`Key`] to [`ResultStore`].
#[derive(Debug, Clone)]
pub struct ResultStoreRegistry {
    stores: BoundedLru<Key, ResultStore>,
}

impl ResultStoreRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            stores: BoundedLru::new(capacity),
        }
    }

    /// Return the store for `key`, creating an empty one if absent.
    pub fn register_and_get(&mut self, key: Key) -> &mut ResultStore {
        if !self.stores.contains(&key) {
            debug!(key = %key, live = self.stores.len(), "Registering indicator state");
        }
        self.stores.get_or_insert_with(key, ResultStore::default)
    }

    pub fn peek(&self, key: &Key) -> Option<&ResultStore> {
        self.stores.peek(key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.stores.contains(key)
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.stores.capacity()
    }

    pub fn evictions(&self) -> u64 {
        self.stores.evictions()
    }
}
