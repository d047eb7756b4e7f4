use super::{Items, OrderedKeyValueStore, StoreError, StoreKey};
use std::collections::BTreeMap;

/// [`OrderedKeyValueStore`] over a `BTreeMap`, for tables that fit in memory
#[derive(Debug, Clone)]
pub struct MemoryStore<V> {
    entries: BTreeMap<StoreKey, V>,
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<StoreKey>, V> FromIterator<(K, V)> for MemoryStore<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl<V: Clone> OrderedKeyValueStore<V> for MemoryStore<V> {
    fn get(&self, key: &StoreKey) -> Result<V, StoreError> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })
    }

    fn set(&mut self, key: StoreKey, value: V) -> Result<(), StoreError> {
        self.entries.insert(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &StoreKey) -> Result<V, StoreError> {
        self.entries
            .remove(key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })
    }

    fn contains(&self, key: &StoreKey) -> bool {
        self.entries.contains_key(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn keys(&self) -> Vec<StoreKey> {
        self.entries.keys().cloned().collect()
    }

    fn items(&self) -> Items<'_, V> {
        Box::new(
            self.entries
                .iter()
                .map(|(key, value)| Ok((key.clone(), value.clone()))),
        )
    }

    fn close(self) -> Result<(), StoreError> {
        Ok(())
    }
}
