use super::{OrderedKeyValueStore, StoreError, StoreKey};
use std::marker::PhantomData;

/// A positional list layered on an [`OrderedKeyValueStore`], element `i`
/// stored under `StoreKey::Int(i)`.
///
/// Deleting an element shifts every later element down by one, so positions
/// stay contiguous in `[0, len)`. Access outside that range is an
/// [`StoreError::IndexOutOfRange`], never a silent no-op.
pub struct IndexedList<V, S> {
    store: S,
    len: usize,
    _values: PhantomData<fn() -> V>,
}

impl<V, S: OrderedKeyValueStore<V>> IndexedList<V, S> {
    /// Adopt `store`, which must be empty or hold exactly the keys `0..n`
    pub fn new(store: S) -> Result<Self, StoreError> {
        let len = store.len();
        let contiguous = store
            .keys()
            .iter()
            .enumerate()
            .all(|(i, key)| matches!(key, StoreKey::Int(n) if usize::try_from(*n) == Ok(i)));
        if !contiguous {
            return Err(StoreError::Corrupt {
                detail: "list store keys are not the positions 0..len".to_string(),
            });
        }

        Ok(Self {
            store,
            len,
            _values: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, index: usize) -> Result<StoreKey, StoreError> {
        if index < self.len {
            StoreKey::try_from(index)
        } else {
            Err(StoreError::IndexOutOfRange {
                index,
                len: self.len,
            })
        }
    }

    pub fn get(&self, index: usize) -> Result<V, StoreError> {
        self.store.get(&self.check(index)?)
    }

    pub fn set(&mut self, index: usize, value: V) -> Result<(), StoreError> {
        let key = self.check(index)?;
        self.store.set(key, value)
    }

    pub fn append(&mut self, value: V) -> Result<(), StoreError> {
        self.store.set(StoreKey::try_from(self.len)?, value)?;
        self.len += 1;
        Ok(())
    }

    pub fn extend<I: IntoIterator<Item = V>>(&mut self, values: I) -> Result<(), StoreError> {
        values.into_iter().try_for_each(|value| self.append(value))
    }

    /// Remove the element at `index`, shifting later elements down by one
    pub fn delete(&mut self, index: usize) -> Result<V, StoreError> {
        let key = self.check(index)?;
        let removed = self.store.get(&key)?;

        for i in index + 1..self.len {
            let moved = self.store.get(&StoreKey::try_from(i)?)?;
            self.store.set(StoreKey::try_from(i - 1)?, moved)?;
        }
        self.store.delete(&StoreKey::try_from(self.len - 1)?)?;
        self.len -= 1;

        Ok(removed)
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<V, StoreError>> + '_ {
        (0..self.len).map(move |i| StoreKey::try_from(i).and_then(|key| self.store.get(&key)))
    }

    pub fn close(self) -> Result<(), StoreError> {
        self.store.close()
    }
}
