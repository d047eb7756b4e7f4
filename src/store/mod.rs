//! Ordered key-value storage for k-mer count tables.
//!
//! Count tables for large k can outgrow memory, so every consumer talks to the
//! [`OrderedKeyValueStore`] trait and the run decides between the in-memory
//! [`MemoryStore`] and the file-backed [`DiskStore`] with
//! [`StoreBackend::select`]. Iteration is always in sorted key order.
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::path::Path;

mod disk;
mod list;
mod memory;

pub use disk::DiskStore;
pub use list::IndexedList;
pub use memory::MemoryStore;

custom_error::custom_error! { pub StoreError
    Io{source: std::io::Error} = @{ format!("store I/O failure: {}", source) },
    Codec{source: serde_json::Error} = @{ format!("store value could not be encoded or decoded: {}", source) },
    NotFound{key: StoreKey} = @{ format!("key not found: {}", key.encode()) },
    IndexOutOfRange{index: usize, len: usize} = @{
        format!("index {} out of range for list of length {}", index, len)
    },
    PositionTooLarge{index: usize} = @{ format!("position {} does not fit an integer key", index) },
    Corrupt{detail: String} = @{ format!("corrupt store: {}", detail) },
}

/// A store key. Integer and string keys never compare equal, integers sort
/// (numerically) before strings (lexically).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreKey {
    Int(i64),
    Str(String),
}

impl StoreKey {
    /// Storage-safe text form: a type prefix (`i:` or `s:`) followed by the
    /// key with backslash, tab and newline escaped.
    pub fn encode(&self) -> String {
        match self {
            Self::Int(value) => format!("i:{}", value),
            Self::Str(value) => {
                let mut out = String::with_capacity(value.len() + 2);
                out.push_str("s:");
                for c in value.chars() {
                    match c {
                        '\\' => out.push_str("\\\\"),
                        '\t' => out.push_str("\\t"),
                        '\n' => out.push_str("\\n"),
                        c => out.push(c),
                    }
                }
                out
            }
        }
    }

    pub fn decode(text: &str) -> Result<Self, StoreError> {
        if let Some(digits) = text.strip_prefix("i:") {
            return digits.parse().map(Self::Int).map_err(|_| StoreError::Corrupt {
                detail: format!("bad integer key {:?}", text),
            });
        }
        let escaped = text.strip_prefix("s:").ok_or_else(|| StoreError::Corrupt {
            detail: format!("key {:?} has no type prefix", text),
        })?;

        let mut out = String::with_capacity(escaped.len());
        let mut chars = escaped.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('\\') => out.push('\\'),
                Some('t') => out.push('\t'),
                Some('n') => out.push('\n'),
                other => {
                    return Err(StoreError::Corrupt {
                        detail: format!("bad escape {:?} in key {:?}", other, text),
                    })
                }
            }
        }
        Ok(Self::Str(out))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            Self::Int(_) => None,
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{}", value),
            Self::Str(value) => f.write_str(value),
        }
    }
}

impl From<&str> for StoreKey {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for StoreKey {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for StoreKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl TryFrom<usize> for StoreKey {
    type Error = StoreError;

    fn try_from(value: usize) -> Result<Self, StoreError> {
        i64::try_from(value)
            .map(Self::Int)
            .map_err(|_| StoreError::PositionTooLarge { index: value })
    }
}

/// Entries of a store, in sorted key order
pub type Items<'a, V> = Box<dyn Iterator<Item = Result<(StoreKey, V), StoreError>> + 'a>;

/// A mapping from [`StoreKey`] to `V` whose iteration order is the key order,
/// not the insertion order.
pub trait OrderedKeyValueStore<V> {
    /// Fails with [`StoreError::NotFound`] if `key` is absent
    fn get(&self, key: &StoreKey) -> Result<V, StoreError>;

    fn set(&mut self, key: StoreKey, value: V) -> Result<(), StoreError>;

    /// Remove `key` and return its value
    fn delete(&mut self, key: &StoreKey) -> Result<V, StoreError>;

    fn contains(&self, key: &StoreKey) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn keys(&self) -> Vec<StoreKey>;

    fn items(&self) -> Items<'_, V>;

    fn values<'a>(&'a self) -> Box<dyn Iterator<Item = Result<V, StoreError>> + 'a>
    where
        V: 'a,
    {
        Box::new(self.items().map(|item| item.map(|(_, value)| value)))
    }

    /// Flush and release the backing storage
    fn close(self) -> Result<(), StoreError>
    where
        Self: Sized;
}

/// Which [`OrderedKeyValueStore`] implementation backs a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Disk,
}

impl StoreBackend {
    /// Page to disk once the estimated table size exceeds `memory_limit` bytes
    pub fn select(estimated_bytes: u64, memory_limit: u64) -> Self {
        if estimated_bytes > memory_limit {
            Self::Disk
        } else {
            Self::Memory
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Disk => f.write_str("disk"),
        }
    }
}

/// A store whose backend is chosen at run time
pub enum AnyStore<V> {
    Memory(MemoryStore<V>),
    Disk(DiskStore<V>),
}

impl<V> AnyStore<V> {
    /// `scope_dir` is only touched by the disk backend
    pub fn open(backend: StoreBackend, scope_dir: &Path) -> Result<Self, StoreError> {
        match backend {
            StoreBackend::Memory => Ok(Self::Memory(MemoryStore::new())),
            StoreBackend::Disk => Ok(Self::Disk(DiskStore::open(scope_dir)?)),
        }
    }

    pub fn backend(&self) -> StoreBackend {
        match self {
            Self::Memory(_) => StoreBackend::Memory,
            Self::Disk(_) => StoreBackend::Disk,
        }
    }
}

impl<V: Clone + Serialize + DeserializeOwned> OrderedKeyValueStore<V> for AnyStore<V> {
    fn get(&self, key: &StoreKey) -> Result<V, StoreError> {
        match self {
            Self::Memory(store) => store.get(key),
            Self::Disk(store) => store.get(key),
        }
    }

    fn set(&mut self, key: StoreKey, value: V) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.set(key, value),
            Self::Disk(store) => store.set(key, value),
        }
    }

    fn delete(&mut self, key: &StoreKey) -> Result<V, StoreError> {
        match self {
            Self::Memory(store) => store.delete(key),
            Self::Disk(store) => store.delete(key),
        }
    }

    fn contains(&self, key: &StoreKey) -> bool {
        match self {
            Self::Memory(store) => store.contains(key),
            Self::Disk(store) => store.contains(key),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Memory(store) => store.len(),
            Self::Disk(store) => store.len(),
        }
    }

    fn keys(&self) -> Vec<StoreKey> {
        match self {
            Self::Memory(store) => store.keys(),
            Self::Disk(store) => store.keys(),
        }
    }

    fn items(&self) -> Items<'_, V> {
        match self {
            Self::Memory(store) => store.items(),
            Self::Disk(store) => store.items(),
        }
    }

    fn close(self) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.close(),
            Self::Disk(store) => store.close(),
        }
    }
}
