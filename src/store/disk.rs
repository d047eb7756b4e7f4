use super::{Items, OrderedKeyValueStore, StoreError, StoreKey};
use log::{debug, warn};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Dead bytes tolerated before an automatic compaction
const COMPACT_MIN_DEAD_BYTES: u64 = 1 << 20;

/// Location of one live record in the backing file
#[derive(Debug, Clone, Copy)]
struct Slot {
    /// Offset of the JSON value, past the key and tab
    value_offset: u64,
    value_len: u64,
    record_len: u64,
}

/// [`OrderedKeyValueStore`] whose values live in a file.
///
/// Records are appended as `<encoded key>\t<json value>\n`; only the key
/// index stays in memory. Overwritten and deleted records become dead bytes
/// until [`DiskStore::compact`] rewrites the live ones into a fresh file.
///
/// The backing file is removed by [`OrderedKeyValueStore::close`], or by
/// `Drop` if the store is abandoned.
pub struct DiskStore<V> {
    path: PathBuf,
    file: File,
    index: BTreeMap<StoreKey, Slot>,
    end: u64,
    live_bytes: u64,
    dead_bytes: u64,
    released: bool,
    _values: PhantomData<fn() -> V>,
}

impl<V> DiskStore<V> {
    /// Create a uniquely named backing file under `scope_dir`
    pub fn open<P: AsRef<Path>>(scope_dir: P) -> Result<Self, StoreError> {
        let (path, file) = create_unique(scope_dir.as_ref())?;
        debug!("Opened disk store at {}", path.display());

        Ok(Self {
            path,
            file,
            index: BTreeMap::new(),
            end: 0,
            live_bytes: 0,
            dead_bytes: 0,
            released: false,
            _values: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes held by overwritten or deleted records
    pub fn dead_bytes(&self) -> u64 {
        self.dead_bytes
    }

    /// Rewrite the live records, in key order, into a new backing file
    pub fn compact(&mut self) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let (new_path, mut new_file) = create_unique(&dir)?;

        let (new_index, end) = match self.copy_live(&mut new_file) {
            Ok(copied) => copied,
            Err(e) => {
                if let Err(rm) = fs::remove_file(&new_path) {
                    warn!("Could not remove partial store file {}: {}", new_path.display(), rm);
                }
                return Err(e);
            }
        };

        let old_path = std::mem::replace(&mut self.path, new_path);
        self.file = new_file;
        self.index = new_index;
        self.end = end;
        self.live_bytes = end;
        self.dead_bytes = 0;
        fs::remove_file(&old_path)?;
        debug!(
            "Compacted disk store into {} ({} bytes)",
            self.path.display(),
            end
        );

        Ok(())
    }

    fn copy_live(&self, into: &mut File) -> Result<(BTreeMap<StoreKey, Slot>, u64), StoreError> {
        let mut index = BTreeMap::new();
        let mut end = 0;
        for (key, slot) in &self.index {
            let value = self.read_raw(slot)?;
            let new_slot = write_record(into, end, key, &value)?;
            end += new_slot.record_len;
            index.insert(key.clone(), new_slot);
        }
        Ok((index, end))
    }

    fn read_raw(&self, slot: &Slot) -> Result<Vec<u8>, StoreError> {
        let mut buf = vec![0; slot.value_len as usize];
        let mut file = &self.file;
        file.seek(SeekFrom::Start(slot.value_offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn retire(&mut self, slot: Slot) {
        self.live_bytes -= slot.record_len;
        self.dead_bytes += slot.record_len;
    }

    fn release(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.file.flush()?;
        fs::remove_file(&self.path)
    }
}

impl<V: DeserializeOwned> DiskStore<V> {
    fn read_slot(&self, slot: &Slot) -> Result<V, StoreError> {
        let raw = self.read_raw(slot)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

impl<V: Serialize + DeserializeOwned> OrderedKeyValueStore<V> for DiskStore<V> {
    fn get(&self, key: &StoreKey) -> Result<V, StoreError> {
        let slot = self
            .index
            .get(key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
        self.read_slot(slot)
    }

    fn set(&mut self, key: StoreKey, value: V) -> Result<(), StoreError> {
        let json = serde_json::to_vec(&value)?;
        let slot = write_record(&mut self.file, self.end, &key, &json)?;
        self.end += slot.record_len;
        self.live_bytes += slot.record_len;

        if let Some(old) = self.index.insert(key, slot) {
            self.retire(old);
        }
        if self.dead_bytes > self.live_bytes && self.dead_bytes > COMPACT_MIN_DEAD_BYTES {
            self.compact()?;
        }

        Ok(())
    }

    fn delete(&mut self, key: &StoreKey) -> Result<V, StoreError> {
        let slot = *self
            .index
            .get(key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
        let value = self.read_slot(&slot)?;
        self.index.remove(key);
        self.retire(slot);

        Ok(value)
    }

    fn contains(&self, key: &StoreKey) -> bool {
        self.index.contains_key(key)
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn keys(&self) -> Vec<StoreKey> {
        self.index.keys().cloned().collect()
    }

    fn items(&self) -> Items<'_, V> {
        Box::new(
            self.index
                .iter()
                .map(move |(key, slot)| self.read_slot(slot).map(|value| (key.clone(), value))),
        )
    }

    fn close(mut self) -> Result<(), StoreError> {
        self.release()?;
        debug!("Closed disk store at {}", self.path.display());
        Ok(())
    }
}

impl<V> Drop for DiskStore<V> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(
                "Could not remove disk store file {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Retry random names until one does not exist yet
fn create_unique(dir: &Path) -> Result<(PathBuf, File), StoreError> {
    loop {
        let path = dir.join(format!("store-{:016x}.kv", rand::random::<u64>()));
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn write_record(file: &mut File, end: u64, key: &StoreKey, json: &[u8]) -> Result<Slot, StoreError> {
    let encoded = key.encode();
    let mut record = Vec::with_capacity(encoded.len() + json.len() + 2);
    record.extend_from_slice(encoded.as_bytes());
    record.push(b'\t');
    let value_offset = end + record.len() as u64;
    record.extend_from_slice(json);
    record.push(b'\n');

    file.seek(SeekFrom::Start(end))?;
    file.write_all(&record)?;

    Ok(Slot {
        value_offset,
        value_len: json.len() as u64,
        record_len: record.len() as u64,
    })
}
