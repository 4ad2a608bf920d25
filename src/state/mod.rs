pub mod scheduler;
pub mod staking;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{CoreError, CoreResult};

/// Read access to a key-value state view.
///
/// The production deployment backs this with the versioned authenticated
/// store; [`MemoryStore`] is the reference implementation used by tests.
pub trait StateRead {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Entries with `start <= key < end`, ascending by raw key bytes.
    fn range(&self, start: &[u8], end: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;
}

/// Write access on top of [`StateRead`].
pub trait StateWrite: StateRead {
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>);
    fn remove(&mut self, key: &[u8]);
}

impl<S: StateRead + ?Sized> StateRead for &S {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        (**self).get(key)
    }

    fn range(&self, start: &[u8], end: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        (**self).range(start, end)
    }
}

impl<S: StateRead + ?Sized> StateRead for &mut S {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        (**self).get(key)
    }

    fn range(&self, start: &[u8], end: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        (**self).range(start, end)
    }
}

impl<S: StateWrite + ?Sized> StateWrite for &mut S {
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        (**self).set(key, value)
    }

    fn remove(&mut self, key: &[u8]) {
        (**self).remove(key)
    }
}

/// Interface to the versioned key-value store backing the state tree.
///
/// The hot path stages writes in an [`Overlay`] and applies them here on
/// commit; every committed version stays readable as a cheap shared view.
pub trait StateStore {
    /// View of the current (possibly uncommitted) head.
    fn head(&self) -> Arc<dyn StateRead + Send + Sync>;

    /// Applies a batch of pending writes (`None` removes the key).
    fn apply(&mut self, pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>);

    /// Freezes the head as `version` and returns the state root.
    fn commit(&mut self, version: u64) -> [u8; 32];

    fn snapshot_at(&self, version: u64) -> Option<Arc<dyn StateRead + Send + Sync>>;

    fn latest_version(&self) -> Option<u64>;
}

/// An immutable view of the state at one committed version.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl StateRead for Snapshot {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn range(&self, start: &[u8], end: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.entries
            .range(start.to_vec()..end.to_vec())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// In-memory versioned store. Every commit freezes a reference-counted
/// snapshot that readers can hold while the hot path moves on.
#[derive(Default)]
pub struct MemoryStore {
    head: BTreeMap<Vec<u8>, Vec<u8>>,
    versions: BTreeMap<u64, Arc<Snapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of the uncommitted head, used as the base of the next
    /// block's overlay.
    pub fn head_snapshot(&self) -> Arc<Snapshot> {
        Arc::new(Snapshot {
            entries: self.head.clone(),
        })
    }

    fn root_hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        for (key, value) in &self.head {
            hasher.update(&(key.len() as u64).to_le_bytes());
            hasher.update(key);
            hasher.update(&(value.len() as u64).to_le_bytes());
            hasher.update(value);
        }
        *hasher.finalize().as_bytes()
    }
}

impl StateStore for MemoryStore {
    fn head(&self) -> Arc<dyn StateRead + Send + Sync> {
        self.head_snapshot()
    }

    fn apply(&mut self, pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>) {
        for (key, value) in pending {
            match value {
                Some(value) => {
                    self.head.insert(key, value);
                }
                None => {
                    self.head.remove(&key);
                }
            }
        }
    }

    fn commit(&mut self, version: u64) -> [u8; 32] {
        let snapshot = Arc::new(Snapshot {
            entries: self.head.clone(),
        });
        self.versions.insert(version, snapshot);
        self.root_hash()
    }

    fn snapshot_at(&self, version: u64) -> Option<Arc<dyn StateRead + Send + Sync>> {
        self.versions
            .get(&version)
            .map(|snapshot| snapshot.clone() as Arc<dyn StateRead + Send + Sync>)
    }

    fn latest_version(&self) -> Option<u64> {
        self.versions.keys().next_back().copied()
    }
}

/// Checkpoint token for rolling an [`Overlay`] back to a previous point.
pub struct OverlayCheckpoint {
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

/// A discardable write overlay over a base snapshot.
///
/// All hot-path mutations go through an overlay; a failed transaction rolls
/// back to its checkpoint and a failed block is dropped wholesale.
pub struct Overlay {
    base: Arc<dyn StateRead + Send + Sync>,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Overlay {
    pub fn new(base: Arc<dyn StateRead + Send + Sync>) -> Self {
        Self {
            base,
            pending: BTreeMap::new(),
        }
    }

    pub fn checkpoint(&self) -> OverlayCheckpoint {
        OverlayCheckpoint {
            pending: self.pending.clone(),
        }
    }

    pub fn rollback(&mut self, checkpoint: OverlayCheckpoint) {
        self.pending = checkpoint.pending;
    }

    pub fn into_pending(self) -> BTreeMap<Vec<u8>, Option<Vec<u8>>> {
        self.pending
    }
}

impl StateRead for Overlay {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.pending.get(key) {
            Some(Some(value)) => Some(value.clone()),
            Some(None) => None,
            None => self.base.get(key),
        }
    }

    fn range(&self, start: &[u8], end: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.base.range(start, end).into_iter().collect();
        for (key, value) in self.pending.range(start.to_vec()..end.to_vec()) {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged.into_iter().collect()
    }
}

impl StateWrite for Overlay {
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending.insert(key, Some(value));
    }

    fn remove(&mut self, key: &[u8]) {
        self.pending.insert(key.to_vec(), None);
    }
}

pub fn get_typed<T: DeserializeOwned, S: StateRead + ?Sized>(
    state: &S,
    key: &[u8],
) -> CoreResult<Option<T>> {
    match state.get(key) {
        Some(raw) => bincode::deserialize(&raw).map(Some).map_err(|err| {
            CoreError::StateCorruption(format!("undecodable state entry: {err}"))
        }),
        None => Ok(None),
    }
}

pub fn set_typed<T: Serialize, S: StateWrite + ?Sized>(
    state: &mut S,
    key: Vec<u8>,
    value: &T,
) -> CoreResult<()> {
    let raw = bincode::serialize(value)?;
    state.set(key, raw);
    Ok(())
}
