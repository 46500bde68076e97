//! In-memory replica of the map held by every node.
//!
//! The store is the only place entries live on a node. Remote apply requests,
//! client reads and state transfer all go through it, and it never hands out
//! references to its contents: callers get values or a [`Snapshot`] copy.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::codec::{self, f64_bits_map};
use crate::error::Result;

/// Point-in-time copy of every entry in a [`LocalStore`].
///
/// Ordered by key so listings and transferred state are stable across nodes.
/// Two snapshots are equal when they hold the same keys with bit-identical
/// values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(with = "f64_bits_map")]
    entries: BTreeMap<String, f64>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), *value))
    }

    /// Encodes the snapshot for transfer to a joining member.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|((k1, v1), (k2, v2))| k1 == k2 && codec::same_value(v1, v2))
    }
}

impl FromIterator<(String, f64)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Snapshot {
    type Item = (String, f64);
    type IntoIter = btree_map::IntoIter<String, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Thread-safe key-value store owned by one node.
///
/// Every operation takes the internal mutex for its whole duration and none of
/// them touches the network, so the lock is only ever held briefly. This mutex
/// is independent of the cluster lock: apply requests from other members run
/// on the transport's dispatcher, which never holds the cluster lock.
#[derive(Debug, Default)]
pub struct LocalStore {
    data: Mutex<BTreeMap<String, f64>>,
}

impl LocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A panic while holding the mutex cannot leave a half-applied entry
    /// behind, so a poisoned lock is still safe to use.
    fn data(&self) -> MutexGuard<'_, BTreeMap<String, f64>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.data().get(key).copied()
    }

    /// Stores a value, overwriting any existing one.
    pub fn put(&self, key: String, value: f64) {
        self.data().insert(key, value);
    }

    /// Removes a key. Returns `true` if it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.data().remove(key).is_some()
    }

    /// Copies every entry out while holding the mutex once.
    pub fn snapshot_all(&self) -> Snapshot {
        Snapshot {
            entries: self.data().clone(),
        }
    }

    /// Replaces the whole contents with `snapshot`.
    ///
    /// Readers observe either the old contents or the new ones, never a mix.
    pub fn replace_all(&self, snapshot: Snapshot) {
        *self.data() = snapshot.entries;
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }
}
