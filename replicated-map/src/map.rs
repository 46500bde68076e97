//! The replication engine.
//!
//! [`ReplicatedMap`] combines a node's [`LocalStore`] with the cluster lock and
//! the broadcast invoker. Client operations run on the calling task; the
//! `on_*` methods are inbound ports that the transport's dispatcher calls
//! concurrently with them.

use std::sync::Arc;

use tracing::{debug, info};

use crate::codec;
use crate::error::Result;
use crate::lock::ClusterLock;
use crate::membership::{MemberId, MembershipTracker, View};
use crate::rpc::{AggregationRule, BroadcastInvoker, Operation};
use crate::store::{LocalStore, Snapshot};

/// A map replicated on every member of a group.
///
/// Every write and every single-key read runs under the cluster lock, which
/// totally orders them across the cluster. Writes are broadcast to every
/// member, the caller included, and each member applies them to its own
/// store.
pub struct ReplicatedMap {
    me: MemberId,
    store: LocalStore,
    membership: MembershipTracker,
    lock: Arc<dyn ClusterLock>,
    invoker: Arc<dyn BroadcastInvoker>,
    rule: AggregationRule,
}

impl ReplicatedMap {
    pub fn new(
        me: MemberId,
        lock: Arc<dyn ClusterLock>,
        invoker: Arc<dyn BroadcastInvoker>,
        rule: AggregationRule,
    ) -> Self {
        Self {
            me,
            store: LocalStore::new(),
            membership: MembershipTracker::new(),
            lock,
            invoker,
            rule,
        }
    }

    pub fn local_id(&self) -> &MemberId {
        &self.me
    }

    /// Sets `key` to `value` on every member.
    ///
    /// Returns the aggregated result of the broadcast under the configured
    /// [`AggregationRule`].
    pub async fn put(&self, key: &str, value: f64) -> Result<bool> {
        let _guard = self.lock.acquire().await?;
        self.broadcast(Operation::ApplyPut {
            key: key.to_string(),
            value,
        })
        .await
    }

    /// Removes `key` from every member. Members that did not hold the key
    /// reply `false`.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let _guard = self.lock.acquire().await?;
        self.broadcast(Operation::ApplyRemove {
            key: key.to_string(),
        })
        .await
    }

    /// Sets `key` to `new` on every member if this member's value is exactly
    /// `old`.
    ///
    /// The comparison uses the local copy only. That is enough because the
    /// cluster lock is held, so no write can be in flight anywhere. Values
    /// match on their bit pattern: `0.0` and `-0.0` differ, `NaN` matches a
    /// stored `NaN`, and an absent key never matches.
    pub async fn compare_and_swap(&self, key: &str, old: f64, new: f64) -> Result<bool> {
        let _guard = self.lock.acquire().await?;
        let current = self.store.get(key);
        if !current.is_some_and(|value| codec::same_value(value, old)) {
            debug!(key, ?current, expected = old, "compare-and-swap rejected");
            return Ok(false);
        }
        self.broadcast(Operation::ApplyPut {
            key: key.to_string(),
            value: new,
        })
        .await
    }

    /// Reads `key` under the cluster lock, so the value is never older than
    /// the last write that completed anywhere.
    pub async fn get(&self, key: &str) -> Result<Option<f64>> {
        let _guard = self.lock.acquire().await?;
        Ok(self.store.get(key))
    }

    /// Lists this member's entries without taking the cluster lock.
    ///
    /// Cheap and never blocks on other members, but may miss a write that is
    /// being applied concurrently.
    pub fn entry_set(&self) -> Snapshot {
        self.store.snapshot_all()
    }

    /// Latest view this member was told about.
    pub fn members(&self) -> View {
        self.membership.current()
    }

    async fn broadcast(&self, operation: Operation) -> Result<bool> {
        let responses = self.invoker.invoke(&operation).await?;
        let succeeded = responses.succeeded(self.rule);
        info!(
            operation = operation.name(),
            key = operation.key(),
            %responses,
            succeeded,
            "responses"
        );
        Ok(succeeded)
    }

    /// Applies an operation broadcast by any member, this one included.
    pub fn on_operation(&self, operation: Operation) -> bool {
        match operation {
            Operation::ApplyPut { key, value } => {
                info!(%key, value, "map: set");
                self.store.put(key, value);
                true
            }
            Operation::ApplyRemove { key } => {
                let removed = self.store.remove(&key);
                info!(%key, removed, "map: remove");
                removed
            }
        }
    }

    pub fn on_view_changed(&self, view: View) {
        self.membership.on_view_changed(view);
    }

    /// Serves a joining member.
    ///
    /// Takes the cluster lock, snapshots the store, and hands the encoded
    /// snapshot to `deliver` before releasing the lock, so no write can slip
    /// in between the snapshot and its delivery. Returns the number of
    /// entries sent.
    pub async fn on_state_requested<F>(&self, deliver: F) -> Result<usize>
    where
        F: FnOnce(Vec<u8>) -> Result<()> + Send,
    {
        let _guard = self.lock.acquire().await?;
        let snapshot = self.store.snapshot_all();
        info!(entries = snapshot.len(), "returning state");
        deliver(snapshot.encode()?)?;
        Ok(snapshot.len())
    }

    /// Installs state received while joining, discarding whatever this
    /// member applied before it arrived. Returns the number of entries.
    pub fn on_state_received(&self, payload: &[u8]) -> Result<usize> {
        let snapshot = Snapshot::decode(payload)?;
        let entries = snapshot.len();
        info!(entries, "receiving state");
        self.store.replace_all(snapshot);
        Ok(entries)
    }
}
