//! Cluster-wide mutual exclusion.
//!
//! The engine only depends on [`ClusterLock`]. [`NamedLock`] is the in-process
//! implementation handed out by [`crate::group::Channel::lock`]: every member
//! of a group that asks for the same name shares one async mutex.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{ReplicationError, Result};
use crate::membership::MemberId;

/// A lock with at most one holder across the whole cluster.
#[async_trait]
pub trait ClusterLock: Send + Sync {
    /// Well-known name identifying the lock cluster-wide.
    fn name(&self) -> &str;

    /// Suspends the caller until it is the sole holder.
    ///
    /// The lock is released when the returned guard is dropped.
    async fn acquire(&self) -> Result<ClusterLockGuard>;
}

/// Proof of holding a [`ClusterLock`]. Dropping it releases the lock.
#[must_use = "the cluster lock is released as soon as the guard is dropped"]
pub struct ClusterLockGuard {
    name: String,
    _held: Box<dyn Send + Sync>,
}

impl ClusterLockGuard {
    /// Wraps whatever keeps the underlying lock held.
    pub fn new(name: impl Into<String>, held: impl Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            _held: Box::new(held),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ClusterLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterLockGuard")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Drop for ClusterLockGuard {
    fn drop(&mut self) {
        debug!(lock = %self.name, "released cluster lock");
    }
}

/// In-process cluster lock shared by every member of one group.
///
/// Without a timeout, `acquire` waits as long as it takes.
#[derive(Clone)]
pub struct NamedLock {
    name: String,
    owner: MemberId,
    mutex: Arc<Mutex<()>>,
    timeout: Option<Duration>,
}

impl NamedLock {
    pub fn new(name: impl Into<String>, owner: MemberId, mutex: Arc<Mutex<()>>) -> Self {
        Self {
            name: name.into(),
            owner,
            mutex,
            timeout: None,
        }
    }

    /// Bounds how long `acquire` may wait before failing with
    /// [`ReplicationError::LockTimeout`].
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ClusterLock for NamedLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self) -> Result<ClusterLockGuard> {
        let pending = Arc::clone(&self.mutex).lock_owned();
        let held: OwnedMutexGuard<()> = match self.timeout {
            Some(waited) => tokio::time::timeout(waited, pending).await.map_err(|_| {
                ReplicationError::LockTimeout {
                    name: self.name.clone(),
                    waited,
                }
            })?,
            None => pending.await,
        };
        debug!(lock = %self.name, owner = %self.owner, "acquired cluster lock");
        Ok(ClusterLockGuard::new(self.name.clone(), held))
    }
}
