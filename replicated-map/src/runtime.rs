//! Joining a group and running a member.
//!
//! This module wires a [`ReplicatedMap`] to a [`Group`]:
//!
//! - **Dispatcher task**: drains the member's [`Inbox`], applying broadcast
//!   operations, recording view changes, and installing received state
//! - **State provider tasks**: short-lived tasks that serve one joining
//!   member each; they wait for the cluster lock, so they must not run on the
//!   dispatcher, which has to keep answering apply requests meanwhile
//! - **Caller**: drives client operations through the returned [`Node`]
//!
//! [`join`] only returns once state transfer has completed, so a node cannot
//! serve reads or writes before it holds a full copy of the map.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ClusterConfig;
use crate::error::{ReplicationError, Result};
use crate::group::{Channel, Event, Group, Inbox};
use crate::map::ReplicatedMap;
use crate::membership::{MemberId, View};
use crate::rpc::Operation;
use crate::store::Snapshot;

/// A running member of a group.
///
/// Dropping the node disconnects it from the group.
pub struct Node {
    map: Arc<ReplicatedMap>,
    channel: Channel,
    dispatcher: JoinHandle<()>,
}

impl Node {
    pub fn id(&self) -> &MemberId {
        self.map.local_id()
    }

    pub async fn get(&self, key: &str) -> Result<Option<f64>> {
        self.map.get(key).await
    }

    pub async fn put(&self, key: &str, value: f64) -> Result<bool> {
        self.map.put(key, value).await
    }

    pub async fn remove(&self, key: &str) -> Result<bool> {
        self.map.remove(key).await
    }

    pub async fn compare_and_swap(&self, key: &str, old: f64, new: f64) -> Result<bool> {
        self.map.compare_and_swap(key, old, new).await
    }

    pub fn entry_set(&self) -> Snapshot {
        self.map.entry_set()
    }

    pub fn members(&self) -> View {
        self.map.members()
    }

    /// Leaves the group and stops the dispatcher.
    pub fn leave(self) {
        info!(member = %self.id(), "leaving group");
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.channel.disconnect();
        self.dispatcher.abort();
    }
}

/// Connects a new member to `group` and blocks until it holds the group's
/// state.
///
/// The first member of a group starts with an empty map. Any later member
/// asks the oldest member that completed its own join for a snapshot, and
/// fails with [`ReplicationError::StateTransfer`] if there is no such member
/// or no state arrives within `config.state_timeout()`. The member is
/// disconnected again in that case.
pub async fn join(group: &Group, config: &ClusterConfig) -> Result<Node> {
    let (channel, inbox) = group.connect();
    let channel = channel.with_rpc_timeout(config.rpc_timeout());
    let lock = channel
        .lock(&config.lock_name)
        .with_timeout(config.lock_timeout());
    let map = Arc::new(ReplicatedMap::new(
        channel.local_id().clone(),
        Arc::new(lock),
        Arc::new(channel.clone()),
        config.aggregation,
    ));

    let (installed_tx, installed_rx) = oneshot::channel();
    let dispatcher = tokio::spawn(dispatch(
        Arc::clone(&map),
        channel.clone(),
        inbox,
        installed_tx,
    ));
    let node = Node {
        map,
        channel,
        dispatcher,
    };

    // On failure `node` is dropped, which takes the member back out.
    let Some(provider) = node.channel.request_state()? else {
        info!(member = %node.id(), group = group.name(), "first member, starting with empty map");
        node.channel.mark_synced()?;
        return Ok(node);
    };

    let timeout = config.state_timeout();
    match tokio::time::timeout(timeout, installed_rx).await {
        Ok(Ok(Ok(entries))) => {
            info!(member = %node.id(), %provider, entries, "state transfer complete");
            node.channel.mark_synced()?;
            Ok(node)
        }
        Ok(Ok(Err(err))) => Err(err),
        Ok(Err(_)) => Err(ReplicationError::StateTransfer(
            "dispatcher stopped before state arrived".into(),
        )),
        Err(_) => Err(ReplicationError::StateTransfer(format!(
            "no state from {provider} within {timeout:?}"
        ))),
    }
}

/// Drains a member's inbox until the group drops it.
async fn dispatch(
    map: Arc<ReplicatedMap>,
    channel: Channel,
    mut inbox: Inbox,
    installed: oneshot::Sender<Result<usize>>,
) {
    let mut installed = Some(installed);
    while let Some(event) = inbox.recv().await {
        match event {
            Event::ViewChanged(view) => map.on_view_changed(view),
            Event::Invoke { payload, reply } => {
                let applied = match Operation::decode(&payload) {
                    Ok(operation) => map.on_operation(operation),
                    Err(err) => {
                        warn!(error = %err, "dropping undecodable operation");
                        false
                    }
                };
                let _ = reply.send(applied);
            }
            Event::StateRequested { requester } => {
                spawn_state_provider(Arc::clone(&map), channel.clone(), requester);
            }
            Event::StateReceived { payload } => {
                // State is installed once; a second copy would roll back
                // writes applied since the first.
                let Some(tx) = installed.take() else {
                    warn!("ignoring state received after joining");
                    continue;
                };
                let result = map.on_state_received(&payload);
                if let Err(err) = &result {
                    warn!(error = %err, "failed to install received state");
                }
                let _ = tx.send(result);
            }
        }
    }
}

fn spawn_state_provider(map: Arc<ReplicatedMap>, channel: Channel, requester: MemberId) {
    tokio::spawn(async move {
        let sent = map
            .on_state_requested(|payload| channel.send_state(&requester, payload))
            .await;
        if let Err(err) = sent {
            warn!(%requester, error = %err, "failed to provide state");
        }
    });
}
