//! In-process group communication.
//!
//! A [`Group`] stands in for the group communication substrate: it tracks
//! membership, delivers view changes, relays broadcast invocations, and
//! carries state to joining members. Every member gets a [`Channel`] to talk
//! to the group and an [`Inbox`] of [`Event`]s that its dispatcher drains in
//! order.
//!
//! Delivery is reliable and FIFO per member. Operations and snapshots cross
//! the group as encoded bytes, so replicas never share memory.
//!
//! Inboxes are unbounded. A member that stays in the view without draining
//! its inbox is suspected on every broadcast but never evicted, and its queue
//! keeps growing until it disconnects or its inbox is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{ReplicationError, Result};
use crate::lock::NamedLock;
use crate::membership::{MemberId, View};
use crate::rpc::{BroadcastInvoker, BroadcastResponses, Operation, Reply, SuspectReason};

/// Default time a broadcast waits for each member's reply.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Notifications delivered to one member, in delivery order.
#[derive(Debug)]
pub enum Event {
    /// The member set changed.
    ViewChanged(View),
    /// Apply an encoded [`Operation`] and answer through `reply`.
    Invoke {
        payload: Vec<u8>,
        reply: oneshot::Sender<bool>,
    },
    /// `requester` joined and needs a copy of this member's state.
    StateRequested { requester: MemberId },
    /// Encoded state sent by the member chosen to serve this one's join.
    StateReceived { payload: Vec<u8> },
}

/// Receiving side of a member's event queue.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Inbox {
    /// Waits for the next event. Returns `None` once the group is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

/// A named in-memory cluster shared by every member in the process.
#[derive(Clone)]
pub struct Group {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    name: String,
    state: Mutex<GroupState>,
}

struct Member {
    id: MemberId,
    tx: mpsc::UnboundedSender<Event>,
    /// Holds a complete copy of the group's state and may serve joiners.
    synced: bool,
}

#[derive(Default)]
struct GroupState {
    view_id: u64,
    /// Join order; the first entry is the coordinator.
    members: Vec<Member>,
    locks: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl GroupState {
    fn view(&self) -> View {
        View::new(
            self.view_id,
            self.members.iter().map(|member| member.id.clone()).collect(),
        )
    }

    fn member(&self, id: &MemberId) -> Option<&Member> {
        self.members.iter().find(|member| member.id == *id)
    }

    fn sender(&self, id: &MemberId) -> Option<&mpsc::UnboundedSender<Event>> {
        self.member(id).map(|member| &member.tx)
    }

    /// Bumps the view id and tells every member about the new view.
    fn install_view(&mut self, group: &str) -> View {
        self.view_id += 1;
        let view = self.view();
        for member in &self.members {
            if member.tx.send(Event::ViewChanged(view.clone())).is_err() {
                debug!(group, member = %member.id, "member inbox closed, view change not delivered");
            }
        }
        view
    }
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                name: name.into(),
                state: Mutex::new(GroupState::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn state(&self) -> MutexGuard<'_, GroupState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a new member and returns its channel and inbox.
    ///
    /// The new view is delivered to every member, the newcomer included.
    pub fn connect(&self) -> (Channel, Inbox) {
        let id = MemberId::random();
        let (tx, rx) = mpsc::unbounded_channel();

        let view = {
            let mut state = self.state();
            state.members.push(Member {
                id: id.clone(),
                tx,
                synced: false,
            });
            state.install_view(self.name())
        };
        info!(group = self.name(), member = %id, %view, "member connected");

        let channel = Channel {
            group: self.clone(),
            me: id,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        };
        (channel, Inbox { rx })
    }

    pub fn view(&self) -> View {
        self.state().view()
    }

    fn disconnect(&self, member: &MemberId) {
        let view = {
            let mut state = self.state();
            let before = state.members.len();
            state.members.retain(|other| other.id != *member);
            if state.members.len() == before {
                return;
            }
            state.install_view(self.name())
        };
        info!(group = self.name(), %member, %view, "member disconnected");
    }

    fn shared_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut state = self.state();
        Arc::clone(state.locks.entry(name.to_string()).or_default())
    }
}

/// One member's handle on its group.
#[derive(Clone)]
pub struct Channel {
    group: Group,
    me: MemberId,
    rpc_timeout: Duration,
}

impl Channel {
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn local_id(&self) -> &MemberId {
        &self.me
    }

    pub fn group_name(&self) -> &str {
        self.group.name()
    }

    pub fn view(&self) -> View {
        self.group.view()
    }

    /// Returns this member's handle on the group-wide lock called `name`.
    pub fn lock(&self, name: &str) -> NamedLock {
        NamedLock::new(name, self.me.clone(), self.group.shared_lock(name))
    }

    /// Asks the oldest synced member to send this member its state.
    ///
    /// Returns the chosen provider, or `None` when this member is alone in
    /// the group and there is nothing to transfer. The state itself arrives
    /// later as [`Event::StateReceived`] in this member's inbox. Members that
    /// are still joining are never chosen, since their stores may be partial.
    pub fn request_state(&self) -> Result<Option<MemberId>> {
        let state = self.group.state();
        if state.sender(&self.me).is_none() {
            return Err(ReplicationError::Disconnected);
        }
        if state.members.iter().all(|member| member.id == self.me) {
            return Ok(None);
        }
        let Some(Member { id: provider, tx, .. }) = state
            .members
            .iter()
            .find(|member| member.synced && member.id != self.me)
        else {
            return Err(ReplicationError::StateTransfer(
                "no member holds a complete copy of the state".into(),
            ));
        };

        tx.send(Event::StateRequested {
            requester: self.me.clone(),
        })
        .map_err(|_| {
            ReplicationError::StateTransfer(format!("state provider {provider} is unreachable"))
        })?;
        debug!(group = self.group_name(), %provider, "requested state");
        Ok(Some(provider.clone()))
    }

    /// Delivers encoded state to a joining member, behind anything already
    /// queued for it.
    pub fn send_state(&self, to: &MemberId, payload: Vec<u8>) -> Result<()> {
        let state = self.group.state();
        let tx = state.sender(to).ok_or_else(|| {
            ReplicationError::StateTransfer(format!("{to} left before its state was sent"))
        })?;
        tx.send(Event::StateReceived { payload })
            .map_err(|_| ReplicationError::StateTransfer(format!("{to} stopped receiving")))
    }

    /// Marks this member as holding a complete copy of the state, making it
    /// eligible to serve joiners.
    pub fn mark_synced(&self) -> Result<()> {
        let mut state = self.group.state();
        let member = state
            .members
            .iter_mut()
            .find(|member| member.id == self.me)
            .ok_or(ReplicationError::Disconnected)?;
        member.synced = true;
        debug!(group = self.group_name(), member = %self.me, "member synced");
        Ok(())
    }

    /// Leaves the group. Calling it again is a no-op.
    pub fn disconnect(&self) {
        self.group.disconnect(&self.me);
    }
}

#[async_trait]
impl BroadcastInvoker for Channel {
    async fn invoke(&self, operation: &Operation) -> Result<BroadcastResponses> {
        let payload = operation.encode()?;

        // Enqueue to every member under the group lock so concurrent
        // broadcasts land in the same relative order in every inbox.
        let pending: Vec<(MemberId, Option<oneshot::Receiver<bool>>)> = {
            let state = self.group.state();
            if state.sender(&self.me).is_none() {
                return Err(ReplicationError::Disconnected);
            }
            state
                .members
                .iter()
                .map(|member| {
                    let (reply, rx) = oneshot::channel();
                    let event = Event::Invoke {
                        payload: payload.clone(),
                        reply,
                    };
                    let rx = member.tx.send(event).ok().map(|_| rx);
                    (member.id.clone(), rx)
                })
                .collect()
        };

        let timeout = self.rpc_timeout;
        let replies = join_all(pending.into_iter().map(|(member, rx)| async move {
            let reply = match rx {
                None => Reply::Suspected(SuspectReason::Unreachable),
                Some(rx) => match tokio::time::timeout(timeout, rx).await {
                    Ok(Ok(value)) => Reply::Received(value),
                    Ok(Err(_)) => Reply::Suspected(SuspectReason::Unreachable),
                    Err(_) => Reply::Suspected(SuspectReason::Timeout),
                },
            };
            if let Reply::Suspected(reason) = reply {
                warn!(%member, ?reason, operation = operation.name(), "member suspected");
            }
            (member, reply)
        }))
        .await;

        Ok(BroadcastResponses::new(replies))
    }
}
