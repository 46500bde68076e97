//! Member identities, views, and the tracker that records view changes.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Opaque identity assigned to a member when it connects to a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(String);

impl MemberId {
    pub fn random() -> Self {
        Self(nanoid!(10))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Membership of a group at one point in time.
///
/// Members are listed in join order; the first one is the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct View {
    id: u64,
    members: Vec<MemberId>,
}

impl View {
    pub fn new(id: u64, members: Vec<MemberId>) -> Self {
        Self { id, members }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn members(&self) -> &[MemberId] {
        &self.members
    }

    pub fn coordinator(&self) -> Option<&MemberId> {
        self.members.first()
    }

    pub fn contains(&self, member: &MemberId) -> bool {
        self.members.contains(member)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] (", self.id)?;
        for (i, member) in self.members.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{member}")?;
        }
        f.write_str(")")
    }
}

/// Latest view seen by one member.
///
/// Only used for observability; the engine does not retry or reconfigure
/// anything when the view changes.
#[derive(Debug, Default)]
pub struct MembershipTracker {
    current: RwLock<View>,
}

impl MembershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `view` and logs who joined and who left since the last one.
    ///
    /// Views older than the current one are ignored, since notifications may
    /// race with the member's own connect.
    pub fn on_view_changed(&self, view: View) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if !current.is_empty() && view.id() <= current.id() {
            return;
        }

        let joined: Vec<&MemberId> = view
            .members()
            .iter()
            .filter(|member| !current.contains(member))
            .collect();
        let left: Vec<&MemberId> = current
            .members()
            .iter()
            .filter(|member| !view.contains(member))
            .collect();
        info!(view = %view, ?joined, ?left, "change in membership");

        *current = view;
    }

    pub fn current(&self) -> View {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
