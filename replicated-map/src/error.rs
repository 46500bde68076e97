use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the replication engine and the group it runs on.
///
/// Ordinary outcomes of an operation (a key that is absent, a failed
/// compare, a suspected member) are not errors; they come back as
/// `bool`/`Option` results.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("timed out after {waited:?} waiting for cluster lock '{name}'")]
    LockTimeout { name: String, waited: Duration },

    #[error("state transfer failed: {0}")]
    StateTransfer(String),

    #[error("member is no longer connected to the group")]
    Disconnected,

    #[error("failed to encode or decode payload: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type Result<T, E = ReplicationError> = std::result::Result<T, E>;
