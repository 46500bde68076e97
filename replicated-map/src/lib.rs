//! A key-value map replicated on every member of a group.
//!
//! Every node holds a full copy of the map. Writes made on any node are
//! broadcast to all members and applied in the same order everywhere, and a
//! node joining later receives a full snapshot before it serves requests.
//!
//! # Architecture
//!
//! - **Local store**: each node's copy, guarded by its own mutex
//! - **Cluster lock**: one named lock, held around every write and every
//!   single-key read, which totally orders them across the cluster
//! - **Broadcast invoker**: sends an operation to every member and collects
//!   one reply, or a suspicion, per member
//! - **Replication engine**: runs `put`/`remove`/`compare_and_swap`/`get`
//!   on top of the three, and serves or installs state when nodes join
//!
//! The lock and the invoker are traits. [`group::Group`] implements them in
//! process, standing in for a group communication system.
//!
//! # Modules
//!
//! - [`map`]: the replication engine
//! - [`runtime`]: joining a group, the dispatcher task, node handles
//! - [`group`]: in-process membership, broadcast, and state delivery
//! - [`store`]: per-node storage and snapshots
//! - [`lock`]: cluster lock trait and its in-process implementation
//! - [`rpc`]: broadcast operations, replies, and aggregation
//! - [`membership`]: member identities and views
//! - [`config`]: cluster configuration
//! - [`protocol`]: console command parsing
//! - [`codec`]: exact float encoding for operations and snapshots

pub mod codec;
pub mod config;
pub mod error;
pub mod group;
pub mod lock;
pub mod map;
pub mod membership;
pub mod protocol;
pub mod rpc;
pub mod runtime;
pub mod store;

pub use config::ClusterConfig;
pub use error::{ReplicationError, Result};
pub use group::Group;
pub use map::ReplicatedMap;
pub use runtime::{Node, join};
