//! Cluster configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```toml
//! cluster_name = "stocks"
//! rpc_timeout_ms = 5000
//! lock_timeout_ms = 10000
//! aggregation = "strict"
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::rpc::AggregationRule;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    /// Name of the group every node joins.
    pub cluster_name: String,
    /// Name of the cluster-wide lock serializing all operations.
    pub lock_name: String,
    /// How long a broadcast waits for each member's reply.
    pub rpc_timeout_ms: u64,
    /// How long a joining node waits for its state.
    pub state_timeout_ms: u64,
    /// Bound on waiting for the cluster lock; unbounded when absent.
    pub lock_timeout_ms: Option<u64>,
    pub aggregation: AggregationRule,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_name: "stocks".to_string(),
            lock_name: "cluster-lock".to_string(),
            rpc_timeout_ms: 30_000,
            state_timeout_ms: 30_000,
            lock_timeout_ms: None,
            aggregation: AggregationRule::default(),
        }
    }
}

impl ClusterConfig {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid cluster config")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn state_timeout(&self) -> Duration {
        Duration::from_millis(self.state_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }
}
