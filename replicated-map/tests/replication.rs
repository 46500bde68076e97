//! Integration tests for replicated writes and reads across in-process nodes.
//!
//! Every test builds a real group and joins nodes through state transfer, so
//! writes travel through the same broadcast path as in the shell.

use std::time::Duration;

use anyhow::Result;
use replicated_map::group::Inbox;
use replicated_map::lock::ClusterLock;
use replicated_map::membership::MemberId;
use replicated_map::rpc::AggregationRule;
use replicated_map::{ClusterConfig, Group, Node, ReplicationError, join};

/// Test harness for a group of nodes sharing one in-process group.
struct TestCluster {
    group: Group,
    nodes: Vec<Node>,
}

impl TestCluster {
    async fn spawn(n: usize, config: ClusterConfig) -> Result<Self> {
        let group = Group::new(config.cluster_name.clone());
        let mut nodes = Vec::with_capacity(n);
        for _ in 0..n {
            nodes.push(join(&group, &config).await?);
        }
        Ok(Self { group, nodes })
    }

    fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    /// Adds a member that stays in the view but drops every request.
    fn add_crashed_member(&self) -> MemberId {
        let (channel, inbox) = self.group.connect();
        drop(inbox);
        channel.local_id().clone()
    }

    /// Adds a member that stays in the view and never answers.
    fn add_silent_member(&self) -> Inbox {
        let (_channel, inbox) = self.group.connect();
        inbox
    }

    async fn assert_everywhere(&self, key: &str, expected: Option<f64>) -> Result<()> {
        for (index, node) in self.nodes.iter().enumerate() {
            assert_eq!(
                node.get(key).await?,
                expected,
                "node {index} disagrees on {key}"
            );
        }
        Ok(())
    }
}

fn config(aggregation: AggregationRule) -> ClusterConfig {
    ClusterConfig {
        aggregation,
        ..ClusterConfig::default()
    }
}

#[tokio::test]
async fn test_three_node_stock_scenario() -> Result<()> {
    let cluster = TestCluster::spawn(3, config(AggregationRule::Strict)).await?;
    let (a, b, c) = (cluster.node(0), cluster.node(1), cluster.node(2));

    assert!(a.put("AAPL", 150.0).await?);
    cluster.assert_everywhere("AAPL", Some(150.0)).await?;

    assert!(c.compare_and_swap("AAPL", 150.0, 155.0).await?);
    cluster.assert_everywhere("AAPL", Some(155.0)).await?;

    assert!(!b.compare_and_swap("AAPL", 150.0, 160.0).await?);
    cluster.assert_everywhere("AAPL", Some(155.0)).await?;
    Ok(())
}

#[tokio::test]
async fn test_literal_rule_reports_failure_for_healthy_cluster() -> Result<()> {
    let cluster = TestCluster::spawn(3, config(AggregationRule::Literal)).await?;

    // Every member applied the write, yet no member was suspected.
    assert!(!cluster.node(0).put("AAPL", 150.0).await?);
    cluster.assert_everywhere("AAPL", Some(150.0)).await?;
    Ok(())
}

#[tokio::test]
async fn test_literal_read_after_write_with_suspected_member() -> Result<()> {
    let cluster = TestCluster::spawn(3, config(AggregationRule::Literal)).await?;
    cluster.add_crashed_member();

    for (i, node) in cluster.nodes.iter().enumerate() {
        let value = 100.0 + i as f64;
        assert!(node.put("MSFT", value).await?);
        cluster.assert_everywhere("MSFT", Some(value)).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_non_finite_values_replicate() -> Result<()> {
    let cluster = TestCluster::spawn(2, config(AggregationRule::Strict)).await?;

    assert!(cluster.node(0).put("INF", f64::INFINITY).await?);
    assert!(cluster.node(1).put("NAN", f64::NAN).await?);
    assert!(cluster.node(0).put("ZERO", -0.0).await?);

    for node in &cluster.nodes {
        assert_eq!(node.get("INF").await?, Some(f64::INFINITY));
        assert!(node.get("NAN").await?.is_some_and(f64::is_nan));
        let zero = node.get("ZERO").await?.map(f64::to_bits);
        assert_eq!(zero, Some((-0.0f64).to_bits()));
    }

    // A stored NaN can be swapped out by naming it.
    assert!(cluster.node(1).compare_and_swap("NAN", f64::NAN, 1.0).await?);
    assert!(!cluster.node(1).compare_and_swap("ZERO", 0.0, 1.0).await?);
    cluster.assert_everywhere("NAN", Some(1.0)).await?;
    assert_eq!(cluster.node(0).entry_set(), cluster.node(1).entry_set());
    Ok(())
}

#[tokio::test]
async fn test_remove_twice() -> Result<()> {
    let cluster = TestCluster::spawn(2, config(AggregationRule::Strict)).await?;
    assert!(cluster.node(0).put("GOOG", 170.0).await?);

    assert!(cluster.node(1).remove("GOOG").await?);
    assert!(!cluster.node(1).remove("GOOG").await?);
    cluster.assert_everywhere("GOOG", None).await?;
    Ok(())
}

#[tokio::test]
async fn test_remove_twice_under_literal_rule() -> Result<()> {
    let cluster = TestCluster::spawn(2, config(AggregationRule::Literal)).await?;
    cluster.add_crashed_member();
    assert!(cluster.node(0).put("GOOG", 170.0).await?);

    assert!(cluster.node(0).remove("GOOG").await?);
    assert!(!cluster.node(0).remove("GOOG").await?);
    Ok(())
}

#[tokio::test]
async fn test_compare_and_swap_mismatch_leaves_value() -> Result<()> {
    let cluster = TestCluster::spawn(3, config(AggregationRule::Literal)).await?;
    cluster.add_crashed_member();
    assert!(cluster.node(0).put("AAPL", 150.0).await?);

    assert!(!cluster.node(1).compare_and_swap("AAPL", 149.99, 1.0).await?);
    assert!(!cluster.node(1).compare_and_swap("TSLA", 0.0, 1.0).await?);
    cluster.assert_everywhere("AAPL", Some(150.0)).await?;
    cluster.assert_everywhere("TSLA", None).await?;

    assert!(cluster.node(2).compare_and_swap("AAPL", 150.0, 151.0).await?);
    cluster.assert_everywhere("AAPL", Some(151.0)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_converge() -> Result<()> {
    let cluster = TestCluster::spawn(3, config(AggregationRule::Strict)).await?;

    for round in 0..20 {
        let left = round as f64;
        let right = -(round as f64) - 0.5;
        let (first, second) = tokio::join!(
            cluster.node(0).put("AAPL", left),
            cluster.node(2).put("AAPL", right)
        );
        assert!(first? && second?);

        let value = cluster.node(1).get("AAPL").await?;
        assert!(
            value == Some(left) || value == Some(right),
            "round {round}: unexpected value {value:?}"
        );
        cluster.assert_everywhere("AAPL", value).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_timed_out_member_is_suspected() -> Result<()> {
    let config = ClusterConfig {
        rpc_timeout_ms: 100,
        ..config(AggregationRule::Strict)
    };
    let cluster = TestCluster::spawn(2, config).await?;
    let _silent = cluster.add_silent_member();

    // The silent member never applies, so the strict rule reports failure,
    // while the members that answered keep the write.
    assert!(!cluster.node(0).put("AAPL", 150.0).await?);
    cluster.assert_everywhere("AAPL", Some(150.0)).await?;
    Ok(())
}

#[tokio::test]
async fn test_lock_timeout_and_unlocked_listing() -> Result<()> {
    let config = ClusterConfig {
        lock_timeout_ms: Some(50),
        ..config(AggregationRule::Strict)
    };
    let cluster = TestCluster::spawn(2, config.clone()).await?;
    assert!(cluster.node(0).put("AAPL", 150.0).await?);

    let (outsider, _inbox) = cluster.group.connect();
    let guard = outsider.lock(&config.lock_name).acquire().await?;

    let err = cluster
        .node(1)
        .put("AAPL", 1.0)
        .await
        .expect_err("cluster lock is held elsewhere");
    assert!(matches!(err, ReplicationError::LockTimeout { .. }), "{err}");
    assert!(matches!(
        cluster.node(1).get("AAPL").await,
        Err(ReplicationError::LockTimeout { .. })
    ));

    // Listing does not wait for the cluster lock.
    assert_eq!(cluster.node(1).entry_set().get("AAPL"), Some(150.0));

    drop(guard);
    outsider.disconnect();
    cluster.assert_everywhere("AAPL", Some(150.0)).await?;
    tokio::time::timeout(Duration::from_secs(1), cluster.node(1).put("AAPL", 2.0)).await??;
    Ok(())
}
