//! Interactive shell over an in-process replicated map cluster.
//!
//! Starts `--nodes` members in one group, each joining in turn through state
//! transfer, then reads commands from stdin and runs them on the active node.
//!
//! # Example usage
//!
//! ```bash
//! RUST_LOG=replicated_map=debug cargo run --bin node -- --nodes 3 --aggregation strict
//! > put AAPL 150
//! > node 2
//! > get AAPL
//! ```

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use replicated_map::protocol::ConsoleCommand;
use replicated_map::rpc::AggregationRule;
use replicated_map::{ClusterConfig, Group, Node, join};

/// Command-line arguments. Flags override values from `--config`.
#[derive(Parser, Debug)]
#[command(author, version, about = "Run an in-process replicated map cluster")]
struct Args {
    /// Number of nodes to start
    #[arg(long, default_value_t = 3)]
    nodes: usize,

    /// TOML file with cluster settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name of the group the nodes join
    #[arg(long)]
    cluster_name: Option<String>,

    /// How per-member replies decide the result of a write
    #[arg(long, value_enum)]
    aggregation: Option<AggregationRule>,

    /// Broadcast reply timeout in milliseconds
    #[arg(long)]
    rpc_timeout_ms: Option<u64>,

    /// Cluster lock acquisition timeout in milliseconds (unbounded if unset)
    #[arg(long)]
    lock_timeout_ms: Option<u64>,
}

impl Args {
    fn cluster_config(&self) -> Result<ClusterConfig> {
        let mut config = match &self.config {
            Some(path) => ClusterConfig::from_file(path)?,
            None => ClusterConfig::default(),
        };
        if let Some(name) = &self.cluster_name {
            config.cluster_name = name.clone();
        }
        if let Some(rule) = self.aggregation {
            config.aggregation = rule;
        }
        if let Some(ms) = self.rpc_timeout_ms {
            config.rpc_timeout_ms = ms;
        }
        if self.lock_timeout_ms.is_some() {
            config.lock_timeout_ms = self.lock_timeout_ms;
        }
        Ok(config)
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

/// Nodes started by this shell and the one commands run on.
struct Shell {
    group: Group,
    config: ClusterConfig,
    nodes: Vec<Node>,
    active: usize,
}

impl Shell {
    async fn start(config: ClusterConfig, count: usize) -> Result<Self> {
        if count == 0 {
            bail!("at least one node is required");
        }
        let mut shell = Self {
            group: Group::new(config.cluster_name.clone()),
            config,
            nodes: Vec::with_capacity(count),
            active: 0,
        };
        for _ in 0..count {
            shell.join().await?;
        }
        shell.active = 0;
        Ok(shell)
    }

    async fn join(&mut self) -> Result<()> {
        // A node that cannot obtain state must not come online.
        let node = join(&self.group, &self.config)
            .await
            .context("node failed to join the cluster")?;
        self.nodes.push(node);
        self.active = self.nodes.len() - 1;
        Ok(())
    }

    fn node(&self) -> &Node {
        &self.nodes[self.active]
    }

    /// Runs one command. Returns `false` when the shell should exit.
    async fn execute(&mut self, command: ConsoleCommand) -> Result<bool> {
        match command {
            ConsoleCommand::List => {
                println!("Stocks:");
                for (key, value) in self.node().entry_set().iter() {
                    println!("  {key}: {value}");
                }
            }
            ConsoleCommand::Get { key } => match self.node().get(&key).await? {
                Some(value) => println!("{key} is {value}"),
                None => println!("no value for the key={key}"),
            },
            ConsoleCommand::Put { key, value } => {
                let set = self.node().put(&key, value).await?;
                println!("{}", if set { "Entry set" } else { "Entry was not set" });
            }
            ConsoleCommand::CompareAndSwap { key, old, new } => {
                let swapped = self.node().compare_and_swap(&key, old, new).await?;
                println!(
                    "{}",
                    if swapped {
                        "Entry updated"
                    } else {
                        "Entry was not updated, because old value does not equal to current value"
                    }
                );
            }
            ConsoleCommand::Remove { key } => {
                let removed = self.node().remove(&key).await?;
                println!(
                    "{}",
                    if removed { "Entry removed" } else { "No entry with such key found" }
                );
            }
            ConsoleCommand::Bench { count } => self.bench(count).await?,
            ConsoleCommand::Node { index } => {
                if index >= self.nodes.len() {
                    println!("no node {index}; {} running", self.nodes.len());
                } else {
                    self.active = index;
                    println!("active node {index} ({})", self.node().id());
                }
            }
            ConsoleCommand::Join => {
                self.join().await?;
                println!("node {} joined ({})", self.active, self.node().id());
            }
            ConsoleCommand::Leave => {
                let node = self.nodes.remove(self.active);
                println!("node {} left ({})", self.active, node.id());
                node.leave();
                if self.nodes.is_empty() {
                    return Ok(false);
                }
                self.active = 0;
            }
            ConsoleCommand::Members => {
                let view = self.node().members();
                println!("view {}:", view.id());
                for (index, member) in view.members().iter().enumerate() {
                    let marker = if member == self.node().id() { " (active)" } else { "" };
                    println!("  {index}: {member}{marker}");
                }
            }
            ConsoleCommand::Help => print_help(),
            ConsoleCommand::Exit => return Ok(false),
        }
        Ok(true)
    }

    async fn bench(&self, count: usize) -> Result<()> {
        let start = Instant::now();
        for i in 0..count {
            self.node().put(&i.to_string(), i as f64).await?;
        }
        let elapsed = start.elapsed();
        let rate = count as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
        println!("{count} puts in {elapsed:?} ({rate:.0} puts per sec)");
        Ok(())
    }
}

fn print_help() {
    println!("Commands (case-insensitive):");
    println!("  LIST                  (alias: l)  -- entries on the active node");
    println!("  GET <key>             (alias: g)  -- read a value");
    println!("  PUT <key> <value>     (alias: p)  -- set a value on every node");
    println!("  CAS <key> <old> <new> (alias: c)  -- compare and swap");
    println!("  REMOVE <key>          (alias: r)  -- remove a key on every node");
    println!("  BENCH <count>         (alias: b)  -- time sequential puts");
    println!("  NODE <index>          (alias: n)  -- switch the active node");
    println!("  JOIN                  (alias: j)  -- start another node");
    println!("  LEAVE                             -- stop the active node");
    println!("  MEMBERS               (alias: m)  -- show the current view");
    println!("  HELP                  (alias: h)  -- show this message");
    println!("  EXIT                  (alias: e)  -- shut down");
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = args.cluster_config()?;
    info!(cluster = %config.cluster_name, nodes = args.nodes, aggregation = ?config.aggregation, "starting cluster");

    let mut shell = Shell::start(config, args.nodes).await?;
    println!(
        "{} nodes ready, active node 0. Type HELP (or h) for commands.",
        shell.nodes.len()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match ConsoleCommand::parse(&line) {
            Ok(command) => command,
            Err(err) => {
                println!("ERROR: {err:#}");
                continue;
            }
        };
        match shell.execute(command).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                warn!("command failed: {err:#}");
                println!("ERROR: {err:#}");
            }
        }
    }

    info!("shutting down");
    Ok(())
}
