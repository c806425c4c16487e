//! BALLOTBOX Node Binary

use ballotbox_core::{BallotConfig, NodeConfig};
use ballotbox_node::{summarize, NodeBuilder, NodeRuntime};
use clap::{Args, Parser, Subcommand};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ballotbox-node")]
#[command(about = "BALLOTBOX Node - Multi-host Vote Tally")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct NodeArgs {
    /// Node configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ballot file path
    #[arg(short, long)]
    ballot: Option<PathBuf>,
}

impl NodeArgs {
    fn load(&self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };
        if let Some(ballot) = &self.ballot {
            config.ballot_path = ballot.clone();
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node
    Run {
        #[command(flatten)]
        node: NodeArgs,

        /// API listen address
        #[arg(long)]
        api_addr: Option<String>,

        /// Peer listen address
        #[arg(long)]
        peer_addr: Option<String>,

        /// This host's address in the ballot's server list
        #[arg(long)]
        self_addr: Option<Ipv4Addr>,
    },

    /// Cast one vote on this host
    Vote {
        #[command(flatten)]
        node: NodeArgs,

        /// Option name or id
        option: String,
    },

    /// Print current results
    Results {
        #[command(flatten)]
        node: NodeArgs,

        /// Only this host's votes
        #[arg(long)]
        local: bool,
    },

    /// Write a sample ballot and node configuration
    Init {
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            node,
            api_addr,
            peer_addr,
            self_addr,
        } => {
            let config = node.load()?;
            init_logging(&config.log_level);

            let mut builder = NodeBuilder::new().config(config);
            if let Some(addr) = api_addr {
                builder = builder.api_addr(&addr);
            }
            if let Some(addr) = peer_addr {
                builder = builder.peer_addr(&addr);
            }
            if let Some(addr) = self_addr {
                builder = builder.self_addr(addr);
            }

            let node = builder.build()?;
            node.start().await?;
        }

        Commands::Vote { node, option } => {
            let config = node.load()?;
            init_logging(&config.log_level);

            let runtime = NodeRuntime::new(config)?;
            let count = runtime.vote_by_name(&option).await?;
            println!("Vote recorded for {option}, {count} on this host");
        }

        Commands::Results { node, local } => {
            let config = node.load()?;
            init_logging(&config.log_level);

            let runtime = NodeRuntime::new(config)?;
            let (ballot, results) = runtime.results(!local, None).await?;
            let summary = summarize(ballot.title(), &results);

            println!("{}", summary.title);
            for result in &summary.results {
                let plural = if result.count == 1 { "" } else { "s" };
                println!(
                    "  {:<24} {:>6} vote{} ({}%)",
                    result.name, result.count, plural, result.percent
                );
            }
            println!("  {:<24} {:>6}", "Total", summary.total);
        }

        Commands::Init { output } => {
            std::fs::create_dir_all(&output)?;

            let ballot_path = output.join("vote-config.json");
            std::fs::write(&ballot_path, serde_json::to_string_pretty(&BallotConfig::sample())?)?;

            let config = NodeConfig {
                ballot_path: ballot_path.clone(),
                ..Default::default()
            };
            let config_path = output.join("node-config.json");
            std::fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;

            println!("Ballot saved to: {}", ballot_path.display());
            println!("Node configuration saved to: {}", config_path.display());
        }
    }

    Ok(())
}
