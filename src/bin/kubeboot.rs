use std::{env, path::PathBuf};

use clap::{Parser, Subcommand};
use kubeboot::{BootstrapConfig, Node};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod kubeboot_cli;
use kubeboot_cli::*;

#[derive(Debug, Subcommand)]
enum Action {
    /// Bootstrap this node, then keep rotating join credentials if it leads.
    Run {
        #[arg(long)]
        no_rotation: bool,
    },
    /// Print this node's role and the group snapshot it was decided from.
    Role,
    /// Rotate the published join credential once.
    Rotate,
    /// Delete the bootstrap marker and credentials of the cluster.
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    action: Action,
    #[arg(short, long, env = "KUBEBOOT_CONFIG", default_value = "/etc/kubeboot/config.yaml")]
    config: PathBuf,
    #[command(flatten)]
    overrides: Overrides,
}

fn trace_level() -> Level {
    match env::var("TRACE_LEVEL").unwrap_or_default().as_str() {
        "TRACE" | "Trace" | "trace" => Level::TRACE,
        "DEBUG" | "Debug" | "debug" => Level::DEBUG,
        "WARN" | "Warn" | "warn" => Level::WARN,
        "ERROR" | "Error" | "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set up tracing.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(trace_level())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let mut config = BootstrapConfig::from_file(&args.config)?;
    args.overrides.apply(&mut config);
    config.validate()?;
    info!(
        cluster = %config.cluster_name,
        config = %args.config.display(),
        "configuration loaded"
    );

    let node = Node::new(config).await?;
    match args.action {
        Action::Run { no_rotation } => run(&node, !no_rotation).await,
        Action::Role => print_role(&node).await,
        Action::Rotate => rotate(&node).await,
        Action::Reset { yes } => reset(&node, yes).await,
    }
}
