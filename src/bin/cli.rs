//! hotpack CLI - incremental dev server with hot module replacement.
//!
//! Usage:
//!   hotpack serve -s graph.json            # Serve the bundle, no watching
//!   hotpack serve -s graph.json --watch    # Serve and hot-reload on change
//!   hotpack inspect -s graph.json          # Snapshot statistics

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hotpack::config::DEFAULT_CONFIG_FILE;
use hotpack::{start_dev_server, DevConfig, ModuleGraph, Snapshot};

#[derive(Parser)]
#[command(name = "hotpack")]
#[command(about = "hotpack - incremental dev server with hot module replacement", long_about = None)]
struct Cli {
    /// Project root directory (default: current directory)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the initial bundle and push updates to the browser
    Serve {
        /// Module graph snapshot written by the initial build
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Config file, relative to the root
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Preferred port (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Watch files and recompile on change (overrides the config file)
        #[arg(short, long)]
        watch: bool,
    },

    /// Show statistics for a snapshot
    Inspect {
        /// Module graph snapshot written by the initial build
        #[arg(short, long)]
        snapshot: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "hotpack=debug" } else { "hotpack=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let root = cli.root.canonicalize().unwrap_or(cli.root);

    match cli.command {
        Commands::Serve {
            snapshot,
            config,
            port,
            watch,
        } => {
            let mut config = DevConfig::load_or_default(&root.join(config))?;
            if let Some(port) = port {
                config.dev_server_port = port;
            }
            config.watch_files |= watch;

            let snapshot_path = root.join(snapshot);
            let snapshot = Snapshot::load(&snapshot_path)
                .with_context(|| format!("loading snapshot {}", snapshot_path.display()))?;

            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(start_dev_server(root, config, snapshot))?;
        }

        Commands::Inspect { snapshot } => {
            let snapshot_path = root.join(snapshot);
            let snapshot = Snapshot::load(&snapshot_path)
                .with_context(|| format!("loading snapshot {}", snapshot_path.display()))?;
            let stats = ModuleGraph::from_records(&snapshot.modules).stats();

            println!("hotpack - Snapshot");
            println!("==================");
            println!("Modules: {}", stats.module_count);
            println!("Edges:   {}", stats.edge_count);
            println!(
                "Root:    {}",
                if stats.root_present { "present" } else { "missing" }
            );
        }
    }

    Ok(())
}
