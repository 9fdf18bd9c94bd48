use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use opsboard::protocol::EventKind;
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "opsboard")]
#[command(version, about = "Live operations dashboard for agents, beads and artifacts")]
pub struct Cli {
    /// Debug logging for opsboard itself
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the dashboard server and its event stream
    Serve {
        /// Port to serve on (overrides opsboard.toml and OPSBOARD_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind (overrides opsboard.toml and OPSBOARD_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Open the dashboard in a browser once the server is up
        #[arg(long)]
        open: bool,

        /// Dev mode (CORS permissive for a local front-end dev server)
        #[arg(long)]
        dev: bool,
    },
    /// Follow a running server's event stream and print each event
    Watch {
        /// Event stream URL (defaults to [client].url)
        #[arg(long)]
        url: Option<String>,

        /// Only print these event kinds (repeatable)
        #[arg(long = "kind", value_name = "KIND")]
        kinds: Vec<EventKind>,

        /// Print one JSON object per event instead of a text line
        #[arg(long)]
        json: bool,
    },
    /// View, validate or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default opsboard.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Serve {
            port,
            host,
            open,
            dev,
        } => {
            cmd::cmd_serve(&project_dir, cli.verbose, host.clone(), *port, *open, *dev).await?;
        }
        Commands::Watch { url, kinds, json } => {
            cmd::cmd_watch(&project_dir, cli.verbose, url.clone(), kinds, *json).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
