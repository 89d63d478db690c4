use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// `runcommand` - VM guest agent run-command handler.
#[derive(Parser, Debug)]
#[command(name = "runcommand")]
#[command(version)]
#[command(about = "Polls the host agent for run-command goal states and executes them.", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.runcommand/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll immediate goal states and push aggregated status until Ctrl-C
    Daemon,

    /// Execute one goal state from `<config_dir>/<seq>.settings`
    Enable {
        /// Sequence number of the settings file to run
        #[arg(long)]
        seq: i64,
    },

    /// Show configuration and the last applied sequence number
    Status,
}
