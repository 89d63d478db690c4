use crate::app::status::render_status;
use crate::cli::commands::{Cli, Commands};
use anyhow::{Result, bail};
use runcommand::Config;
use runcommand::platform::{daemon, enable};
use std::sync::Arc;
use tracing::info;

pub async fn dispatch(cli: Cli, config: Arc<Config>) -> Result<()> {
    match cli.command {
        Commands::Daemon => daemon::run(config).await,

        Commands::Enable { seq } => match enable::run(&config, seq).await? {
            enable::EnableOutcome::AlreadyApplied => {
                info!(seq, "sequence number already applied; nothing to do");
                Ok(())
            }
            enable::EnableOutcome::Completed { exit_code } => {
                info!(seq, exit_code, "enable finished");
                Ok(())
            }
            enable::EnableOutcome::Failed(error) => {
                bail!("enable for sequence number {seq} failed: {error}")
            }
        },

        Commands::Status => {
            println!("{}", render_status(&config).await);
            Ok(())
        }
    }
}
