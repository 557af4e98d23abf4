//! CLI command implementations

pub mod serve;
pub mod validate;

use clap::Subcommand;

use crate::error::ProxyResult;

/// All available CLI commands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the router
    #[command(visible_alias = "s")]
    Serve(serve::ServeCommand),

    /// Load and check a configuration file without starting anything
    #[command(name = "validate-config")]
    ValidateConfig(validate::ValidateCommand),
}

impl Command {
    /// Execute the command
    pub async fn execute(self) -> ProxyResult<()> {
        match self {
            Command::Serve(cmd) => cmd.execute().await,
            Command::ValidateConfig(cmd) => cmd.execute(),
        }
    }
}
