//! Command-line interface
//!
//! ```text
//! cli/
//! ├── commands/     # serve, validate-config
//! └── error.rs      # error display and exit codes
//! ```

pub mod commands;
pub mod error;

use std::io::IsTerminal;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::error::ProxyResult;

/// mcprouter - route MCP clients to backend MCP servers
#[derive(Parser, Debug)]
#[command(
    name = "mcprouter",
    version,
    about = "Route MCP clients to stdio and remote MCP servers",
    author
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: commands::Command,

    /// Enable verbose logging (-v, -vv, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

impl Cli {
    /// Execute the CLI command
    ///
    /// # Errors
    ///
    /// Returns the command's error; `main` turns it into an exit code.
    pub async fn execute(self) -> ProxyResult<()> {
        self.init_tracing();

        if self.no_color || !std::io::stdout().is_terminal() {
            colored::control::set_override(false);
        }

        self.command.execute().await
    }

    /// Log level implied by `-v` / `--quiet`
    pub fn level(&self) -> Level {
        if self.quiet {
            return Level::ERROR;
        }
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    /// `RUST_LOG` wins over the verbosity flags
    fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level().as_str().to_lowercase()));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["mcprouter", "serve", "--config", "mcprouter.toml"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_verbosity_levels() {
        let cli = Cli::try_parse_from(["mcprouter", "-vv", "validate-config", "-c", "a.toml"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.level(), Level::TRACE);

        let cli = Cli::try_parse_from(["mcprouter", "serve", "-c", "a.toml"]).unwrap();
        assert_eq!(cli.level(), Level::INFO);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let cli = Cli::try_parse_from(["mcprouter", "-v", "--quiet", "serve", "-c", "a.toml"]);
        assert!(cli.is_err());

        let cli = Cli::try_parse_from(["mcprouter", "--quiet", "serve", "-c", "a.toml"]).unwrap();
        assert_eq!(cli.level(), Level::ERROR);
    }

    #[test]
    fn test_config_is_required() {
        assert!(Cli::try_parse_from(["mcprouter", "serve"]).is_err());
    }
}
