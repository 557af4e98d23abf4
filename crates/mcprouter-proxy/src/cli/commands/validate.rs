//! Validate-config command implementation

use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use mcprouter_client::BackendKind;

use crate::config::RouterConfig;
use crate::error::ProxyResult;

/// Check a configuration file and print the backends it defines
#[derive(Debug, Args)]
pub struct ValidateCommand {
    /// Configuration file (.toml, .yaml, .yml or .json)
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,
}

impl ValidateCommand {
    /// Execute the validate-config command
    pub fn execute(self) -> ProxyResult<()> {
        let config = RouterConfig::from_file(&self.config)?;
        config.validate()?;
        println!("{}", summary(&config));
        Ok(())
    }
}

/// Human-readable summary of a valid configuration
pub fn summary(config: &RouterConfig) -> String {
    let mut out = format!(
        "{} {}\n  bind: {}\n  request timeout: {}s\n  save log: {}",
        "✓".green().bold(),
        "Configuration is valid".bold(),
        config.server.bind,
        config.server.request_timeout_secs,
        config.app.save_log,
    );
    if config.mcp_servers.is_empty() {
        out.push_str(&format!("\n  {}", "no backends configured".yellow()));
    }
    for (key, server) in &config.mcp_servers {
        let (kind, target) = match server.backend_kind() {
            Ok(BackendKind::Stdio) => ("stdio", server.command.as_str()),
            Ok(BackendKind::Remote) => ("remote", server.server_url.as_str()),
            Err(_) => ("invalid", ""),
        };
        out.push_str(&format!("\n  {} [{}] {}", key.cyan(), kind, target));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcprouter_client::ServerConfig;

    #[test]
    fn test_summary_lists_backends() {
        colored::control::set_override(false);
        let mut config = RouterConfig::default();
        config
            .mcp_servers
            .insert("weather".into(), ServerConfig::stdio("npx weather"));
        config.mcp_servers.insert(
            "search".into(),
            ServerConfig::remote("https://search.example.com/mcp"),
        );

        let text = summary(&config);
        assert!(text.contains("Configuration is valid"));
        assert!(text.contains("weather [stdio] npx weather"));
        assert!(text.contains("search [remote] https://search.example.com/mcp"));
    }

    #[test]
    fn test_summary_without_backends() {
        colored::control::set_override(false);
        let text = summary(&RouterConfig::default());
        assert!(text.contains("no backends configured"));
    }
}
