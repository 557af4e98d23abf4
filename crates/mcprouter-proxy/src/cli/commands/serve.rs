//! Serve command implementation

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::config::RouterConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::server::{AppState, router};

/// Run the router until Ctrl-C
///
/// # Examples
///
///   mcprouter serve --config mcprouter.toml
///
///   MCPROUTER__APP__SAVE_LOG=true mcprouter serve -c mcprouter.toml --bind 0.0.0.0:8025
#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Configuration file (.toml, .yaml, .yml or .json)
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,

    /// Override `server.bind`
    ///
    /// Binding to 0.0.0.0 exposes every configured backend to the network.
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,
}

impl ServeCommand {
    /// Load the configuration for this invocation
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] if loading or validation fails.
    pub fn load_config(&self) -> ProxyResult<RouterConfig> {
        let mut config = RouterConfig::from_file(&self.config)?;
        if let Some(bind) = &self.bind {
            config.server.bind.clone_from(bind);
        }
        config.validate()?;
        Ok(config)
    }

    /// Execute the serve command
    pub async fn execute(self) -> ProxyResult<()> {
        let config = self.load_config()?;
        let addr = config.bind_addr()?;
        let state = AppState::from_config(&config);
        let registry = state.registry.clone();

        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            ProxyError::configuration_with_key(format!("failed to bind {addr}: {e}"), "server.bind")
        })?;

        info!(
            bind = %addr,
            servers = config.mcp_servers.len(),
            save_log = config.app.save_log,
            "mcprouter listening"
        );
        for (key, server) in &config.mcp_servers {
            if let Ok(kind) = server.backend_kind() {
                info!(server_key = %key, kind = kind.as_str(), "backend configured");
            }
        }

        let served = axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await;

        info!(sessions = registry.session_count(), "shutting down, closing sessions");
        registry.close_all().await;
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
