//! Router configuration
//!
//! Loaded from a TOML, YAML or JSON file (format by extension) with
//! environment overrides layered on top. Overrides use the `MCPROUTER`
//! prefix and `__` as the nesting separator:
//!
//! ```text
//! MCPROUTER__SERVER__BIND=0.0.0.0:8025
//! MCPROUTER__APP__SAVE_LOG=true
//! ```
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8025"
//! request_timeout_secs = 30
//!
//! [app]
//! save_log = true
//! log_methods = ["tools/call"]
//!
//! [mcp_servers.weather]
//! command = "npx -y @acme/weather-mcp"
//! server_params = '{"api_key": "..."}'
//! ```

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use mcprouter_client::{ServerConfig, StdioOptions};
use mcprouter_protocol::methods;
use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, ProxyResult};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "MCPROUTER";

/// Default listen address
pub const DEFAULT_BIND: &str = "127.0.0.1:8025";

/// Complete router configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Listener settings
    pub server: ServerSection,
    /// Application behavior
    pub app: AppSection,
    /// Backends by routing key
    pub mcp_servers: BTreeMap<String, ServerConfig>,
}

/// Listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Socket address to listen on
    pub bind: String,
    /// Ceiling for one backend request/response exchange
    pub request_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Application behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// Hand call records to the audit sink
    pub save_log: bool,
    /// Methods whose call records are saved
    pub log_methods: Vec<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            save_log: false,
            log_methods: vec![methods::CALL_TOOL.to_string()],
        }
    }
}

impl AppSection {
    /// Whether a call record for `method` goes to the audit sink
    pub fn should_save(&self, method: &str) -> bool {
        self.save_log && self.log_methods.iter().any(|m| m == method)
    }
}

impl RouterConfig {
    /// Load configuration from a file with `MCPROUTER__*` overrides
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] if the file is missing, has an
    /// unsupported extension, or does not match the expected shape.
    pub fn from_file(path: impl AsRef<Path>) -> ProxyResult<Self> {
        Self::load(path.as_ref(), None)
    }

    /// Load configuration with an explicit environment instead of the process one
    ///
    /// # Errors
    ///
    /// See [`RouterConfig::from_file`].
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
        env: HashMap<String, String>,
    ) -> ProxyResult<Self> {
        Self::load(path.as_ref(), Some(env))
    }

    fn load(path: &Path, env: Option<HashMap<String, String>>) -> ProxyResult<Self> {
        use config::{Config, Environment, File, FileFormat};

        if !path.exists() {
            return Err(ProxyError::configuration(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml" | "yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => {
                return Err(ProxyError::configuration(format!(
                    "unsupported configuration format: {}",
                    path.display()
                )));
            }
        };
        let path_str = path.to_str().ok_or_else(|| {
            ProxyError::configuration(format!("non UTF-8 path: {}", path.display()))
        })?;

        let config = Config::builder()
            .add_source(File::new(path_str, format))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        let mut router: Self = config.try_deserialize()?;
        router.normalize();
        Ok(router)
    }

    /// Fill derived backend fields
    ///
    /// Every backend gets its map key as `server_key` when none is set, and a
    /// `command_hash` when it has a command.
    pub fn normalize(&mut self) {
        for (key, server) in &mut self.mcp_servers {
            if server.server_key.is_empty() {
                server.server_key.clone_from(key);
            }
            server.ensure_command_hash();
        }
    }

    /// Check values that deserialization cannot
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] naming the first offending key.
    pub fn validate(&self) -> ProxyResult<()> {
        self.bind_addr()?;
        if self.server.request_timeout_secs == 0 {
            return Err(ProxyError::configuration_with_key(
                "request timeout must be greater than zero",
                "server.request_timeout_secs",
            ));
        }
        for (key, server) in &self.mcp_servers {
            server.backend_kind().map_err(|e| {
                ProxyError::configuration_with_key(e.to_string(), format!("mcp_servers.{key}"))
            })?;
        }
        Ok(())
    }

    /// Parsed listen address
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] if `server.bind` is not a socket address.
    pub fn bind_addr(&self) -> ProxyResult<SocketAddr> {
        self.server.bind.parse().map_err(|e| {
            ProxyError::configuration_with_key(
                format!("invalid bind address {:?}: {e}", self.server.bind),
                "server.bind",
            )
        })
    }

    /// Backend request ceiling
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Transport options derived from this configuration
    pub fn stdio_options(&self) -> StdioOptions {
        StdioOptions::default().with_request_timeout(self.request_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcprouter_client::command_hash;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_config(extension: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(extension)
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = RouterConfig::default();
        assert_eq!(config.server.bind, "127.0.0.1:8025");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(!config.app.save_log);
        assert_eq!(config.app.log_methods, vec!["tools/call".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_toml_normalizes_servers() {
        let file = write_config(
            ".toml",
            r#"
[server]
bind = "0.0.0.0:9000"

[mcp_servers.weather]
command = "npx -y weather"
server_params = '{"api_key": "k"}'

[mcp_servers.search]
server_url = "https://search.example.com/mcp"
"#,
        );
        let config = RouterConfig::from_file_with_env(file.path(), HashMap::new()).unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.request_timeout_secs, 30);
        let weather = &config.mcp_servers["weather"];
        assert_eq!(weather.server_key, "weather");
        assert_eq!(weather.command_hash, command_hash("npx -y weather"));
        let search = &config.mcp_servers["search"];
        assert!(search.command_hash.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_config(".json", r#"{"app": {"save_log": false}}"#);
        let env = HashMap::from([
            ("MCPROUTER__APP__SAVE_LOG".to_string(), "true".to_string()),
            ("MCPROUTER__SERVER__BIND".to_string(), "127.0.0.1:7000".to_string()),
        ]);
        let config = RouterConfig::from_file_with_env(file.path(), env).unwrap();
        assert!(config.app.save_log);
        assert_eq!(config.server.bind, "127.0.0.1:7000");
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        let err = RouterConfig::from_file("/nonexistent/mcprouter.toml").unwrap_err();
        assert!(matches!(err, ProxyError::Configuration { .. }));

        let file = write_config(".ini", "bind = x");
        let err = RouterConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RouterConfig::default();
        config.server.bind = "not-an-address".into();
        assert!(matches!(
            config.validate(),
            Err(ProxyError::Configuration { key: Some(ref k), .. }) if k == "server.bind"
        ));

        let mut config = RouterConfig::default();
        config
            .mcp_servers
            .insert("broken".into(), ServerConfig::remote("ftp://x"));
        assert!(matches!(
            config.validate(),
            Err(ProxyError::Configuration { key: Some(ref k), .. }) if k == "mcp_servers.broken"
        ));
    }

    #[test]
    fn test_should_save() {
        let mut app = AppSection::default();
        assert!(!app.should_save("tools/call"));
        app.save_log = true;
        assert!(app.should_save("tools/call"));
        assert!(!app.should_save("tools/list"));
    }
}
