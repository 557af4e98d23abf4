//! Lookup of backend descriptors by routing key

use std::collections::HashMap;
use std::fmt;

use mcprouter_client::ServerConfig;

use crate::config::RouterConfig;

/// Source of backend descriptors
pub trait ServerResolver: Send + Sync + fmt::Debug {
    /// Descriptor for `server_key`, if one is known
    fn resolve(&self, server_key: &str) -> Option<ServerConfig>;
}

/// Resolver over a fixed set of descriptors
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    servers: HashMap<String, ServerConfig>,
}

impl StaticResolver {
    /// Build from `(key, descriptor)` pairs
    pub fn new(servers: impl IntoIterator<Item = (String, ServerConfig)>) -> Self {
        Self {
            servers: servers.into_iter().collect(),
        }
    }

    /// Serve the `mcp_servers` section of a configuration
    pub fn from_config(config: &RouterConfig) -> Self {
        Self::new(
            config
                .mcp_servers
                .iter()
                .map(|(key, server)| (key.clone(), server.clone())),
        )
    }

    /// Add or replace a descriptor
    pub fn insert(&mut self, key: impl Into<String>, server: ServerConfig) {
        self.servers.insert(key.into(), server);
    }

    /// Number of known backends
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether no backend is known
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl ServerResolver for StaticResolver {
    fn resolve(&self, server_key: &str) -> Option<ServerConfig> {
        let mut server = self.servers.get(server_key)?.clone();
        if server.server_key.is_empty() {
            server.server_key = server_key.to_string();
        }
        Some(server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_fills_server_key() {
        let mut resolver = StaticResolver::default();
        assert!(resolver.is_empty());
        resolver.insert("echo", ServerConfig::stdio("cat"));

        let server = resolver.resolve("echo").unwrap();
        assert_eq!(server.server_key, "echo");
        assert_eq!(server.command, "cat");
        assert!(resolver.resolve("missing").is_none());
        assert_eq!(resolver.len(), 1);
    }

    #[test]
    fn test_from_config() {
        let mut config = RouterConfig::default();
        config
            .mcp_servers
            .insert("remote".into(), ServerConfig::remote("https://mcp.example.com"));
        config.normalize();

        let resolver = StaticResolver::from_config(&config);
        let server = resolver.resolve("remote").unwrap();
        assert_eq!(server.server_url, "https://mcp.example.com");
        assert_eq!(server.server_key, "remote");
    }
}
