//! TOML server configuration.
//!
//! ```toml
//! [server]
//! name = "backplane-mcp"
//! providers = ["mysql", "redis"]
//!
//! [settings.mysql]
//! max_rows = 500
//! request_timeout_ms = 10000
//!
//! [[connections]]
//! provider = "mysql"
//! name = "orders"
//! params = { host = "db.internal", user = "reporting", database = "orders" }
//! ```

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

use backplane_mcp_protocol::ProviderType;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub server: ServerSection,
    /// Per-provider settings patches, applied at startup
    pub settings: BTreeMap<ProviderType, Map<String, Value>>,
    /// Sessions opened at startup
    pub connections: Vec<ConnectionConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub name: Option<String>,
    pub version: Option<String>,
    pub instructions: Option<String>,
    /// Enabled providers; every compiled-in provider when absent
    pub providers: Option<Vec<ProviderType>>,
}

/// A session to open when the server starts
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    pub provider: ProviderType,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[server]
name = "ops-backplane"
providers = ["mysql", "pulsar"]

[settings.mysql]
max_rows = 500
retry_policy = "fixed"

[[connections]]
provider = "mysql"
name = "orders"
params = { host = "db.internal", port = 3307 }

[[connections]]
provider = "pulsar"
params = { tenant = "acme", namespace = "events" }
"#;

    #[test]
    fn test_parse_full_config() {
        let config = ServerConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.server.name.as_deref(), Some("ops-backplane"));
        assert_eq!(
            config.server.providers,
            Some(vec![ProviderType::Mysql, ProviderType::Pulsar])
        );

        let mysql = &config.settings[&ProviderType::Mysql];
        assert_eq!(mysql["max_rows"], 500);
        assert_eq!(mysql["retry_policy"], "fixed");

        assert_eq!(config.connections.len(), 2);
        assert_eq!(config.connections[0].name.as_deref(), Some("orders"));
        assert_eq!(config.connections[0].params["port"], 3307);
        assert!(config.connections[1].name.is_none());
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = ServerConfig::parse("").unwrap();
        assert!(config.server.providers.is_none());
        assert!(config.settings.is_empty());
        assert!(config.connections.is_empty());
    }

    #[test]
    fn test_rejects_unknown_provider_and_fields() {
        assert!(ServerConfig::parse("[settings.kafka]\nx = 1\n").is_err());
        assert!(ServerConfig::parse("[server]\nport = 80\n").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.connections.len(), 2);

        let missing = ServerConfig::from_file("/nonexistent/backplane.toml").unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
