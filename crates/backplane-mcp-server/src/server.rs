//! Server assembly and lifecycle.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tracing::{info, warn};

use backplane_mcp_protocol::ProviderType;
use backplane_mcp_session::{ConnectionParams, Provider, RegistryConfig, SessionRegistries};

use crate::catalogue::CommandCatalogue;
use crate::config::{ConnectionConfig, ServerConfig};
use crate::dispatcher::Dispatcher;
use crate::error::{ConfigError, ServerError};
use crate::handler::{McpHandler, ServerInfo};
use crate::stdio;

/// Builder for [`BackplaneServer`]
pub struct BackplaneServerBuilder {
    info: ServerInfo,
    providers: Vec<Arc<dyn Provider>>,
    settings: BTreeMap<ProviderType, Map<String, Value>>,
    global_settings: Map<String, Value>,
    connections: Vec<ConnectionConfig>,
    registry_config: RegistryConfig,
}

impl Default for BackplaneServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BackplaneServerBuilder {
    pub fn new() -> Self {
        Self {
            info: ServerInfo::default(),
            providers: Vec::new(),
            settings: BTreeMap::new(),
            global_settings: Map::new(),
            connections: Vec::new(),
            registry_config: RegistryConfig::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.info.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.info.version = version.into();
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.info.instructions = Some(instructions.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn providers(mut self, providers: impl IntoIterator<Item = Arc<dyn Provider>>) -> Self {
        self.providers.extend(providers);
        self
    }

    /// Settings patch for one provider, applied at build time.
    pub fn settings(mut self, provider: ProviderType, patch: Map<String, Value>) -> Self {
        self.settings.entry(provider).or_default().extend(patch);
        self
    }

    /// Patch applied to every provider that declares the option, after the
    /// per-provider settings.
    pub fn global_settings(mut self, patch: Map<String, Value>) -> Self {
        self.global_settings.extend(patch);
        self
    }

    /// A session to open when the server starts.
    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connections.push(connection);
        self
    }

    pub fn registry_config(mut self, config: RegistryConfig) -> Self {
        self.registry_config = config;
        self
    }

    /// Take identity, settings and startup connections from a config file.
    /// The provider list is the caller's to resolve.
    pub fn config(mut self, config: ServerConfig) -> Self {
        if let Some(name) = config.server.name {
            self.info.name = name;
        }
        if let Some(version) = config.server.version {
            self.info.version = version;
        }
        if let Some(instructions) = config.server.instructions {
            self.info.instructions = Some(instructions);
        }
        for (provider, patch) in config.settings {
            self = self.settings(provider, patch);
        }
        self.connections.extend(config.connections);
        self
    }

    pub fn build(self) -> Result<BackplaneServer, ServerError> {
        if self.providers.is_empty() {
            return Err(ServerError::NoProviders);
        }

        let registries = Arc::new(SessionRegistries::with_config(
            self.providers,
            self.registry_config,
        ));
        let enabled = registries.provider_types();

        let referenced = self
            .settings
            .keys()
            .copied()
            .chain(self.connections.iter().map(|c| c.provider));
        for provider in referenced {
            if !enabled.contains(&provider) {
                return Err(ConfigError::ProviderNotEnabled(provider).into());
            }
        }

        for (provider, patch) in &self.settings {
            if !patch.is_empty() {
                registries.config_store().update(*provider, patch)?;
            }
        }
        if !self.global_settings.is_empty() {
            registries.apply_global_settings(&self.global_settings)?;
        }

        let catalogue = CommandCatalogue::for_registries(&registries)?;
        info!(
            providers = ?enabled,
            commands = catalogue.len(),
            "Backplane server ready"
        );
        let dispatcher = Arc::new(Dispatcher::new(catalogue, Arc::clone(&registries)));
        let handler = Arc::new(McpHandler::new(Arc::clone(&dispatcher), self.info));

        Ok(BackplaneServer {
            registries,
            dispatcher,
            handler,
            connections: self.connections,
        })
    }
}

pub struct BackplaneServer {
    registries: Arc<SessionRegistries>,
    dispatcher: Arc<Dispatcher>,
    handler: Arc<McpHandler>,
    connections: Vec<ConnectionConfig>,
}

impl BackplaneServer {
    pub fn builder() -> BackplaneServerBuilder {
        BackplaneServerBuilder::new()
    }

    pub fn registries(&self) -> &Arc<SessionRegistries> {
        &self.registries
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn handler(&self) -> &Arc<McpHandler> {
        &self.handler
    }

    /// Open the configured startup sessions. Failures are logged and the
    /// failed session stays listed in `Error`. Returns how many connected.
    pub async fn open_startup_connections(&self) -> usize {
        let mut connected = 0;
        for connection in &self.connections {
            let Some(registry) = self.registries.get(connection.provider) else {
                continue;
            };
            match registry
                .create(
                    connection.name.clone(),
                    ConnectionParams::new(connection.params.clone()),
                )
                .await
            {
                Ok(session) => {
                    info!(
                        provider = %connection.provider,
                        session_id = %session.id(),
                        "Startup session connected"
                    );
                    connected += 1;
                }
                Err(e) => warn!(
                    provider = %connection.provider,
                    session = ?connection.name,
                    error = %e,
                    "Startup session failed"
                ),
            }
        }
        connected
    }

    /// Serve JSON-RPC over `reader`/`writer` until EOF or Ctrl-C, then close
    /// every session.
    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<(), ServerError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.open_startup_connections().await;

        let outcome = tokio::select! {
            served = stdio::serve(Arc::clone(&self.handler), reader, writer) => {
                served.map_err(ServerError::from)
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                Ok(())
            }
        };

        self.shutdown().await;
        outcome
    }

    pub async fn run_stdio(&self) -> Result<(), ServerError> {
        info!("Serving MCP over stdio");
        self.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Close every live session, best-effort.
    pub async fn shutdown(&self) {
        self.registries.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backplane_mcp_session::SessionStatus;
    use backplane_mcp_session::testing::MockProvider;
    use serde_json::json;

    fn mock(pt: ProviderType) -> Arc<dyn Provider> {
        Arc::new(MockProvider::new(pt))
    }

    fn patch(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_build_requires_providers() {
        let err = BackplaneServer::builder().build().err().unwrap();
        assert!(matches!(err, ServerError::NoProviders));
    }

    #[test]
    fn test_settings_are_applied() {
        let server = BackplaneServer::builder()
            .provider(mock(ProviderType::Mysql))
            .provider(mock(ProviderType::Redis))
            .settings(ProviderType::Mysql, patch(json!({"history_limit": 10})))
            .global_settings(patch(json!({"disable_delete": true})))
            .build()
            .unwrap();

        let store = server.registries().config_store();
        let mysql = store.get(ProviderType::Mysql).unwrap();
        assert_eq!(mysql.history_limit(), 10);
        assert!(mysql.flag("disable_delete"));
        assert!(store.get(ProviderType::Redis).unwrap().flag("disable_delete"));
        assert_eq!(store.get(ProviderType::Redis).unwrap().history_limit(), 100);
    }

    #[test]
    fn test_invalid_settings_fail_build() {
        let err = BackplaneServer::builder()
            .provider(mock(ProviderType::Mysql))
            .settings(ProviderType::Mysql, patch(json!({"history_limit": 0})))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Settings(_)));
    }

    #[test]
    fn test_config_for_disabled_provider_fails_build() {
        let config = ServerConfig::parse(
            "[[connections]]\nprovider = \"pulsar\"\nparams = { host = \"p\" }\n",
        )
        .unwrap();
        let err = BackplaneServer::builder()
            .provider(mock(ProviderType::Mysql))
            .config(config)
            .build()
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ServerError::Config(ConfigError::ProviderNotEnabled(ProviderType::Pulsar))
        ));
    }

    #[test]
    fn test_config_sets_identity() {
        let config =
            ServerConfig::parse("[server]\nname = \"ops\"\nversion = \"9.9.9\"\n").unwrap();
        let server = BackplaneServer::builder()
            .provider(mock(ProviderType::Redis))
            .config(config)
            .build()
            .unwrap();
        assert_eq!(server.handler().info().name, "ops");
        assert_eq!(server.handler().info().version, "9.9.9");
    }

    #[tokio::test]
    async fn test_startup_connections_are_best_effort() {
        let server = BackplaneServer::builder()
            .provider(mock(ProviderType::Mysql))
            .connection(ConnectionConfig {
                provider: ProviderType::Mysql,
                name: Some("down".to_string()),
                params: patch(json!({"fail": true})),
            })
            .connection(ConnectionConfig {
                provider: ProviderType::Mysql,
                name: Some("up".to_string()),
                params: patch(json!({"host": "db"})),
            })
            .build()
            .unwrap();

        assert_eq!(server.open_startup_connections().await, 1);
        let registry = server.registries().get(ProviderType::Mysql).unwrap();
        assert_eq!(registry.get("down").await.unwrap().status(), SessionStatus::Error);
        assert_eq!(registry.current_id().await.as_deref(), Some("up"));
    }

    #[tokio::test]
    async fn test_run_closes_sessions_on_eof() {
        let provider = MockProvider::new(ProviderType::Redis);
        let server = BackplaneServer::builder()
            .provider(Arc::new(provider.clone()))
            .connection(ConnectionConfig {
                provider: ProviderType::Redis,
                name: Some("cache".to_string()),
                params: Map::new(),
            })
            .build()
            .unwrap();

        let input = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}).to_string();
        server.run(input.as_bytes(), tokio::io::sink()).await.unwrap();

        assert_eq!(provider.disconnects(), 1);
        let registry = server.registries().get(ProviderType::Redis).unwrap();
        assert_eq!(registry.get("cache").await.unwrap().status(), SessionStatus::Closed);
    }
}
