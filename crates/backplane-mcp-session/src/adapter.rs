//! Provider Adapter Contract
//!
//! A [`Provider`] is the per-backend-kind factory: it publishes its config
//! schema, its connect parameters and its operation catalogue, and opens
//! connections. A [`Connection`] is the handle one session owns exclusively
//! for its lifetime. Read-only introspection (list tables, list tenants, ...)
//! is an ordinary [`Connection::execute`] call with a reserved command name.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use backplane_mcp_protocol::{
    BackplaneError, ConfigSchema, JsonSchema, ProviderSettings, ProviderType, ToolSchema,
};

/// Argument keys whose values never leave the process in summaries or listings.
const SENSITIVE_KEYS: &[&str] = &["password", "secret", "token", "auth"];

pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|s| key.contains(s))
}

/// Errors reported by a concrete adapter
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("{0}")]
    Connect(String),

    #[error("{0}")]
    Exec(String),

    /// The underlying connection is unusable; the owning session moves to Error.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("invalid argument '{field}': {reason}")]
    InvalidArgument { field: String, reason: String },

    /// Rejected by a security setting before reaching the backend.
    #[error("operation denied: {0}")]
    Denied(String),
}

impl ProviderError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, ProviderError::ConnectionLost(_))
    }
}

impl From<ProviderError> for BackplaneError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Connect(msg) => BackplaneError::Connect(msg),
            ProviderError::Exec(msg) => BackplaneError::Exec(msg),
            ProviderError::UnsupportedCommand(cmd) => BackplaneError::UnknownCommand(cmd),
            ProviderError::InvalidArgument { field, reason } => {
                BackplaneError::InvalidArgument { field, reason }
            }
            lost @ ProviderError::ConnectionLost(_) => BackplaneError::Exec(lost.to_string()),
            denied @ ProviderError::Denied(_) => BackplaneError::Exec(denied.to_string()),
        }
    }
}

/// Backend-specific connection configuration, immutable once a session holds it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionParams(Map<String, Value>);

impl ConnectionParams {
    pub fn new(values: Map<String, Value>) -> Self {
        Self(values)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    pub fn str_or(&self, key: &str, default: &str) -> String {
        self.str(key).unwrap_or(default).to_string()
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    /// Port-like value in `1..=65535`, `default` when absent.
    pub fn port_or(&self, key: &str, default: u16) -> Result<u16, ProviderError> {
        match self.integer(key) {
            None => Ok(default),
            Some(n) => u16::try_from(n)
                .ok()
                .filter(|p| *p > 0)
                .ok_or_else(|| ProviderError::invalid_argument(key, format!("invalid port {}", n))),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Copy with sensitive values masked, for listings.
    pub fn redacted(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| {
                    if is_sensitive_key(k) && !v.is_null() {
                        (k.clone(), Value::String("***".to_string()))
                    } else {
                        (k.clone(), v.clone())
                    }
                })
                .collect(),
        )
    }
}

/// One backend operation reachable through [`Connection::execute`]
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSpec {
    pub name: String,
    pub description: String,
    pub input_schema: ToolSchema,
    pub read_only: bool,
}

impl OperationSpec {
    /// A read-only operation with no parameters.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: ToolSchema::object(),
            read_only: true,
        }
    }

    pub fn param(mut self, name: impl Into<String>, schema: JsonSchema) -> Self {
        self.input_schema = self.input_schema.with_property(name, schema);
        self
    }

    pub fn required_param(mut self, name: impl Into<String>, schema: JsonSchema) -> Self {
        self.input_schema = self.input_schema.with_required_property(name, schema);
        self
    }

    /// Mark the operation as able to change backend state.
    pub fn mutating(mut self) -> Self {
        self.read_only = false;
        self
    }
}

/// Factory for connections to one backend kind.
///
/// Selected by provider type when a session is created; shared by every
/// session of that type, so it holds no per-connection state.
#[async_trait]
pub trait Provider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Short name for logs, e.g. "mysql-sqlx".
    fn backend_name(&self) -> &'static str;

    /// Full option schema: the common options plus backend-specific ones.
    fn describe_config(&self) -> ConfigSchema;

    /// Arguments accepted by `connect_<provider>`, excluding the session name.
    fn connect_schema(&self) -> ToolSchema;

    /// Backend operations exposed as commands.
    fn operations(&self) -> Vec<OperationSpec>;

    /// Name used when the caller does not supply one.
    fn default_session_name(&self, params: &ConnectionParams) -> Option<String> {
        let _ = params;
        None
    }

    /// Establish connectivity. The session bounds this with its connect timeout.
    async fn connect(
        &self,
        params: &ConnectionParams,
        settings: &ProviderSettings,
    ) -> Result<Box<dyn Connection>, ProviderError>;
}

/// A live handle owned by exactly one session
#[async_trait]
pub trait Connection: Send {
    /// Perform one backend operation.
    async fn execute(
        &mut self,
        command: &str,
        args: &Map<String, Value>,
    ) -> Result<Value, ProviderError>;

    /// Liveness probe, used to decide Error vs Connected after a timeout.
    async fn is_healthy(&mut self) -> bool;

    /// Release backend resources. The session calls this at most once.
    async fn disconnect(&mut self) -> Result<(), ProviderError>;
}
