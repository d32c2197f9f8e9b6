//! Command error taxonomy.
//!
//! [`BackplaneError`] is what registries, sessions and the dispatcher return.
//! [`CommandFailure`] annotates one with the provider type, session id and
//! command name it happened under, and renders the machine-parseable payload
//! callers receive.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

use crate::json_rpc::JsonRpcErrorObject;
use crate::provider::ProviderType;
use crate::schema::SchemaViolation;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackplaneError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session '{session_id}' is not connected (status: {status})")]
    SessionNotConnected { session_id: String, status: String },

    #[error("Session '{0}' already exists; close it before reusing the name")]
    DuplicateSession(String),

    #[error("No active {0} session; connect or switch first")]
    NoActiveSession(ProviderType),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid argument '{field}': {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("Execution failed: {0}")]
    Exec(String),

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Invalid setting '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Machine-parseable discriminator of a [`BackplaneError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConnectError,
    SessionNotFound,
    SessionNotConnected,
    DuplicateSession,
    NoActiveSession,
    UnknownCommand,
    InvalidArgument,
    ExecError,
    Timeout,
    ValidationError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectError => "connect_error",
            ErrorKind::SessionNotFound => "session_not_found",
            ErrorKind::SessionNotConnected => "session_not_connected",
            ErrorKind::DuplicateSession => "duplicate_session",
            ErrorKind::NoActiveSession => "no_active_session",
            ErrorKind::UnknownCommand => "unknown_command",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::ExecError => "exec_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BackplaneError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BackplaneError::Connect(_) => ErrorKind::ConnectError,
            BackplaneError::SessionNotFound(_) => ErrorKind::SessionNotFound,
            BackplaneError::SessionNotConnected { .. } => ErrorKind::SessionNotConnected,
            BackplaneError::DuplicateSession(_) => ErrorKind::DuplicateSession,
            BackplaneError::NoActiveSession(_) => ErrorKind::NoActiveSession,
            BackplaneError::UnknownCommand(_) => ErrorKind::UnknownCommand,
            BackplaneError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            BackplaneError::Exec(_) => ErrorKind::ExecError,
            BackplaneError::Timeout { .. } => ErrorKind::Timeout,
            BackplaneError::Validation { .. } => ErrorKind::ValidationError,
            BackplaneError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Errors raised before any side effect: the caller sent a bad request.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            BackplaneError::UnknownCommand(_) | BackplaneError::InvalidArgument { .. }
        )
    }

    /// Convert to a JsonRpcErrorObject for JSON-RPC 2.0 responses
    pub fn to_error_object(&self, data: Option<Value>) -> JsonRpcErrorObject {
        let message = self.to_string();
        match self {
            BackplaneError::InvalidArgument { .. } => {
                JsonRpcErrorObject::invalid_params(&message, data)
            }
            BackplaneError::UnknownCommand(_) => {
                JsonRpcErrorObject::server_error(-32001, &message, data)
            }
            BackplaneError::Exec(_) => JsonRpcErrorObject::server_error(-32010, &message, data),
            BackplaneError::Validation { .. } => {
                JsonRpcErrorObject::server_error(-32020, &message, data)
            }
            BackplaneError::Connect(_) => JsonRpcErrorObject::server_error(-32040, &message, data),
            BackplaneError::SessionNotFound(_) => {
                JsonRpcErrorObject::server_error(-32041, &message, data)
            }
            BackplaneError::SessionNotConnected { .. } => {
                JsonRpcErrorObject::server_error(-32042, &message, data)
            }
            BackplaneError::DuplicateSession(_) => {
                JsonRpcErrorObject::server_error(-32043, &message, data)
            }
            BackplaneError::NoActiveSession(_) => {
                JsonRpcErrorObject::server_error(-32044, &message, data)
            }
            BackplaneError::Timeout { .. } => {
                JsonRpcErrorObject::server_error(-32045, &message, data)
            }
            BackplaneError::Internal(_) => JsonRpcErrorObject::internal_error(Some(message), data),
        }
    }
}

impl From<SchemaViolation> for BackplaneError {
    fn from(violation: SchemaViolation) -> Self {
        BackplaneError::InvalidArgument {
            field: violation.field,
            reason: violation.reason,
        }
    }
}

impl From<serde_json::Error> for BackplaneError {
    fn from(err: serde_json::Error) -> Self {
        BackplaneError::Internal(format!("serialization error: {}", err))
    }
}

/// Where a failure happened
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl ErrorContext {
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, provider: ProviderType) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// A [`BackplaneError`] annotated with its [`ErrorContext`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{source}")]
pub struct CommandFailure {
    pub context: ErrorContext,
    #[source]
    pub source: BackplaneError,
}

impl CommandFailure {
    pub fn new(context: ErrorContext, source: BackplaneError) -> Self {
        Self { context, source }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    /// Structured payload: `{kind, message, provider?, session_id?, command?}`
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "kind": self.kind(),
            "message": self.source.to_string(),
        });
        if let (Value::Object(map), Ok(Value::Object(context))) =
            (&mut payload, serde_json::to_value(&self.context))
        {
            map.extend(context);
        }
        payload
    }

    pub fn to_error_object(&self) -> JsonRpcErrorObject {
        self.source.to_error_object(Some(self.to_payload()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings() {
        assert_eq!(
            BackplaneError::DuplicateSession("a".into()).kind().as_str(),
            "duplicate_session"
        );
        assert_eq!(
            serde_json::to_value(ErrorKind::NoActiveSession).unwrap(),
            json!("no_active_session")
        );
    }

    #[test]
    fn test_payload_carries_context() {
        let failure = CommandFailure::new(
            ErrorContext::command("mysql_exec")
                .with_provider(ProviderType::Mysql)
                .with_session("a"),
            BackplaneError::Exec("syntax error".into()),
        );
        let payload = failure.to_payload();
        assert_eq!(payload["kind"], "exec_error");
        assert_eq!(payload["provider"], "mysql");
        assert_eq!(payload["session_id"], "a");
        assert_eq!(payload["command"], "mysql_exec");
        assert!(payload["message"].as_str().unwrap().contains("syntax error"));
    }

    #[test]
    fn test_payload_omits_missing_context() {
        let failure = CommandFailure::new(
            ErrorContext::command("nope"),
            BackplaneError::UnknownCommand("nope".into()),
        );
        let payload = failure.to_payload();
        assert!(payload.get("provider").is_none());
        assert!(payload.get("session_id").is_none());
    }

    #[test]
    fn test_error_object_codes() {
        let invalid = BackplaneError::invalid_argument("sql", "required argument is missing");
        assert_eq!(invalid.to_error_object(None).code, -32602);
        assert_eq!(
            BackplaneError::UnknownCommand("x".into())
                .to_error_object(None)
                .code,
            -32001
        );
        assert_eq!(
            BackplaneError::Timeout {
                operation: "exec".into(),
                after_ms: 10
            }
            .to_error_object(None)
            .code,
            -32045
        );
    }

    #[test]
    fn test_schema_violation_conversion() {
        let err: BackplaneError = SchemaViolation::new("limit", "bad").into();
        assert!(err.is_request_error());
        assert_eq!(err.to_string(), "Invalid argument 'limit': bad");
    }
}
