//! # backplane-mcp Protocol Types
//!
//! Wire-level types shared by every backplane-mcp crate.
//!
//! ## Architecture
//!
//! - **`ProviderType`**: the backend kinds a server can expose (MySQL, Redis, Pulsar)
//! - **`schema`**: JSON Schema subset used for command arguments, with validation
//! - **`config`**: runtime option schemas published by each provider and the settings they validate
//! - **`error`**: the command error taxonomy and its JSON-RPC mapping
//! - **`json_rpc`**: JSON-RPC 2.0 envelopes for the stdio transport
//! - **`tools`**: MCP tool descriptors and call results

pub mod config;
pub mod error;
pub mod json_rpc;
pub mod prelude;
pub mod provider;
pub mod schema;
pub mod tools;

pub use config::{ConfigSchema, OptionKind, OptionSpec, ProviderSettings, RetryPolicy};
pub use error::{BackplaneError, CommandFailure, ErrorContext, ErrorKind};
pub use provider::ProviderType;
pub use schema::{JsonSchema, SchemaViolation, ToolSchema};
pub use tools::{CallToolResult, Tool, ToolContent};

/// MCP protocol version advertised during `initialize`.
pub const MCP_VERSION: &str = "2025-06-18";

/// Result alias used throughout the workspace.
pub type BackplaneResult<T> = Result<T, BackplaneError>;
