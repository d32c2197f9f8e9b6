//! Commonly used protocol types.

pub use crate::config::{ConfigSchema, OptionKind, OptionSpec, ProviderSettings, RetryPolicy};
pub use crate::error::{BackplaneError, CommandFailure, ErrorContext, ErrorKind};
pub use crate::json_rpc::{JsonRpcErrorObject, JsonRpcRequest, JsonRpcResponse, RequestId};
pub use crate::provider::ProviderType;
pub use crate::schema::{JsonSchema, SchemaViolation, ToolSchema};
pub use crate::tools::{CallToolResult, Tool, ToolAnnotations, ToolContent};
pub use crate::{BackplaneResult, MCP_VERSION};
