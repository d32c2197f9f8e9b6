//! # backplane-mcp Server
//!
//! **MCP server exposing named MySQL, Redis and Pulsar sessions as tools.**
//!
//! ```rust,no_run
//! use backplane_mcp_server::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ServerError> {
//!     let server = BackplaneServer::builder()
//!         .name("ops-backplane")
//!         .providers(backplane_mcp_providers::default_providers(&ProviderType::ALL))
//!         .build()?;
//!
//!     server.run_stdio().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - **`catalogue`**: the commands generated for each enabled provider
//! - **`dispatcher`**: argument checks, session resolution and routing to registries or sessions
//! - **`handler`**: MCP methods (`initialize`, `ping`, `tools/list`, `tools/call`)
//! - **`stdio`**: newline-delimited JSON-RPC, one task per request
//! - **`config`**: TOML server configuration
//! - **`server`**: `BackplaneServer` builder and lifecycle

pub mod catalogue;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod prelude;
pub mod server;
pub mod stdio;

pub use catalogue::{CommandBuilder, CommandCatalogue, CommandKind, CommandSpec};
pub use config::{ConnectionConfig, ServerConfig};
pub use dispatcher::Dispatcher;
pub use error::{ConfigError, ServerError};
pub use handler::{McpHandler, ServerInfo};
pub use server::{BackplaneServer, BackplaneServerBuilder};
