//! Commonly used server types.
//!
//! ```rust
//! use backplane_mcp_server::prelude::*;
//! ```

pub use backplane_mcp_session::prelude::*;

pub use crate::{
    BackplaneServer, BackplaneServerBuilder, CommandCatalogue, ConfigError, ConnectionConfig,
    Dispatcher, McpHandler, ServerConfig, ServerError, ServerInfo,
};
