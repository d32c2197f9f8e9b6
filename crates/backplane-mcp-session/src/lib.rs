//! # Session Lifecycle for backplane-mcp
//!
//! **Named, independently-lived backend connections with per-provider registries.**
//!
//! ```rust,ignore
//! use backplane_mcp_session::prelude::*;
//!
//! let registries = SessionRegistries::new(vec![Arc::new(MySqlProvider::new())]);
//! let mysql = registries.registry(ProviderType::Mysql)?;
//!
//! // The first connected session becomes current
//! let session = mysql.create(Some("orders".into()), params).await?;
//! let rows = mysql.current().await?.run("exec", args).await?;
//! ```
//!
//! ## Architecture
//!
//! - **`Provider` / `Connection` traits**: the capability contract every backend implements
//! - **`Session`**: one connection with a status state machine and bounded history
//! - **`SessionRegistry`**: per-provider session map and current-session pointer
//! - **`SessionRegistries`**: context object holding every registry and the `ConfigStore`
//! - **`ConfigStore`**: per-provider runtime settings validated against the provider's schema

pub mod adapter;
pub mod config_store;
pub mod history;
pub mod prelude;
pub mod registry;
pub mod session;
pub mod state_machine;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use adapter::{Connection, ConnectionParams, OperationSpec, Provider, ProviderError};
pub use config_store::ConfigStore;
pub use history::{HistoryEntry, Outcome};
pub use registry::{CloseOutcome, RegistryConfig, SessionRegistries, SessionRegistry};
pub use session::{Session, SessionSummary};
pub use state_machine::SessionStatus;
