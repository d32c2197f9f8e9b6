//! Commonly used session types.

pub use crate::adapter::{Connection, ConnectionParams, OperationSpec, Provider, ProviderError};
pub use crate::config_store::ConfigStore;
pub use crate::history::{HistoryEntry, Outcome};
pub use crate::registry::{CloseOutcome, RegistryConfig, SessionRegistries, SessionRegistry};
pub use crate::session::{Session, SessionSummary};
pub use crate::state_machine::SessionStatus;
pub use backplane_mcp_protocol::prelude::*;
pub use std::sync::Arc;
