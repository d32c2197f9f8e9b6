//! Session registries.
//!
//! A [`SessionRegistry`] owns every session of one provider type and tracks
//! which one is current. Its mutations (create, switch, close) go through one
//! lock per provider type; the lock is never held across a backend call.
//! [`SessionRegistries`] is the explicitly constructed context object holding
//! one registry per enabled provider plus the shared [`ConfigStore`].

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use backplane_mcp_protocol::{BackplaneError, ProviderType};

use crate::adapter::{ConnectionParams, Provider};
use crate::config_store::ConfigStore;
use crate::history::HistoryEntry;
use crate::session::{Session, SessionSummary};
use crate::state_machine::{self, SessionStatus};

/// Longest accepted session name.
pub const MAX_SESSION_NAME_LEN: usize = 128;

/// Configuration for a session registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Closed sessions kept for history inspection before the oldest is purged
    pub max_closed_sessions: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_closed_sessions: 32,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<String, Arc<Session>>,
    current: Option<String>,
    /// Sequences of sessions whose close is in progress
    closing: HashSet<u64>,
}

impl RegistryState {
    fn is_taken(&self, id: &str) -> bool {
        self.sessions
            .get(id)
            .is_some_and(|s| !state_machine::is_terminal(s.status()))
    }

    /// Whether `session` may become current. A session being closed is
    /// already out, even while its disconnect waits behind a running command.
    fn can_be_current(&self, session: &Session) -> bool {
        !state_machine::is_terminal(session.status())
            && !self.closing.contains(&session.sequence())
    }

    /// Sessions newest first.
    fn ordered(&self) -> Vec<&Arc<Session>> {
        let mut sessions: Vec<_> = self.sessions.values().collect();
        sessions.sort_by(|a, b| b.sequence().cmp(&a.sequence()));
        sessions
    }

    fn purge_closed(&mut self, keep: usize) {
        let mut closed: Vec<(u64, String)> = self
            .sessions
            .values()
            .filter(|s| s.status() == SessionStatus::Closed)
            .map(|s| (s.sequence(), s.id().to_string()))
            .collect();
        if closed.len() <= keep {
            return;
        }
        closed.sort();
        let excess = closed.len() - keep;
        for (_, id) in closed.into_iter().take(excess) {
            debug!(session_id = %id, "Purging closed session");
            self.sessions.remove(&id);
        }
    }
}

/// Result of closing a session
#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub closed: SessionSummary,
    pub current: Option<String>,
}

pub struct SessionRegistry {
    provider: Arc<dyn Provider>,
    config_store: Arc<ConfigStore>,
    config: RegistryConfig,
    state: Mutex<RegistryState>,
    sequence: AtomicU64,
}

impl SessionRegistry {
    pub fn new(provider: Arc<dyn Provider>, config_store: Arc<ConfigStore>) -> Self {
        Self::with_config(provider, config_store, RegistryConfig::default())
    }

    pub fn with_config(
        provider: Arc<dyn Provider>,
        config_store: Arc<ConfigStore>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            provider,
            config_store,
            config,
            state: Mutex::new(RegistryState::default()),
            sequence: AtomicU64::new(1),
        }
    }

    pub fn provider_type(&self) -> ProviderType {
        self.provider.provider_type()
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    fn validate_name(name: &str) -> Result<(), BackplaneError> {
        let reason = if name.trim().is_empty() {
            Some("must not be empty".to_string())
        } else if name.len() > MAX_SESSION_NAME_LEN {
            Some(format!("must be at most {} characters", MAX_SESSION_NAME_LEN))
        } else if name.chars().any(|c| c.is_control() || c.is_whitespace()) {
            Some("must not contain whitespace".to_string())
        } else {
            None
        };
        match reason {
            Some(reason) => Err(BackplaneError::invalid_argument("name", reason)),
            None => Ok(()),
        }
    }

    fn generate_name(&self, state: &RegistryState, params: &ConnectionParams) -> String {
        let base = self
            .provider
            .default_session_name(params)
            .map(|n| {
                n.chars()
                    .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
                    .take(MAX_SESSION_NAME_LEN - 8)
                    .collect::<String>()
            })
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| {
                let short = Uuid::new_v4().simple().to_string();
                format!("{}_{}", self.provider_type(), &short[..8])
            });

        if !state.is_taken(&base) {
            return base;
        }
        (2u32..)
            .map(|n| format!("{}_{}", base, n))
            .find(|candidate| !state.is_taken(candidate))
            .unwrap_or(base)
    }

    /// Create and connect a session.
    ///
    /// The name is reserved under the registry lock, then the backend connect
    /// runs without it. A failed connect leaves the session registered in
    /// `Error` so its history stays inspectable. The first connected session
    /// of a registry with no current session becomes current.
    pub async fn create(
        &self,
        name: Option<String>,
        params: ConnectionParams,
    ) -> Result<Arc<Session>, BackplaneError> {
        let provider_type = self.provider_type();
        let settings = self.config_store.get(provider_type)?;

        let session = {
            let mut state = self.state.lock().await;
            let id = match name {
                Some(name) => {
                    Self::validate_name(&name)?;
                    if state.is_taken(&name) {
                        return Err(BackplaneError::DuplicateSession(name));
                    }
                    name
                }
                None => self.generate_name(&state, &params),
            };
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            let session = Arc::new(Session::new(
                id.clone(),
                provider_type,
                params,
                settings,
                sequence,
            ));
            state.sessions.insert(id, Arc::clone(&session));
            state.purge_closed(self.config.max_closed_sessions);
            session
        };

        info!(provider = %provider_type, session_id = %session.id(), "Creating session");
        let connected = session.connect(self.provider.as_ref()).await;

        if connected.is_ok() {
            let mut state = self.state.lock().await;
            let still_registered = state
                .sessions
                .get(session.id())
                .is_some_and(|s| Arc::ptr_eq(s, &session));
            if state.current.is_none()
                && still_registered
                && session.status() == SessionStatus::Connected
                && state.can_be_current(&session)
            {
                state.current = Some(session.id().to_string());
                info!(provider = %provider_type, session_id = %session.id(), "Session is now current");
            }
        }

        connected.map(|_| session)
    }

    /// Make `name` current. `name` is a session id, or a 1-based index into
    /// [`list`](Self::list) when no session has that exact id.
    pub async fn switch(&self, name: &str) -> Result<SessionSummary, BackplaneError> {
        let mut state = self.state.lock().await;
        let target = match state.sessions.get(name) {
            Some(session) => Some(Arc::clone(session)),
            None => name
                .parse::<usize>()
                .ok()
                .and_then(|index| index.checked_sub(1))
                .and_then(|index| state.ordered().get(index).map(|s| Arc::clone(*s))),
        };

        let session = target
            .filter(|s| state.can_be_current(s))
            .ok_or_else(|| BackplaneError::SessionNotFound(name.to_string()))?;

        state.current = Some(session.id().to_string());
        info!(provider = %self.provider_type(), session_id = %session.id(), "Switched current session");
        Ok(session.summary(true))
    }

    /// The current session.
    pub async fn current(&self) -> Result<Arc<Session>, BackplaneError> {
        let state = self.state.lock().await;
        state
            .current
            .as_ref()
            .and_then(|id| state.sessions.get(id))
            .cloned()
            .ok_or(BackplaneError::NoActiveSession(self.provider_type()))
    }

    pub async fn current_id(&self) -> Option<String> {
        self.state.lock().await.current.clone()
    }

    /// Any registered session, including closed ones.
    pub async fn get(&self, id: &str) -> Result<Arc<Session>, BackplaneError> {
        self.state
            .lock()
            .await
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| BackplaneError::SessionNotFound(id.to_string()))
    }

    /// The explicitly named session, else the current one.
    pub async fn resolve(&self, id: Option<&str>) -> Result<Arc<Session>, BackplaneError> {
        match id {
            Some(id) => self.get(id).await,
            None => self.current().await,
        }
    }

    /// Every retained session, newest first.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let state = self.state.lock().await;
        state
            .ordered()
            .into_iter()
            .map(|s| s.summary(state.current.as_deref() == Some(s.id())))
            .collect()
    }

    /// History of the named (or current) session, oldest first.
    pub async fn history(
        &self,
        id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<(SessionSummary, Vec<HistoryEntry>), BackplaneError> {
        let session = self.resolve(id).await?;
        let is_current = self.current_id().await.as_deref() == Some(session.id());
        Ok((session.summary(is_current), session.history(limit)))
    }

    /// Close the named (or current) session.
    ///
    /// `switch_to` nominates another connected session as current in the same
    /// step; it is validated before anything is closed. Closing an already
    /// closed session succeeds without effect.
    pub async fn close(
        &self,
        id: Option<&str>,
        switch_to: Option<&str>,
    ) -> Result<CloseOutcome, BackplaneError> {
        let (session, current) = {
            let mut state = self.state.lock().await;
            let target_id = match id {
                Some(id) => id.to_string(),
                None => state
                    .current
                    .clone()
                    .ok_or(BackplaneError::NoActiveSession(self.provider_type()))?,
            };
            let session = state
                .sessions
                .get(&target_id)
                .cloned()
                .ok_or_else(|| BackplaneError::SessionNotFound(target_id.clone()))?;

            if let Some(next) = switch_to {
                let usable = next != target_id
                    && state
                        .sessions
                        .get(next)
                        .is_some_and(|s| {
                            s.status() == SessionStatus::Connected && state.can_be_current(s)
                        });
                if !usable {
                    return Err(BackplaneError::SessionNotFound(next.to_string()));
                }
                state.current = Some(next.to_string());
            } else if state.current.as_deref() == Some(target_id.as_str()) {
                state.current = None;
            }
            state.closing.insert(session.sequence());
            (session, state.current.clone())
        };

        let closed = session.close().await;
        self.state.lock().await.closing.remove(&session.sequence());
        closed?;
        Ok(CloseOutcome {
            closed: session.summary(false),
            current,
        })
    }

    /// Close every live session. Errors are logged, never returned.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut state = self.state.lock().await;
            state.current = None;
            let live: Vec<Arc<Session>> = state
                .sessions
                .values()
                .filter(|s| !state_machine::is_terminal(s.status()))
                .cloned()
                .collect();
            state.closing.extend(live.iter().map(|s| s.sequence()));
            live
        };
        for session in &sessions {
            if let Err(e) = session.close().await {
                warn!(
                    provider = %self.provider_type(),
                    session_id = %session.id(),
                    error = %e,
                    "Failed to close session during shutdown"
                );
            }
        }
        let mut state = self.state.lock().await;
        for session in &sessions {
            state.closing.remove(&session.sequence());
        }
    }
}

/// One registry per enabled provider, plus the shared config store
pub struct SessionRegistries {
    registries: HashMap<ProviderType, Arc<SessionRegistry>>,
    config_store: Arc<ConfigStore>,
}

impl SessionRegistries {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self::with_config(providers, RegistryConfig::default())
    }

    pub fn with_config(providers: Vec<Arc<dyn Provider>>, config: RegistryConfig) -> Self {
        let config_store = Arc::new(providers.iter().fold(ConfigStore::new(), |store, p| {
            store.with_provider(p.provider_type(), p.describe_config())
        }));
        let registries = providers
            .into_iter()
            .map(|provider| {
                let provider_type = provider.provider_type();
                let registry = SessionRegistry::with_config(
                    provider,
                    Arc::clone(&config_store),
                    config.clone(),
                );
                (provider_type, Arc::new(registry))
            })
            .collect();
        Self {
            registries,
            config_store,
        }
    }

    pub fn get(&self, provider_type: ProviderType) -> Option<&Arc<SessionRegistry>> {
        self.registries.get(&provider_type)
    }

    /// Like [`get`](Self::get), for callers that treat a disabled provider as unknown.
    pub fn registry(
        &self,
        provider_type: ProviderType,
    ) -> Result<&Arc<SessionRegistry>, BackplaneError> {
        self.get(provider_type).ok_or_else(|| {
            BackplaneError::UnknownCommand(format!("provider '{}' is not enabled", provider_type))
        })
    }

    pub fn provider_types(&self) -> Vec<ProviderType> {
        let mut types: Vec<_> = self.registries.keys().copied().collect();
        types.sort();
        types
    }

    pub fn config_store(&self) -> &Arc<ConfigStore> {
        &self.config_store
    }

    /// Apply process-wide switches to every provider that declares them.
    pub fn apply_global_settings(&self, patch: &Map<String, Value>) -> Result<(), BackplaneError> {
        for provider_type in self.provider_types() {
            self.config_store.update_known(provider_type, patch)?;
        }
        Ok(())
    }

    /// Close every session of every provider, best-effort.
    pub async fn shutdown(&self) {
        info!("Closing all sessions");
        for provider_type in self.provider_types() {
            if let Some(registry) = self.registries.get(&provider_type) {
                registry.shutdown().await;
            }
        }
    }
}
