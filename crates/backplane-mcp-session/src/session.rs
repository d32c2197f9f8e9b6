//! One named, independently-lived connection to a backend.
//!
//! A session owns its [`Connection`] exclusively. The connection sits behind a
//! fair async mutex that is held for exactly one connect, run or close, so
//! runs on one session are strictly sequential and queue in arrival order,
//! while runs on different sessions never contend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use backplane_mcp_protocol::{BackplaneError, ProviderSettings, ProviderType};

use crate::adapter::{Connection, ConnectionParams, Provider};
use crate::history::{History, HistoryEntry, Outcome, summarize_args};
use crate::state_machine::{self, SessionStatus, TransitionError};

/// Listing view of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub provider: ProviderType,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub is_current: bool,
    pub history_len: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub params: Value,
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    last_used_at: DateTime<Utc>,
    last_error: Option<String>,
    history: History,
}

pub struct Session {
    id: String,
    provider_type: ProviderType,
    params: ConnectionParams,
    settings: ProviderSettings,
    created_at: DateTime<Utc>,
    sequence: u64,
    state: parking_lot::Mutex<SessionState>,
    connection: tokio::sync::Mutex<Option<Box<dyn Connection>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("provider_type", &self.provider_type)
            .field("status", &self.status())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// A new session in `Connecting`. `settings` is the snapshot it keeps for life.
    pub(crate) fn new(
        id: String,
        provider_type: ProviderType,
        params: ConnectionParams,
        settings: ProviderSettings,
        sequence: u64,
    ) -> Self {
        let now = Utc::now();
        let history = History::with_cap(settings.history_limit());
        Self {
            id,
            provider_type,
            params,
            settings,
            created_at: now,
            sequence,
            state: parking_lot::Mutex::new(SessionState {
                status: SessionStatus::Connecting,
                last_used_at: now,
                last_error: None,
                history,
            }),
            connection: tokio::sync::Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Settings in effect when this session connected.
    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().status
    }

    pub fn last_used_at(&self) -> DateTime<Utc> {
        self.state.lock().last_used_at
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    /// Fresh copy of the history, oldest first.
    pub fn history(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        self.state.lock().history.snapshot(limit)
    }

    pub fn history_cap(&self) -> usize {
        self.state.lock().history.cap()
    }

    pub fn summary(&self, is_current: bool) -> SessionSummary {
        let state = self.state.lock();
        SessionSummary {
            id: self.id.clone(),
            provider: self.provider_type,
            status: state.status,
            created_at: self.created_at,
            last_used_at: state.last_used_at,
            is_current,
            history_len: state.history.len(),
            last_error: state.last_error.clone(),
            params: self.params.redacted(),
        }
    }

    fn transition(&self, to: SessionStatus) -> Result<(), TransitionError> {
        let mut state = self.state.lock();
        state_machine::validate_transition(state.status, to)?;
        debug!(
            provider = %self.provider_type,
            session_id = %self.id,
            from = %state.status,
            to = %to,
            "Session status change"
        );
        state.status = to;
        Ok(())
    }

    fn mark_error(&self, reason: &str) {
        {
            let mut state = self.state.lock();
            state.last_error = Some(reason.to_string());
        }
        if let Err(e) = self.transition(SessionStatus::Error) {
            debug!(session_id = %self.id, error = %e, "Session already out of service");
        }
    }

    fn record(&self, command: &str, args_summary: String, elapsed: Duration, outcome: Outcome) {
        let now = Utc::now();
        let mut state = self.state.lock();
        state.last_used_at = now;
        state.history.push(HistoryEntry {
            command: command.to_string(),
            args_summary,
            timestamp: now,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            outcome,
        });
    }

    /// Open the backend connection, honouring the retry settings.
    ///
    /// Moves `Connecting` to `Connected` or `Error`. Each attempt is bounded by
    /// the connect timeout.
    pub async fn connect(&self, provider: &dyn Provider) -> Result<(), BackplaneError> {
        let mut slot = self.connection.lock().await;
        let status = self.status();
        if status != SessionStatus::Connecting {
            return Err(BackplaneError::Internal(format!(
                "session '{}' cannot connect from status {}",
                self.id, status
            )));
        }

        let started = Instant::now();
        let timeout = self.settings.connect_timeout();
        let policy = self.settings.retry_policy();
        let attempts = self.settings.connect_attempts();
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = policy.delay_for_attempt(self.settings.retry_delay(), attempt);
                debug!(
                    provider = %self.provider_type,
                    session_id = %self.id,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying connect"
                );
                tokio::time::sleep(delay).await;
            }

            match tokio::time::timeout(timeout, provider.connect(&self.params, &self.settings))
                .await
            {
                Ok(Ok(connection)) => {
                    *slot = Some(connection);
                    self.transition(SessionStatus::Connected)?;
                    self.record(
                        "connect",
                        summarize_args(self.params.as_map()),
                        started.elapsed(),
                        Outcome::Success,
                    );
                    info!(
                        provider = %self.provider_type,
                        session_id = %self.id,
                        backend = provider.backend_name(),
                        "Session connected"
                    );
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!(
                        provider = %self.provider_type,
                        session_id = %self.id,
                        attempt = attempt + 1,
                        error = %e,
                        "Connect attempt failed"
                    );
                    last_error = Some(match BackplaneError::from(e) {
                        err @ BackplaneError::InvalidArgument { .. } => {
                            // Bad parameters will not improve with retries.
                            self.fail_connect(&err, started.elapsed());
                            return Err(err);
                        }
                        err @ BackplaneError::Connect(_) => err,
                        other => BackplaneError::Connect(other.to_string()),
                    });
                }
                Err(_) => {
                    warn!(
                        provider = %self.provider_type,
                        session_id = %self.id,
                        attempt = attempt + 1,
                        timeout_ms = timeout.as_millis() as u64,
                        "Connect attempt timed out"
                    );
                    last_error = Some(BackplaneError::Timeout {
                        operation: "connect".to_string(),
                        after_ms: timeout.as_millis() as u64,
                    });
                }
            }
        }

        let err = last_error
            .unwrap_or_else(|| BackplaneError::Connect("no connect attempt was made".to_string()));
        self.fail_connect(&err, started.elapsed());
        Err(err)
    }

    fn fail_connect(&self, err: &BackplaneError, elapsed: Duration) {
        self.mark_error(&err.to_string());
        self.record(
            "connect",
            summarize_args(self.params.as_map()),
            elapsed,
            Outcome::Failed {
                kind: err.kind(),
                message: err.to_string(),
            },
        );
    }

    /// Forward one command to the adapter. Every call lands in the history.
    pub async fn run(
        &self,
        command: &str,
        args: Map<String, Value>,
    ) -> Result<Value, BackplaneError> {
        let args_summary = summarize_args(&args);
        let mut slot = self.connection.lock().await;
        let started = Instant::now();
        let result = self.run_locked(&mut slot, command, &args).await;
        self.record(
            command,
            args_summary,
            started.elapsed(),
            Outcome::from_result(&result),
        );
        result
    }

    async fn run_locked(
        &self,
        slot: &mut Option<Box<dyn Connection>>,
        command: &str,
        args: &Map<String, Value>,
    ) -> Result<Value, BackplaneError> {
        let status = self.status();
        let connection = match slot.as_mut() {
            Some(connection) if status == SessionStatus::Connected => connection,
            _ => {
                return Err(BackplaneError::SessionNotConnected {
                    session_id: self.id.clone(),
                    status: status.to_string(),
                });
            }
        };

        let timeout = self.settings.request_timeout();
        match tokio::time::timeout(timeout, connection.execute(command, args)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_connection_lost() {
                    warn!(
                        provider = %self.provider_type,
                        session_id = %self.id,
                        command,
                        error = %e,
                        "Connection lost"
                    );
                    self.mark_error(&e.to_string());
                }
                Err(e.into())
            }
            Err(_) => {
                let after_ms = timeout.as_millis() as u64;
                let healthy =
                    tokio::time::timeout(self.settings.connect_timeout(), connection.is_healthy())
                        .await
                        .unwrap_or(false);
                warn!(
                    provider = %self.provider_type,
                    session_id = %self.id,
                    command,
                    timeout_ms = after_ms,
                    healthy,
                    "Command timed out"
                );
                if !healthy {
                    self.mark_error(&format!(
                        "connection unhealthy after '{}' timed out",
                        command
                    ));
                }
                Err(BackplaneError::Timeout {
                    operation: command.to_string(),
                    after_ms,
                })
            }
        }
    }

    /// Disconnect and mark `Closed`. Idempotent; disconnect failures are logged.
    pub async fn close(&self) -> Result<(), BackplaneError> {
        let mut slot = self.connection.lock().await;
        match self.status() {
            status if state_machine::is_terminal(status) => return Ok(()),
            SessionStatus::Connecting => self.mark_error("abandoned while connecting"),
            _ => {}
        }
        self.transition(SessionStatus::Closed)?;

        if let Some(mut connection) = slot.take() {
            match tokio::time::timeout(self.settings.connect_timeout(), connection.disconnect())
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    provider = %self.provider_type,
                    session_id = %self.id,
                    error = %e,
                    "Disconnect failed"
                ),
                Err(_) => warn!(
                    provider = %self.provider_type,
                    session_id = %self.id,
                    "Disconnect timed out"
                ),
            }
        }

        info!(provider = %self.provider_type, session_id = %self.id, "Session closed");
        Ok(())
    }
}
