//! Session status state machine.
//!
//! ```text
//! Connecting -> Connected | Error      (exactly once, at creation)
//! Connected  -> Error | Closed         (Error when the adapter reports the connection broken)
//! Error      -> Closed
//! Closed     -> ERROR (terminal)
//! ```
//!
//! Nothing returns to Connected; reconnecting means creating a new session.

use serde::{Deserialize, Serialize};
use std::fmt;

use backplane_mcp_protocol::BackplaneError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Connecting,
    Connected,
    Error,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Error => "error",
            SessionStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Invalid session transition: {current} -> {requested}")]
    Invalid {
        current: SessionStatus,
        requested: SessionStatus,
    },

    #[error("Session is in terminal state: {0}")]
    Terminal(SessionStatus),
}

impl From<TransitionError> for BackplaneError {
    fn from(err: TransitionError) -> Self {
        BackplaneError::Internal(err.to_string())
    }
}

/// Validate a session status transition.
pub fn validate_transition(from: SessionStatus, to: SessionStatus) -> Result<(), TransitionError> {
    let allowed = match from {
        SessionStatus::Connecting => {
            matches!(to, SessionStatus::Connected | SessionStatus::Error)
        }
        SessionStatus::Connected => matches!(to, SessionStatus::Error | SessionStatus::Closed),
        SessionStatus::Error => matches!(to, SessionStatus::Closed),
        SessionStatus::Closed => return Err(TransitionError::Terminal(from)),
    };
    if allowed {
        Ok(())
    } else {
        Err(TransitionError::Invalid {
            current: from,
            requested: to,
        })
    }
}

/// Returns `true` if the status is terminal (no further transitions allowed).
pub fn is_terminal(status: SessionStatus) -> bool {
    matches!(status, SessionStatus::Closed)
}
