//! Errors surfaced by the session to its callers.

use std::sync::Arc;

use rnet_core::ProtocolError;
use thiserror::Error;

use crate::infrastructure::connection::ConnectionError;

/// Why a session operation or an individual request failed.
///
/// Cloneable so that one transport fault can be delivered to every pending
/// request.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The operation needs a started session.
    #[error("session is not started")]
    NotStarted,

    /// `start` was called on a session that is already running.
    #[error("session is already started")]
    AlreadyStarted,

    /// The message could not be encoded.
    #[error("could not encode message: {0}")]
    Encode(#[from] ProtocolError),

    /// The transport failed to open or faulted while the request was pending.
    #[error("connection failure: {0}")]
    Connection(Arc<ConnectionError>),

    /// No matching reply arrived after every attempt.
    #[error("no reply after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    /// The request was cancelled, or the session stopped before it completed.
    #[error("request cancelled")]
    Cancelled,

    /// A reply arrived but was not the kind the operation needs.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl From<ConnectionError> for SessionError {
    fn from(e: ConnectionError) -> Self {
        SessionError::Connection(Arc::new(e))
    }
}

impl SessionError {
    /// `true` for the cancellation outcome, which callers treat apart from timeouts.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::Timeout { .. })
    }
}
