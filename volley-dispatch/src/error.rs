use std::time::Duration;

use thiserror::Error;
use volley_common::ValidationError;
use volley_smtp::client::{ClientError, Response};

use crate::{
    session::SessionState,
    timing::{Command, Phase},
};

/// Why a session could not be opened.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("{phase} timed out after {after:?}")]
    Timeout { phase: Phase, after: Duration },

    #[error("Server rejected {phase}: {code} {message}")]
    Rejected {
        phase: Phase,
        code: u16,
        message: String,
    },

    #[error("{phase} failed: {reason}")]
    Transport { phase: Phase, reason: String },

    #[error("Cannot {operation} a session in state {state:?}")]
    InvalidState {
        state: SessionState,
        operation: &'static str,
    },
}

impl SessionError {
    pub(crate) fn rejected(phase: Phase, response: &Response) -> Self {
        Self::Rejected {
            phase,
            code: response.code,
            message: response.message(),
        }
    }

    pub(crate) fn transport(phase: Phase, error: &ClientError) -> Self {
        Self::Transport {
            phase,
            reason: error.to_string(),
        }
    }
}

/// Why a single message was not delivered on an open session.
#[derive(Debug, Clone, Error)]
pub enum SendError {
    #[error("Server rejected {command}: {code} {message}")]
    Rejected {
        command: Command,
        code: u16,
        message: String,
    },

    #[error("{command} failed: {reason}")]
    Transport { command: Command, reason: String },

    #[error("Session is not ready to send (state {0:?})")]
    NotReady(SessionState),
}

impl SendError {
    pub(crate) fn rejected(command: Command, response: &Response) -> Self {
        Self::Rejected {
            command,
            code: response.code,
            message: response.message(),
        }
    }

    pub(crate) fn transport(command: Command, error: &ClientError) -> Self {
        Self::Transport {
            command,
            reason: error.to_string(),
        }
    }
}

/// Recorded against a message that was not sent.
#[derive(Debug, Clone, Error)]
pub enum FailureReason {
    #[error("Invalid message: {0}")]
    Validation(#[from] ValidationError),

    #[error("No session available: {0}")]
    SessionUnavailable(#[from] SessionError),

    #[error("Send failed: {0}")]
    Send(#[from] SendError),

    #[error("Batch worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("Batch worker did not finish: {0}")]
    WorkerAborted(String),
}
