use thiserror::Error;

use super::TimerStatus;

#[derive(Debug, Error)]
pub enum TimerError {
    /// Operation not permitted from the current state; nothing was changed.
    #[error("cannot {operation} while timer is {status:?}")]
    InvalidTransition {
        operation: &'static str,
        status: TimerStatus,
    },

    #[error("session {session_id} is already running on this device")]
    SessionAlreadyActive { session_id: String },

    #[error("session store failure: {0:#}")]
    Persistence(anyhow::Error),

    #[error("corrupt session record: {0}")]
    CorruptRecord(String),
}

impl From<anyhow::Error> for TimerError {
    fn from(err: anyhow::Error) -> Self {
        TimerError::Persistence(err)
    }
}

impl TimerError {
    pub(crate) fn invalid(operation: &'static str, status: TimerStatus) -> Self {
        TimerError::InvalidTransition { operation, status }
    }
}
