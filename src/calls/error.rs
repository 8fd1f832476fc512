//! Call-related error types.

use crate::socket::SocketError;
use thiserror::Error;
use vertocore::types::call::CallId;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("call not found: {0}")]
    NotFound(CallId),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("call already exists: {0}")]
    AlreadyExists(CallId),

    #[error("already tracking {limit} calls")]
    Capacity { limit: usize },

    #[error("no current call")]
    NoCurrentCall,

    #[error("invalid DTMF digits: {0:?}")]
    InvalidDtmf(String),

    #[error("invite for {call_id} was not acknowledged in time")]
    Timeout { call_id: CallId },

    #[error(transparent)]
    Socket(#[from] SocketError),
}
