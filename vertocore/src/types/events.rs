//! Events surfaced by the client to its host.
//!
//! Hosts must not assume delivery on any particular task; only the order in which
//! events are dispatched is guaranteed.

use crate::protocol::ReceivedMessage;
use crate::types::call::{CallId, CallState, CauseCode};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionEstablished {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageReceived {
    pub method: String,
    pub message: ReceivedMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallStateChanged {
    pub call_id: CallId,
    pub state: CallState,
}

/// An inbound invite the client turned down without tracking it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallRefused {
    pub call_id: CallId,
    /// Cause sent to the server with the refusal.
    pub cause: CauseCode,
    /// Number of calls already tracked when the invite arrived.
    pub tracked: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Disconnected {
    /// True when the host asked for the disconnect.
    pub expected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Event {
    /// A connect or login is in flight.
    Loading,
    ConnectionEstablished(ConnectionEstablished),
    MessageReceived(MessageReceived),
    CallStateChanged(CallStateChanged),
    CallRefused(CallRefused),
    Disconnected(Disconnected),
    /// Advisory error; the client keeps running.
    Error(String),
}

impl Event {
    pub fn message_received(message: ReceivedMessage) -> Self {
        Self::MessageReceived(MessageReceived {
            method: message.method().to_string(),
            message,
        })
    }

    pub fn call_state_changed(call_id: CallId, state: CallState) -> Self {
        Self::CallStateChanged(CallStateChanged { call_id, state })
    }
}
