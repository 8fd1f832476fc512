//! Call state machine implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use vertocore::protocol::InviteResult;
use vertocore::types::call::{CallDirection, CallId, CallState, CauseCode};

/// State transitions for calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTransition {
    InviteSent,
    InviteReceived,
    LocalAccepted,
    RemoteAnswered,
    Hold,
    Resume,
    Terminated { cause: CauseCode },
}

/// Full call session information.
#[derive(Debug, Clone, Serialize)]
pub struct Call {
    pub call_id: CallId,
    /// Session the call was created under.
    pub session_id: String,
    pub direction: CallDirection,
    pub state: CallState,
    pub caller_id_name: String,
    pub caller_id_number: String,
    pub destination_number: String,
    pub client_state: String,
    pub muted: bool,
    pub held: bool,
    pub speaker_active: bool,
    /// Set once the local user accepted this (inbound) call.
    pub accepted_locally: bool,
    #[serde(skip)]
    pub local_sdp: Option<String>,
    #[serde(skip)]
    pub remote_sdp: Option<String>,
    pub telnyx_session_id: Option<String>,
    pub telnyx_leg_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_cause: Option<CauseCode>,
}

impl Call {
    pub fn new_outbound(
        call_id: CallId,
        session_id: impl Into<String>,
        caller_id_name: impl Into<String>,
        caller_id_number: impl Into<String>,
        destination_number: impl Into<String>,
        client_state: impl Into<String>,
    ) -> Self {
        Self {
            call_id,
            session_id: session_id.into(),
            direction: CallDirection::Outbound,
            state: CallState::New,
            caller_id_name: caller_id_name.into(),
            caller_id_number: caller_id_number.into(),
            destination_number: destination_number.into(),
            client_state: client_state.into(),
            muted: false,
            held: false,
            speaker_active: false,
            accepted_locally: false,
            local_sdp: None,
            remote_sdp: None,
            telnyx_session_id: None,
            telnyx_leg_id: None,
            created_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            end_cause: None,
        }
    }

    pub fn new_inbound(session_id: impl Into<String>, invite: &InviteResult) -> Self {
        Self {
            call_id: invite.call_id.clone(),
            session_id: session_id.into(),
            direction: CallDirection::Inbound,
            state: CallState::New,
            caller_id_name: invite.caller_id_name.clone(),
            caller_id_number: invite.caller_id_number.clone(),
            destination_number: String::new(),
            client_state: String::new(),
            muted: false,
            held: false,
            speaker_active: false,
            accepted_locally: false,
            local_sdp: None,
            remote_sdp: (!invite.sdp.is_empty()).then(|| invite.sdp.clone()),
            telnyx_session_id: invite.telnyx_session_id.clone(),
            telnyx_leg_id: invite.telnyx_leg_id.clone(),
            created_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            end_cause: None,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.state.is_terminal()
    }

    /// Seconds since the call was answered, if it was.
    pub fn duration_secs(&self) -> Option<i64> {
        let answered = self.answered_at?;
        let until = self.ended_at.unwrap_or_else(Utc::now);
        Some(until.signed_duration_since(answered).num_seconds())
    }

    /// Apply a state transition. Returns error if transition is invalid.
    pub fn apply_transition(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        let new_state = match (self.state, transition) {
            (CallState::New, CallTransition::InviteSent) => CallState::Connecting,
            (CallState::New, CallTransition::InviteReceived) => CallState::Ringing,
            (CallState::Ringing, CallTransition::LocalAccepted) => {
                self.accepted_locally = true;
                self.answered_at = Some(Utc::now());
                CallState::Active
            }
            (CallState::Connecting, CallTransition::RemoteAnswered) => {
                self.answered_at = Some(Utc::now());
                CallState::Active
            }
            (CallState::Active, CallTransition::Hold) => {
                self.held = true;
                CallState::Held
            }
            (CallState::Held, CallTransition::Resume) => {
                self.held = false;
                CallState::Active
            }
            (current, CallTransition::Terminated { cause }) if !current.is_terminal() => {
                self.held = false;
                self.end_cause = Some(cause);
                self.ended_at = Some(Utc::now());
                CallState::Done
            }
            (current, transition) => {
                return Err(InvalidTransition::new(current, format!("{transition:?}")));
            }
        };
        self.state = new_state;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub current_state: CallState,
    pub attempted: String,
}

impl InvalidTransition {
    pub fn new(current_state: CallState, attempted: impl Into<String>) -> Self {
        Self {
            current_state,
            attempted: attempted.into(),
        }
    }
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}
