//! Tracks the calls of one session and the `current`/`previous` call-waiting slots.
//!
//! Every operation here is synchronous. Local actions queue exactly one outbound frame through
//! the [`OutboundSink`] before any state changes; if queueing fails nothing is mutated.

use super::error::CallError;
use super::state::{Call, CallTransition, InvalidTransition};
use crate::socket::{PendingReply, SignalingSocket, SocketError};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use vertocore::protocol::{
    ByeParams, CallDialogParams, CallParams, InfoParams, InviteResult, ModifyAction, ModifyParams,
    ModifyResult, ReceivedMessage, SignalingMessage, SocketMethod,
};
use vertocore::types::call::{AudioDevice, CallId, CallState, CauseCode};
use vertocore::types::events::CallStateChanged;

/// Call-waiting, not call-queueing: at most this many live calls are tracked at once.
pub const MAX_TRACKED_CALLS: usize = 2;

/// Where the registry's outbound frames go.
pub trait OutboundSink: Send + Sync {
    fn enqueue(&self, message: &SignalingMessage) -> Result<PendingReply, SocketError>;
}

impl OutboundSink for SignalingSocket {
    fn enqueue(&self, message: &SignalingMessage) -> Result<PendingReply, SocketError> {
        SignalingSocket::enqueue(self, message)
    }
}

/// Parameters for a new outbound call.
#[derive(Debug, Clone, Default)]
pub struct OutboundInvite {
    pub caller_id_name: String,
    pub caller_id_number: String,
    pub destination_number: String,
    pub client_state: String,
    /// Local session description, passed through untouched.
    pub sdp: String,
}

/// A freshly placed call and the handle on the server's acknowledgment.
pub struct PlacedCall {
    pub call_id: CallId,
    pub reply: PendingReply,
}

pub struct SessionRegistry {
    calls: HashMap<CallId, Call>,
    /// Ids of calls cleaned up during this session. They are never tracked again.
    retired: HashSet<CallId>,
    current: Option<CallId>,
    previous: Option<CallId>,
    session_id: String,
    user_agent: String,
    audio_device: AudioDevice,
    outbound: Arc<dyn OutboundSink>,
}

fn changed(call: &Call) -> CallStateChanged {
    CallStateChanged {
        call_id: call.call_id.clone(),
        state: call.state,
    }
}

impl SessionRegistry {
    pub fn new(outbound: Arc<dyn OutboundSink>, user_agent: impl Into<String>) -> Self {
        Self {
            calls: HashMap::new(),
            retired: HashSet::new(),
            current: None,
            previous: None,
            session_id: String::new(),
            user_agent: user_agent.into(),
            audio_device: AudioDevice::default(),
            outbound,
        }
    }

    /// Binds the registry to a session. A different session starts with a clean set of ids.
    pub fn set_session_id(&mut self, session_id: impl Into<String>) {
        let session_id = session_id.into();
        if session_id != self.session_id {
            self.retired.clear();
        }
        self.session_id = session_id;
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn call(&self, call_id: &CallId) -> Option<&Call> {
        self.calls.get(call_id)
    }

    pub fn current_call(&self) -> Option<&Call> {
        self.current.as_ref().and_then(|id| self.calls.get(id))
    }

    pub fn previous_call(&self) -> Option<&Call> {
        self.previous.as_ref().and_then(|id| self.calls.get(id))
    }

    /// Calls that have not ended yet.
    pub fn active_calls(&self) -> Vec<&Call> {
        self.calls.values().filter(|c| !c.is_ended()).collect()
    }

    /// Number of calls held in the registry, ended ones included.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn audio_device(&self) -> AudioDevice {
        self.audio_device
    }

    /// True iff some call is past `New` and not yet `Done`.
    pub fn has_ongoing_call(&self) -> bool {
        self.calls.values().any(|c| c.state.is_ongoing())
    }

    /// Removes ended calls. Returns how many were dropped.
    pub fn cleanup_ended_calls(&mut self) -> usize {
        let before = self.calls.len();
        let retired = &mut self.retired;
        self.calls.retain(|call_id, call| {
            if call.is_ended() {
                retired.insert(call_id.clone());
                false
            } else {
                true
            }
        });
        let removed = before - self.calls.len();
        if removed > 0 {
            debug!(target: "Client/Calls", "Cleaned up {removed} ended calls");
        }
        removed
    }

    fn live_count(&self) -> usize {
        self.calls.values().filter(|c| !c.is_ended()).count()
    }

    fn get_mut(&mut self, call_id: &CallId) -> Result<&mut Call, CallError> {
        self.calls
            .get_mut(call_id)
            .ok_or_else(|| CallError::NotFound(call_id.clone()))
    }

    fn dialog_params(&self, call: &Call) -> CallDialogParams {
        let mut params = CallDialogParams::new(call.call_id.clone());
        params.caller_id_name = call.caller_id_name.clone();
        params.caller_id_number = call.caller_id_number.clone();
        params.client_state = call.client_state.clone();
        params.destination_number = call.destination_number.clone();
        params
    }

    fn send_bye(&self, call_id: &CallId, cause: CauseCode) -> Result<(), SocketError> {
        let message = SignalingMessage::new(
            SocketMethod::Bye,
            ByeParams::new(self.session_id.clone(), call_id.clone(), cause),
        );
        self.outbound.enqueue(&message).map(drop)
    }

    /// Makes `call_id` current, moving the old current call (if any) to `previous`.
    fn select_current(&mut self, call_id: &CallId) {
        if self.current.as_ref() == Some(call_id) {
            return;
        }
        let old = self.current.replace(call_id.clone());
        self.previous = old;
    }

    /// Frees the slot held by an ended call, promoting `previous` when `current` ends.
    fn release_slots(&mut self, call_id: &CallId) {
        if self.current.as_ref() == Some(call_id) {
            self.current = self.previous.take();
        } else if self.previous.as_ref() == Some(call_id) {
            self.previous = None;
        }

        if self.current.is_none() {
            // A ringing call that was never selected becomes the one the user sees.
            self.current = self
                .calls
                .values()
                .find(|c| !c.is_ended() && self.previous.as_ref() != Some(&c.call_id))
                .map(|c| c.call_id.clone());
        }
    }

    /// Creates an outbound call in `Connecting`, makes it current and queues the invite.
    pub fn place_invite(&mut self, invite: OutboundInvite) -> Result<PlacedCall, CallError> {
        self.cleanup_ended_calls();
        if self.live_count() >= MAX_TRACKED_CALLS {
            return Err(CallError::Capacity {
                limit: MAX_TRACKED_CALLS,
            });
        }

        let mut call = Call::new_outbound(
            CallId::generate(),
            self.session_id.clone(),
            invite.caller_id_name,
            invite.caller_id_number,
            invite.destination_number,
            invite.client_state,
        );
        call.local_sdp = Some(invite.sdp.clone());

        let message = SignalingMessage::new(
            SocketMethod::Invite,
            CallParams {
                sessid: self.session_id.clone(),
                sdp: invite.sdp,
                user_agent: self.user_agent.clone(),
                dialog_params: self.dialog_params(&call),
            },
        );
        let reply = self.outbound.enqueue(&message)?;
        call.apply_transition(CallTransition::InviteSent)?;

        let call_id = call.call_id.clone();
        info!(target: "Client/Calls", "Placed call {call_id} to {}", call.destination_number);
        self.calls.insert(call_id.clone(), call);
        self.select_current(&call_id);
        Ok(PlacedCall { call_id, reply })
    }

    /// Tracks an inbound invite as a `Ringing` call.
    ///
    /// The call only becomes current when nothing else is; otherwise it waits for an explicit
    /// [`accept`](Self::accept) or [`set_current_call`](Self::set_current_call). Over capacity the
    /// invite is refused on the wire with `USER_BUSY`.
    pub fn on_inbound_invite(&mut self, invite: &InviteResult) -> Result<CallId, CallError> {
        let call_id = invite.call_id.clone();
        if self.calls.contains_key(&call_id) || self.retired.contains(&call_id) {
            return Err(CallError::AlreadyExists(call_id));
        }
        self.cleanup_ended_calls();
        if self.live_count() >= MAX_TRACKED_CALLS {
            warn!(
                target: "Client/Calls",
                "Refusing invite {call_id}: already tracking {MAX_TRACKED_CALLS} calls"
            );
            if let Err(e) = self.send_bye(&call_id, CauseCode::UserBusy) {
                warn!(target: "Client/Calls", "Failed to refuse invite {call_id}: {e}");
            }
            return Err(CallError::Capacity {
                limit: MAX_TRACKED_CALLS,
            });
        }

        let mut call = Call::new_inbound(self.session_id.clone(), invite);
        call.apply_transition(CallTransition::InviteReceived)?;
        info!(
            target: "Client/Calls",
            "Incoming call {call_id} from {} <{}>", call.caller_id_name, call.caller_id_number
        );
        self.calls.insert(call_id.clone(), call);
        if self.current.is_none() {
            self.current = Some(call_id.clone());
        }
        Ok(call_id)
    }

    /// Answers a ringing call and makes it current.
    ///
    /// Accepting a call that this client already accepted is a no-op and yields `None`.
    pub fn accept(
        &mut self,
        call_id: &CallId,
        destination_number: &str,
    ) -> Result<Option<CallStateChanged>, CallError> {
        let call = self.get_mut(call_id)?;
        if call.state == CallState::Active && call.accepted_locally {
            debug!(target: "Client/Calls", "Call {call_id} already accepted");
            return Ok(None);
        }
        if call.state != CallState::Ringing {
            return Err(InvalidTransition::new(call.state, "accept").into());
        }

        let call = &self.calls[call_id];
        let mut dialog_params = self.dialog_params(call);
        dialog_params.destination_number = destination_number.to_string();
        let message = SignalingMessage::new(
            SocketMethod::Answer,
            CallParams {
                sessid: self.session_id.clone(),
                sdp: call.local_sdp.clone().unwrap_or_default(),
                user_agent: self.user_agent.clone(),
                dialog_params,
            },
        );
        self.outbound.enqueue(&message)?;

        let call = self.get_mut(call_id)?;
        call.destination_number = destination_number.to_string();
        call.apply_transition(CallTransition::LocalAccepted)?;
        let change = changed(call);
        self.select_current(call_id);
        info!(target: "Client/Calls", "Accepted call {call_id}");
        Ok(Some(change))
    }

    /// Declines a ringing call with `USER_BUSY`.
    pub fn reject(&mut self, call_id: &CallId) -> Result<CallStateChanged, CallError> {
        let call = self.get_mut(call_id)?;
        if call.state != CallState::Ringing {
            return Err(InvalidTransition::new(call.state, "reject").into());
        }
        self.terminate(call_id, CauseCode::UserBusy)
    }

    /// Hangs up with `NORMAL_CLEARING`.
    pub fn end(&mut self, call_id: &CallId) -> Result<CallStateChanged, CallError> {
        self.terminate(call_id, CauseCode::NormalClearing)
    }

    /// Sends a bye with `cause` and moves the call to `Done`.
    pub fn terminate(
        &mut self,
        call_id: &CallId,
        cause: CauseCode,
    ) -> Result<CallStateChanged, CallError> {
        let call = self.get_mut(call_id)?;
        if call.is_ended() {
            return Err(InvalidTransition::new(call.state, "end").into());
        }
        self.send_bye(call_id, cause)?;
        info!(target: "Client/Calls", "Ending call {call_id} ({})", cause.name());
        self.finish(call_id, cause)
    }

    /// Moves a call to `Done` without telling the server.
    pub fn fail_call(
        &mut self,
        call_id: &CallId,
        cause: CauseCode,
    ) -> Result<CallStateChanged, CallError> {
        self.finish(call_id, cause)
    }

    fn finish(&mut self, call_id: &CallId, cause: CauseCode) -> Result<CallStateChanged, CallError> {
        let call = self.get_mut(call_id)?;
        call.apply_transition(CallTransition::Terminated { cause })?;
        let change = changed(call);
        self.release_slots(call_id);
        Ok(change)
    }

    /// Puts a call on hold or resumes it. Asking for the state the call is already in is a no-op.
    pub fn set_hold(
        &mut self,
        call_id: &CallId,
        held: bool,
    ) -> Result<Option<CallStateChanged>, CallError> {
        let call = self.get_mut(call_id)?;
        let (action, transition) = match (call.state, held) {
            (CallState::Held, true) | (CallState::Active, false) => return Ok(None),
            (CallState::Active, true) => (ModifyAction::Hold, CallTransition::Hold),
            (CallState::Held, false) => (ModifyAction::Unhold, CallTransition::Resume),
            (state, _) => {
                return Err(InvalidTransition::new(state, if held { "hold" } else { "unhold" }).into());
            }
        };

        let call = &self.calls[call_id];
        let message = SignalingMessage::new(
            SocketMethod::Modify,
            ModifyParams {
                sessid: self.session_id.clone(),
                action,
                dialog_params: self.dialog_params(call),
            },
        );
        self.outbound.enqueue(&message)?;

        let call = self.get_mut(call_id)?;
        call.apply_transition(transition)?;
        Ok(Some(changed(call)))
    }

    /// Mutes or unmutes the current call. Never touches the wire.
    pub fn set_mute(&mut self, muted: bool) -> Result<CallId, CallError> {
        let call_id = self.current.clone().ok_or(CallError::NoCurrentCall)?;
        let call = self.get_mut(&call_id)?;
        call.muted = muted;
        debug!(target: "Client/Calls", "Call {call_id} muted={muted}");
        Ok(call_id)
    }

    /// Switches the session's audio route. Never touches the wire.
    pub fn set_audio_output(&mut self, device: AudioDevice) {
        self.audio_device = device;
        if let Some(call_id) = self.current.clone()
            && let Some(call) = self.calls.get_mut(&call_id)
        {
            call.speaker_active = device == AudioDevice::Speaker;
        }
        debug!(target: "Client/Calls", "Audio output set to {device:?}");
    }

    /// Attaches the local session description an inbound call will be answered with.
    pub fn set_local_sdp(&mut self, call_id: &CallId, sdp: impl Into<String>) -> Result<(), CallError> {
        self.get_mut(call_id)?.local_sdp = Some(sdp.into());
        Ok(())
    }

    /// Sends DTMF digits on an established call.
    pub fn send_dtmf(&mut self, call_id: &CallId, digits: &str) -> Result<(), CallError> {
        if digits.is_empty()
            || !digits
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '*' | '#' | 'A'..='D'))
        {
            return Err(CallError::InvalidDtmf(digits.to_string()));
        }
        let call = self.get_mut(call_id)?;
        if !matches!(call.state, CallState::Active | CallState::Held) {
            return Err(InvalidTransition::new(call.state, "dtmf").into());
        }

        let call = &self.calls[call_id];
        let message = SignalingMessage::new(
            SocketMethod::Info,
            InfoParams {
                sessid: self.session_id.clone(),
                dtmf: digits.to_string(),
                dialog_params: self.dialog_params(call),
            },
        );
        self.outbound.enqueue(&message)?;
        Ok(())
    }

    /// The explicit local decision to bring a waiting call to the foreground.
    pub fn set_current_call(&mut self, call_id: &CallId) -> Result<(), CallError> {
        let call = self.get_mut(call_id)?;
        if call.is_ended() {
            return Err(InvalidTransition::new(call.state, "select").into());
        }
        self.select_current(call_id);
        Ok(())
    }

    /// Applies a server-initiated event to the matching call.
    ///
    /// Returns the resulting state change, if the event caused one. Methods that carry no
    /// call-state meaning are ignored.
    pub fn on_inbound_event(
        &mut self,
        message: &ReceivedMessage,
    ) -> Result<Option<CallStateChanged>, CallError> {
        match message {
            ReceivedMessage::Answer(answer) => {
                let call = self.get_mut(&answer.call_id)?;
                match call.state {
                    CallState::Active | CallState::Held => Ok(None),
                    _ => {
                        call.apply_transition(CallTransition::RemoteAnswered)?;
                        if !answer.sdp.is_empty() {
                            call.remote_sdp = Some(answer.sdp.clone());
                        }
                        info!(target: "Client/Calls", "Call {} answered", answer.call_id);
                        Ok(Some(changed(call)))
                    }
                }
            }
            ReceivedMessage::Bye(bye) => {
                let call = self.get_mut(&bye.call_id)?;
                if call.is_ended() {
                    return Ok(None);
                }
                let cause = bye
                    .cause_code
                    .and_then(CauseCode::from_code)
                    .unwrap_or(CauseCode::NormalClearing);
                info!(target: "Client/Calls", "Call {} hung up by remote ({})", bye.call_id, cause.name());
                self.finish(&bye.call_id, cause).map(Some)
            }
            ReceivedMessage::Media(media) => {
                let call = self.get_mut(&media.call_id)?;
                call.remote_sdp = Some(media.sdp.clone());
                Ok(None)
            }
            ReceivedMessage::Ringing(ringing) => {
                self.get_mut(&ringing.call_id)?;
                Ok(None)
            }
            ReceivedMessage::Modify(modify) => self.on_modify_ack(modify),
            other => {
                debug!(target: "Client/Calls", "Ignoring {} for call state", other.method());
                Ok(None)
            }
        }
    }

    /// Reconciles a call's hold state with what the server reports.
    pub fn on_modify_ack(
        &mut self,
        modify: &ModifyResult,
    ) -> Result<Option<CallStateChanged>, CallError> {
        let call = self.get_mut(&modify.call_id)?;
        let transition = match (modify.is_held(), call.state) {
            (Some(true), CallState::Active) => CallTransition::Hold,
            (Some(false), CallState::Held) => CallTransition::Resume,
            _ => return Ok(None),
        };
        warn!(
            target: "Client/Calls",
            "Server hold state for {} disagrees with local state {}", modify.call_id, call.state
        );
        call.apply_transition(transition)?;
        Ok(Some(changed(call)))
    }

    /// Marks every live call `Done` and clears both slots. Nothing is sent.
    pub fn disconnect_all(&mut self) -> Vec<CallStateChanged> {
        let mut changes = Vec::new();
        for call in self.calls.values_mut().filter(|c| !c.is_ended()) {
            if call
                .apply_transition(CallTransition::Terminated {
                    cause: CauseCode::NormalClearing,
                })
                .is_ok()
            {
                changes.push(changed(call));
            }
        }
        self.current = None;
        self.previous = None;
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use vertocore::protocol::{AnswerResult, ByeResult, MediaResult};

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<SignalingMessage>>,
        fail: Mutex<bool>,
    }

    impl RecordingSink {
        fn methods(&self) -> Vec<SocketMethod> {
            self.sent.lock().unwrap().iter().map(|m| m.method).collect()
        }

        fn last_json(&self) -> serde_json::Value {
            let sent = self.sent.lock().unwrap();
            serde_json::to_value(sent.last().unwrap()).unwrap()
        }
    }

    impl OutboundSink for RecordingSink {
        fn enqueue(&self, message: &SignalingMessage) -> Result<PendingReply, SocketError> {
            if *self.fail.lock().unwrap() {
                return Err(SocketError::NotConnected);
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(PendingReply::detached(message))
        }
    }

    fn registry() -> (SessionRegistry, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let mut registry = SessionRegistry::new(sink.clone(), "verto-rust-test");
        registry.set_session_id("sess-1");
        (registry, sink)
    }

    fn invite(id: &str) -> InviteResult {
        InviteResult {
            call_id: CallId::new(id),
            caller_id_name: "Oliver".into(),
            caller_id_number: "+35387711111".into(),
            sdp: "v=0".into(),
            telnyx_session_id: None,
            telnyx_leg_id: None,
        }
    }

    fn answer(id: &str) -> ReceivedMessage {
        ReceivedMessage::Answer(AnswerResult {
            call_id: CallId::new(id),
            sdp: "v=0 answer".into(),
        })
    }

    fn bye(id: &CallId) -> ReceivedMessage {
        ReceivedMessage::Bye(ByeResult {
            call_id: id.clone(),
            cause_code: Some(16),
            cause: Some("NORMAL_CLEARING".into()),
        })
    }

    #[test]
    fn test_inbound_invite_rings_without_sending() {
        let (mut registry, sink) = registry();
        let id = registry.on_inbound_invite(&invite("a")).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.call(&id).unwrap().state, CallState::Ringing);
        assert_eq!(registry.current_call().unwrap().call_id, id);
        assert!(sink.methods().is_empty());
        assert!(registry.has_ongoing_call());
    }

    #[test]
    fn test_accept_requires_ringing() {
        let (mut registry, sink) = registry();
        let placed = registry.place_invite(OutboundInvite::default()).unwrap();

        let err = registry.accept(&placed.call_id, "").unwrap_err();
        assert!(matches!(err, CallError::InvalidTransition(_)));
        assert_eq!(
            registry.call(&placed.call_id).unwrap().state,
            CallState::Connecting
        );
        assert_eq!(sink.methods(), vec![SocketMethod::Invite]);
    }

    #[test]
    fn test_accept_is_idempotent() {
        let (mut registry, sink) = registry();
        let id = registry.on_inbound_invite(&invite("a")).unwrap();

        let first = registry.accept(&id, "+15550002222").unwrap();
        let second = registry.accept(&id, "+15550002222").unwrap();
        assert_eq!(first.unwrap().state, CallState::Active);
        assert_eq!(second, None);
        assert_eq!(registry.call(&id).unwrap().state, CallState::Active);
        assert_eq!(sink.methods(), vec![SocketMethod::Answer]);
        assert_eq!(
            sink.last_json()["params"]["dialogParams"]["destination_number"],
            "+15550002222"
        );
    }

    #[test]
    fn test_failed_send_does_not_mutate() {
        let (mut registry, sink) = registry();
        let id = registry.on_inbound_invite(&invite("a")).unwrap();
        *sink.fail.lock().unwrap() = true;

        assert!(matches!(
            registry.accept(&id, ""),
            Err(CallError::Socket(SocketError::NotConnected))
        ));
        assert_eq!(registry.call(&id).unwrap().state, CallState::Ringing);
        assert!(matches!(
            registry.place_invite(OutboundInvite::default()),
            Err(CallError::Socket(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ending_current_promotes_previous() {
        let (mut registry, _) = registry();
        let a = registry.on_inbound_invite(&invite("a")).unwrap();
        registry.accept(&a, "").unwrap();
        let b = registry.on_inbound_invite(&invite("b")).unwrap();

        // The waiting call only becomes current on an explicit decision.
        assert_eq!(registry.current_call().unwrap().call_id, a);
        registry.accept(&b, "").unwrap();
        assert_eq!(registry.current_call().unwrap().call_id, b);
        assert_eq!(registry.previous_call().unwrap().call_id, a);

        registry.end(&b).unwrap();
        assert_eq!(registry.current_call().unwrap().call_id, a);
        assert!(registry.previous_call().is_none());

        registry.end(&a).unwrap();
        assert!(registry.current_call().is_none());
        assert!(!registry.has_ongoing_call());
        assert!(matches!(
            registry.end(&a),
            Err(CallError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_third_invite_is_refused() {
        let (mut registry, sink) = registry();
        registry.on_inbound_invite(&invite("a")).unwrap();
        registry.on_inbound_invite(&invite("b")).unwrap();

        let err = registry.on_inbound_invite(&invite("c")).unwrap_err();
        assert!(matches!(err, CallError::Capacity { limit: 2 }));
        assert_eq!(registry.len(), 2);
        assert!(registry.call(&CallId::new("c")).is_none());

        assert_eq!(sink.methods(), vec![SocketMethod::Bye]);
        let bye = sink.last_json();
        assert_eq!(bye["params"]["causeCode"], 17);
        assert_eq!(bye["params"]["dialogParams"]["callID"], "c");

        assert!(matches!(
            registry.place_invite(OutboundInvite::default()),
            Err(CallError::Capacity { .. })
        ));
    }

    #[test]
    fn test_ended_calls_free_capacity() {
        let (mut registry, _) = registry();
        let a = registry.on_inbound_invite(&invite("a")).unwrap();
        registry.on_inbound_invite(&invite("b")).unwrap();
        registry.reject(&a).unwrap();

        assert_eq!(registry.call(&a).unwrap().state, CallState::Done);
        registry.on_inbound_invite(&invite("c")).unwrap();
        assert!(registry.call(&a).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_cleaned_up_id_is_not_tracked_again() {
        let (mut registry, sink) = registry();
        let a = registry.on_inbound_invite(&invite("a")).unwrap();
        registry.reject(&a).unwrap();
        registry.on_inbound_invite(&invite("b")).unwrap();
        assert!(registry.call(&a).is_none());

        let err = registry.on_inbound_invite(&invite("a")).unwrap_err();
        assert!(matches!(err, CallError::AlreadyExists(id) if id == a));
        assert_eq!(registry.len(), 1);
        assert_eq!(sink.methods(), vec![SocketMethod::Bye]);

        registry.set_session_id("sess-2");
        registry.on_inbound_invite(&invite("a")).unwrap();
        assert_eq!(registry.call(&a).unwrap().state, CallState::Ringing);
    }

    #[test]
    fn test_unknown_call_ids_are_not_found() {
        let (mut registry, sink) = registry();
        let a = registry.on_inbound_invite(&invite("a")).unwrap();
        let ghost = CallId::new("ghost");

        assert!(matches!(registry.accept(&ghost, ""), Err(CallError::NotFound(_))));
        assert!(matches!(registry.end(&ghost), Err(CallError::NotFound(_))));
        assert!(matches!(registry.set_hold(&ghost, true), Err(CallError::NotFound(_))));
        assert!(matches!(
            registry.on_inbound_event(&answer("ghost")),
            Err(CallError::NotFound(_))
        ));
        assert_eq!(registry.call(&a).unwrap().state, CallState::Ringing);
        assert!(sink.methods().is_empty());
    }

    #[test]
    fn test_outbound_answer_then_bye() {
        let (mut registry, sink) = registry();
        let placed = registry
            .place_invite(OutboundInvite {
                caller_id_name: "Alice".into(),
                caller_id_number: "+15550001111".into(),
                destination_number: "+15550002222".into(),
                client_state: "c3RhdGU=".into(),
                sdp: "v=0 offer".into(),
            })
            .unwrap();
        let id = placed.call_id.clone();
        assert_eq!(placed.reply.method(), SocketMethod::Invite);

        let invite = sink.last_json();
        assert_eq!(invite["params"]["sessid"], "sess-1");
        assert_eq!(invite["params"]["sdp"], "v=0 offer");
        assert_eq!(invite["params"]["User-Agent"], "verto-rust-test");
        assert_eq!(invite["params"]["dialogParams"]["callID"], id.as_str());
        assert_eq!(invite["params"]["dialogParams"]["clientState"], "c3RhdGU=");

        let change = registry
            .on_inbound_event(&answer(id.as_str()))
            .unwrap()
            .unwrap();
        assert_eq!(change.state, CallState::Active);
        assert_eq!(
            registry.call(&id).unwrap().remote_sdp.as_deref(),
            Some("v=0 answer")
        );

        let change = registry.on_inbound_event(&bye(&id)).unwrap().unwrap();
        assert_eq!(change.state, CallState::Done);
        assert!(registry.current_call().is_none());
        assert_eq!(registry.on_inbound_event(&bye(&id)).unwrap(), None);
        assert_eq!(sink.methods(), vec![SocketMethod::Invite]);
    }

    #[test]
    fn test_hold_and_modify_reconciliation() {
        let (mut registry, sink) = registry();
        let id = registry.on_inbound_invite(&invite("a")).unwrap();
        assert!(registry.set_hold(&id, true).is_err());
        registry.accept(&id, "").unwrap();

        assert_eq!(
            registry.set_hold(&id, true).unwrap().unwrap().state,
            CallState::Held
        );
        assert_eq!(registry.set_hold(&id, true).unwrap(), None);
        assert_eq!(sink.last_json()["params"]["action"], "hold");

        let ack = ModifyResult {
            call_id: id.clone(),
            action: Some("hold".into()),
            hold_state: Some("active".into()),
        };
        let change = registry.on_modify_ack(&ack).unwrap().unwrap();
        assert_eq!(change.state, CallState::Active);
        assert!(!registry.call(&id).unwrap().held);

        assert_eq!(registry.set_hold(&id, false).unwrap(), None);
        assert_eq!(registry.call(&id).unwrap().state, CallState::Active);
        assert_eq!(
            sink.methods(),
            vec![SocketMethod::Answer, SocketMethod::Modify]
        );
    }

    #[test]
    fn test_mute_and_audio_output_stay_local() {
        let (mut registry, sink) = registry();
        assert!(matches!(registry.set_mute(true), Err(CallError::NoCurrentCall)));

        let id = registry.on_inbound_invite(&invite("a")).unwrap();
        assert_eq!(registry.set_mute(true).unwrap(), id);
        registry.set_audio_output(AudioDevice::Speaker);

        let call = registry.call(&id).unwrap();
        assert!(call.muted);
        assert!(call.speaker_active);
        assert_eq!(registry.audio_device(), AudioDevice::Speaker);
        assert!(sink.methods().is_empty());
    }

    #[test]
    fn test_dtmf_validation() {
        let (mut registry, sink) = registry();
        let id = registry.on_inbound_invite(&invite("a")).unwrap();
        assert!(matches!(
            registry.send_dtmf(&id, "1"),
            Err(CallError::InvalidTransition(_))
        ));
        registry.accept(&id, "").unwrap();
        assert!(matches!(
            registry.send_dtmf(&id, "12x"),
            Err(CallError::InvalidDtmf(_))
        ));
        registry.send_dtmf(&id, "1#*A").unwrap();
        assert_eq!(sink.last_json()["params"]["dtmf"], "1#*A");
    }

    #[test]
    fn test_set_current_call_swaps_slots() {
        let (mut registry, _) = registry();
        let a = registry.on_inbound_invite(&invite("a")).unwrap();
        let b = registry.on_inbound_invite(&invite("b")).unwrap();

        registry.set_current_call(&b).unwrap();
        assert_eq!(registry.current_call().unwrap().call_id, b);
        assert_eq!(registry.previous_call().unwrap().call_id, a);

        registry.set_current_call(&a).unwrap();
        assert_eq!(registry.current_call().unwrap().call_id, a);
        assert_eq!(registry.previous_call().unwrap().call_id, b);
    }

    #[test]
    fn test_ending_unselected_ringing_call_keeps_current() {
        let (mut registry, _) = registry();
        let a = registry.on_inbound_invite(&invite("a")).unwrap();
        registry.accept(&a, "").unwrap();
        let b = registry.on_inbound_invite(&invite("b")).unwrap();

        registry.reject(&b).unwrap();
        assert_eq!(registry.current_call().unwrap().call_id, a);
        assert_eq!(registry.call(&a).unwrap().state, CallState::Active);
    }

    #[test]
    fn test_ending_current_surfaces_waiting_call() {
        let (mut registry, _) = registry();
        let a = registry.on_inbound_invite(&invite("a")).unwrap();
        let b = registry.on_inbound_invite(&invite("b")).unwrap();

        registry.reject(&a).unwrap();
        assert_eq!(registry.current_call().unwrap().call_id, b);
    }

    #[test]
    fn test_media_and_ringing_do_not_change_state() {
        let (mut registry, _) = registry();
        let placed = registry.place_invite(OutboundInvite::default()).unwrap();
        let media = ReceivedMessage::Media(MediaResult {
            call_id: placed.call_id.clone(),
            sdp: "v=0 early".into(),
        });
        assert_eq!(registry.on_inbound_event(&media).unwrap(), None);
        let call = registry.call(&placed.call_id).unwrap();
        assert_eq!(call.state, CallState::Connecting);
        assert_eq!(call.remote_sdp.as_deref(), Some("v=0 early"));
        assert_eq!(
            registry
                .on_inbound_event(&ReceivedMessage::ClientReady)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_disconnect_all_ends_everything_silently() {
        let (mut registry, sink) = registry();
        let a = registry.on_inbound_invite(&invite("a")).unwrap();
        registry.accept(&a, "").unwrap();
        registry.on_inbound_invite(&invite("b")).unwrap();
        sink.sent.lock().unwrap().clear();

        let changes = registry.disconnect_all();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.state == CallState::Done));
        assert!(registry.current_call().is_none());
        assert!(registry.previous_call().is_none());
        assert!(!registry.has_ongoing_call());
        assert!(sink.methods().is_empty());
        assert!(registry.disconnect_all().is_empty());
        assert_eq!(registry.cleanup_ended_calls(), 2);
        assert!(registry.is_empty());
    }
}
