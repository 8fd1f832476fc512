use crate::calls::{Call, CallBridge, CallError, OutboundInvite, SessionRegistry};
use crate::config::ClientConfig;
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::login::{LoginError, LoginManager};
use crate::push::{PushResume, PushResumeError};
use crate::socket::{MessageStream, Session, SignalingSocket, SocketError};
use crate::transport::{TokioWebSocketTransportFactory, TransportFactory};
use crate::types::events::{CallRefused, CallStateChanged, Disconnected, Event, EventBus};
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use vertocore::protocol::{AckMessage, Inbound, ReceivedMessage, SocketMethod};
use vertocore::types::call::{AudioDevice, CallId, CallState, CauseCode};
use vertocore::types::config::LoginConfig;
use vertocore::types::push::{PushAction, PushMetaData};

/// Outcome of one reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconnect {
    Done,
    Failed,
    /// Another attempt already owns the connection.
    InProgress,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Login(#[from] LoginError),
    #[error(transparent)]
    Call(#[from] CallError),
    #[error(transparent)]
    PushResume(#[from] PushResumeError),
}

/// The signaling client: one socket, one session, up to two tracked calls.
pub struct Client {
    config: ClientConfig,
    socket: Arc<SignalingSocket>,
    login: LoginManager,
    registry: Mutex<SessionRegistry>,
    events: EventBus,
    connectivity: Arc<ConnectivityMonitor>,
    bridge: RwLock<Option<Arc<dyn CallBridge>>>,

    /// Bumped for every new connection and every intentional disconnect, so a read loop can
    /// tell whether it still owns the connection it was started for.
    generation: AtomicU64,
    expected_disconnect: AtomicBool,
    is_reconnecting: AtomicBool,
    watching_connectivity: AtomicBool,
}

impl Client {
    pub fn new(config: ClientConfig) -> Arc<Self> {
        Self::with_transport_factory(config, Arc::new(TokioWebSocketTransportFactory::new()))
    }

    pub fn with_transport_factory(
        config: ClientConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Arc<Self> {
        Self::with_parts(config, factory, Arc::new(ConnectivityMonitor::new()))
    }

    pub fn with_parts(
        config: ClientConfig,
        factory: Arc<dyn TransportFactory>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Arc<Self> {
        let socket = Arc::new(SignalingSocket::new(factory, config.use_tls));
        let events = EventBus::with_capacity(config.event_capacity);
        let login = LoginManager::new(socket.clone(), events.clone(), config.login_timeout);
        let registry = SessionRegistry::new(socket.clone(), config.user_agent.clone());
        Arc::new(Self {
            config,
            socket,
            login,
            registry: Mutex::new(registry),
            events,
            connectivity,
            bridge: RwLock::new(None),
            generation: AtomicU64::new(0),
            expected_disconnect: AtomicBool::new(false),
            is_reconnecting: AtomicBool::new(false),
            watching_connectivity: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn set_call_bridge(&self, bridge: Arc<dyn CallBridge>) {
        *self.bridge.write().unwrap_or_else(PoisonError::into_inner) = Some(bridge);
    }

    fn bridge(&self) -> Option<Arc<dyn CallBridge>> {
        self.bridge
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }

    pub fn is_call_ongoing(&self) -> bool {
        self.socket.is_call_ongoing()
    }

    pub fn session(&self) -> Result<Session, SocketError> {
        self.socket.current_session()
    }

    /// Opens the socket to the configured endpoint and starts processing inbound frames.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        self.expected_disconnect.store(false, Ordering::SeqCst);
        // Retire any loop still reading from a connection this call replaces.
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.events.dispatch(Event::Loading);

        let stream = match self
            .socket
            .connect(&self.config.host, self.config.port)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                self.events.dispatch(Event::Error(e.to_string()));
                return Err(e.into());
            }
        };
        self.watch_connectivity();
        self.spawn_read_loop(stream);
        Ok(())
    }

    /// Closes the socket and ends every call locally. Always safe to call.
    pub async fn disconnect(&self) {
        info!(target: "Client", "Disconnecting client intentionally.");
        self.expected_disconnect.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        let was_connected = self.socket.is_connected();

        for change in self.with_registry(|r| r.disconnect_all()).await {
            self.publish_change(change);
        }
        self.socket.disconnect().await;
        self.connectivity.stop();
        self.watching_connectivity.store(false, Ordering::SeqCst);

        if was_connected {
            self.events
                .dispatch(Event::Disconnected(Disconnected { expected: true }));
        }
    }

    pub async fn login(&self, config: &LoginConfig) -> Result<String, ClientError> {
        let session_id = self.login.login(config).await?;
        self.registry.lock().await.set_session_id(session_id.clone());
        Ok(session_id)
    }

    pub async fn disable_push_notification(&self) -> Result<(), ClientError> {
        Ok(self.login.disable_push_notification().await?)
    }

    pub fn attach_calls(&self) -> Result<(), ClientError> {
        Ok(self.login.attach_calls(self.config.push_environment)?)
    }

    /// Cold-start path: logs in and applies `action` to the call announced by a push.
    pub async fn handle_push(
        self: &Arc<Self>,
        metadata: PushMetaData,
        action: PushAction,
        login: &LoginConfig,
    ) -> Result<CallId, ClientError> {
        PushResume::new(metadata, action, self.config.push_resume_timeout)
            .run(self, login)
            .await
            .map_err(ClientError::from)
    }

    /// Places a call and waits for the server to acknowledge the invite.
    pub async fn place_invite(&self, invite: OutboundInvite) -> Result<CallId, ClientError> {
        if !self.login.is_authenticated() {
            return Err(LoginError::NotLoggedIn.into());
        }
        let placed = self.with_registry(|r| r.place_invite(invite)).await?;
        let call_id = placed.call_id;
        debug!(target: "Client/Calls", "Invite {call_id} sent as request {}", placed.reply.id());
        self.publish_change(CallStateChanged {
            call_id: call_id.clone(),
            state: CallState::Connecting,
        });

        match placed.reply.wait(self.config.invite_timeout).await {
            Ok(_) => Ok(call_id),
            Err(SocketError::Timeout { .. }) => {
                warn!(target: "Client/Calls", "Invite {call_id} was not acknowledged, ending it");
                if let Ok(change) = self
                    .with_registry(|r| r.terminate(&call_id, CauseCode::RecoveryOnTimerExpire))
                    .await
                {
                    self.publish_change(change);
                }
                Err(CallError::Timeout { call_id }.into())
            }
            Err(e) => {
                warn!(target: "Client/Calls", "Invite {call_id} failed: {e}");
                if let Ok(change) = self
                    .with_registry(|r| r.fail_call(&call_id, CauseCode::CallRejected))
                    .await
                {
                    self.publish_change(change);
                }
                Err(CallError::Socket(e).into())
            }
        }
    }

    pub async fn accept(&self, call_id: &CallId, destination_number: &str) -> Result<(), ClientError> {
        if let Some(change) = self
            .with_registry(|r| r.accept(call_id, destination_number))
            .await?
        {
            self.publish_change(change);
        }
        Ok(())
    }

    pub async fn reject(&self, call_id: &CallId) -> Result<(), ClientError> {
        let change = self.with_registry(|r| r.reject(call_id)).await?;
        self.publish_change(change);
        Ok(())
    }

    pub async fn end(&self, call_id: &CallId) -> Result<(), ClientError> {
        let change = self.with_registry(|r| r.end(call_id)).await?;
        self.publish_change(change);
        Ok(())
    }

    pub async fn set_hold(&self, call_id: &CallId, held: bool) -> Result<(), ClientError> {
        if let Some(change) = self.with_registry(|r| r.set_hold(call_id, held)).await? {
            self.publish_change(change);
        }
        Ok(())
    }

    pub async fn set_mute(&self, muted: bool) -> Result<CallId, ClientError> {
        Ok(self.with_registry(|r| r.set_mute(muted)).await?)
    }

    pub async fn set_audio_output(&self, device: AudioDevice) {
        self.with_registry(|r| r.set_audio_output(device)).await;
    }

    pub async fn send_dtmf(&self, call_id: &CallId, digits: &str) -> Result<(), ClientError> {
        Ok(self.with_registry(|r| r.send_dtmf(call_id, digits)).await?)
    }

    pub async fn set_local_sdp(&self, call_id: &CallId, sdp: &str) -> Result<(), ClientError> {
        Ok(self.with_registry(|r| r.set_local_sdp(call_id, sdp)).await?)
    }

    pub async fn set_current_call(&self, call_id: &CallId) -> Result<(), ClientError> {
        Ok(self.with_registry(|r| r.set_current_call(call_id)).await?)
    }

    pub async fn call(&self, call_id: &CallId) -> Option<Call> {
        self.registry.lock().await.call(call_id).cloned()
    }

    pub async fn current_call(&self) -> Option<Call> {
        self.registry.lock().await.current_call().cloned()
    }

    pub async fn previous_call(&self) -> Option<Call> {
        self.registry.lock().await.previous_call().cloned()
    }

    pub async fn active_calls(&self) -> Vec<Call> {
        self.registry
            .lock()
            .await
            .active_calls()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn cleanup_ended_calls(&self) -> usize {
        self.registry.lock().await.cleanup_ended_calls()
    }

    /// Runs `f` against the registry and brings the socket's ongoing-call flag in line.
    async fn with_registry<R>(&self, f: impl FnOnce(&mut SessionRegistry) -> R) -> R {
        let mut registry = self.registry.lock().await;
        let result = f(&mut registry);
        self.socket.set_call_ongoing(registry.has_ongoing_call());
        result
    }

    fn publish_change(&self, change: CallStateChanged) {
        debug!(target: "Client/Calls", "Call {} is now {}", change.call_id, change.state);
        if let Some(bridge) = self.bridge() {
            bridge.report_state_change(&change);
        }
        self.events.dispatch(Event::CallStateChanged(change));
    }

    fn watch_connectivity(self: &Arc<Self>) {
        if self.watching_connectivity.swap(true, Ordering::SeqCst) {
            return;
        }
        let client = Arc::downgrade(self);
        self.connectivity.start(move |connectivity| {
            let Some(client) = client.upgrade() else {
                return;
            };
            match connectivity {
                Connectivity::Available => {
                    tokio::spawn(async move { client.on_network_available().await });
                }
                Connectivity::Unavailable => {
                    info!(target: "Client/Connectivity", "Network lost");
                }
            }
        });
    }

    async fn on_network_available(self: Arc<Self>) {
        if self.expected_disconnect.load(Ordering::SeqCst)
            || self.socket.is_connected()
            || !self.config.reconnect.enabled
        {
            return;
        }
        info!(target: "Client/Connectivity", "Network is back, reconnecting");
        if self.try_reconnect().await == Reconnect::Failed {
            self.end_all_calls().await;
        }
    }

    fn spawn_read_loop(self: &Arc<Self>, stream: MessageStream) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let client = self.clone();
        tokio::spawn(async move { client.read_messages_loop(stream, generation).await });
    }

    async fn read_messages_loop(self: Arc<Self>, mut stream: MessageStream, generation: u64) {
        info!(target: "Client", "Starting message processing loop...");
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(inbound) => self.handle_inbound(inbound).await,
                Err(e) => {
                    warn!(target: "Client", "Dropping malformed frame: {e}");
                    self.events.dispatch(Event::Error(e.to_string()));
                }
            }
        }
        self.on_transport_closed(generation).await;
    }

    async fn on_transport_closed(self: &Arc<Self>, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(target: "Client", "Stale message loop finished");
            return;
        }
        if self.expected_disconnect.load(Ordering::SeqCst) {
            info!(target: "Client", "Transport disconnected as expected.");
            return;
        }

        warn!(target: "Client", "Transport disconnected unexpectedly.");
        self.socket.handle_transport_closed();
        self.events
            .dispatch(Event::Disconnected(Disconnected { expected: false }));

        if !self.config.reconnect.enabled {
            self.end_all_calls().await;
        } else if self.connectivity.is_available() {
            if self.try_reconnect().await == Reconnect::Failed {
                self.end_all_calls().await;
            }
        } else {
            info!(target: "Client", "Network unavailable, waiting before reconnecting.");
        }
    }

    /// One reconnect attempt to the last endpoint.
    async fn try_reconnect(self: &Arc<Self>) -> Reconnect {
        if self.is_reconnecting.swap(true, Ordering::SeqCst) {
            debug!(target: "Client", "Reconnect already in progress");
            return Reconnect::InProgress;
        }
        let _guard = scopeguard::guard((), |_| {
            self.is_reconnecting.store(false, Ordering::SeqCst);
        });

        self.events.dispatch(Event::Loading);
        let stream = match self.socket.reconnect().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(target: "Client", "Reconnect failed: {e}");
                self.events.dispatch(Event::Error(e.to_string()));
                return Reconnect::Failed;
            }
        };
        info!(target: "Client", "Reconnected.");
        self.spawn_read_loop(stream);

        if self.config.reconnect.resend_login
            && let Some(config) = self.login.last_config()
            && let Err(e) = self.login(&config).await
        {
            warn!(target: "Client/Login", "Re-login after reconnect failed: {e}");
        }
        Reconnect::Done
    }

    async fn end_all_calls(&self) {
        for change in self.with_registry(|r| r.disconnect_all()).await {
            self.publish_change(change);
        }
    }

    async fn handle_inbound(&self, inbound: Inbound) {
        match inbound {
            Inbound::Response { id, outcome } => {
                let Some(method) = self.socket.resolve_response(&id, outcome.clone()) else {
                    debug!(target: "Client", "Reply {id} matches no pending request");
                    return;
                };
                match outcome {
                    Ok(result) => self.handle_reply(method.as_str(), result).await,
                    Err(error) => {
                        warn!(
                            target: "Client",
                            "{method} rejected: {} (code {})", error.message, error.code
                        );
                        // Login failures are reported by the login flow itself.
                        if method != SocketMethod::Login {
                            self.events.dispatch(Event::Error(format!(
                                "{method} rejected: {}",
                                error.message
                            )));
                        }
                    }
                }
            }
            Inbound::Message { id, message } => self.handle_server_message(id, message).await,
        }
    }

    async fn handle_reply(&self, method: &str, result: Value) {
        match ReceivedMessage::decode(method, result) {
            Ok(message @ ReceivedMessage::Login(_)) => {
                self.events.dispatch(Event::message_received(message));
            }
            Ok(ReceivedMessage::Modify(modify)) => {
                match self.with_registry(|r| r.on_modify_ack(&modify)).await {
                    Ok(Some(change)) => self.publish_change(change),
                    Ok(None) => {}
                    Err(e) => debug!(target: "Client/Calls", "Modify reply ignored: {e}"),
                }
                self.events
                    .dispatch(Event::message_received(ReceivedMessage::Modify(modify)));
            }
            Ok(other) => debug!(target: "Client", "Reply to {}", other.method()),
            Err(e) => debug!(target: "Client", "Reply to {method} not decoded: {e}"),
        }
    }

    async fn handle_server_message(&self, id: Option<Value>, message: ReceivedMessage) {
        if let ReceivedMessage::Ping = message {
            match id {
                Some(id) => {
                    if let Err(e) = self.socket.acknowledge(&AckMessage::ping(id)) {
                        warn!(target: "Client", "Failed to answer ping: {e}");
                    }
                }
                None => debug!(target: "Client", "Ping without id"),
            }
            return;
        }

        // Invites are only surfaced once the registry has taken them.
        if !matches!(message, ReceivedMessage::Invite(_)) {
            self.events.dispatch(Event::message_received(message.clone()));
        }

        match &message {
            ReceivedMessage::Invite(invite) => {
                let (result, call) = self
                    .with_registry(|r| {
                        let result = r.on_inbound_invite(invite);
                        let call = result.as_ref().ok().and_then(|id| r.call(id).cloned());
                        (result, call)
                    })
                    .await;
                match (result, call) {
                    (Ok(_), Some(call)) => {
                        self.events.dispatch(Event::message_received(message.clone()));
                        if let Some(bridge) = self.bridge() {
                            bridge.incoming_call(&call);
                        }
                        self.publish_change(CallStateChanged {
                            call_id: call.call_id,
                            state: call.state,
                        });
                    }
                    (Err(CallError::AlreadyExists(call_id)), _) => {
                        debug!(target: "Client/Calls", "Invite {call_id} delivered again");
                    }
                    (Err(CallError::Capacity { limit }), _) => {
                        warn!(target: "Client/Calls", "Invite {} refused: busy", invite.call_id);
                        self.events.dispatch(Event::CallRefused(CallRefused {
                            call_id: invite.call_id.clone(),
                            cause: CauseCode::UserBusy,
                            tracked: limit,
                        }));
                    }
                    (Err(e), _) => {
                        warn!(target: "Client/Calls", "Invite rejected: {e}");
                        self.events.dispatch(Event::Error(e.to_string()));
                    }
                    (Ok(_), None) => {}
                }
            }
            ReceivedMessage::Answer(_)
            | ReceivedMessage::Bye(_)
            | ReceivedMessage::Media(_)
            | ReceivedMessage::Ringing(_)
            | ReceivedMessage::Modify(_) => {
                match self.with_registry(|r| r.on_inbound_event(&message)).await {
                    Ok(Some(change)) => self.publish_change(change),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            target: "Client/Calls",
                            "{} for {} not applied: {e}",
                            message.method(),
                            message.call_id().map_or("-", CallId::as_str)
                        );
                        self.events.dispatch(Event::Error(e.to_string()));
                    }
                }
            }
            ReceivedMessage::Unknown { method, .. } => {
                debug!(target: "Client", "Ignoring unknown method {method}");
            }
            _ => {}
        }
    }
}
