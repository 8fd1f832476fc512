//! Authentication and other session-scoped requests.

use crate::socket::{LoginState, SignalingSocket, SocketError};
use crate::types::events::{ConnectionEstablished, Event, EventBus};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;
use vertocore::protocol::{
    AttachCallParams, DisablePushParams, LoginParam, ProtocolError, ReceivedMessage,
    SignalingMessage, SocketMethod, TokenDisablePushParams, UserVariables,
};
use vertocore::types::config::LoginConfig;
use vertocore::types::push::PushEnvironment;

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("login rejected: {message} (code {code})")]
    Rejected { code: i64, message: String },
    #[error("no login reply within {0:?}")]
    Timeout(Duration),
    #[error("a login is already in progress")]
    InProgress,
    #[error("not logged in")]
    NotLoggedIn,
    #[error("the login config carries no push token")]
    MissingPushToken,
    #[error("unexpected login reply: {0}")]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Socket(#[from] SocketError),
}

pub struct LoginManager {
    socket: Arc<SignalingSocket>,
    events: EventBus,
    timeout: Duration,
    in_flight: AtomicBool,
    last_config: Mutex<Option<LoginConfig>>,
}

impl LoginManager {
    pub fn new(socket: Arc<SignalingSocket>, events: EventBus, timeout: Duration) -> Self {
        Self {
            socket,
            events,
            timeout,
            in_flight: AtomicBool::new(false),
            last_config: Mutex::new(None),
        }
    }

    /// The config of the last successful login.
    pub fn last_config(&self) -> Option<LoginConfig> {
        self.last_config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.socket
            .current_session()
            .is_ok_and(|s| s.login_state == LoginState::Authenticated)
    }

    /// Authenticates the current connection and returns the server-assigned session id.
    ///
    /// Logging in while already authenticated succeeds immediately without sending anything.
    pub async fn login(&self, config: &LoginConfig) -> Result<String, LoginError> {
        let session = self.socket.current_session()?;
        if session.login_state == LoginState::Authenticated
            && let Some(session_id) = session.session_id
        {
            debug!(target: "Client/Login", "Already authenticated as {session_id}");
            return Ok(session_id);
        }

        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(LoginError::InProgress);
        }
        let _guard = scopeguard::guard((), |_| {
            self.in_flight.store(false, Ordering::SeqCst);
        });

        self.events.dispatch(Event::Loading);
        let sessid = self.socket.update_session(|s| {
            s.login_state = LoginState::Connecting;
            s.auth_mode = Some(config.auth_mode());
            s.session_id
                .get_or_insert_with(|| Uuid::new_v4().to_string())
                .clone()
        })?;

        let params = match config {
            LoginConfig::Credential(c) => LoginParam::credential(
                &c.sip_user,
                &c.sip_password,
                c.push_token.as_deref(),
                sessid,
            ),
            LoginConfig::Token(t) => {
                LoginParam::token(&t.sip_token, t.push_token.as_deref(), sessid)
            }
        };
        let message = SignalingMessage::new(SocketMethod::Login, params);
        info!(target: "Client/Login", "Logging in with {:?} auth", config.auth_mode());

        match self.await_login(&message).await {
            Ok(session_id) => {
                self.socket.update_session(|s| {
                    s.session_id = Some(session_id.clone());
                    s.login_state = LoginState::Authenticated;
                })?;
                *self
                    .last_config
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(config.clone());
                info!(target: "Client/Login", "Logged in, session {session_id}");
                self.events
                    .dispatch(Event::ConnectionEstablished(ConnectionEstablished {
                        session_id: session_id.clone(),
                    }));
                Ok(session_id)
            }
            Err(e) => {
                warn!(target: "Client/Login", "Login failed: {e}");
                let _ = self
                    .socket
                    .update_session(|s| s.login_state = LoginState::Disconnected);
                self.events.dispatch(Event::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn await_login(&self, message: &SignalingMessage) -> Result<String, LoginError> {
        let reply = self.socket.send(message).await?;
        let result = reply.wait(self.timeout).await.map_err(|e| match e {
            SocketError::Rpc { error, .. } => LoginError::Rejected {
                code: error.code,
                message: error.message,
            },
            SocketError::Timeout { timeout, .. } => LoginError::Timeout(timeout),
            other => LoginError::Socket(other),
        })?;
        match ReceivedMessage::decode(SocketMethod::Login.as_str(), result)? {
            ReceivedMessage::Login(login) => Ok(login.sessid),
            other => Err(LoginError::Protocol(ProtocolError::UnrecognizedFrame(
                other.method().to_string(),
            ))),
        }
    }

    /// Asks the server to stop sending pushes to the device token of the last login.
    pub async fn disable_push_notification(&self) -> Result<(), LoginError> {
        let config = self.last_config().ok_or(LoginError::NotLoggedIn)?;
        let token = config
            .push_token()
            .ok_or(LoginError::MissingPushToken)?
            .to_string();
        let message = match &config {
            LoginConfig::Credential(c) => SignalingMessage::new(
                SocketMethod::DisablePush,
                DisablePushParams {
                    user: c.sip_user.clone(),
                    user_variables: UserVariables::new(token),
                },
            ),
            LoginConfig::Token(t) => SignalingMessage::new(
                SocketMethod::DisablePush,
                TokenDisablePushParams {
                    login_token: t.sip_token.clone(),
                    user_variables: UserVariables::new(token),
                },
            ),
        };
        info!(target: "Client/Login", "Disabling push notifications");
        self.socket
            .send(&message)
            .await?
            .wait(self.timeout)
            .await?;
        Ok(())
    }

    /// Asks the server to re-deliver calls that were waiting for this device.
    pub fn attach_calls(&self, environment: PushEnvironment) -> Result<(), LoginError> {
        if !self.is_authenticated() {
            return Err(LoginError::NotLoggedIn);
        }
        let message =
            SignalingMessage::new(SocketMethod::AttachCalls, AttachCallParams::new(environment));
        debug!(target: "Client/Login", "Attaching calls ({environment:?})");
        self.socket.enqueue(&message)?;
        Ok(())
    }
}
