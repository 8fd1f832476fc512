//! Cold-start handling of a call the user already answered or declined from a push notification.

use crate::calls::CallError;
use crate::client::{Client, ClientError};
use crate::login::LoginError;
use crate::socket::SocketError;
use crate::types::events::{CallRefused, CallStateChanged, Event};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use vertocore::types::call::{CallId, CallState};
use vertocore::types::config::LoginConfig;
use vertocore::types::push::{PushAction, PushMetaData};

#[derive(Debug, Error)]
pub enum PushResumeError {
    #[error("no invite for call {call_id} within {timeout:?}")]
    Timeout { call_id: CallId, timeout: Duration },
    #[error("login failed: {0}")]
    Login(#[from] LoginError),
    #[error("call action failed: {0}")]
    Call(#[from] CallError),
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("client shut down while waiting for the invite")]
    Closed,
}

impl From<ClientError> for PushResumeError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Login(e) => Self::Login(e),
            ClientError::Call(e) => Self::Call(e),
            ClientError::Socket(e) => Self::Socket(e),
            ClientError::PushResume(e) => e,
        }
    }
}

/// One deferred accept/reject, waiting for its invite.
#[derive(Debug, Clone)]
pub struct PushResume {
    pub metadata: PushMetaData,
    pub action: PushAction,
    pub timeout: Duration,
}

impl PushResume {
    pub fn new(metadata: PushMetaData, action: PushAction, timeout: Duration) -> Self {
        Self {
            metadata,
            action,
            timeout,
        }
    }

    /// Connects and logs in if needed, asks the server to re-deliver the call, waits for the
    /// matching invite and applies the deferred action to it.
    pub async fn run(
        self,
        client: &Arc<Client>,
        login: &LoginConfig,
    ) -> Result<CallId, PushResumeError> {
        let call_id = self.metadata.call_id.clone();
        info!(
            target: "Client/Push",
            "Resuming call {call_id} from push ({:?})", self.action
        );

        // Subscribe first so an invite arriving right after login is not missed.
        let mut events = client.subscribe();

        if !client.is_connected() {
            client.connect().await?;
        }
        client.login(login).await?;
        client.attach_calls()?;

        if !self.is_ringing(client, &call_id).await {
            let wait = async {
                loop {
                    match events.recv().await {
                        Ok(Event::CallStateChanged(CallStateChanged { call_id: id, state }))
                            if id == call_id && state == CallState::Ringing =>
                        {
                            return Ok(());
                        }
                        Ok(Event::CallRefused(CallRefused { call_id: id, tracked, .. }))
                            if id == call_id =>
                        {
                            warn!(target: "Client/Push", "Invite {call_id} refused, line is busy");
                            return Err(CallError::Capacity { limit: tracked }.into());
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(target: "Client/Push", "Missed {skipped} events while waiting");
                            if self.is_ringing(client, &call_id).await {
                                return Ok(());
                            }
                        }
                        Err(RecvError::Closed) => return Err(PushResumeError::Closed),
                    }
                }
            };
            match tokio::time::timeout(self.timeout, wait).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(target: "Client/Push", "Gave up waiting for invite {call_id}");
                    return Err(PushResumeError::Timeout {
                        call_id,
                        timeout: self.timeout,
                    });
                }
            }
        }

        debug!(target: "Client/Push", "Invite {call_id} arrived, applying {:?}", self.action);
        match self.action {
            PushAction::Accept => {
                client
                    .accept(&call_id, &self.metadata.caller_number)
                    .await?;
            }
            PushAction::Reject => {
                client.reject(&call_id).await?;
            }
        }
        Ok(call_id)
    }

    async fn is_ringing(&self, client: &Client, call_id: &CallId) -> bool {
        client
            .call(call_id)
            .await
            .is_some_and(|call| call.state == CallState::Ringing)
    }
}
