//! The signaling socket: the single owner of the transport connection.
//!
//! Outbound frames go through one writer task so they reach the wire in the order they were
//! queued. Replies are matched to their request by id; inbound frames are exposed as an ordered
//! [`MessageStream`].

pub mod error;

use crate::transport::{Transport, TransportEvent, TransportFactory};
use dashmap::DashMap;
pub use error::{Result, SocketError};
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use vertocore::protocol::{
    AckMessage, Inbound, ProtocolError, RpcError, SignalingMessage, SocketMethod, decode_frame,
};
use vertocore::types::config::AuthMode;

/// Where the login handshake stands for the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginState {
    /// Not authenticated.
    #[default]
    Disconnected,
    Connecting,
    Authenticated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub host: String,
    pub port: u16,
    pub auth_mode: Option<AuthMode>,
    /// Client-generated until the server assigns one on login.
    pub session_id: Option<String>,
    pub login_state: LoginState,
}

/// How long a disconnect waits for already queued frames to reach the transport.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

type ReplyResult = std::result::Result<Value, RpcError>;

struct PendingRequest {
    method: SocketMethod,
    tx: oneshot::Sender<ReplyResult>,
}

type PendingMap = Arc<DashMap<String, PendingRequest>>;

/// Handle on the reply to one outbound request. Dropping it is fine when nobody cares.
pub struct PendingReply {
    id: String,
    method: SocketMethod,
    rx: oneshot::Receiver<ReplyResult>,
    pending: PendingMap,
}

impl PendingReply {
    /// A reply handle for a request that never went through a socket.
    #[cfg(test)]
    pub(crate) fn detached(message: &SignalingMessage) -> Self {
        let (_tx, rx) = oneshot::channel();
        Self {
            id: message.id.clone(),
            method: message.method,
            rx,
            pending: Arc::new(DashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn method(&self) -> SocketMethod {
        self.method
    }

    /// Waits for the server's reply, giving up after `timeout`.
    pub async fn wait(self, timeout: Duration) -> Result<Value> {
        let PendingReply {
            id,
            method,
            rx,
            pending,
        } = self;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(error))) => Err(SocketError::Rpc {
                method: method.to_string(),
                error,
            }),
            Ok(Err(_)) => Err(SocketError::Closed),
            Err(_) => {
                pending.remove(&id);
                Err(SocketError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }
}

struct Outgoing {
    text: String,
    done: Option<oneshot::Sender<Result<()>>>,
}

struct Connection {
    transport: Arc<dyn Transport>,
    writer: mpsc::UnboundedSender<Outgoing>,
    pump: JoinHandle<()>,
    closed: watch::Sender<bool>,
}

/// Ordered sequence of decoded inbound frames. Ends when the connection does.
pub struct MessageStream {
    events: mpsc::Receiver<TransportEvent>,
    closed: watch::Receiver<bool>,
}

impl MessageStream {
    pub async fn next(&mut self) -> Option<std::result::Result<Inbound, ProtocolError>> {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.closed.wait_for(|closed| *closed) => return None,
                event = self.events.recv() => event,
            };
            match event {
                Some(TransportEvent::TextReceived(text)) => return Some(decode_frame(&text)),
                Some(TransportEvent::Connected) => continue,
                Some(TransportEvent::Disconnected) | None => return None,
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SignalingSocket {
    factory: Arc<dyn TransportFactory>,
    use_tls: bool,
    connection: Mutex<Option<Connection>>,
    session: Mutex<Option<Session>>,
    pending: PendingMap,
    call_ongoing: AtomicBool,
}

impl SignalingSocket {
    pub fn new(factory: Arc<dyn TransportFactory>, use_tls: bool) -> Self {
        Self {
            factory,
            use_tls,
            connection: Mutex::new(None),
            session: Mutex::new(None),
            pending: Arc::new(DashMap::new()),
            call_ongoing: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.connection).is_some()
    }

    /// Opens the transport to `host:port`. Returns once the transport handshake is done.
    pub async fn connect(&self, host: &str, port: u16) -> Result<MessageStream> {
        self.open(host, port, None).await
    }

    /// Reconnects to the last endpoint, keeping the session id for a later re-login.
    pub async fn reconnect(&self) -> Result<MessageStream> {
        let (host, port, session_id) = {
            let session = lock(&self.session);
            let session = session.as_ref().ok_or(SocketError::NotConnected)?;
            (
                session.host.clone(),
                session.port,
                session.session_id.clone(),
            )
        };
        self.open(&host, port, session_id).await
    }

    async fn open(
        &self,
        host: &str,
        port: u16,
        session_id: Option<String>,
    ) -> Result<MessageStream> {
        let endpoint = format!("{host}:{port}");
        if host.trim().is_empty() || port == 0 {
            return Err(SocketError::Connect {
                endpoint,
                reason: "host must be non-empty and port positive".to_string(),
            });
        }

        if self.is_connected() {
            debug!(target: "Client/Socket", "Replacing existing connection");
            self.disconnect().await;
        }

        let scheme = if self.use_tls { "wss" } else { "ws" };
        let url = format!("{scheme}://{endpoint}");
        info!(target: "Client/Socket", "Connecting to {url}");
        let (transport, events) = self
            .factory
            .create_transport(&url)
            .await
            .map_err(|e| SocketError::Connect {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;

        let (writer, writer_rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(write_pump(transport.clone(), writer_rx));
        let (closed, closed_rx) = watch::channel(false);

        *lock(&self.connection) = Some(Connection {
            transport,
            writer,
            pump,
            closed,
        });
        *lock(&self.session) = Some(Session {
            host: host.to_string(),
            port,
            auth_mode: None,
            session_id,
            login_state: LoginState::Disconnected,
        });
        info!(target: "Client/Socket", "Connected to {endpoint}");

        Ok(MessageStream {
            events,
            closed: closed_rx,
        })
    }

    /// Flushes frames already queued, then closes the transport. Safe to call at any time, any
    /// number of times.
    pub async fn disconnect(&self) {
        let connection = lock(&self.connection).take();
        if let Some(Connection {
            transport,
            writer,
            pump,
            closed,
        }) = connection
        {
            info!(target: "Client/Socket", "Disconnecting");
            let _ = closed.send(true);
            drop(writer);
            if tokio::time::timeout(DRAIN_TIMEOUT, pump).await.is_err() {
                warn!(target: "Client/Socket", "Queued frames not flushed within {DRAIN_TIMEOUT:?}");
            }
            transport.disconnect().await;
        }
        self.pending.clear();
        if let Some(session) = lock(&self.session).as_mut() {
            session.login_state = LoginState::Disconnected;
        }
    }

    /// Drops connection state after the transport went away on its own.
    pub(crate) fn handle_transport_closed(&self) {
        if let Some(connection) = lock(&self.connection).take() {
            let _ = connection.closed.send(true);
        }
        self.pending.clear();
        if let Some(session) = lock(&self.session).as_mut() {
            session.login_state = LoginState::Disconnected;
        }
    }

    pub fn current_session(&self) -> Result<Session> {
        lock(&self.session).clone().ok_or(SocketError::NotConnected)
    }

    pub fn update_session<R>(&self, update: impl FnOnce(&mut Session) -> R) -> Result<R> {
        lock(&self.session)
            .as_mut()
            .map(update)
            .ok_or(SocketError::NotConnected)
    }

    fn writer(&self) -> Result<mpsc::UnboundedSender<Outgoing>> {
        lock(&self.connection)
            .as_ref()
            .map(|c| c.writer.clone())
            .ok_or(SocketError::NotConnected)
    }

    fn register(&self, message: &SignalingMessage) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            message.id.clone(),
            PendingRequest {
                method: message.method,
                tx,
            },
        );
        PendingReply {
            id: message.id.clone(),
            method: message.method,
            rx,
            pending: self.pending.clone(),
        }
    }

    /// Queues a request for transmission without waiting for it to hit the wire.
    pub fn enqueue(&self, message: &SignalingMessage) -> Result<PendingReply> {
        let text = message.to_json()?;
        let writer = self.writer()?;
        let reply = self.register(message);
        debug!(target: "Client/Socket", "Queueing {} ({})", message.method, message.id);
        if writer.send(Outgoing { text, done: None }).is_err() {
            self.pending.remove(&message.id);
            return Err(SocketError::Closed);
        }
        Ok(reply)
    }

    /// Serializes and transmits `message`, returning once it has been written.
    pub async fn send(&self, message: &SignalingMessage) -> Result<PendingReply> {
        let text = message.to_json()?;
        let writer = self.writer()?;
        let reply = self.register(message);
        let (done, written) = oneshot::channel();
        let result = match writer.send(Outgoing {
            text,
            done: Some(done),
        }) {
            Ok(()) => written.await.unwrap_or(Err(SocketError::Closed)),
            Err(_) => Err(SocketError::Closed),
        };
        if let Err(e) = result {
            self.pending.remove(&message.id);
            return Err(e);
        }
        Ok(reply)
    }

    /// Queues a reply to a server-initiated request.
    pub fn acknowledge(&self, ack: &AckMessage) -> Result<()> {
        let text = ack.to_json()?;
        self.writer()?
            .send(Outgoing { text, done: None })
            .map_err(|_| SocketError::Closed)
    }

    /// Hands a reply to whoever is waiting on it. Returns the method of the matching request.
    pub fn resolve_response(&self, id: &str, outcome: ReplyResult) -> Option<SocketMethod> {
        let (_, request) = self.pending.remove(id)?;
        let _ = request.tx.send(outcome);
        Some(request.method)
    }

    pub fn mark_call_ongoing(&self) {
        self.call_ongoing.store(true, Ordering::SeqCst);
    }

    pub fn mark_call_not_ongoing(&self) {
        self.call_ongoing.store(false, Ordering::SeqCst);
    }

    pub fn set_call_ongoing(&self, ongoing: bool) {
        if ongoing {
            self.mark_call_ongoing();
        } else {
            self.mark_call_not_ongoing();
        }
    }

    pub fn is_call_ongoing(&self) -> bool {
        self.call_ongoing.load(Ordering::SeqCst)
    }
}

async fn write_pump(transport: Arc<dyn Transport>, mut rx: mpsc::UnboundedReceiver<Outgoing>) {
    while let Some(outgoing) = rx.recv().await {
        let result = transport.send_text(&outgoing.text).await.map_err(|e| {
            warn!(target: "Client/Socket", "Failed to send frame: {e}");
            SocketError::Closed
        });
        if let Some(done) = outgoing.done {
            let _ = done.send(result);
        }
    }
    debug!(target: "Client/Socket", "Write pump finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransportFactory;
    use serde_json::json;
    use vertocore::protocol::{ReceivedMessage, StateParams};

    fn socket() -> (SignalingSocket, MockTransportFactory) {
        let factory = MockTransportFactory::new();
        (SignalingSocket::new(Arc::new(factory.clone()), true), factory)
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_endpoint() {
        let (socket, factory) = socket();
        for (host, port) in [("", 0), ("", 14938), ("rtc.telnyx.com", 0), ("  ", 443)] {
            let err = socket.connect(host, port).await.err().unwrap();
            assert!(matches!(err, SocketError::Connect { .. }), "{host}:{port}");
        }
        assert!(factory.connects().is_empty());
        assert!(!socket.is_connected());
    }

    #[tokio::test]
    async fn test_connect_surfaces_unreachable_endpoint() {
        let (socket, factory) = socket();
        factory.set_fail_connect(true);
        let err = socket.connect("rtc.telnyx.com", 14938).await.err().unwrap();
        assert!(matches!(err, SocketError::Connect { .. }));
        assert!(matches!(
            socket.current_session(),
            Err(SocketError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_session_only_exists_after_connect() {
        let (socket, factory) = socket();
        assert!(matches!(
            socket.current_session(),
            Err(SocketError::NotConnected)
        ));

        let _stream = socket.connect("rtc.telnyx.com", 14938).await.unwrap();
        let session = socket.current_session().unwrap();
        assert_eq!(session.host, "rtc.telnyx.com");
        assert_eq!(session.port, 14938);
        assert_eq!(session.login_state, LoginState::Disconnected);
        assert_eq!(factory.connects(), vec!["wss://rtc.telnyx.com:14938"]);
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let (socket, _) = socket();
        let message = SignalingMessage::new(SocketMethod::GatewayState, StateParams::default());
        assert!(matches!(
            socket.send(&message).await,
            Err(SocketError::NotConnected)
        ));
        assert!(matches!(
            socket.enqueue(&message),
            Err(SocketError::NotConnected)
        ));
    }

    #[test]
    fn test_ongoing_flag_toggles() {
        let (socket, _) = socket();
        assert!(!socket.is_call_ongoing());
        socket.mark_call_ongoing();
        socket.mark_call_ongoing();
        assert!(socket.is_call_ongoing());
        socket.mark_call_not_ongoing();
        socket.mark_call_not_ongoing();
        assert!(!socket.is_call_ongoing());
    }

    #[tokio::test]
    async fn test_frames_are_written_in_queue_order() {
        let (socket, factory) = socket();
        let _stream = socket.connect("localhost", 8081).await.unwrap();

        let first = SignalingMessage::new(SocketMethod::GatewayState, StateParams::default());
        let second = SignalingMessage::new(SocketMethod::ClientReady, StateParams::default());
        socket.enqueue(&first).unwrap();
        socket.send(&second).await.unwrap();

        let sent = factory.wait_for_sent(2).await;
        assert_eq!(sent[0]["id"], json!(first.id));
        assert_eq!(sent[1]["id"], json!(second.id));
    }

    #[tokio::test]
    async fn test_disconnect_flushes_queued_frames() {
        let (socket, factory) = socket();
        let _stream = socket.connect("localhost", 8081).await.unwrap();

        let ids: Vec<String> = (0..3)
            .map(|_| {
                let message =
                    SignalingMessage::new(SocketMethod::GatewayState, StateParams::default());
                socket.enqueue(&message).unwrap().id().to_string()
            })
            .collect();
        socket.disconnect().await;

        let sent: Vec<Value> = factory.sent();
        let sent_ids: Vec<&str> = sent.iter().filter_map(|f| f["id"].as_str()).collect();
        assert_eq!(sent_ids, ids);
        assert!(!socket.is_connected());
    }

    #[tokio::test]
    async fn test_reply_is_routed_to_waiter() {
        let (socket, _) = socket();
        let _stream = socket.connect("localhost", 8081).await.unwrap();
        let message = SignalingMessage::new(SocketMethod::GatewayState, StateParams::default());
        let reply = socket.enqueue(&message).unwrap();

        let method = socket.resolve_response(&message.id, Ok(json!({"state": "REGED"})));
        assert_eq!(method, Some(SocketMethod::GatewayState));
        assert_eq!(
            reply.wait(Duration::from_secs(1)).await.unwrap(),
            json!({"state": "REGED"})
        );
        assert_eq!(socket.resolve_response(&message.id, Ok(json!({}))), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_wait_times_out() {
        let (socket, _) = socket();
        let _stream = socket.connect("localhost", 8081).await.unwrap();
        let message = SignalingMessage::new(SocketMethod::GatewayState, StateParams::default());
        let reply = socket.enqueue(&message).unwrap();

        let err = reply.wait(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, SocketError::Timeout { .. }));
        assert_eq!(socket.resolve_response(&message.id, Ok(json!({}))), None);
    }

    #[tokio::test]
    async fn test_stream_is_ordered_and_ends_on_disconnect() {
        let (socket, factory) = socket();
        let mut stream = socket.connect("localhost", 8081).await.unwrap();

        factory
            .inject(json!({"jsonrpc":"2.0","id":1,"method":"telnyx_rtc.clientReady","params":{}}))
            .await;
        factory
            .inject(json!({"jsonrpc":"2.0","id":2,"method":"telnyx_rtc.ping","params":{}}))
            .await;

        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert!(matches!(
            first,
            Inbound::Message { message: ReceivedMessage::ClientReady, .. }
        ));
        assert!(matches!(
            second,
            Inbound::Message { message: ReceivedMessage::Ping, .. }
        ));

        socket.disconnect().await;
        socket.disconnect().await;
        assert!(stream.next().await.is_none());
        assert!(!socket.is_connected());
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_end_stream() {
        let (socket, factory) = socket();
        let mut stream = socket.connect("localhost", 8081).await.unwrap();

        factory.inject_raw("{garbage").await;
        factory
            .inject(json!({"jsonrpc":"2.0","id":1,"method":"telnyx_rtc.ping","params":{}}))
            .await;

        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_reconnect_keeps_session_id() {
        let (socket, factory) = socket();
        let _stream = socket.connect("localhost", 8081).await.unwrap();
        socket
            .update_session(|s| s.session_id = Some("sess-1".into()))
            .unwrap();

        factory.close().await;
        socket.handle_transport_closed();
        let _stream = socket.reconnect().await.unwrap();

        let session = socket.current_session().unwrap();
        assert_eq!(session.session_id.as_deref(), Some("sess-1"));
        assert_eq!(factory.connects().len(), 2);
    }
}
