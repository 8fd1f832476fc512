//! WebSocket transport for the signaling socket.
//!
//! The socket only ever talks to a [`Transport`] obtained from a [`TransportFactory`], so tests
//! can swap the network for the in-memory [`mock`] implementation.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, trace, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// An event produced by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A text frame has been received from the server.
    TextReceived(String),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active network connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one text frame to the server.
    async fn send_text(&self, text: &str) -> Result<(), anyhow::Error>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Connects to `url` and returns the transport along with its stream of events.
    async fn create_transport(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const EVENT_CHANNEL_CAPACITY: usize = 100;

pub struct TokioWebSocketTransport {
    ws_sink: Mutex<Option<WsSink>>,
}

#[async_trait]
impl Transport for TokioWebSocketTransport {
    async fn send_text(&self, text: &str) -> Result<(), anyhow::Error> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Socket is closed"))?;

        trace!(target: "Client/Verto", "--> {text}");
        sink.send(Message::text(text.to_owned()))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send error: {}", e))?;
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(mut sink) = self.ws_sink.lock().await.take()
            && let Err(e) = sink.close().await
        {
            debug!(target: "Client/Socket", "Error closing websocket: {e}");
        }
    }
}

/// Factory for creating Tokio WebSocket transports
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioWebSocketTransportFactory;

impl TokioWebSocketTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for TokioWebSocketTransportFactory {
    async fn create_transport(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        debug!(target: "Client/Socket", "Dialing {url}");
        let (client, _response) = connect_async(url)
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {}", e))?;

        let (sink, stream) = client.split();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let transport = Arc::new(TokioWebSocketTransport {
            ws_sink: Mutex::new(Some(sink)),
        });

        tokio::spawn(read_pump(stream, event_tx.clone()));
        let _ = event_tx.send(TransportEvent::Connected).await;

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                trace!(target: "Client/Verto", "<-- {}", text.as_str());
                if event_tx
                    .send(TransportEvent::TextReceived(text.as_str().to_owned()))
                    .await
                    .is_err()
                {
                    warn!(target: "Client/Socket", "Event receiver dropped, closing read pump");
                    break;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                trace!(target: "Client/Socket", "Received close frame: {frame:?}");
                break;
            }
            Some(Ok(other)) => {
                trace!(target: "Client/Socket", "Ignoring non-text websocket message: {other:?}");
            }
            Some(Err(e)) => {
                error!(target: "Client/Socket", "Error reading from websocket: {e}");
                break;
            }
            None => {
                trace!(target: "Client/Socket", "Websocket stream ended");
                break;
            }
        }
    }

    let _ = event_tx.send(TransportEvent::Disconnected).await;
}
