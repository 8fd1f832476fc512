use std::time::Duration;
use thiserror::Error;
use vertocore::protocol::RpcError;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("cannot connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("socket is not connected")]
    NotConnected,
    #[error("socket is closed")]
    Closed,
    #[error("no reply to {method} within {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error("server rejected {method}: {} (code {})", error.message, error.code)]
    Rpc { method: String, error: RpcError },
    #[error("failed to encode frame: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SocketError>;
