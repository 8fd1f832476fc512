//! Inbound frame decoding.

use super::method::SocketMethod;
use crate::types::call::CallId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has no method, result or error: {0}")]
    UnrecognizedFrame(String),

    #[error("response frame is missing its id")]
    MissingId,

    #[error("invalid {method} payload: {source}")]
    Payload {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Error object carried by a failed JSON-RPC reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Server-initiated request or notification. `id` is kept verbatim so it can be
    /// echoed back when the protocol demands a reply.
    Message {
        id: Option<Value>,
        message: ReceivedMessage,
    },
    /// Reply to one of our own requests.
    Response {
        id: String,
        outcome: Result<Value, RpcError>,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

fn id_to_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Classifies one text frame from the server.
pub fn decode_frame(text: &str) -> Result<Inbound, ProtocolError> {
    let raw: RawFrame = serde_json::from_str(text)?;

    if let Some(method) = raw.method {
        let params = raw.params.unwrap_or(Value::Null);
        let message = ReceivedMessage::decode(&method, params)?;
        return Ok(Inbound::Message {
            id: raw.id,
            message,
        });
    }

    let outcome = match (raw.result, raw.error) {
        (_, Some(error)) => Err(error),
        (Some(result), None) => Ok(result),
        (None, None) => return Err(ProtocolError::UnrecognizedFrame(text.to_string())),
    };
    let id = raw
        .id
        .as_ref()
        .and_then(id_to_string)
        .ok_or(ProtocolError::MissingId)?;
    Ok(Inbound::Response { id, outcome })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResult {
    #[serde(default)]
    pub message: Option<String>,
    pub sessid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteResult {
    #[serde(rename = "callID")]
    pub call_id: CallId,
    #[serde(default)]
    pub caller_id_name: String,
    #[serde(default)]
    pub caller_id_number: String,
    #[serde(default)]
    pub sdp: String,
    #[serde(default)]
    pub telnyx_session_id: Option<String>,
    #[serde(default)]
    pub telnyx_leg_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResult {
    #[serde(rename = "callID")]
    pub call_id: CallId,
    #[serde(default)]
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByeResult {
    #[serde(rename = "callID")]
    pub call_id: CallId,
    #[serde(rename = "causeCode", default)]
    pub cause_code: Option<u16>,
    #[serde(default)]
    pub cause: Option<String>,
}

/// Reply to a hold/unhold modify request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyResult {
    #[serde(rename = "callID")]
    pub call_id: CallId,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(rename = "holdState", default)]
    pub hold_state: Option<String>,
}

impl ModifyResult {
    /// `Some(true)` when the server reports the call as held.
    pub fn is_held(&self) -> Option<bool> {
        match self.hold_state.as_deref() {
            Some("held") => Some(true),
            Some("active") => Some(false),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingingResult {
    #[serde(rename = "callID")]
    pub call_id: CallId,
    #[serde(default)]
    pub caller_id_name: String,
    #[serde(default)]
    pub caller_id_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaResult {
    #[serde(rename = "callID")]
    pub call_id: CallId,
    #[serde(default)]
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStateResult {
    pub state: String,
}

/// Typed view of a server message or reply, keyed by method.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ReceivedMessage {
    Login(LoginResult),
    Invite(InviteResult),
    Answer(AnswerResult),
    Bye(ByeResult),
    Modify(ModifyResult),
    Ringing(RingingResult),
    Media(MediaResult),
    GatewayState(GatewayStateResult),
    ClientReady,
    Ping,
    /// A method this client does not interpret. Kept so hosts can inspect it.
    Unknown { method: String, params: Value },
}

fn payload<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(params).map_err(|source| ProtocolError::Payload {
        method: method.to_string(),
        source,
    })
}

impl ReceivedMessage {
    /// Decodes `params` (or a reply's `result`) according to `method`.
    pub fn decode(method: &str, params: Value) -> Result<Self, ProtocolError> {
        let Ok(known) = method.parse::<SocketMethod>() else {
            return Ok(Self::Unknown {
                method: method.to_string(),
                params,
            });
        };

        let message = match known {
            SocketMethod::Login => Self::Login(payload(method, params)?),
            SocketMethod::Invite => Self::Invite(payload(method, params)?),
            SocketMethod::Answer => Self::Answer(payload(method, params)?),
            SocketMethod::Bye => Self::Bye(payload(method, params)?),
            SocketMethod::Modify => Self::Modify(payload(method, params)?),
            SocketMethod::Ringing => Self::Ringing(payload(method, params)?),
            SocketMethod::Media => Self::Media(payload(method, params)?),
            SocketMethod::GatewayState => {
                // The state may arrive bare or nested one level under "params".
                let inner = match params.get("params") {
                    Some(nested) if nested.is_object() => nested.clone(),
                    _ => params,
                };
                Self::GatewayState(payload(method, inner)?)
            }
            SocketMethod::ClientReady => Self::ClientReady,
            SocketMethod::Ping => Self::Ping,
            SocketMethod::Info | SocketMethod::AttachCalls | SocketMethod::DisablePush => {
                Self::Unknown {
                    method: method.to_string(),
                    params,
                }
            }
        };
        Ok(message)
    }

    pub fn method(&self) -> &str {
        match self {
            Self::Login(_) => SocketMethod::Login.as_str(),
            Self::Invite(_) => SocketMethod::Invite.as_str(),
            Self::Answer(_) => SocketMethod::Answer.as_str(),
            Self::Bye(_) => SocketMethod::Bye.as_str(),
            Self::Modify(_) => SocketMethod::Modify.as_str(),
            Self::Ringing(_) => SocketMethod::Ringing.as_str(),
            Self::Media(_) => SocketMethod::Media.as_str(),
            Self::GatewayState(_) => SocketMethod::GatewayState.as_str(),
            Self::ClientReady => SocketMethod::ClientReady.as_str(),
            Self::Ping => SocketMethod::Ping.as_str(),
            Self::Unknown { method, .. } => method,
        }
    }

    /// The call this message refers to, if any.
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            Self::Invite(r) => Some(&r.call_id),
            Self::Answer(r) => Some(&r.call_id),
            Self::Bye(r) => Some(&r.call_id),
            Self::Modify(r) => Some(&r.call_id),
            Self::Ringing(r) => Some(&r.call_id),
            Self::Media(r) => Some(&r.call_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_inbound_invite() {
        let frame = json!({
            "jsonrpc": "2.0",
            "id": 4711,
            "method": "telnyx_rtc.invite",
            "params": {
                "callID": "7a1c4bb2-8f57-4ad6-9f0b-5b0f3d0bd0a1",
                "caller_id_name": "Oliver",
                "caller_id_number": "+35387711111",
                "sdp": "v=0",
                "telnyx_session_id": "ts-1"
            }
        })
        .to_string();

        let Inbound::Message { id, message } = decode_frame(&frame).unwrap() else {
            panic!("expected a server message");
        };
        assert_eq!(id, Some(json!(4711)));
        assert_eq!(message.method(), "telnyx_rtc.invite");
        match message {
            ReceivedMessage::Invite(invite) => {
                assert_eq!(invite.call_id.as_str(), "7a1c4bb2-8f57-4ad6-9f0b-5b0f3d0bd0a1");
                assert_eq!(invite.caller_id_name, "Oliver");
                assert_eq!(invite.caller_id_number, "+35387711111");
                assert_eq!(invite.telnyx_session_id.as_deref(), Some("ts-1"));
                assert_eq!(invite.telnyx_leg_id, None);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_decode_answer_and_bye() {
        let answer = decode_frame(
            r#"{"jsonrpc":"2.0","id":1,"method":"telnyx_rtc.answer","params":{"callID":"c1","sdp":"v=0"}}"#,
        )
        .unwrap();
        assert!(matches!(
            answer,
            Inbound::Message { message: ReceivedMessage::Answer(ref a), .. } if a.call_id.as_str() == "c1"
        ));

        let bye = decode_frame(
            r#"{"jsonrpc":"2.0","id":2,"method":"telnyx_rtc.bye","params":{"callID":"c1","causeCode":16,"cause":"NORMAL_CLEARING"}}"#,
        )
        .unwrap();
        let Inbound::Message { message: ReceivedMessage::Bye(bye), .. } = bye else {
            panic!("expected bye");
        };
        assert_eq!(bye.cause_code, Some(16));
        assert_eq!(bye.cause.as_deref(), Some("NORMAL_CLEARING"));
    }

    #[test]
    fn test_decode_response_success_and_error() {
        let ok = decode_frame(
            r#"{"jsonrpc":"2.0","id":"req-1","result":{"message":"logged in","sessid":"srv-sess"}}"#,
        )
        .unwrap();
        let Inbound::Response { id, outcome } = ok else {
            panic!("expected response");
        };
        assert_eq!(id, "req-1");
        let login = ReceivedMessage::decode("login", outcome.unwrap()).unwrap();
        assert_eq!(
            login,
            ReceivedMessage::Login(LoginResult {
                message: Some("logged in".into()),
                sessid: "srv-sess".into(),
            })
        );

        let err = decode_frame(
            r#"{"jsonrpc":"2.0","id":"req-2","error":{"code":-32001,"message":"Authentication Required"}}"#,
        )
        .unwrap();
        let Inbound::Response { outcome, .. } = err else {
            panic!("expected response");
        };
        assert_eq!(
            outcome.unwrap_err(),
            RpcError {
                code: -32001,
                message: "Authentication Required".into()
            }
        );
    }

    #[test]
    fn test_unknown_method_is_retained() {
        let frame = decode_frame(
            r#"{"jsonrpc":"2.0","id":9,"method":"telnyx_rtc.punt","params":{"x":1}}"#,
        )
        .unwrap();
        let Inbound::Message { message, .. } = frame else {
            panic!("expected message");
        };
        assert_eq!(
            message,
            ReceivedMessage::Unknown {
                method: "telnyx_rtc.punt".into(),
                params: json!({"x": 1})
            }
        );
        assert_eq!(message.method(), "telnyx_rtc.punt");
    }

    #[test]
    fn test_gateway_state_nested_params() {
        let msg = ReceivedMessage::decode(
            "telnyx_rtc.gatewayState",
            json!({"params": {"state": "REGED"}}),
        )
        .unwrap();
        assert_eq!(
            msg,
            ReceivedMessage::GatewayState(GatewayStateResult {
                state: "REGED".into()
            })
        );
    }

    #[test]
    fn test_modify_reply_hold_state() {
        let msg = ReceivedMessage::decode(
            "telnyx_rtc.modify",
            json!({"callID": "c9", "action": "hold", "holdState": "held"}),
        )
        .unwrap();
        let ReceivedMessage::Modify(modify) = msg else {
            panic!("expected modify");
        };
        assert_eq!(modify.is_held(), Some(true));
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(decode_frame("{not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(
            decode_frame(r#"{"jsonrpc":"2.0","id":3}"#),
            Err(ProtocolError::UnrecognizedFrame(_))
        ));
        assert!(matches!(
            decode_frame(r#"{"jsonrpc":"2.0","result":{}}"#),
            Err(ProtocolError::MissingId)
        ));
        assert!(matches!(
            decode_frame(r#"{"jsonrpc":"2.0","id":1,"method":"telnyx_rtc.answer","params":{}}"#),
            Err(ProtocolError::Payload { .. })
        ));
    }
}
