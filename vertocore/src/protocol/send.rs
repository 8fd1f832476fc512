//! Outbound request payloads.
//!
//! Field names here are the server's schema, not ours: every rename is load-bearing.

use super::method::SocketMethod;
use crate::types::call::{CallId, CauseCode};
use crate::types::push::PushEnvironment;
use serde::Serialize;
use serde_json::{Map, Value, json};
use uuid::Uuid;

pub const JSONRPC_VERSION: &str = "2.0";

/// Provider tag the push service expects for FCM-style device tokens.
pub const DEFAULT_PUSH_PROVIDER: &str = "android";

/// An outbound JSON-RPC request.
#[derive(Debug, Clone, Serialize)]
pub struct SignalingMessage {
    pub jsonrpc: &'static str,
    pub id: String,
    pub method: SocketMethod,
    pub params: ParamRequest,
}

impl SignalingMessage {
    /// Wraps `params` in a request with a fresh correlation id.
    pub fn new(method: SocketMethod, params: impl Into<ParamRequest>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Uuid::new_v4().to_string(),
            method,
            params: params.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A reply we owe the server for one of its own requests.
#[derive(Debug, Clone, Serialize)]
pub struct AckMessage {
    pub jsonrpc: &'static str,
    pub id: Value,
    pub result: Value,
}

impl AckMessage {
    /// Keepalive reply, echoing the server's request id verbatim.
    pub fn ping(id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: json!({ "method": SocketMethod::Ping.as_str() }),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One typed payload per outbound intent.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ParamRequest {
    Login(LoginParam),
    Call(CallParams),
    Bye(ByeParams),
    Modify(ModifyParams),
    Info(InfoParams),
    DisablePush(DisablePushParams),
    TokenDisablePush(TokenDisablePushParams),
    Attach(AttachCallParams),
    State(StateParams),
}

macro_rules! impl_into_param_request {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for ParamRequest {
                fn from(params: $ty) -> Self {
                    ParamRequest::$variant(params)
                }
            }
        )*
    };
}

impl_into_param_request! {
    Login(LoginParam),
    Call(CallParams),
    Bye(ByeParams),
    Modify(ModifyParams),
    Info(InfoParams),
    DisablePush(DisablePushParams),
    TokenDisablePush(TokenDisablePushParams),
    Attach(AttachCallParams),
    State(StateParams),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoginUserVariables {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_device_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_notification_provider: Option<String>,
}

impl LoginUserVariables {
    fn for_push_token(push_token: Option<&str>) -> Self {
        match push_token {
            Some(token) => Self {
                push_device_token: Some(token.to_string()),
                push_notification_provider: Some(DEFAULT_PUSH_PROVIDER.to_string()),
            },
            None => Self::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginParam {
    #[serde(rename = "login_token", skip_serializing_if = "Option::is_none")]
    pub login_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passwd: Option<String>,
    #[serde(rename = "userVariables")]
    pub user_variables: LoginUserVariables,
    #[serde(rename = "loginParams", skip_serializing_if = "Option::is_none")]
    pub login_params: Option<Map<String, Value>>,
    pub sessid: String,
}

impl LoginParam {
    pub fn credential(
        user: &str,
        password: &str,
        push_token: Option<&str>,
        sessid: impl Into<String>,
    ) -> Self {
        Self {
            login_token: None,
            login: Some(user.to_string()),
            passwd: Some(password.to_string()),
            user_variables: LoginUserVariables::for_push_token(push_token),
            login_params: None,
            sessid: sessid.into(),
        }
    }

    pub fn token(token: &str, push_token: Option<&str>, sessid: impl Into<String>) -> Self {
        Self {
            login_token: Some(token.to_string()),
            login: None,
            passwd: None,
            user_variables: LoginUserVariables::for_push_token(push_token),
            login_params: None,
            sessid: sessid.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CallDialogParams {
    pub attach: bool,
    pub audio: bool,
    #[serde(rename = "callID")]
    pub call_id: CallId,
    pub caller_id_name: String,
    pub caller_id_number: String,
    #[serde(rename = "clientState")]
    pub client_state: String,
    pub destination_number: String,
    pub remote_caller_id_name: String,
    #[serde(rename = "screenShare")]
    pub screen_share: bool,
    #[serde(rename = "useStereo")]
    pub use_stereo: bool,
    #[serde(rename = "userVariables")]
    pub user_variables: Vec<Value>,
    pub video: bool,
}

impl CallDialogParams {
    /// Audio-only dialog params with empty caller identity.
    pub fn new(call_id: CallId) -> Self {
        Self {
            attach: false,
            audio: true,
            call_id,
            caller_id_name: String::new(),
            caller_id_number: String::new(),
            client_state: String::new(),
            destination_number: String::new(),
            remote_caller_id_name: String::new(),
            screen_share: false,
            use_stereo: false,
            user_variables: Vec::new(),
            video: false,
        }
    }
}

/// Payload shared by invite and answer.
#[derive(Debug, Clone, Serialize)]
pub struct CallParams {
    pub sessid: String,
    pub sdp: String,
    #[serde(rename = "User-Agent")]
    pub user_agent: String,
    #[serde(rename = "dialogParams")]
    pub dialog_params: CallDialogParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct ByeDialogParams {
    #[serde(rename = "callID")]
    pub call_id: CallId,
}

#[derive(Debug, Clone, Serialize)]
pub struct ByeParams {
    pub sessid: String,
    #[serde(rename = "causeCode")]
    pub cause_code: u16,
    pub cause: String,
    #[serde(rename = "dialogParams")]
    pub dialog_params: ByeDialogParams,
}

impl ByeParams {
    pub fn new(sessid: impl Into<String>, call_id: CallId, cause: CauseCode) -> Self {
        Self {
            sessid: sessid.into(),
            cause_code: cause.code(),
            cause: cause.name().to_string(),
            dialog_params: ByeDialogParams { call_id },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModifyAction {
    Hold,
    Unhold,
    Attach,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModifyParams {
    pub sessid: String,
    pub action: ModifyAction,
    #[serde(rename = "dialogParams")]
    pub dialog_params: CallDialogParams,
}

/// In-call signaling such as DTMF digits.
#[derive(Debug, Clone, Serialize)]
pub struct InfoParams {
    pub sessid: String,
    pub dtmf: String,
    #[serde(rename = "dialogParams")]
    pub dialog_params: CallDialogParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserVariables {
    pub push_device_token: String,
    pub push_notification_provider: String,
}

impl UserVariables {
    pub fn new(push_device_token: impl Into<String>) -> Self {
        Self {
            push_device_token: push_device_token.into(),
            push_notification_provider: DEFAULT_PUSH_PROVIDER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DisablePushParams {
    pub user: String,
    #[serde(rename = "User-Agent")]
    pub user_variables: UserVariables,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenDisablePushParams {
    #[serde(rename = "login_token")]
    pub login_token: String,
    #[serde(rename = "User-Agent")]
    pub user_variables: UserVariables,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachUserVariables {
    pub push_notification_environment: PushEnvironment,
    pub push_notification_provider: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachCallParams {
    #[serde(rename = "userVariables")]
    pub user_variables: AttachUserVariables,
}

impl AttachCallParams {
    pub fn new(environment: PushEnvironment) -> Self {
        Self {
            user_variables: AttachUserVariables {
                push_notification_environment: environment,
                push_notification_provider: DEFAULT_PUSH_PROVIDER.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StateParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(value: &Value) -> Vec<&str> {
        let mut keys: Vec<&str> = value
            .as_object()
            .expect("object")
            .keys()
            .map(String::as_str)
            .collect();
        keys.sort_unstable();
        keys
    }

    #[test]
    fn test_credential_login_wire_fields() {
        let msg = SignalingMessage::new(
            SocketMethod::Login,
            LoginParam::credential("alice", "secret", Some("fcm-token"), "sess-1"),
        );
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "login");
        assert_eq!(value["id"], msg.id.as_str());
        let params = &value["params"];
        assert_eq!(keys(params), vec!["login", "passwd", "sessid", "userVariables"]);
        assert_eq!(params["login"], "alice");
        assert_eq!(params["passwd"], "secret");
        assert_eq!(params["sessid"], "sess-1");
        assert_eq!(params["userVariables"]["push_device_token"], "fcm-token");
        assert_eq!(params["userVariables"]["push_notification_provider"], "android");
    }

    #[test]
    fn test_token_login_omits_absent_fields() {
        let params = serde_json::to_value(LoginParam::token("jwt", None, "sess-2")).unwrap();
        assert_eq!(keys(&params), vec!["login_token", "sessid", "userVariables"]);
        assert_eq!(params["login_token"], "jwt");
        assert_eq!(params["userVariables"], json!({}));
    }

    #[test]
    fn test_invite_dialog_params_field_names() {
        let call_id = CallId::new("0f9f4a5e-5d47-4c71-a5a8-0d3b1f3f4e11");
        let mut dialog = CallDialogParams::new(call_id);
        dialog.caller_id_name = "Oliver".into();
        dialog.caller_id_number = "+35387711111".into();
        dialog.destination_number = "+15551234567".into();
        dialog.client_state = "c3RhdGU=".into();
        let params = serde_json::to_value(CallParams {
            sessid: "sess".into(),
            sdp: "v=0".into(),
            user_agent: "verto-rust/0.1.0".into(),
            dialog_params: dialog,
        })
        .unwrap();

        assert_eq!(keys(&params), vec!["User-Agent", "dialogParams", "sdp", "sessid"]);
        assert_eq!(
            keys(&params["dialogParams"]),
            vec![
                "attach",
                "audio",
                "callID",
                "caller_id_name",
                "caller_id_number",
                "clientState",
                "destination_number",
                "remote_caller_id_name",
                "screenShare",
                "useStereo",
                "userVariables",
                "video",
            ]
        );
        assert_eq!(
            params["dialogParams"]["callID"],
            "0f9f4a5e-5d47-4c71-a5a8-0d3b1f3f4e11"
        );
        assert_eq!(params["dialogParams"]["clientState"], "c3RhdGU=");
    }

    #[test]
    fn test_bye_carries_numeric_cause_code() {
        let params = serde_json::to_value(ByeParams::new(
            "sess",
            CallId::new("call-1"),
            CauseCode::UserBusy,
        ))
        .unwrap();
        assert_eq!(
            params,
            json!({
                "sessid": "sess",
                "causeCode": 17,
                "cause": "USER_BUSY",
                "dialogParams": { "callID": "call-1" }
            })
        );
    }

    #[test]
    fn test_modify_and_info_payloads() {
        let modify = serde_json::to_value(ModifyParams {
            sessid: "sess".into(),
            action: ModifyAction::Unhold,
            dialog_params: CallDialogParams::new(CallId::new("c")),
        })
        .unwrap();
        assert_eq!(modify["action"], "unhold");
        assert_eq!(keys(&modify), vec!["action", "dialogParams", "sessid"]);

        let info = serde_json::to_value(InfoParams {
            sessid: "sess".into(),
            dtmf: "1#".into(),
            dialog_params: CallDialogParams::new(CallId::new("c")),
        })
        .unwrap();
        assert_eq!(keys(&info), vec!["dialogParams", "dtmf", "sessid"]);
    }

    #[test]
    fn test_push_payloads() {
        let by_user = serde_json::to_value(DisablePushParams {
            user: "alice".into(),
            user_variables: UserVariables::new("fcm"),
        })
        .unwrap();
        assert_eq!(
            by_user,
            json!({
                "user": "alice",
                "User-Agent": {
                    "push_device_token": "fcm",
                    "push_notification_provider": "android"
                }
            })
        );

        let by_token = serde_json::to_value(TokenDisablePushParams {
            login_token: "jwt".into(),
            user_variables: UserVariables::new("fcm"),
        })
        .unwrap();
        assert_eq!(keys(&by_token), vec!["User-Agent", "login_token"]);

        let attach =
            serde_json::to_value(AttachCallParams::new(PushEnvironment::Development)).unwrap();
        assert_eq!(
            attach,
            json!({
                "userVariables": {
                    "push_notification_environment": "development",
                    "push_notification_provider": "android"
                }
            })
        );
    }

    #[test]
    fn test_state_query_and_ping_ack() {
        assert_eq!(serde_json::to_value(StateParams::default()).unwrap(), json!({}));

        let ack = AckMessage::ping(json!(42));
        assert_eq!(
            serde_json::to_value(&ack).unwrap(),
            json!({ "jsonrpc": "2.0", "id": 42, "result": { "method": "telnyx_rtc.ping" } })
        );
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = SignalingMessage::new(SocketMethod::GatewayState, StateParams::default());
        let b = SignalingMessage::new(SocketMethod::GatewayState, StateParams::default());
        assert_ne!(a.id, b.id);
    }
}
