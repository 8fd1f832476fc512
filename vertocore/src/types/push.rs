use super::call::CallId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Push service environment the device token was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushEnvironment {
    #[default]
    Production,
    Development,
}

/// Call metadata delivered in a push notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMetaData {
    pub call_id: CallId,
    #[serde(default)]
    pub caller_name: String,
    #[serde(default)]
    pub caller_number: String,
    /// The raw push payload as delivered.
    #[serde(default)]
    pub payload: Value,
}

/// What the user chose on the push notification before the app was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushAction {
    Accept,
    Reject,
}
