use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one call. Outbound calls get a fresh UUID; inbound calls carry the
/// id chosen by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Lifecycle of a call.
///
/// `New` → `Connecting` (outbound) or `Ringing` (inbound) → `Active` ⇄ `Held` → `Done`.
/// `Done` is terminal and reachable from every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    #[default]
    New,
    Connecting,
    Ringing,
    Active,
    Held,
    Done,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Counts toward the socket's ongoing-call flag.
    pub fn is_ongoing(&self) -> bool {
        !matches!(self, Self::New | Self::Done)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "NEW",
            Self::Connecting => "CONNECTING",
            Self::Ringing => "RINGING",
            Self::Active => "ACTIVE",
            Self::Held => "HELD",
            Self::Done => "DONE",
        };
        f.write_str(s)
    }
}

/// Hangup causes carried in a bye.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CauseCode {
    NormalClearing,
    UserBusy,
    NoAnswer,
    CallRejected,
    RecoveryOnTimerExpire,
}

impl CauseCode {
    pub fn code(&self) -> u16 {
        match self {
            Self::NormalClearing => 16,
            Self::UserBusy => 17,
            Self::NoAnswer => 19,
            Self::CallRejected => 21,
            Self::RecoveryOnTimerExpire => 102,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NormalClearing => "NORMAL_CLEARING",
            Self::UserBusy => "USER_BUSY",
            Self::NoAnswer => "NO_ANSWER",
            Self::CallRejected => "CALL_REJECTED",
            Self::RecoveryOnTimerExpire => "RECOVERY_ON_TIMER_EXPIRE",
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        [
            Self::NormalClearing,
            Self::UserBusy,
            Self::NoAnswer,
            Self::CallRejected,
            Self::RecoveryOnTimerExpire,
        ]
        .into_iter()
        .find(|c| c.code() == code)
    }
}

/// Local audio route. Changing it never touches the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AudioDevice {
    #[default]
    Earpiece,
    Speaker,
    Bluetooth,
}
