use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Method names understood by the signaling server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketMethod {
    Login,
    Invite,
    Answer,
    Bye,
    Modify,
    Info,
    Media,
    Ringing,
    ClientReady,
    GatewayState,
    Ping,
    AttachCalls,
    DisablePush,
}

impl SocketMethod {
    pub const ALL: [SocketMethod; 13] = [
        Self::Login,
        Self::Invite,
        Self::Answer,
        Self::Bye,
        Self::Modify,
        Self::Info,
        Self::Media,
        Self::Ringing,
        Self::ClientReady,
        Self::GatewayState,
        Self::Ping,
        Self::AttachCalls,
        Self::DisablePush,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Invite => "telnyx_rtc.invite",
            Self::Answer => "telnyx_rtc.answer",
            Self::Bye => "telnyx_rtc.bye",
            Self::Modify => "telnyx_rtc.modify",
            Self::Info => "telnyx_rtc.info",
            Self::Media => "telnyx_rtc.media",
            Self::Ringing => "telnyx_rtc.ringing",
            Self::ClientReady => "telnyx_rtc.clientReady",
            Self::GatewayState => "telnyx_rtc.gatewayState",
            Self::Ping => "telnyx_rtc.ping",
            Self::AttachCalls => "telnyx_rtc.attachCalls",
            Self::DisablePush => "telnyx_rtc.disable_push_notification",
        }
    }
}

impl fmt::Display for SocketMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SocketMethod {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Error returned when a method name is not one we know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMethod(pub String);

impl FromStr for SocketMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}
