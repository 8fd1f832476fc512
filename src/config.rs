use std::time::Duration;
use vertocore::types::push::PushEnvironment;

pub const PRODUCTION_HOST: &str = "rtc.telnyx.com";
pub const DEVELOPMENT_HOST: &str = "rtcdev.telnyx.com";
pub const DEFAULT_PORT: u16 = 14938;
pub const DEFAULT_USER_AGENT: &str = concat!("verto-rust/", env!("CARGO_PKG_VERSION"));

/// What the client does when the transport drops without being asked to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempt one reconnect while the network is reachable.
    pub enabled: bool,
    /// Repeat the last successful login after reconnecting. Off by default: re-authentication
    /// is otherwise the host's job.
    pub resend_login: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            resend_login: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// `wss` when set, plain `ws` otherwise.
    pub use_tls: bool,
    pub login_timeout: Duration,
    pub invite_timeout: Duration,
    pub push_resume_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub event_capacity: usize,
    pub push_environment: PushEnvironment,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl ClientConfig {
    pub fn production() -> Self {
        Self {
            host: PRODUCTION_HOST.to_string(),
            port: DEFAULT_PORT,
            use_tls: true,
            login_timeout: Duration::from_secs(10),
            invite_timeout: Duration::from_secs(10),
            push_resume_timeout: Duration::from_secs(15),
            reconnect: ReconnectPolicy::default(),
            event_capacity: crate::types::events::CHANNEL_CAPACITY,
            push_environment: PushEnvironment::Production,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    pub fn development() -> Self {
        Self {
            host: DEVELOPMENT_HOST.to_string(),
            push_environment: PushEnvironment::Development,
            ..Self::production()
        }
    }
}
