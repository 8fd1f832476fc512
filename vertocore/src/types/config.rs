//! Login configuration supplied by the host's credential storage or UI.

use serde::{Deserialize, Serialize};

/// Verbosity requested by the host for this client's logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogLevel {
    #[default]
    None,
    Error,
    Warning,
    Info,
    Debug,
    /// Everything, including raw protocol frames.
    Verto,
    All,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            Self::None => log::LevelFilter::Off,
            Self::Error => log::LevelFilter::Error,
            Self::Warning => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Verto | Self::All => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub sip_user: String,
    pub sip_password: String,
    pub sip_caller_id_name: Option<String>,
    pub sip_caller_id_number: Option<String>,
    pub push_token: Option<String>,
    #[serde(default)]
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub sip_token: String,
    pub sip_caller_id_name: Option<String>,
    pub sip_caller_id_number: Option<String>,
    pub push_token: Option<String>,
    #[serde(default)]
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    Credential,
    Token,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginConfig {
    Credential(CredentialConfig),
    Token(TokenConfig),
}

impl LoginConfig {
    pub fn auth_mode(&self) -> AuthMode {
        match self {
            Self::Credential(_) => AuthMode::Credential,
            Self::Token(_) => AuthMode::Token,
        }
    }

    pub fn push_token(&self) -> Option<&str> {
        match self {
            Self::Credential(c) => c.push_token.as_deref(),
            Self::Token(t) => t.push_token.as_deref(),
        }
    }

    pub fn caller_id_name(&self) -> Option<&str> {
        match self {
            Self::Credential(c) => c.sip_caller_id_name.as_deref(),
            Self::Token(t) => t.sip_caller_id_name.as_deref(),
        }
    }

    pub fn caller_id_number(&self) -> Option<&str> {
        match self {
            Self::Credential(c) => c.sip_caller_id_number.as_deref(),
            Self::Token(t) => t.sip_caller_id_number.as_deref(),
        }
    }

    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Credential(c) => c.log_level,
            Self::Token(t) => t.log_level,
        }
    }
}

impl From<CredentialConfig> for LoginConfig {
    fn from(config: CredentialConfig) -> Self {
        Self::Credential(config)
    }
}

impl From<TokenConfig> for LoginConfig {
    fn from(config: TokenConfig) -> Self {
        Self::Token(config)
    }
}
