use anyhow::Context;
use chrono::Local;
use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use tokio::sync::broadcast::error::RecvError;
use verto_rust::calls::OutboundInvite;
use verto_rust::config::{ClientConfig, DEFAULT_PORT};
use verto_rust::types::config::{CredentialConfig, LogLevel, LoginConfig, TokenConfig};
use verto_rust::types::events::Event;
use verto_rust::Client;

// A small softphone-less demo: logs in, optionally dials a number, and prints every event
// until interrupted.
//
// Usage:
//   cargo run -- --user alice --password s3cret
//   cargo run -- --token "$TOKEN" --dial +15551234567
//   VERTO_PASSWORD=s3cret cargo run -- -u alice --dev --log-level debug

#[derive(Parser, Debug)]
#[command(version, about = "Connect to a Verto signaling server and watch the session")]
struct Args {
    /// Signaling host. Defaults to the production or development endpoint.
    #[arg(long)]
    host: Option<String>,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Use the development environment.
    #[arg(long)]
    dev: bool,

    /// Connect with plain `ws` instead of `wss`.
    #[arg(long)]
    no_tls: bool,

    #[arg(short, long, env = "VERTO_USER")]
    user: Option<String>,

    #[arg(short, long, env = "VERTO_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Login token, used instead of user/password.
    #[arg(short, long, env = "VERTO_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long)]
    caller_id_name: Option<String>,

    #[arg(long)]
    caller_id_number: Option<String>,

    /// Number to call once logged in.
    #[arg(short, long)]
    dial: Option<String>,

    #[arg(long, value_enum, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliLogLevel {
    None,
    Error,
    Warning,
    Info,
    Debug,
    Verto,
    All,
}

impl From<CliLogLevel> for LogLevel {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::None => LogLevel::None,
            CliLogLevel::Error => LogLevel::Error,
            CliLogLevel::Warning => LogLevel::Warning,
            CliLogLevel::Info => LogLevel::Info,
            CliLogLevel::Debug => LogLevel::Debug,
            CliLogLevel::Verto => LogLevel::Verto,
            CliLogLevel::All => LogLevel::All,
        }
    }
}

impl Args {
    fn login_config(&self) -> anyhow::Result<LoginConfig> {
        let log_level = self.log_level.into();
        if let Some(token) = &self.token {
            return Ok(LoginConfig::Token(TokenConfig {
                sip_token: token.clone(),
                sip_caller_id_name: self.caller_id_name.clone(),
                sip_caller_id_number: self.caller_id_number.clone(),
                push_token: None,
                log_level,
            }));
        }
        let user = self.user.clone().context("either --token or --user is required")?;
        let password = self
            .password
            .clone()
            .context("--password (or VERTO_PASSWORD) is required with --user")?;
        Ok(LoginConfig::Credential(CredentialConfig {
            sip_user: user,
            sip_password: password,
            sip_caller_id_name: self.caller_id_name.clone(),
            sip_caller_id_number: self.caller_id_number.clone(),
            push_token: None,
            log_level,
        }))
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = if self.dev {
            ClientConfig::development()
        } else {
            ClientConfig::production()
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        config.port = self.port;
        config.use_tls = !self.no_tls;
        config
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let login = args.login_config()?;
    let level = login.log_level().to_level_filter();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level.as_str().to_lowercase()),
    )
    .format(|buf, record| {
        use std::io::Write;
        writeln!(
            buf,
            "{} [{:<5}] [{}] - {}",
            Local::now().format("%H:%M:%S"),
            record.level(),
            record.target(),
            record.args()
        )
    })
    .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    rt.block_on(run(args, login))
}

async fn run(args: Args, login: LoginConfig) -> anyhow::Result<()> {
    let client = Client::new(args.client_config());
    let mut events = client.subscribe();

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(Event::CallStateChanged(change)) => {
                    info!("Call {} -> {}", change.call_id, change.state);
                }
                Ok(Event::MessageReceived(received)) => {
                    info!("Received {}", received.method);
                }
                Ok(Event::ConnectionEstablished(established)) => {
                    info!("Logged in, session {}", established.session_id);
                }
                Ok(Event::CallRefused(refused)) => {
                    warn!(
                        "Refused call {} ({}), {} calls already up",
                        refused.call_id,
                        refused.cause.name(),
                        refused.tracked
                    );
                }
                Ok(Event::Disconnected(disconnected)) => {
                    info!("Disconnected (expected: {})", disconnected.expected);
                }
                Ok(Event::Error(message)) => error!("{message}"),
                Ok(Event::Loading) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {skipped} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    client.connect().await?;
    client.login(&login).await?;

    if let Some(destination) = &args.dial {
        let call_id = client
            .place_invite(OutboundInvite {
                caller_id_name: login.caller_id_name().unwrap_or_default().to_string(),
                caller_id_number: login.caller_id_number().unwrap_or_default().to_string(),
                destination_number: destination.clone(),
                ..Default::default()
            })
            .await?;
        info!("Dialing {destination} as call {call_id}");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    if let Some(call) = client.current_call().await
        && !call.is_ended()
        && let Err(e) = client.end(&call.call_id).await
    {
        warn!("Failed to hang up {}: {e}", call.call_id);
    }
    client.disconnect().await;
    Ok(())
}
