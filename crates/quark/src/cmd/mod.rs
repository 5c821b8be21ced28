use std::time::Duration;

use clap::{Args, Subcommand};
use quark_session::{Session, SessionConfig};
use tracing::debug;

use crate::exit::{session_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod describe;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bootstrap a session and print the published API.
    Describe(DescribeArgs),
    /// Call one remote method and print its result.
    Call(CallArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Describe(args) => describe::run(args, format),
        Command::Call(args) => call::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Endpoint and session options shared by commands that connect.
#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// URL serving the API document (http, https, ws or wss).
    #[arg(long, env = "QUARK_API_URL")]
    pub api: String,
    /// URL receiving calls. Defaults to the API URL.
    #[arg(long, env = "QUARK_SERVICE_URL")]
    pub service: Option<String>,
    /// Per-call timeout (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
    /// Send payloads without gzip.
    #[arg(long)]
    pub no_compress: bool,
    /// Fail calls instead of sending them in clear when no key was negotiated.
    #[arg(long)]
    pub require_encryption: bool,
    /// Reject unknown fields in method declarations.
    #[arg(long)]
    pub strict: bool,
}

impl ConnectArgs {
    pub fn session_config(&self) -> CliResult<SessionConfig> {
        let service = self.service.clone().unwrap_or_else(|| self.api.clone());
        let timeout = parse_timeout(&self.timeout)?;
        let mut config = SessionConfig::new(self.api.clone(), service)
            .with_call_timeout(timeout)
            .with_compress(!self.no_compress)
            .with_require_encryption(self.require_encryption);
        config.parse = config.parse.with_strict_mode(self.strict);
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct DescribeArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Dotted method path, e.g. io.greenscreens.Demo.hello.
    pub path: String,
    /// Arguments as JSON values. Text that is not valid JSON is sent as a string.
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::new(INTERNAL, format!("failed to start runtime: {e}")))
}

/// Create and initialize a session for `args`.
pub async fn open_session(args: &ConnectArgs) -> CliResult<Session> {
    let config = args.session_config()?;
    let session = Session::new(config).map_err(|e| session_error("invalid session", e))?;
    debug!(session_id = %session.id(), "session created");
    session
        .init()
        .await
        .map_err(|e| session_error("bootstrap failed", e))?;
    Ok(session)
}

pub fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
