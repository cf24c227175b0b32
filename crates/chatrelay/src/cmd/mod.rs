use std::time::Duration;

use chatrelay_transport::{ChatListener, ShutdownHandle};
use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::logging::LogLevel;
use crate::output::OutputFormat;

pub mod chat;
pub mod client;
pub mod probe;
pub mod server;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server.
    Server(ServerArgs),
    /// Join a server and chat interactively.
    Client(ClientArgs),
    /// Join a server, print what it reports about us, and leave.
    Probe(ProbeArgs),
    /// Run as server when --name is "server", otherwise as client.
    Chat(ChatArgs),
    /// Show version information.
    Version(VersionArgs),
}

impl Command {
    pub fn default_log_level(&self) -> LogLevel {
        match self {
            Command::Server(_) => LogLevel::Info,
            Command::Chat(args) if args.is_server() => LogLevel::Info,
            _ => LogLevel::Warn,
        }
    }
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Server(args) => server::run(args, format),
        Command::Client(args) => client::run(args, format),
        Command::Probe(args) => probe::run(args, format),
        Command::Chat(args) => chat::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Port to listen on.
    #[arg(long, env = "CHATRELAY_PORT")]
    pub port: u16,
    /// Address to bind.
    #[arg(long, env = "CHATRELAY_HOST", default_value = ChatListener::DEFAULT_HOST)]
    pub host: String,
    /// How long a new client may take to send its name (e.g. 5s, 500ms, off).
    #[arg(long, default_value = "5s")]
    pub handshake_timeout: String,
    /// Do not stop on console input.
    #[arg(long)]
    pub no_console: bool,
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Display name announced to the server.
    #[arg(long, env = "CHATRELAY_NAME")]
    pub name: String,
    /// Server port.
    #[arg(long, env = "CHATRELAY_PORT")]
    pub port: u16,
    /// Server host.
    #[arg(long, env = "CHATRELAY_HOST", default_value = ChatListener::DEFAULT_HOST)]
    pub host: String,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Server port.
    #[arg(long, env = "CHATRELAY_PORT")]
    pub port: u16,
    /// Server host.
    #[arg(long, env = "CHATRELAY_HOST", default_value = ChatListener::DEFAULT_HOST)]
    pub host: String,
    /// Display name to join with.
    #[arg(long, default_value = "probe")]
    pub name: String,
    /// Give up after this long (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// "server" to run the relay, anything else to join as that name.
    #[arg(long, env = "CHATRELAY_NAME")]
    pub name: String,
    /// Port to listen on or connect to.
    #[arg(long, env = "CHATRELAY_PORT")]
    pub port: u16,
    /// Address to bind or connect to.
    #[arg(long, env = "CHATRELAY_HOST", default_value = ChatListener::DEFAULT_HOST)]
    pub host: String,
}

impl ChatArgs {
    pub fn is_server(&self) -> bool {
        self.name == "server"
    }
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `5s`, `500ms`, or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Like [`parse_duration`], but `off` disables the bound.
pub fn parse_optional_duration(input: &str) -> CliResult<Option<Duration>> {
    if input.trim().eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    parse_duration(input).map(Some)
}

/// Route Ctrl-C to a pollable shutdown channel.
pub fn install_ctrlc_handler(handle: ShutdownHandle) -> CliResult<()> {
    ctrlc::set_handler(move || {
        let _ = handle.trigger();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
