use chatrelay_peer::{ChatServer, HandshakeConfig, ServerConfig};

use crate::cmd::{install_ctrlc_handler, parse_optional_duration, ServerArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_server_started, OutputFormat};

pub fn run(args: ServerArgs, format: OutputFormat) -> CliResult<i32> {
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        console: !args.no_console,
        handshake: HandshakeConfig {
            timeout: parse_optional_duration(&args.handshake_timeout)?,
            ..HandshakeConfig::default()
        },
        ..ServerConfig::default()
    };
    serve(config, format)
}

pub fn serve(config: ServerConfig, format: OutputFormat) -> CliResult<i32> {
    let console = config.console;
    let mut server = ChatServer::bind(config).map_err(|err| peer_error("bind failed", err))?;
    install_ctrlc_handler(server.shutdown_handle())?;

    print_server_started(server.local_addr(), console, format);
    server
        .run()
        .map_err(|err| peer_error("server loop failed", err))?;
    Ok(SUCCESS)
}
