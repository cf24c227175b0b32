use chatrelay_peer::{ClientConfig, ServerConfig};

use crate::cmd::{client, server, ChatArgs};
use crate::exit::CliResult;
use crate::output::OutputFormat;

pub fn run(args: ChatArgs, format: OutputFormat) -> CliResult<i32> {
    if args.is_server() {
        let config = ServerConfig {
            host: args.host,
            port: args.port,
            ..ServerConfig::default()
        };
        return server::serve(config, format);
    }

    let config = ClientConfig {
        name: args.name,
        host: args.host,
        port: args.port,
        ..ClientConfig::default()
    };
    client::join(config, format)
}
