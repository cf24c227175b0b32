use std::io;

use chatrelay_peer::{ChatClient, ClientConfig, TextView};
use chatrelay_transport::shutdown_channel;
use tracing::debug;

use crate::cmd::{install_ctrlc_handler, ClientArgs};
use crate::exit::{peer_error, transport_error, CliResult, SUCCESS};
use crate::output::{JsonView, OutputFormat};

pub fn run(args: ClientArgs, format: OutputFormat) -> CliResult<i32> {
    let config = ClientConfig {
        name: args.name,
        host: args.host,
        port: args.port,
        ..ClientConfig::default()
    };
    join(config, format)
}

pub fn join(config: ClientConfig, format: OutputFormat) -> CliResult<i32> {
    let (handle, mut shutdown) =
        shutdown_channel().map_err(|err| transport_error("shutdown channel setup failed", err))?;
    install_ctrlc_handler(handle)?;

    let port = config.port;
    let mut client = ChatClient::connect(config).map_err(|err| {
        peer_error(&format!("Failed to connect to chat server @ port {port}"), err)
    })?;

    let mut input = io::stdin();
    let reason = match format {
        OutputFormat::Json => {
            let mut view = JsonView::new(io::stdout());
            client.run(&mut input, &mut view, &mut shutdown)
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            let mut view = TextView::new(io::stdout());
            client.run(&mut input, &mut view, &mut shutdown)
        }
    }
    .map_err(|err| peer_error("chat session failed", err))?;

    debug!(?reason, "client exiting");
    Ok(SUCCESS)
}
