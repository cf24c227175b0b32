use std::io::ErrorKind;
use std::thread;
use std::time::{Duration, Instant};

use chatrelay_peer::{ChatClient, ClientConfig, HandshakeConfig, PeerError};
use chatrelay_transport::TransportError;
use serde::Serialize;

use crate::cmd::{parse_duration, ProbeArgs};
use crate::exit::{peer_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_probe, OutputFormat};

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Serialize)]
pub struct ProbeReport {
    pub server: String,
    pub name: String,
    pub observed_host: String,
    pub prompt: String,
    pub handshake_ms: f64,
    pub joined: bool,
}

pub fn run(args: ProbeArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let config = ClientConfig {
        name: args.name,
        host: args.host,
        port: args.port,
        handshake: HandshakeConfig {
            timeout: Some(timeout),
            ..HandshakeConfig::default()
        },
        ..ClientConfig::default()
    };
    let server = format!("{}:{}", config.host, config.port);

    let started = Instant::now();
    let client = connect_with_retry(config, timeout)?;
    let elapsed = started.elapsed();

    let report = ProbeReport {
        server,
        name: client.name().to_string(),
        observed_host: client.observed_host().to_string(),
        prompt: client.prompt().to_string(),
        handshake_ms: (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
        joined: true,
    };
    drop(client);

    print_probe(&report, format);
    Ok(SUCCESS)
}

/// Retry refused connections until `timeout`, so a probe can wait for a
/// server that is still starting.
fn connect_with_retry(config: ClientConfig, timeout: Duration) -> CliResult<ChatClient> {
    let start = Instant::now();
    loop {
        match ChatClient::connect(config.clone()) {
            Ok(client) => return Ok(client),
            Err(err) => {
                if !is_retryable_connect_error(&err) {
                    return Err(peer_error("probe failed", err));
                }
                if start.elapsed() >= timeout {
                    return Err(CliError::new(
                        TIMEOUT,
                        format!("connect timed out after {timeout:?}"),
                    ));
                }
                thread::sleep(RETRY_INTERVAL);
            }
        }
    }
}

fn is_retryable_connect_error(err: &PeerError) -> bool {
    match err {
        PeerError::ConnectFailed {
            source: TransportError::Connect { source, .. },
            ..
        } => source.kind() == ErrorKind::ConnectionRefused,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn only_refused_connects_are_retried() {
        let refused = PeerError::ConnectFailed {
            addr: "127.0.0.1:9".to_string(),
            source: TransportError::Connect {
                addr: "127.0.0.1:9".to_string(),
                source: io::Error::from(ErrorKind::ConnectionRefused),
            },
        };
        assert!(is_retryable_connect_error(&refused));
        assert!(!is_retryable_connect_error(&PeerError::HandshakeFailed(
            "x".to_string()
        )));
    }
}
