use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use chatrelay_peer::ChatView;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use crate::cmd::probe::ProbeReport;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ServerStarted {
    event: &'static str,
    host: String,
    port: u16,
    console: bool,
    timestamp: String,
}

pub fn print_server_started(addr: SocketAddr, console: bool, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ServerStarted {
                event: "listening",
                host: addr.ip().to_string(),
                port: addr.port(),
                console,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Server listening to port: {} ...", addr.port());
            if console {
                println!("Press Enter to stop the server.");
            }
        }
    }
    let _ = io::stdout().flush();
}

pub fn print_probe(report: &ProbeReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SERVER", "NAME", "OBSERVED HOST", "HANDSHAKE"])
                .add_row(vec![
                    report.server.clone(),
                    report.name.clone(),
                    report.observed_host.clone(),
                    format!("{:.2}ms", report.handshake_ms),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Probe:");
            println!("  Server:        {}", report.server);
            println!("  Name:          {}", report.name);
            println!("  Observed host: {}", report.observed_host);
            println!("  Prompt:        {}", report.prompt);
            println!("  Handshake:     {:.2}ms", report.handshake_ms);
        }
    }
}

#[derive(Serialize)]
struct ChatEvent<'a> {
    event: &'a str,
    text: &'a str,
    timestamp: String,
}

/// One JSON object per line for every message and status change.
///
/// Prompts are dropped; they only make sense on a terminal.
pub struct JsonView<W> {
    out: W,
}

impl<W: Write> JsonView<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn emit(&mut self, event: &str, text: &str) -> io::Result<()> {
        let line = serde_json::to_string(&ChatEvent {
            event,
            text,
            timestamp: now_unix_seconds(),
        })
        .map_err(io::Error::other)?;
        writeln!(self.out, "{line}")?;
        self.out.flush()
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ChatView for JsonView<W> {
    fn prompt(&mut self, _prompt: &str) -> io::Result<()> {
        Ok(())
    }

    fn message(&mut self, text: &str) -> io::Result<()> {
        self.emit("message", text)
    }

    fn status(&mut self, text: &str) -> io::Result<()> {
        self.emit("status", text)
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_view_emits_one_object_per_line() {
        let mut view = JsonView::new(Vec::new());
        view.prompt("[a@h]> ").unwrap();
        view.message("\n#[@b@h]>> hi").unwrap();
        view.status("Client shutting down.").unwrap();

        let out = String::from_utf8(view.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "message");
        assert_eq!(lines[0]["text"], "\n#[@b@h]>> hi");
        assert_eq!(lines[1]["event"], "status");
    }
}
