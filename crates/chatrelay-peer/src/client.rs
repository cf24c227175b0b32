//! Interactive chat client: one loop over local input and the server.

use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::time::Duration;

use chatrelay_frame::{FrameConfig, FrameError, FrameReader, FrameWriter};
use chatrelay_transport::{ChatListener, ChatStream, PollSet, ShutdownSignal, Token};
use tracing::{debug, info, warn};

use crate::error::{PeerError, Result};
use crate::handshake::{handshake_client, handshake_read_timeout, HandshakeConfig};

const INPUT: Token = Token(0);
const SERVER: Token = Token(1);
const SHUTDOWN: Token = Token(2);

/// At least as large as std's stdin buffer, so reads go straight to the fd
/// and nothing is left buffered where `poll(2)` cannot see it.
const INPUT_CHUNK_SIZE: usize = 16 * 1024;

/// Status line shown when the server goes away.
pub const SHUTTING_DOWN: &str = "Client shutting down.";
/// Status line shown when the session is interrupted locally.
pub const INTERRUPTED: &str = "Client interrupted.";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Display name announced to the server.
    pub name: String,
    pub host: String,
    pub port: u16,
    pub handshake: HandshakeConfig,
    pub frame: FrameConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: ChatListener::DEFAULT_HOST.to_string(),
            port: 0,
            handshake: HandshakeConfig::default(),
            frame: FrameConfig {
                read_timeout: Some(Duration::from_millis(100)),
                write_timeout: Some(Duration::from_secs(5)),
                ..FrameConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Connected,
    Disconnected,
}

/// Why [`ChatClient::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the connection.
    PeerClosed,
    /// The shutdown signal fired.
    Interrupted,
    /// Local input reached end of file.
    InputClosed,
}

/// Where the client shows what happens.
pub trait ChatView {
    /// Show the input prompt. Called before every wait.
    fn prompt(&mut self, prompt: &str) -> io::Result<()>;
    /// Show one message relayed by the server.
    fn message(&mut self, text: &str) -> io::Result<()>;
    /// Show a client status line.
    fn status(&mut self, text: &str) -> io::Result<()>;
}

/// Plain terminal output.
#[derive(Debug)]
pub struct TextView<W> {
    out: W,
}

impl<W: Write> TextView<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ChatView for TextView<W> {
    fn prompt(&mut self, prompt: &str) -> io::Result<()> {
        write!(self.out, "{prompt}")?;
        self.out.flush()
    }

    fn message(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{text}")?;
        self.out.flush()
    }

    fn status(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{text}")?;
        self.out.flush()
    }
}

/// A joined chat session.
pub struct ChatClient {
    reader: FrameReader<ChatStream>,
    writer: FrameWriter<ChatStream>,
    name: String,
    observed_host: String,
    prompt: String,
    state: ClientState,
    pending_input: Vec<u8>,
}

impl ChatClient {
    /// Connect and complete the join handshake.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        debug!(%addr, name = %config.name, "connecting");

        let stream = ChatListener::connect(&config.host, config.port)
            .map_err(|source| PeerError::ConnectFailed { addr, source })?;
        let mut reader = FrameReader::with_config(stream.try_clone()?, config.frame.clone());
        let mut writer = FrameWriter::with_config_tcp(stream, config.frame.clone())?;

        reader.set_read_timeout(handshake_read_timeout(
            config.handshake.timeout,
            config.frame.read_timeout,
        ))?;
        let handshake =
            match handshake_client(&mut reader, &mut writer, &config.name, &config.handshake) {
                Ok(result) => result,
                Err(err) => {
                    let _ = writer.get_ref().close();
                    return Err(err);
                }
            };
        reader.set_read_timeout(config.frame.read_timeout)?;

        let prompt = format!("[{}@{}]> ", handshake.name, handshake.observed_host);
        info!(name = %handshake.name, host = %handshake.observed_host, "joined chat server");

        Ok(Self {
            reader,
            writer,
            name: handshake.name,
            observed_host: handshake.observed_host,
            prompt,
            state: ClientState::Connected,
            pending_input: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Our address as the server reported it.
    pub fn observed_host(&self) -> &str {
        &self.observed_host
    }

    /// `[<name>@<host>]> `
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Drive the session until the server closes, input ends, or `shutdown`
    /// fires. The connection is closed on return, whether or not the
    /// session ended cleanly.
    pub fn run<I, V>(
        &mut self,
        input: &mut I,
        view: &mut V,
        shutdown: &mut ShutdownSignal,
    ) -> Result<DisconnectReason>
    where
        I: Read + AsRawFd,
        V: ChatView,
    {
        if self.state == ClientState::Disconnected {
            return Err(PeerError::Disconnected("session already ended".to_string()));
        }

        let outcome = self.session(input, view, shutdown);
        self.close();
        match &outcome {
            Ok(reason) => info!(?reason, "chat session ended"),
            Err(err) => warn!(error = %err, "chat session failed"),
        }
        outcome
    }

    fn session<I, V>(
        &mut self,
        input: &mut I,
        view: &mut V,
        shutdown: &mut ShutdownSignal,
    ) -> Result<DisconnectReason>
    where
        I: Read + AsRawFd,
        V: ChatView,
    {
        let mut poller = PollSet::new();
        poller.add(INPUT, &*input);
        poller.add(SERVER, self.reader.get_ref());
        poller.add(SHUTDOWN, &*shutdown);

        loop {
            view.prompt(&self.prompt).map_err(PeerError::Console)?;

            for token in poller.wait(None)? {
                let reason = match token {
                    INPUT => self.handle_input(input, view)?,
                    SERVER => self.handle_server(view)?,
                    SHUTDOWN if shutdown.drain() => {
                        view.status(INTERRUPTED).map_err(PeerError::Console)?;
                        Some(DisconnectReason::Interrupted)
                    }
                    _ => None,
                };
                if let Some(reason) = reason {
                    return Ok(reason);
                }
            }
        }
    }

    fn handle_input<I: Read, V: ChatView>(
        &mut self,
        input: &mut I,
        view: &mut V,
    ) -> Result<Option<DisconnectReason>> {
        let mut chunk = [0u8; INPUT_CHUNK_SIZE];
        let read = match input.read(&mut chunk) {
            Ok(n) => n,
            Err(err)
                if err.kind() == ErrorKind::Interrupted || err.kind() == ErrorKind::WouldBlock =>
            {
                return Ok(None)
            }
            Err(err) => return Err(PeerError::Console(err)),
        };

        if read == 0 {
            // Flush an unterminated last line before hanging up.
            let rest = std::mem::take(&mut self.pending_input);
            if self.send_line(&rest).is_err() {
                return self.server_gone(view);
            }
            return Ok(Some(DisconnectReason::InputClosed));
        }

        self.pending_input.extend_from_slice(&chunk[..read]);
        while let Some(end) = self.pending_input.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending_input.drain(..=end).collect();
            if self.send_line(&line).is_err() {
                return self.server_gone(view);
            }
        }
        Ok(None)
    }

    fn send_line(&mut self, line: &[u8]) -> chatrelay_frame::Result<()> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        debug!(size = text.len(), "sending message");
        self.writer.send_message(text).inspect_err(|err| {
            warn!(error = %err, "send to server failed");
        })
    }

    fn handle_server<V: ChatView>(&mut self, view: &mut V) -> Result<Option<DisconnectReason>> {
        match self.reader.read_message() {
            Ok(Some(message)) => {
                view.message(&message).map_err(PeerError::Console)?;
                Ok(None)
            }
            Ok(None) => self.server_gone(view),
            Err(FrameError::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(err) => {
                warn!(error = %err, "read from server failed");
                self.server_gone(view)
            }
        }
    }

    fn server_gone<V: ChatView>(&mut self, view: &mut V) -> Result<Option<DisconnectReason>> {
        view.status(SHUTTING_DOWN).map_err(PeerError::Console)?;
        Ok(Some(DisconnectReason::PeerClosed))
    }

    fn close(&mut self) {
        if self.state == ClientState::Disconnected {
            return;
        }
        if let Err(err) = self.writer.get_ref().close() {
            debug!(error = %err, "close failed");
        }
        self.state = ClientState::Disconnected;
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("name", &self.name)
            .field("observed_host", &self.observed_host)
            .field("state", &self.state)
            .finish()
    }
}
