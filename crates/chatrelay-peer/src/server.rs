//! Single-threaded relay server driven by one readiness poll.

use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use chatrelay_frame::{Frame, FrameConfig, FrameError, FrameReader, FrameWriter};
use chatrelay_transport::{
    shutdown_channel, ChatListener, ChatStream, PollSet, ShutdownHandle, ShutdownSignal, Token,
};
use tracing::{debug, error, info, trace, warn};

use crate::broadcast::BroadcastSet;
use crate::error::{PeerError, Result};
use crate::handshake::{handshake_read_timeout, handshake_server, HandshakeConfig};
use crate::notice;
use crate::registry::{ConnectionId, Registry};

const LISTENER: Token = Token(0);
const CONSOLE: Token = Token(1);
const SHUTDOWN: Token = Token(2);
const FIRST_CONNECTION_ID: u64 = 3;

/// Longest one readiness event may spend reading a single connection.
const READ_BUDGET: Duration = Duration::from_millis(100);

/// Lifecycle of a [`ChatServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Bound, loop not entered yet.
    Listening,
    /// Processing readiness events.
    Running,
    /// Terminal. Every connection and the listener are closed by `run`.
    ShuttingDown,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// Port to bind. `0` asks the OS for a free one.
    pub port: u16,
    /// Watch stdin; one line of console input shuts the server down.
    pub console: bool,
    pub handshake: HandshakeConfig,
    /// Applied to every admitted connection.
    ///
    /// The read timeout bounds how long a partially received frame can hold
    /// up the loop before it moves on and resumes on the next readiness.
    pub frame: FrameConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: ChatListener::DEFAULT_HOST.to_string(),
            port: 0,
            console: true,
            handshake: HandshakeConfig::default(),
            frame: FrameConfig {
                read_timeout: Some(Duration::from_millis(100)),
                write_timeout: Some(Duration::from_secs(5)),
                ..FrameConfig::default()
            },
        }
    }
}

/// Relays chat messages between every connected client.
///
/// A connection is in the registry, the pollable set, and the broadcast
/// set together or in none of them. Joins and teardowns change all three
/// in one method before the next event is looked at.
pub struct ChatServer {
    listener: Option<ChatListener>,
    local_addr: SocketAddr,
    poller: PollSet,
    registry: Registry,
    broadcast: BroadcastSet<FrameWriter<ChatStream>>,
    inbound: HashMap<ConnectionId, FrameReader<ChatStream>>,
    next_id: u64,
    state: ServerState,
    shutdown: ShutdownSignal,
    shutdown_handle: ShutdownHandle,
    console: Option<io::Stdin>,
    config: ServerConfig,
}

impl ChatServer {
    /// Bind the listener and seed the pollable set.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let listener = ChatListener::bind(&config.host, config.port)?;
        let local_addr = listener.local_addr();
        let (shutdown_handle, shutdown) = shutdown_channel()?;

        let mut poller = PollSet::new();
        poller.add(LISTENER, &listener);
        poller.add(SHUTDOWN, &shutdown);

        let console = if config.console {
            let stdin = io::stdin();
            poller.add(CONSOLE, &stdin);
            Some(stdin)
        } else {
            None
        };

        Ok(Self {
            listener: Some(listener),
            local_addr,
            poller,
            registry: Registry::new(),
            broadcast: BroadcastSet::new(),
            inbound: HashMap::new(),
            next_id: FIRST_CONNECTION_ID,
            state: ServerState::Listening,
            shutdown,
            shutdown_handle,
            console,
            config,
        })
    }

    /// Loop until shutdown, then close everything.
    ///
    /// A poll failure is fatal: connections are closed and the error is
    /// returned.
    pub fn run(&mut self) -> Result<()> {
        info!(addr = %self.local_addr, "chat server running");
        let result = loop {
            match self.step(None) {
                Ok(ServerState::ShuttingDown) => break Ok(()),
                Ok(_) => {}
                Err(err) => {
                    error!(error = %err, "poll failed, shutting down");
                    break Err(err);
                }
            }
        };
        self.close_all();
        info!("chat server stopped");
        result
    }

    /// One readiness cycle: wait up to `timeout`, then handle every ready
    /// source in registration order.
    pub fn step(&mut self, timeout: Option<Duration>) -> Result<ServerState> {
        if self.state == ServerState::ShuttingDown {
            return Ok(self.state);
        }
        self.state = ServerState::Running;

        let ready = self.poller.wait(timeout)?;
        for token in ready {
            if self.state == ServerState::ShuttingDown {
                break;
            }
            match token {
                LISTENER => self.accept_connection(),
                CONSOLE => self.handle_console(),
                SHUTDOWN => self.handle_shutdown(),
                Token(raw) => self.handle_client(ConnectionId(raw as u64)),
            }
        }

        self.debug_check_memberships();
        Ok(self.state)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Number of joined clients.
    pub fn connection_count(&self) -> usize {
        self.broadcast.len()
    }

    /// Handle that makes the loop shut down from any thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown_handle.clone()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn accept_connection(&mut self) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        let (stream, addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "accept failed");
                return;
            }
        };

        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        debug!(connection = %id, peer = %addr, "accepted connection");

        if let Err(err) = self.admit(id, stream, addr) {
            warn!(connection = %id, peer = %addr, error = %err, "connection rejected");
        }
    }

    fn admit(&mut self, id: ConnectionId, stream: ChatStream, addr: SocketAddr) -> Result<()> {
        let frame_config = self.config.frame.clone();
        let mut reader = FrameReader::with_config(stream.try_clone()?, frame_config.clone());
        let mut writer = FrameWriter::with_config_tcp(stream, frame_config)?;

        reader.set_read_timeout(handshake_read_timeout(
            self.config.handshake.timeout,
            self.config.frame.read_timeout,
        ))?;

        let name = match handshake_server(&mut reader, &mut writer, addr, &self.config.handshake) {
            Ok(name) => name,
            Err(err) => {
                let _ = writer.get_ref().close();
                return Err(err);
            }
        };
        reader.set_read_timeout(self.config.frame.read_timeout)?;

        self.join(id, addr, &name, reader, writer)
    }

    fn join(
        &mut self,
        id: ConnectionId,
        addr: SocketAddr,
        name: &str,
        reader: FrameReader<ChatStream>,
        writer: FrameWriter<ChatStream>,
    ) -> Result<()> {
        if self.registry.contains(id)
            || self.poller.contains(id.token())
            || self.broadcast.contains(id)
        {
            return Err(PeerError::DuplicateRegistration(id));
        }

        self.registry.register(id, addr, name)?;
        self.poller.add(id.token(), reader.get_ref());
        self.broadcast
            .insert(id, writer)
            .map_err(|_| PeerError::DuplicateRegistration(id))?;
        self.inbound.insert(id, reader);

        let label = self.registry.display_label(id)?;
        let clients = self.broadcast.len();
        info!(connection = %id, client = %label, clients, "client joined");
        self.fan_out(Some(id), notice::joined(clients, &label));
        Ok(())
    }

    fn handle_console(&mut self) {
        if let Some(console) = self.console.as_ref() {
            let mut line = String::new();
            if let Err(err) = console.read_line(&mut line) {
                debug!(error = %err, "console read failed");
            }
        }
        info!("console input received, shutting down");
        self.state = ServerState::ShuttingDown;
    }

    fn handle_shutdown(&mut self) {
        if self.shutdown.drain() {
            info!("shutdown requested");
            self.state = ServerState::ShuttingDown;
        }
    }

    fn handle_client(&mut self, id: ConnectionId) {
        let Some(reader) = self.inbound.get_mut(&id) else {
            trace!(connection = %id, "event for departed connection");
            return;
        };

        match reader.read_message_until(Instant::now() + READ_BUDGET) {
            Ok(Some(content)) => {
                let label = match self.registry.display_label(id) {
                    Ok(label) => label,
                    Err(err) => {
                        warn!(connection = %id, error = %err, "message from unregistered connection");
                        self.disconnect(id);
                        return;
                    }
                };
                debug!(connection = %id, size = content.len(), "relaying message");
                self.fan_out(Some(id), notice::chat_line(&label, &content));
            }
            Ok(None) => {
                debug!(connection = %id, "peer closed");
                self.disconnect(id);
            }
            Err(FrameError::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                trace!(connection = %id, "frame incomplete, resuming on next readiness");
            }
            Err(err) => {
                warn!(connection = %id, error = %err, "read failed");
                self.disconnect(id);
            }
        }
    }

    /// Tear `id` down and tell everyone left.
    fn disconnect(&mut self, id: ConnectionId) {
        if let Some(label) = self.teardown(id) {
            self.fan_out(None, notice::hung_up(&label));
        }
    }

    /// Broadcast `text`, then tear down every target that failed. Each
    /// removed target gets its own leave notice, which may fail further
    /// targets in turn.
    fn fan_out(&mut self, exclude: Option<ConnectionId>, text: String) {
        let mut pending = VecDeque::from([(exclude, text)]);
        while let Some((exclude, text)) = pending.pop_front() {
            let outcome = self.broadcast.broadcast(exclude, &Frame::text(&text));
            for (id, _) in outcome.failed {
                if let Some(label) = self.teardown(id) {
                    pending.push_back((None, notice::hung_up(&label)));
                }
            }
        }
    }

    /// Remove `id` from the broadcast set, the pollable set, and the
    /// registry, in that order. Returns its label, or `None` if it was
    /// already gone.
    fn teardown(&mut self, id: ConnectionId) -> Option<String> {
        let label = self.registry.display_label(id).ok()?;

        if let Some(writer) = self.broadcast.remove(id) {
            if let Err(err) = writer.get_ref().close() {
                debug!(connection = %id, error = %err, "close failed");
            }
        }
        self.poller.remove(id.token());
        self.inbound.remove(&id);
        self.registry.unregister(id);

        info!(connection = %id, client = %label, clients = self.broadcast.len(), "client left");
        Some(label)
    }

    fn close_all(&mut self) {
        let members: Vec<_> = self.broadcast.drain().collect();
        for (id, writer) in members {
            if let Err(err) = writer.get_ref().close() {
                debug!(connection = %id, error = %err, "close failed");
            }
            self.poller.remove(id.token());
            self.inbound.remove(&id);
            self.registry.unregister(id);
        }
        self.poller.remove(LISTENER);
        self.listener = None;
        self.state = ServerState::ShuttingDown;
    }

    fn debug_check_memberships(&self) {
        debug_assert_eq!(self.registry.len(), self.broadcast.len());
        debug_assert_eq!(self.inbound.len(), self.broadcast.len());
        debug_assert!(self
            .broadcast
            .ids()
            .all(|id| self.registry.contains(id) && self.poller.contains(id.token())));
    }
}

impl std::fmt::Debug for ChatServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatServer")
            .field("local_addr", &self.local_addr)
            .field("state", &self.state)
            .field("connections", &self.broadcast.len())
            .finish()
    }
}
