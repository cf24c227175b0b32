use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::ChatStream;

/// TCP listening socket for the chat server.
///
/// Binds with `SO_REUSEADDR` (std sets it on Unix) so a restarted server
/// can reclaim its port while old connections sit in `TIME_WAIT`.
pub struct ChatListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ChatListener {
    /// Default bind host for the server.
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";

    /// Bind and listen on `host:port`.
    ///
    /// Port `0` asks the OS for a free port; read it back with
    /// [`ChatListener::local_addr`].
    pub fn bind(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind((host, port)).map_err(|e| TransportError::Bind {
            addr: addr.clone(),
            source: e,
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::Bind { addr, source: e })?;

        info!(%local_addr, "listening on tcp socket");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept one pending connection (blocking).
    ///
    /// Returns the stream together with the server-observed remote address.
    pub fn accept(&self) -> Result<(ChatStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%addr, "accepted connection");
        Ok((ChatStream::from_tcp(stream), addr))
    }

    /// Connect to a listening chat server (blocking).
    pub fn connect(host: &str, port: u16) -> Result<ChatStream> {
        let stream = TcpStream::connect((host, port)).map_err(|e| TransportError::Connect {
            addr: format!("{host}:{port}"),
            source: e,
        })?;
        debug!(host, port, "connected to chat server");
        Ok(ChatStream::from_tcp(stream))
    }

    /// The address this socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for ChatListener {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.listener.as_raw_fd()
    }
}

impl std::fmt::Debug for ChatListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatListener")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}
