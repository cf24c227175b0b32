use crate::registry::ConnectionId;

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] chatrelay_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] chatrelay_frame::FrameError),

    /// The initial connection to the server could not be established.
    #[error("failed to connect to chat server at {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: chatrelay_transport::TransportError,
    },

    /// Handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// Handshake did not complete in time.
    #[error("handshake timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A connection was registered twice.
    #[error("connection {0} is already registered")]
    DuplicateRegistration(ConnectionId),

    /// A connection is not in the registry.
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),

    /// Local console or terminal I/O failed.
    #[error("console I/O error: {0}")]
    Console(std::io::Error),
}

pub type Result<T> = std::result::Result<T, PeerError>;
