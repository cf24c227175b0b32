//! Chat server and client event loops.
//!
//! This is the "just works" layer. [`ChatServer`] relays messages between
//! every connected client from one `poll(2)` loop; [`ChatClient`] joins a
//! server and multiplexes terminal input with incoming chat.

pub mod broadcast;
pub mod client;
pub mod error;
pub mod handshake;
pub mod notice;
pub mod registry;
pub mod server;

pub use broadcast::{BroadcastOutcome, BroadcastSet, FrameSink};
pub use client::{ChatClient, ChatView, ClientConfig, ClientState, DisconnectReason, TextView};
pub use error::{PeerError, Result};
pub use handshake::{
    handshake_client, handshake_server, HandshakeConfig, HandshakeResult, CLIENT_PREFIX,
    NAME_PREFIX,
};
pub use registry::{ConnectionId, Registry, RegistryEntry};
pub use server::{ChatServer, ServerConfig, ServerState};
