use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use chatrelay_transport::Token;

use crate::error::{PeerError, Result};

/// Server-assigned identity of one accepted connection.
///
/// Ids increase monotonically and are never reused within a server's
/// lifetime, so a stale id can never alias a newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Poll token for this connection.
    pub fn token(self) -> Token {
        Token(self.0 as usize)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the server knows about a registered connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Remote address observed at accept time.
    pub addr: SocketAddr,
    /// Display name declared in the handshake.
    pub name: String,
}

impl RegistryEntry {
    /// Human-readable tag used in broadcast text: `@name@host`.
    pub fn label(&self) -> String {
        format!("@{}@{}", self.name, self.addr.ip())
    }
}

/// Maps live connections to their address and display name.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<ConnectionId, RegistryEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection. Fails if `id` is already present.
    pub fn register(&mut self, id: ConnectionId, addr: SocketAddr, name: &str) -> Result<()> {
        if self.entries.contains_key(&id) {
            return Err(PeerError::DuplicateRegistration(id));
        }
        self.entries.insert(
            id,
            RegistryEntry {
                addr,
                name: name.to_string(),
            },
        );
        Ok(())
    }

    pub fn lookup(&self, id: ConnectionId) -> Result<&RegistryEntry> {
        self.entries
            .get(&id)
            .ok_or(PeerError::UnknownConnection(id))
    }

    /// Remove a connection. Removing an absent id is a no-op.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<RegistryEntry> {
        self.entries.remove(&id)
    }

    /// `@name@host` for a registered connection.
    pub fn display_label(&self, id: ConnectionId) -> Result<String> {
        self.lookup(id).map(RegistryEntry::label)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered ids in ascending (join) order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.entries.keys().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = Registry::new();
        registry
            .register(ConnectionId(1), addr("127.0.0.1:50001"), "alice")
            .unwrap();

        let entry = registry.lookup(ConnectionId(1)).unwrap();
        assert_eq!(entry.name, "alice");
        assert_eq!(entry.addr.port(), 50001);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = Registry::new();
        registry
            .register(ConnectionId(1), addr("127.0.0.1:50001"), "alice")
            .unwrap();
        let err = registry
            .register(ConnectionId(1), addr("127.0.0.1:50002"), "mallory")
            .unwrap_err();

        assert!(matches!(err, PeerError::DuplicateRegistration(ConnectionId(1))));
        assert_eq!(registry.lookup(ConnectionId(1)).unwrap().name, "alice");
    }

    #[test]
    fn lookup_unknown_fails() {
        let registry = Registry::new();
        assert!(matches!(
            registry.lookup(ConnectionId(9)),
            Err(PeerError::UnknownConnection(ConnectionId(9)))
        ));
        assert!(matches!(
            registry.display_label(ConnectionId(9)),
            Err(PeerError::UnknownConnection(_))
        ));
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut registry = Registry::new();
        registry
            .register(ConnectionId(3), addr("10.0.0.5:4000"), "bob")
            .unwrap();

        assert!(registry.unregister(ConnectionId(3)).is_some());
        assert!(registry.unregister(ConnectionId(3)).is_none());
        assert!(registry.is_empty());
        assert!(!registry.contains(ConnectionId(3)));
    }

    #[test]
    fn display_label_uses_name_and_host_only() {
        let mut registry = Registry::new();
        registry
            .register(ConnectionId(2), addr("192.168.1.20:61000"), "carol")
            .unwrap();
        assert_eq!(
            registry.display_label(ConnectionId(2)).unwrap(),
            "@carol@192.168.1.20"
        );
    }

    #[test]
    fn ids_are_sorted() {
        let mut registry = Registry::new();
        for id in [5, 1, 3] {
            registry
                .register(ConnectionId(id), addr("127.0.0.1:1"), "x")
                .unwrap();
        }
        assert_eq!(
            registry.ids(),
            vec![ConnectionId(1), ConnectionId(3), ConnectionId(5)]
        );
    }

    #[test]
    fn connection_id_maps_to_token() {
        assert_eq!(ConnectionId(42).token(), Token(42));
        assert_eq!(ConnectionId(42).to_string(), "#42");
    }
}
