//! Presentation text the server broadcasts.
//!
//! These strings are for humans. Clients display them verbatim and never
//! parse them.

/// Join notice sent to existing members when a client connects.
///
/// `clients` is the number of connected clients including the newcomer.
pub fn joined(clients: usize, label: &str) -> String {
    format!("\n(Connected: New client ({clients}) from {label})")
}

/// Leave notice sent to the remaining members when a client goes away.
pub fn hung_up(label: &str) -> String {
    format!("\n(Now hung up: Client from {label})")
}

/// A relayed chat line.
pub fn chat_line(label: &str, content: &str) -> String {
    format!("\n#[{label}]>> {content}")
}
