//! Single-threaded TCP chat relay.
//!
//! One server process accepts any number of clients and relays each
//! message to everyone else, from a single `poll(2)` loop with no
//! per-connection threads.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP listener/stream, readiness poll set, shutdown channel
//! - [`frame`]: 4-byte big-endian length-prefixed framing
//! - [`peer`]: Chat server and client event loops (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use chatrelay_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use chatrelay_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use chatrelay_peer::*;
}
