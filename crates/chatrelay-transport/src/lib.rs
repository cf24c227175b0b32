//! TCP transport and readiness primitives for chatrelay.
//!
//! This is the lowest layer of chatrelay. It provides:
//! - [`ChatListener`] / [`ChatStream`] over loopback or LAN TCP
//! - [`PollSet`], a small `poll(2)` wrapper that reports readable sources
//!   in registration order
//! - [`shutdown_channel`], a pollable wake channel used in place of
//!   process-wide signal handlers
//!
//! Nothing here spawns threads; the event loops above drive everything
//! from one call to [`PollSet::wait`].

pub mod error;
#[cfg(unix)]
pub mod poll;
#[cfg(unix)]
pub mod shutdown;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
#[cfg(unix)]
pub use poll::{PollSet, Token};
#[cfg(unix)]
pub use shutdown::{shutdown_channel, ShutdownHandle, ShutdownSignal};
pub use stream::ChatStream;
pub use tcp::ChatListener;
