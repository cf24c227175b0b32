//! Pollable shutdown channel.
//!
//! A connected socket pair: [`ShutdownHandle`] writes one byte to request
//! shutdown, and [`ShutdownSignal`] sits in the event loop's [`crate::PollSet`]
//! and becomes readable. Signal handlers only ever touch the handle.

use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, TransportError};

/// Create a connected shutdown handle/signal pair.
pub fn shutdown_channel() -> Result<(ShutdownHandle, ShutdownSignal)> {
    let (tx, rx) = UnixStream::pair()?;
    tx.set_nonblocking(true)?;
    rx.set_nonblocking(true)?;
    Ok((
        ShutdownHandle {
            tx: Arc::new(tx),
        },
        ShutdownSignal { rx },
    ))
}

/// Requests shutdown of the loop that owns the matching [`ShutdownSignal`].
///
/// Cheap to clone and safe to move into a signal-handler thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<UnixStream>,
}

impl ShutdownHandle {
    /// Request shutdown. Repeated calls are harmless.
    ///
    /// Returns [`TransportError::Shutdown`] if the signal side is gone.
    pub fn trigger(&self) -> Result<()> {
        match (&*self.tx).write(&[1]) {
            Ok(_) => Ok(()),
            // Buffer full means a wake-up is already pending.
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => self.trigger(),
            Err(err) if err.kind() == ErrorKind::BrokenPipe => Err(TransportError::Shutdown),
            Err(err) => Err(err.into()),
        }
    }
}

/// Readable end of the shutdown channel.
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: UnixStream,
}

impl ShutdownSignal {
    /// Consume pending wake-up bytes. Returns `true` if shutdown was requested.
    pub fn drain(&mut self) -> bool {
        let mut buf = [0u8; 64];
        let mut requested = false;
        loop {
            match self.rx.read(&mut buf) {
                Ok(0) => {
                    // Every handle dropped: nobody can ask again, treat as a request.
                    debug!("shutdown channel closed");
                    return true;
                }
                Ok(_) => requested = true,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return requested,
            }
        }
    }
}

impl AsRawFd for ShutdownSignal {
    fn as_raw_fd(&self) -> RawFd {
        self.rx.as_raw_fd()
    }
}
