use std::io::ErrorKind;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use tracing::trace;

use crate::error::{Result, TransportError};

/// Identifies one source registered in a [`PollSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub usize);

/// The set of file descriptors waited on for readability.
///
/// Backed by `poll(2)`, level-triggered. Sources are reported in the order
/// they were added, which is the order the kernel walks the `pollfd` array.
/// Hang-up and error conditions count as readable so the owner finds out
/// through its next read.
#[derive(Default)]
pub struct PollSet {
    sources: Vec<(Token, RawFd)>,
    fds: Vec<libc::pollfd>,
}

impl std::fmt::Debug for PollSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollSet")
            .field("sources", &self.sources)
            .finish()
    }
}

impl PollSet {
    /// Create an empty poll set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source. Returns `false` if `token` is already present.
    pub fn add(&mut self, token: Token, source: &impl AsRawFd) -> bool {
        if self.contains(token) {
            return false;
        }
        self.sources.push((token, source.as_raw_fd()));
        true
    }

    /// Remove a source. Returns `false` if `token` was not present.
    pub fn remove(&mut self, token: Token) -> bool {
        match self.sources.iter().position(|(t, _)| *t == token) {
            Some(index) => {
                self.sources.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, token: Token) -> bool {
        self.sources.iter().any(|(t, _)| *t == token)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Block until at least one source is readable or `timeout` elapses.
    ///
    /// `None` waits indefinitely. Returns the ready tokens in registration
    /// order; an empty vector means the timeout expired. `EINTR` restarts
    /// the wait. Any other failure is [`TransportError::Poll`].
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<Token>> {
        self.fds.clear();
        self.fds.extend(self.sources.iter().map(|(_, fd)| libc::pollfd {
            fd: *fd,
            events: libc::POLLIN,
            revents: 0,
        }));

        let timeout_ms = timeout_to_millis(timeout);

        let ready = loop {
            // SAFETY: `fds` is a valid, initialized slice of `pollfd` whose
            // length is passed alongside it; poll only writes `revents`.
            let rc = unsafe {
                libc::poll(
                    self.fds.as_mut_ptr(),
                    self.fds.len() as libc::nfds_t,
                    timeout_ms,
                )
            };
            if rc >= 0 {
                break rc as usize;
            }
            let err = std::io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(TransportError::Poll(err));
        };

        let mut tokens = Vec::with_capacity(ready);
        if ready == 0 {
            return Ok(tokens);
        }

        let mask = libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
        for ((token, _), pfd) in self.sources.iter().zip(self.fds.iter()) {
            if pfd.revents & mask != 0 {
                trace!(token = token.0, revents = pfd.revents, "source ready");
                tokens.push(*token);
            }
        }
        Ok(tokens)
    }
}

fn timeout_to_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_millis();
            // Round sub-millisecond waits up so they do not become busy polls.
            let ms = if ms == 0 && !d.is_zero() { 1 } else { ms };
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}
