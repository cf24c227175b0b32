//! Fan-out of one frame to every eligible connection.

use std::io::Write;

use chatrelay_frame::{Frame, FrameError, FrameWriter};
use tracing::{debug, warn};

use crate::registry::ConnectionId;

/// Destination for outbound frames.
pub trait FrameSink {
    fn send_frame(&mut self, frame: &Frame) -> chatrelay_frame::Result<()>;
}

impl<W: Write> FrameSink for FrameWriter<W> {
    fn send_frame(&mut self, frame: &Frame) -> chatrelay_frame::Result<()> {
        self.write_frame(frame)
    }
}

/// Result of one [`BroadcastSet::broadcast`] pass.
#[derive(Debug, Default)]
pub struct BroadcastOutcome {
    /// Number of members the frame was written to.
    pub delivered: usize,
    /// Members whose send failed, in the order they were attempted.
    pub failed: Vec<(ConnectionId, FrameError)>,
}

impl BroadcastOutcome {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Connections eligible to receive broadcasts, in insertion order.
///
/// Each member owns the sink its frames are written to, so leaving the set
/// and losing the ability to be written to are the same step.
#[derive(Debug)]
pub struct BroadcastSet<S> {
    members: Vec<(ConnectionId, S)>,
}

impl<S> Default for BroadcastSet<S> {
    fn default() -> Self {
        Self {
            members: Vec::new(),
        }
    }
}

impl<S: FrameSink> BroadcastSet<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a member. Hands the sink back if `id` is already present.
    pub fn insert(&mut self, id: ConnectionId, sink: S) -> Result<(), S> {
        if self.contains(id) {
            return Err(sink);
        }
        self.members.push((id, sink));
        Ok(())
    }

    /// Remove a member, preserving the order of the rest.
    pub fn remove(&mut self, id: ConnectionId) -> Option<S> {
        let index = self.members.iter().position(|(m, _)| *m == id)?;
        Some(self.members.remove(index).1)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.iter().any(|(m, _)| *m == id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member ids in iteration order.
    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.members.iter().map(|(id, _)| *id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut S> {
        self.members
            .iter_mut()
            .find(|(m, _)| *m == id)
            .map(|(_, sink)| sink)
    }

    /// Send `frame` to every member except `exclude`, in insertion order.
    ///
    /// A failed send does not stop the pass. Failures are returned so the
    /// caller can tear those connections down; the set itself is unchanged.
    pub fn broadcast(&mut self, exclude: Option<ConnectionId>, frame: &Frame) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();
        for (id, sink) in self.members.iter_mut() {
            if Some(*id) == exclude {
                continue;
            }
            match sink.send_frame(frame) {
                Ok(()) => outcome.delivered += 1,
                Err(err) => {
                    warn!(connection = %id, error = %err, "broadcast send failed");
                    outcome.failed.push((*id, err));
                }
            }
        }
        debug!(
            delivered = outcome.delivered,
            failed = outcome.failed.len(),
            size = frame.payload.len(),
            "broadcast complete"
        );
        outcome
    }

    /// Drain every member, in order.
    pub fn drain(&mut self) -> impl Iterator<Item = (ConnectionId, S)> + '_ {
        self.members.drain(..)
    }
}
