use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::protocol::OutboundCommand;
use crate::transport::Transport;

/// Outbound commands waiting on the device.
///
/// The device only copes with one command at a time, so the head of the queue is always the one
/// command on the wire. It stays there until the device acknowledges something, at which point the
/// next command goes out.
#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: VecDeque<OutboundCommand>,
    stats: QueueStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub commands_written: u32,
    pub acknowledgements: u32,
    pub unexpected_acknowledgements: u32,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue<T: Transport + ?Sized>(&mut self, command: OutboundCommand, transport: &mut T) {
        if self.pending.is_empty() {
            debug!("Writing command immediately: {}", command);
            self.write(&command, transport);
        } else {
            debug!("Queued command: {} ({} ahead)", command, self.pending.len());
        }
        self.pending.push_back(command);
    }

    /// Retire the command in flight and send the next one, if any.
    ///
    /// Returns false when nothing was outstanding; `trigger` is the device line that prompted the
    /// call and is only used for the diagnostic.
    pub fn acknowledge<T: Transport + ?Sized>(&mut self, trigger: &str, transport: &mut T) -> bool {
        if self.pending.pop_front().is_none() {
            self.stats.unexpected_acknowledgements =
                self.stats.unexpected_acknowledgements.saturating_add(1);
            warn!("Got response to command we didn't issue, ignoring: {}", trigger);
            return false;
        }
        self.stats.acknowledgements = self.stats.acknowledgements.saturating_add(1);

        if let Some(next) = self.pending.front() {
            debug!(
                "Writing queued command: {} ({} left)",
                next,
                self.pending.len()
            );
            let next = next.clone();
            self.write(&next, transport);
        }
        true
    }

    pub fn in_flight(&self) -> Option<&OutboundCommand> {
        self.pending.front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    fn write<T: Transport + ?Sized>(&mut self, command: &OutboundCommand, transport: &mut T) {
        transport.write(command.as_bytes());
        self.stats.commands_written = self.stats.commands_written.saturating_add(1);
    }
}
