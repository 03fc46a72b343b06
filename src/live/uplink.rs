//! Outbound audio channel
//!
//! Capture starts before the connection exists. Blocks submitted while the
//! handshake is pending wait in a bounded queue that is drained exactly once,
//! in submission order, when the connection opens. After that every block
//! goes straight to the connection writer.

use std::collections::VecDeque;

use tokio::sync::mpsc;

use super::protocol::ClientMessage;
use crate::{Error, Result};

/// Non-blocking destination for outbound messages
pub trait FrameSink {
    /// Hand a message to the connection writer without waiting
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the writer is gone
    fn send_frame(&self, message: ClientMessage) -> Result<()>;
}

impl FrameSink for mpsc::UnboundedSender<ClientMessage> {
    fn send_frame(&self, message: ClientMessage) -> Result<()> {
        self.send(message)
            .map_err(|_| Error::Transport("connection writer closed".to_string()))
    }
}

/// What happened to a submitted block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Forwarded to the connection
    Sent,
    /// Held until the handshake completes
    Queued,
    /// Dropped: the handshake failed or the channel is closed
    Discarded,
}

enum State<S> {
    Pending(VecDeque<ClientMessage>),
    Open(S),
    Failed,
    Closed,
}

/// Ordered outbound channel over a possibly not-yet-open connection
pub struct Uplink<S> {
    state: State<S>,
    capacity: usize,
    overflowed: u64,
}

impl<S: FrameSink> Uplink<S> {
    /// Create a pending uplink holding at most `capacity` blocks
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: State::Pending(VecDeque::new()),
            capacity: capacity.max(1),
            overflowed: 0,
        }
    }

    /// Submit one message in capture order
    ///
    /// While pending and full, the oldest queued block is dropped to make
    /// room; capture never waits on the network.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the open connection's writer is gone
    pub fn submit(&mut self, message: ClientMessage) -> Result<Delivery> {
        match &mut self.state {
            State::Pending(queue) => {
                if queue.len() >= self.capacity {
                    queue.pop_front();
                    self.overflowed += 1;
                    if self.overflowed == 1 || self.overflowed % 64 == 0 {
                        tracing::warn!(
                            overflowed = self.overflowed,
                            capacity = self.capacity,
                            "handshake pending, dropping oldest queued audio"
                        );
                    }
                }
                queue.push_back(message);
                Ok(Delivery::Queued)
            }
            State::Open(sink) => {
                sink.send_frame(message)?;
                Ok(Delivery::Sent)
            }
            State::Failed | State::Closed => Ok(Delivery::Discarded),
        }
    }

    /// Attach the live connection and flush queued blocks in order
    ///
    /// Returns the number of blocks flushed. Ignored unless pending.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the writer goes away mid-flush
    pub fn open(&mut self, sink: S) -> Result<usize> {
        let queue = match std::mem::replace(&mut self.state, State::Closed) {
            State::Pending(queue) => queue,
            other => {
                self.state = other;
                return Ok(0);
            }
        };

        let flushed = queue.len();
        for message in queue {
            sink.send_frame(message)?;
        }
        self.state = State::Open(sink);

        tracing::debug!(flushed, "uplink open");
        Ok(flushed)
    }

    /// The handshake failed: discard queued blocks and ignore later ones
    ///
    /// Returns how many queued blocks were discarded.
    pub fn fail(&mut self) -> usize {
        let discarded = match &self.state {
            State::Pending(queue) => queue.len(),
            _ => 0,
        };
        if !matches!(self.state, State::Closed) {
            self.state = State::Failed;
        }
        discarded
    }

    /// Detach from the connection; later submissions are discarded
    pub fn close(&mut self) {
        self.state = State::Closed;
    }

    /// Blocks waiting for the handshake
    #[must_use]
    pub fn pending(&self) -> usize {
        match &self.state {
            State::Pending(queue) => queue.len(),
            _ => 0,
        }
    }

    /// Whether blocks are currently forwarded directly
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, State::Open(_))
    }

    /// Blocks dropped because the pending queue was full
    #[must_use]
    pub const fn overflowed(&self) -> u64 {
        self.overflowed
    }
}
