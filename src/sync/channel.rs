// Bidirectional id-stamped message channel
//
// A pair of queues carrying `Stamped` envelopes, one in each direction. The
// owning worker reads commands and posts events; the outside world pushes
// commands and waits for events. Fire-and-forget traffic uses id 0 while
// correlated request/response traffic gets a nonzero id from an atomic
// counter, so both kinds share one wire without interfering.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::CoreResult;
use crate::sync::queue::{BoundedQueue, Timeout};

/// A message envelope carrying the correlation id. Id 0 means "no id".
#[derive(Debug, Clone)]
pub struct Stamped<M> {
    pub id: u32,
    pub contents: M,
}

impl<M> Stamped<M> {
    pub fn new(contents: M) -> Self {
        Self { id: 0, contents }
    }

    pub fn with_id(id: u32, contents: M) -> Self {
        Self { id, contents }
    }
}

/// A bidirectional message channel between a worker and the outside world.
///
/// The channel is running from construction. A worker stops the queues while
/// joining its thread and restarts them afterwards so the outside world can
/// keep enqueueing messages for the next activation.
pub struct MessageChannel<M> {
    next_id: AtomicU32,
    /// World -> worker.
    inbound: BoundedQueue<Stamped<M>>,
    /// Worker -> world.
    outbound: BoundedQueue<Stamped<M>>,
}

impl<M: Clone> MessageChannel<M> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            inbound: BoundedQueue::started(),
            outbound: BoundedQueue::started(),
        }
    }

    /* World-facing interface. */

    /// Push a message without an id (fire-and-forget).
    pub fn push(&self, message: M) -> CoreResult<()> {
        self.inbound.write(Stamped::new(message), Timeout::Immediate)
    }

    /// Push a message and receive a unique nonzero id for response matching.
    pub fn push_with_id(&self, message: M) -> CoreResult<u32> {
        let id = self.assign_id();
        self.inbound
            .write(Stamped::with_id(id, message), Timeout::Immediate)?;
        Ok(id)
    }

    /// Wait for a message that was posted _without_ an id.
    pub fn wait(&self, timeout: Timeout) -> CoreResult<M> {
        let (stamped, _) = self.outbound.read_filtered(timeout, |m| m.id == 0)?;
        Ok(stamped.contents)
    }

    /// Wait for the message carrying this nonzero id.
    pub fn wait_for_id(&self, timeout: Timeout, id: u32) -> CoreResult<M> {
        let (stamped, _) = self
            .outbound
            .read_filtered(timeout, |m| m.id > 0 && m.id == id)?;
        Ok(stamped.contents)
    }

    /// Push a message and wait for its response as a single action. The
    /// response is guaranteed to be the one matching the assigned id.
    pub fn push_and_wait(&self, message: M, timeout: Timeout) -> CoreResult<M> {
        let id = self.push_with_id(message)?;
        self.wait_for_id(timeout, id)
    }

    /* Worker-facing interface. */

    /// Wait for the next inbound command, id stamp included.
    pub fn next_message(&self, timeout: Timeout) -> CoreResult<Stamped<M>> {
        let (stamped, _) = self.inbound.read(timeout)?;
        Ok(stamped)
    }

    /// Post an event without an id.
    pub fn post(&self, message: M) -> CoreResult<()> {
        self.outbound.write(Stamped::new(message), Timeout::Immediate)
    }

    /// Post a response stamped with the id of the command it answers.
    pub fn post_stamped(&self, id: u32, message: M) -> CoreResult<()> {
        self.outbound
            .write(Stamped::with_id(id, message), Timeout::Immediate)
    }

    /* Lifecycle, used by the owning worker around thread join. */

    pub fn start_queues(&self) -> CoreResult<()> {
        self.inbound.start()?;
        self.outbound.start()?;
        Ok(())
    }

    pub fn stop_queues(&self) -> CoreResult<()> {
        self.inbound.stop()?;
        self.outbound.stop()?;
        Ok(())
    }

    fn assign_id(&self) -> u32 {
        // Post-increment; zero is reserved to mean "no id", so ask again if
        // the counter wrapped.
        let mut id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if id == 0 {
            id = self.next_id.fetch_add(1, Ordering::Relaxed);
        }
        id
    }

    #[cfg(test)]
    fn set_next_id(&self, value: u32) {
        self.next_id.store(value, Ordering::Relaxed);
    }
}

impl<M: Clone> Default for MessageChannel<M> {
    fn default() -> Self {
        Self::new()
    }
}
