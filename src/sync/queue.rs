// Bounded thread-safe queue with persistent-tail replay
//
// The queue may have a finite capacity (infinite by default) and an optional
// persistent mode in which the last remaining value stays on the read port
// until a successor arrives. Persistent mode lets a writing thread publish
// *state* rather than events: the reader always sees the latest value, tagged
// `Last` on repeat deliveries. The queue also timestamps its write port so an
// owner can monitor liveness without extra coordination.
//
// Blocking reads and writes honor a timeout and observe `stop()` promptly:
// stopping notifies every waiter, which then returns `Interrupted`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{CoreError, CoreResult, ReadStatus};

/// Wait budget for a blocking queue operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Return `Again` immediately on contention.
    Immediate,
    /// Wait up to this many milliseconds, then return `Again`.
    Millis(u64),
    /// Wait until the operation completes or the queue is stopped.
    Forever,
}

impl Timeout {
    fn deadline(&self) -> Option<Instant> {
        match self {
            Timeout::Millis(ms) => Some(Instant::now() + Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

struct Inner<T> {
    queue: VecDeque<T>,
    is_started: bool,
    /// Persistent mode only: the current head has been delivered at least once.
    head_delivered: bool,
    last_write: Instant,
}

/// A thread-safe queue with optional capacity and persistent-tail mode.
///
/// `capacity == 0` means unbounded. The value type must be `Clone` because
/// persistent mode re-delivers the tail element; in practice the payloads are
/// `Arc` handles, so cloning is cheap.
pub struct BoundedQueue<T> {
    capacity: usize,
    persistent: bool,
    inner: Mutex<Inner<T>>,
    readable: Condvar,
    writable: Condvar,
}

impl<T: Clone> BoundedQueue<T> {
    pub fn new(capacity: usize, persistent: bool) -> Self {
        Self {
            capacity,
            persistent,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                is_started: false,
                head_delivered: false,
                last_write: Instant::now(),
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Create an unbounded, non-persistent queue.
    pub fn unbounded() -> Self {
        Self::new(0, false)
    }

    /// Create an unbounded queue that is already running.
    pub fn started() -> Self {
        let queue = Self::unbounded();
        queue.start().expect("fresh queue must accept start");
        queue
    }

    /// Enter the running state, resetting the contents and the activity
    /// timestamp. Returns `NotReady` if the queue is already running.
    pub fn start(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.is_started {
            return Err(CoreError::NotReady);
        }

        inner.queue.clear();
        inner.head_delivered = false;
        inner.last_write = Instant::now();
        inner.is_started = true;
        Ok(())
    }

    /// Signal shutdown. Any thread blocked in `read` or `write` wakes up and
    /// returns `Interrupted`. Returns `NotReady` if not running.
    pub fn stop(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.is_started {
            return Err(CoreError::NotReady);
        }

        inner.is_started = false;
        drop(inner);
        self.readable.notify_all();
        self.writable.notify_all();
        Ok(())
    }

    /// Append a value to the tail, waiting for space if the queue has a
    /// finite capacity. A successful write updates the activity timestamp.
    pub fn write(&self, value: T, timeout: Timeout) -> CoreResult<()> {
        let deadline = timeout.deadline();
        let mut slot = Some(value);
        let mut inner = self.inner.lock().unwrap();
        if !inner.is_started {
            return Err(CoreError::NotReady);
        }

        loop {
            if self.capacity == 0 || inner.queue.len() < self.capacity {
                if inner.queue.is_empty() {
                    inner.head_delivered = false;
                }
                inner.queue.push_back(slot.take().expect("value written once"));
                inner.last_write = Instant::now();
                drop(inner);
                self.readable.notify_all();
                return Ok(());
            }

            inner = self.wait_for_wakeup(&self.writable, inner, timeout, deadline)?;
        }
    }

    /// Return the head of the queue, waiting for a value if necessary.
    pub fn read(&self, timeout: Timeout) -> CoreResult<(T, ReadStatus)> {
        self.read_filtered(timeout, |_| true)
    }

    /// Return the first value accepted by the predicate, waiting if none
    /// matches yet. Earlier non-matching values stay buffered, which is what
    /// makes request/response matching on a shared wire possible.
    pub fn read_filtered<F>(&self, timeout: Timeout, predicate: F) -> CoreResult<(T, ReadStatus)>
    where
        F: Fn(&T) -> bool,
    {
        let deadline = timeout.deadline();
        let mut inner = self.inner.lock().unwrap();
        if !inner.is_started {
            return Err(CoreError::NotReady);
        }

        loop {
            if let Some(position) = inner.queue.iter().position(&predicate) {
                return Ok(self.take(&mut inner, position));
            }

            inner = self.wait_for_wakeup(&self.readable, inner, timeout, deadline)?;
        }
    }

    /// Monotonic time elapsed since the last successful write. Fails with
    /// `NotReady` before `start`.
    pub fn time_since_last_write(&self) -> CoreResult<Duration> {
        let inner = self.inner.lock().unwrap();
        if !inner.is_started {
            return Err(CoreError::NotReady);
        }
        Ok(inner.last_write.elapsed())
    }

    pub fn is_full(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        self.capacity > 0 && inner.queue.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().queue.is_empty()
    }

    /// Remove the value at `position`, honoring persistent-tail semantics for
    /// the head: the sole remaining element is not popped, and repeat
    /// deliveries of a head are tagged `Last`. A stale head with a successor
    /// already queued is popped and delivered one final time.
    fn take(&self, inner: &mut Inner<T>, position: usize) -> (T, ReadStatus) {
        if self.persistent && position == 0 {
            let delivered = inner.head_delivered;
            let status = if delivered {
                ReadStatus::Last
            } else {
                ReadStatus::Ok
            };

            if inner.queue.len() > 1 {
                let value = inner.queue.pop_front().expect("head checked above");
                inner.head_delivered = false;
                self.writable.notify_all();
                (value, status)
            } else {
                let value = inner.queue.front().expect("head checked above").clone();
                inner.head_delivered = true;
                (value, status)
            }
        } else {
            let value = inner.queue.remove(position).expect("position checked above");
            if position == 0 {
                inner.head_delivered = false;
            }
            self.writable.notify_all();
            (value, ReadStatus::Ok)
        }
    }

    fn wait_for_wakeup<'a>(
        &self,
        condvar: &Condvar,
        inner: std::sync::MutexGuard<'a, Inner<T>>,
        timeout: Timeout,
        deadline: Option<Instant>,
    ) -> CoreResult<std::sync::MutexGuard<'a, Inner<T>>> {
        let inner = match timeout {
            Timeout::Immediate => return Err(CoreError::Again),
            Timeout::Forever => condvar.wait(inner).unwrap(),
            Timeout::Millis(_) => {
                let deadline = deadline.expect("deadline set for finite timeout");
                let now = Instant::now();
                if now >= deadline {
                    return Err(CoreError::Again);
                }
                let (inner, _) = condvar.wait_timeout(inner, deadline - now).unwrap();
                inner
            }
        };

        if !inner.is_started {
            return Err(CoreError::Interrupted);
        }
        Ok(inner)
    }
}
