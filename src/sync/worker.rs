// Worker-thread lifecycle and buffer preservation
//
// Workers in this crate follow one pattern: a background thread runs a main
// loop that polls a shutdown token every iteration, and the owner coordinates
// start/stop around the thread join. Stopping first stops the worker's queues
// so blocked endpoints return `Interrupted`, then signals the token, joins,
// and restarts the queues so the outside world can keep enqueueing messages
// for the next activation.
//
// The buffer registry backs the raw-pointer interop path: one reference per
// issued pointer, keyed by the pointer's numeric identity, released only on
// an explicit return.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::error::{CoreError, CoreResult};

/// One-shot cooperative shutdown signal shared between an owner and its
/// worker thread.
#[derive(Clone)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn signal(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Zero-timeout poll, called once per main-loop iteration.
    pub fn is_signalled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread handle, shutdown token and exit code of one worker.
///
/// Owners keep this behind a mutex; the generic start/stop choreography lives
/// here so the message workers and buffer workers do not repeat it.
pub struct WorkerState {
    thread: Option<JoinHandle<CoreResult<()>>>,
    shutdown: ShutdownToken,
}

impl WorkerState {
    pub fn new() -> Self {
        Self {
            thread: None,
            shutdown: ShutdownToken::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Launch the worker thread. Returns `NotReady` if already running.
    pub fn start<F>(&mut self, name: &str, body: F) -> CoreResult<()>
    where
        F: FnOnce(ShutdownToken) -> CoreResult<()> + Send + 'static,
    {
        if self.thread.is_some() {
            return Err(CoreError::NotReady);
        }

        self.shutdown = ShutdownToken::new();
        let token = self.shutdown.clone();
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(token))
            .map_err(|e| CoreError::internal(format!("failed to spawn worker thread: {}", e)))?;

        self.thread = Some(thread);
        Ok(())
    }

    /// Stop the worker: run `before_join` (stop queues, unblocking the
    /// thread), signal shutdown, join, run `after_join` (restart queues).
    /// Returns the thread's exit result. `NotReady` if not running.
    pub fn stop(
        &mut self,
        before_join: impl FnOnce(),
        after_join: impl FnOnce(),
    ) -> CoreResult<()> {
        let thread = self.thread.take().ok_or(CoreError::NotReady)?;

        before_join();
        self.shutdown.signal();

        let exit = thread
            .join()
            .map_err(|_| CoreError::internal("worker thread panicked"));
        after_join();
        exit?
    }
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry holding one reference per raw pointer issued to a foreign
/// caller. The registry is the sole source of freeing: dropping the entry on
/// `release` is what lets the use count reach zero.
pub struct BufferRegistry<R> {
    preserved: Mutex<HashMap<usize, Arc<R>>>,
}

impl<R> BufferRegistry<R> {
    pub fn new() -> Self {
        Self {
            preserved: Mutex::new(HashMap::new()),
        }
    }

    /// Keep `buffer` alive and hand out its raw pointer.
    pub fn preserve(&self, buffer: Arc<R>) -> *const R {
        let pointer = Arc::as_ptr(&buffer);
        self.preserved
            .lock()
            .unwrap()
            .insert(pointer as usize, buffer);
        pointer
    }

    /// Release the reference tracked for `pointer`. `Invalid` if the pointer
    /// was never preserved (or was already returned).
    pub fn release(&self, pointer: *const R) -> CoreResult<()> {
        match self.preserved.lock().unwrap().remove(&(pointer as usize)) {
            Some(_) => Ok(()),
            None => Err(CoreError::invalid(format!(
                "unknown buffer pointer {:p}",
                pointer
            ))),
        }
    }

    /// Drop every tracked reference. Called when the owning worker stops.
    pub fn clear(&self) {
        self.preserved.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.preserved.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.preserved.lock().unwrap().is_empty()
    }
}

impl<R> Default for BufferRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}
