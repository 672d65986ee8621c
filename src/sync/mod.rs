// Concurrency substrate - bounded queues, stamped message channels and
// worker threads
//
// Everything above this module communicates through these primitives: the
// DSP pipelines and the digitizer controllers are worker threads wired
// together with bounded queues, and the UI-facing command traffic runs over
// id-stamped message channels.

pub mod channel;
pub mod queue;
pub mod worker;

pub use channel::{MessageChannel, Stamped};
pub use queue::{BoundedQueue, Timeout};
pub use worker::{BufferRegistry, ShutdownToken, WorkerState};
