// Collaborator interfaces of the digitizer controller
//
// The controller leans on two external collaborators: per-file watchers for
// the parameter blobs, and an embedded scripting host. Both live outside
// this crate; only the seams the controller drives are defined here. Tests
// supply in-memory implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::sync::queue::BoundedQueue;

/// Event emitted by a parameter-file watcher.
#[derive(Debug, Clone)]
pub enum WatcherEvent {
    FileCreated(Arc<String>),
    FileUpdated(Arc<String>),
    FileDoesNotExist,
    FileDeleted,
}

/// Command sent to a parameter-file watcher.
#[derive(Debug, Clone)]
pub enum WatcherCommand {
    /// Replace the file contents. With `suppress_echo` the watcher must not
    /// answer with a `FileUpdated` event: the new contents mirror the
    /// device's current state and need not be reapplied.
    UpdateFile {
        contents: Arc<String>,
        suppress_echo: bool,
    },
}

/// The controller-facing handle of one file watcher.
pub struct WatcherHandle {
    pub path: PathBuf,
    /// Watcher -> controller.
    pub events: Arc<BoundedQueue<WatcherEvent>>,
    /// Controller -> watcher.
    pub commands: Arc<BoundedQueue<WatcherCommand>>,
}

impl WatcherHandle {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            events: Arc::new(BoundedQueue::started()),
            commands: Arc::new(BoundedQueue::started()),
        }
    }
}

/// Creates watchers for the per-device parameter files.
pub trait WatcherFactory: Send + Sync {
    fn watch(&self, path: &Path) -> WatcherHandle;
}

/// The embedded scripting host. `call_main` runs `main()` in the named
/// module against the device at `index`, returning captured output either
/// way.
pub trait ScriptHost: Send + Sync {
    fn call_main(&self, module: &str, index: usize) -> Result<String, String>;
}
