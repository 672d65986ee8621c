// Identification service - one-shot device enumeration
//
// A single pass over the vendor library: create a control unit, optionally
// redirect the vendor's error trace into the log directory, list devices,
// open the interface of every recognized product and construct one
// controller per opened device. The result is published on an outbound
// queue; an incompatible API still publishes a record so the frontend can
// present a dedicated error.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::digitizer::collaborators::{ScriptHost, WatcherFactory};
use crate::digitizer::Digitizer;
use crate::error::{CoreError, CoreResult};
use crate::sync::queue::{BoundedQueue, Timeout};
use crate::sync::worker::WorkerState;
use crate::vendor::DigitizerApi;

/// Vendor trace level used when redirecting the error log.
const ERROR_TRACE_LEVEL: u32 = 0x0001_0000;

/// The outcome of one identification pass.
#[derive(Clone)]
pub struct IdentificationResult {
    pub api_revision: u32,
    pub compatible: bool,
    pub digitizers: Vec<Arc<Digitizer>>,
}

/// Directories the identification service and the controllers rely on. Only
/// the configuration directory is required; an empty log directory disables
/// the vendor trace redirection.
#[derive(Debug, Clone, Default)]
pub struct PersistentDirectories {
    pub configuration: PathBuf,
    pub log: PathBuf,
}

/// One-shot worker enumerating compatible devices.
pub struct Identification {
    api: Arc<dyn DigitizerApi>,
    directories: PersistentDirectories,
    watcher_factory: Arc<dyn WatcherFactory>,
    script_host: Option<Arc<dyn ScriptHost>>,
    results: Arc<BoundedQueue<IdentificationResult>>,
    worker: Mutex<WorkerState>,
}

impl Identification {
    pub fn new(
        api: Arc<dyn DigitizerApi>,
        directories: PersistentDirectories,
        watcher_factory: Arc<dyn WatcherFactory>,
        script_host: Option<Arc<dyn ScriptHost>>,
    ) -> Self {
        Self {
            api,
            directories,
            watcher_factory,
            script_host,
            results: Arc::new(BoundedQueue::started()),
            worker: Mutex::new(WorkerState::new()),
        }
    }

    pub fn start(&self) -> CoreResult<()> {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_running() {
            return Err(CoreError::NotReady);
        }

        let api = Arc::clone(&self.api);
        let directories = self.directories.clone();
        let watcher_factory = Arc::clone(&self.watcher_factory);
        let script_host = self.script_host.clone();
        let results = Arc::clone(&self.results);

        worker.start("identification", move |_shutdown| {
            identify(api, directories, watcher_factory, script_host, &results)
        })
    }

    pub fn stop(&self) -> CoreResult<()> {
        let mut worker = self.worker.lock().unwrap();
        worker.stop(|| {}, || {})
    }

    /// Wait for the identification result.
    pub fn wait_for_result(&self, timeout: Timeout) -> CoreResult<IdentificationResult> {
        let (result, _) = self.results.read(timeout)?;
        Ok(result)
    }
}

fn identify(
    api: Arc<dyn DigitizerApi>,
    directories: PersistentDirectories,
    watcher_factory: Arc<dyn WatcherFactory>,
    script_host: Option<Arc<dyn ScriptHost>>,
    results: &BoundedQueue<IdentificationResult>,
) -> CoreResult<()> {
    log::trace!("Starting identification.");
    let revision = api.api_revision();

    /* Only an incompatible API aborts the pass; the record is published
       either way so the frontend can present the failure. */
    if !api.validate_api_version() {
        results.write(
            IdentificationResult {
                api_revision: revision,
                compatible: false,
                digitizers: Vec::new(),
            },
            Timeout::Immediate,
        )?;
        return Err(CoreError::internal("incompatible vendor API version"));
    }

    if !directories.log.as_os_str().is_empty() {
        if let Err(error) =
            api.enable_error_trace(ERROR_TRACE_LEVEL, &directories.log.to_string_lossy())
        {
            log::error!(
                "Failed to redirect trace logging to '{}': {}.",
                directories.log.display(),
                error
            );
        }
    }

    let devices = api.list_devices().map_err(|error| {
        log::error!("Failed to list devices: {}.", error);
        error
    })?;

    /* Filter for the recognized product family and open an interface for
       each hit. The subsequent vendor operations use 1-based indexing, so a
       controller gets `position + 1` as its control index. */
    let mut digitizers = Vec::new();
    for (position, device) in devices.iter().enumerate() {
        if !device.is_recognized() {
            continue;
        }
        if api.open_device_interface(position).is_err() {
            continue;
        }

        digitizers.push(Arc::new(Digitizer::new(
            Arc::clone(&api),
            position,
            position + 1,
            directories.configuration.clone(),
            Arc::clone(&watcher_factory),
            script_host.clone(),
        )));
    }

    log::info!(
        "Found {} compatible digitizers (out of {}).",
        digitizers.len(),
        devices.len()
    );

    results.write(
        IdentificationResult {
            api_revision: revision,
            compatible: true,
            digitizers,
        },
        Timeout::Immediate,
    )
}
