// Wavescope Core - digitizer acquisition and spectral analysis
//
// Library core of a multi-device digitizer instrument: per-channel DSP
// pipelines (windowed FFT, tone identification, ADC figures of merit), a
// threaded controller state machine per digitizer, and the bounded-queue
// concurrency substrate they are built on. The GUI, the filesystem watchers
// and the embedded scripting host are external collaborators behind the
// interfaces in `digitizer::collaborators`.

// Module declarations
pub mod digitizer;
pub mod dsp;
pub mod error;
pub mod format;
pub mod identification;
pub mod sync;
pub mod system_manager;
pub mod types;
pub mod vendor;
pub mod window;

// Re-exports for convenience
pub use digitizer::messages::{DigitizerCommand, DigitizerMessage, DigitizerState};
pub use digitizer::Digitizer;
pub use dsp::{DspMessage, DspParameters, DspPipeline};
pub use error::{CoreError, CoreResult, ReadStatus, StatusCodes};
pub use identification::{Identification, IdentificationResult, PersistentDirectories};
pub use sync::{BoundedQueue, MessageChannel, Timeout};

/// Install the process-wide logger. The library itself only talks to the
/// `log` facade; call this once at startup (or install another subscriber)
/// to see its output. Safe to call more than once.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
