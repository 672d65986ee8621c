// DSP pipeline - per-channel record processing
//
// One pipeline runs per digitizer channel: it pulls raw records from the
// vendor library, transforms them to the time domain, runs a windowed FFT,
// analyzes the spectrum (tones, spurs, figures of merit) and emits processed
// records on a bounded outbound queue.

pub mod average;
pub mod parameters;
pub mod pipeline;
pub mod tone;

pub use average::{MaximumHold, MovingAverage};
pub use parameters::{DspParameters, FrequencyDomainScaling};
pub use pipeline::{DspMessage, DspPipeline};
pub use tone::{fold_frequency, Tone};
